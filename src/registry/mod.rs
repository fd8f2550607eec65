//! Schema registry access
//!
//! The mediation engine talks to the registry only through [`RegistryGateway`].
//! [`DirectoryRegistry`] is a registry kept in a local directory under git.

mod directory;

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::error::RegistryError;
use crate::schema::Schema;

pub use directory::{DirectoryRegistry, RegisteredSchema};

/// A registered schema version as the registry reports it
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SchemaMetadata {
    pub id: u32,
    pub version: u32,
    /// Avro JSON text
    pub schema: String,
}

/// Operations the mediator needs from a schema registry
pub trait RegistryGateway {
    /// Register `schema` under `subject`, returning its id. Registering a
    /// schema that is already the subject's latest returns the existing id.
    fn register(&self, subject: &str, schema: &Schema) -> Result<u32, RegistryError>;

    /// Metadata of the latest version under `subject`
    fn latest_metadata(&self, subject: &str) -> Result<SchemaMetadata, RegistryError>;

    /// All version numbers under `subject`, ascending
    fn versions(&self, subject: &str) -> Result<Vec<u32>, RegistryError>;

    /// Whether `schema` may be registered as the next version of `subject`
    fn test_compatibility(&self, subject: &str, schema: &Schema) -> Result<bool, RegistryError>;

    fn list_subjects(&self) -> Result<Vec<String>, RegistryError>;

    /// Latest schema under `subject`; [`RegistryError::NotFound`] if none
    fn latest_schema(&self, subject: &str) -> Result<Schema, RegistryError> {
        let metadata = self.latest_metadata(subject)?;
        Schema::parse_str(&metadata.schema)
            .map_err(|e| RegistryError::InvalidSchema(format!("{} (subject {})", e, subject)))
    }

    /// Subject → latest schema for every subject in the registry
    fn current_schema_map(&self) -> Result<BTreeMap<String, Schema>, RegistryError> {
        let mut map = BTreeMap::new();
        for subject in self.list_subjects()? {
            let schema = self.latest_schema(&subject)?;
            map.insert(subject, schema);
        }
        Ok(map)
    }
}

impl<T: RegistryGateway + ?Sized> RegistryGateway for &T {
    fn register(&self, subject: &str, schema: &Schema) -> Result<u32, RegistryError> {
        (**self).register(subject, schema)
    }

    fn latest_metadata(&self, subject: &str) -> Result<SchemaMetadata, RegistryError> {
        (**self).latest_metadata(subject)
    }

    fn versions(&self, subject: &str) -> Result<Vec<u32>, RegistryError> {
        (**self).versions(subject)
    }

    fn test_compatibility(&self, subject: &str, schema: &Schema) -> Result<bool, RegistryError> {
        (**self).test_compatibility(subject, schema)
    }

    fn list_subjects(&self) -> Result<Vec<String>, RegistryError> {
        (**self).list_subjects()
    }

    fn latest_schema(&self, subject: &str) -> Result<Schema, RegistryError> {
        (**self).latest_schema(subject)
    }

    fn current_schema_map(&self) -> Result<BTreeMap<String, Schema>, RegistryError> {
        (**self).current_schema_map()
    }
}
