//! Avro Schema Mediator
//!
//! Keeps a directory of Avro IDL schema sources in step with a schema registry.
//!
//! ## Features
//!
//! - **Local Repository**: Enumerates sources by item type and validates their layout
//! - **Naming Conventions**: File names, subjects and namespaces derive from each other
//! - **Sync**: Registers every local schema that differs from the registry
//! - **Compatibility Reports**: Explains backward and forward incompatibilities
//! - **Directory Registry**: A git-backed registry for local and offline use
//!
//! ## Layout
//!
//! ```text
//! schemas/
//! ├── common/
//! │   └── Address.avdl          → subject address-value
//! └── event/
//!     ├── ClickEvent.avdl       → subject click-event-value
//!     └── checkout/
//!         └── OrderPlaced.avdl  → namespace events.schemas.checkout
//! ```

pub mod compatibility;
pub mod config;
pub mod error;
pub mod idl;
pub mod item;
pub mod mediation;
pub mod naming;
pub mod registry;
pub mod repo;
pub mod report;
pub mod schema;

pub use compatibility::{
    AvroCompatibility, CompatibilityCheck, CompatibilityEvaluator, CompatibilityMode,
    Incompatibility, IncompatibilityKind,
};
pub use config::MediatorConfig;
pub use error::{MediatorError, RegistryError, Result};
pub use idl::{IdlParser, Protocol, SchemaParser};
pub use item::{ItemType, RepoItem};
pub use mediation::MediationEngine;
pub use registry::{DirectoryRegistry, RegistryGateway, SchemaMetadata};
pub use repo::{LocalRepository, SchemaSnapshot};
pub use report::OutcomeMap;
pub use schema::{Name, Schema};
