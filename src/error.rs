//! Error types for the mediator

use std::path::PathBuf;

use thiserror::Error;

/// Result type for mediator operations
pub type Result<T> = std::result::Result<T, MediatorError>;

/// Errors raised by the local repository, the parser and the mediation engine
#[derive(Error, Debug)]
pub enum MediatorError {
    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("{0}")]
    NotFound(String),

    #[error("{0}")]
    Parse(String),

    #[error("{context}: {source}")]
    Io {
        context: String,
        #[source]
        source: std::io::Error,
    },

    #[error("{0}")]
    Validation(String),

    #[error(transparent)]
    Registry(#[from] RegistryError),

    #[error("{0}")]
    Mediation(String),
}

impl MediatorError {
    /// Wrap an I/O error with a message naming what was being read
    pub fn io(context: impl Into<String>, source: std::io::Error) -> Self {
        Self::Io {
            context: context.into(),
            source,
        }
    }
}

/// Errors raised by a [`crate::registry::RegistryGateway`]
#[derive(Error, Debug)]
pub enum RegistryError {
    /// The registry has no resource for the request (subject, version or id)
    #[error("No results found for {0}")]
    NotFound(String),

    #[error("An error occurred when communicating with the schema registry: {0}")]
    Communication(String),

    #[error("Registry storage error at {path}: {source}")]
    Storage {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Git error: {0}")]
    Git(#[from] git2::Error),

    #[error("Invalid schema in registry: {0}")]
    InvalidSchema(String),

    #[error("Schema being registered is incompatible with an earlier schema for subject {subject}: {details}")]
    Incompatible { subject: String, details: String },
}

impl RegistryError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, RegistryError::NotFound(_))
    }
}
