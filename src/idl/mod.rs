//! Schema source parsing
//!
//! The local repository does not care how a source file becomes a schema; it
//! asks a [`SchemaParser`] for the compiled unit and picks the type named
//! after the file. [`IdlParser`] is the implementation for Avro IDL (`.avdl`).

mod lexer;
mod parser;

use std::fs;
use std::path::Path;

use crate::error::{MediatorError, Result};
use crate::schema::{Name, Schema};

pub use lexer::{IdlLexer, Token, TokenKind};
pub use parser::{parse_protocol, parse_protocol_at};

/// A compiled source file: a named protocol and the types it declares
#[derive(Debug, Clone)]
pub struct Protocol {
    pub name: Name,
    /// Declared types, each self-contained
    pub types: Vec<Schema>,
}

impl Protocol {
    /// Find a declared type by its simple name
    pub fn get_type(&self, name: &str) -> Option<&Schema> {
        self.types
            .iter()
            .find(|t| t.name().map(|n| n.name == name).unwrap_or(false))
    }

    pub fn take_type(self, name: &str) -> Option<Schema> {
        self.types
            .into_iter()
            .find(|t| t.name().map(|n| n.name == name).unwrap_or(false))
    }
}

/// Turns schema source files into compiled protocols
pub trait SchemaParser {
    /// File extension of sources this parser understands, without the dot
    fn extension(&self) -> &str;

    /// Compile a source file.
    ///
    /// Fails with [`MediatorError::Io`] if the file cannot be read and with
    /// [`MediatorError::Parse`] if it is not a valid compilation unit.
    fn parse_protocol(&self, path: &Path) -> Result<Protocol>;

    /// Compile a source file and extract one named type; `None` if the unit
    /// does not declare it
    fn extract(&self, path: &Path, type_name: &str) -> Result<Option<Schema>> {
        Ok(self.parse_protocol(path)?.take_type(type_name))
    }
}

/// Avro IDL parser
#[derive(Debug, Clone, Default)]
pub struct IdlParser;

impl IdlParser {
    pub const EXTENSION: &'static str = "avdl";

    pub fn new() -> Self {
        Self
    }

    /// Compile IDL source text that has no imports
    pub fn parse_source(&self, source: &str) -> Result<Protocol> {
        check_with_avro(parse_protocol(source).map_err(MediatorError::Parse)?)
    }
}

fn check_with_avro(protocol: Protocol) -> Result<Protocol> {
    for schema in &protocol.types {
        schema.check_with_avro().map_err(|e| {
            let name = schema.name().map(Name::fullname).unwrap_or_default();
            MediatorError::Parse(format!("{} in protocol {}: {}", name, protocol.name, e))
        })?;
    }
    Ok(protocol)
}

impl SchemaParser for IdlParser {
    fn extension(&self) -> &str {
        Self::EXTENSION
    }

    fn parse_protocol(&self, path: &Path) -> Result<Protocol> {
        let source = fs::read_to_string(path)
            .map_err(|e| MediatorError::io(format!("Could not read {}", path.display()), e))?;
        check_with_avro(parse_protocol_at(&source, path).map_err(MediatorError::Parse)?)
    }
}
