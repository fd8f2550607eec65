//! Schema compatibility checking
//!
//! Evaluates whether data written with one schema can be read with another,
//! following Avro schema resolution. Each incompatibility is reported with a
//! kind, a message and its location in the reader schema.

use std::collections::{HashMap, HashSet};
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::schema::{Name, Schema};

/// Category of an incompatibility
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum IncompatibilityKind {
    NameMismatch,
    FixedSizeMismatch,
    MissingEnumSymbols,
    ReaderFieldMissingDefaultValue,
    TypeMismatch,
    MissingUnionBranch,
}

impl fmt::Display for IncompatibilityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            IncompatibilityKind::NameMismatch => "NAME_MISMATCH",
            IncompatibilityKind::FixedSizeMismatch => "FIXED_SIZE_MISMATCH",
            IncompatibilityKind::MissingEnumSymbols => "MISSING_ENUM_SYMBOLS",
            IncompatibilityKind::ReaderFieldMissingDefaultValue => "READER_FIELD_MISSING_DEFAULT_VALUE",
            IncompatibilityKind::TypeMismatch => "TYPE_MISMATCH",
            IncompatibilityKind::MissingUnionBranch => "MISSING_UNION_BRANCH",
        };
        write!(f, "{}", label)
    }
}

/// A single reason a reader cannot read a writer's data
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Incompatibility {
    pub kind: IncompatibilityKind,
    pub message: String,
    /// Path in the reader schema (e.g. "/fields/1/type")
    pub location: String,
}

impl fmt::Display for Incompatibility {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}: {} ({})]", self.kind, self.message, self.location)
    }
}

/// Result of checking one reader/writer pair
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompatibilityCheck {
    pub incompatibilities: Vec<Incompatibility>,
}

impl CompatibilityCheck {
    pub fn compatible() -> Self {
        Self::default()
    }

    pub fn incompatible(incompatibilities: Vec<Incompatibility>) -> Self {
        Self { incompatibilities }
    }

    pub fn is_compatible(&self) -> bool {
        self.incompatibilities.is_empty()
    }

    /// Findings rendered as `[KIND: message (location)], ...`
    pub fn describe(&self) -> String {
        self.incompatibilities
            .iter()
            .map(ToString::to_string)
            .collect::<Vec<_>>()
            .join(", ")
    }
}

/// Decides whether data written with `writer` can be read with `reader`
pub trait CompatibilityEvaluator {
    fn check(&self, reader: &Schema, writer: &Schema) -> CompatibilityCheck;
}

/// Which directions a registry enforces when a new schema version arrives
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CompatibilityMode {
    None,
    /// New schema can read data written with the latest version
    #[default]
    Backward,
    /// Latest version can read data written with the new schema
    Forward,
    Full,
}

impl CompatibilityMode {
    /// Check `candidate` against `latest` in the directions this mode enforces
    pub fn check(
        &self,
        evaluator: &dyn CompatibilityEvaluator,
        candidate: &Schema,
        latest: &Schema,
    ) -> CompatibilityCheck {
        let mut incompatibilities = Vec::new();
        if matches!(self, CompatibilityMode::Backward | CompatibilityMode::Full) {
            incompatibilities.extend(evaluator.check(candidate, latest).incompatibilities);
        }
        if matches!(self, CompatibilityMode::Forward | CompatibilityMode::Full) {
            incompatibilities.extend(evaluator.check(latest, candidate).incompatibilities);
        }
        CompatibilityCheck::incompatible(incompatibilities)
    }
}

impl FromStr for CompatibilityMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "none" => Ok(CompatibilityMode::None),
            "backward" => Ok(CompatibilityMode::Backward),
            "forward" => Ok(CompatibilityMode::Forward),
            "full" => Ok(CompatibilityMode::Full),
            other => Err(format!("Unknown compatibility mode '{}'", other)),
        }
    }
}

/// Avro schema resolution rules
#[derive(Debug, Clone, Copy, Default)]
pub struct AvroCompatibility;

impl AvroCompatibility {
    pub fn new() -> Self {
        Self
    }
}

impl CompatibilityEvaluator for AvroCompatibility {
    fn check(&self, reader: &Schema, writer: &Schema) -> CompatibilityCheck {
        let mut walk = Resolution {
            reader_names: named_types(reader),
            writer_names: named_types(writer),
            in_progress: HashSet::new(),
            found: Vec::new(),
        };
        walk.check(reader, writer, "");
        CompatibilityCheck::incompatible(walk.found)
    }
}

/// Named definitions in a schema tree, for resolving references
fn named_types(schema: &Schema) -> HashMap<Name, &Schema> {
    fn collect<'a>(schema: &'a Schema, out: &mut HashMap<Name, &'a Schema>) {
        match schema {
            Schema::Record(record) => {
                out.insert(record.name.clone(), schema);
                for field in &record.fields {
                    collect(&field.schema, out);
                }
            }
            Schema::Enum(e) => {
                out.insert(e.name.clone(), schema);
            }
            Schema::Fixed(f) => {
                out.insert(f.name.clone(), schema);
            }
            Schema::Array(inner) | Schema::Map(inner) => collect(inner, out),
            Schema::Union(branches) => branches.iter().for_each(|b| collect(b, out)),
            Schema::Logical(l) => collect(&l.base, out),
            _ => {}
        }
    }
    let mut out = HashMap::new();
    collect(schema, &mut out);
    out
}

fn child(location: &str, segment: impl fmt::Display) -> String {
    format!("{}/{}", location, segment)
}

fn display_location(location: &str) -> String {
    if location.is_empty() {
        "/".to_string()
    } else {
        location.to_string()
    }
}

fn type_label(schema: &Schema) -> String {
    match schema.name() {
        Some(name) => format!("{} {}", schema.kind(), name.fullname()),
        None => schema.kind().to_string(),
    }
}

struct Resolution<'a> {
    reader_names: HashMap<Name, &'a Schema>,
    writer_names: HashMap<Name, &'a Schema>,
    /// Named pairs currently being compared; revisits are assumed compatible
    in_progress: HashSet<(Name, Name)>,
    found: Vec<Incompatibility>,
}

impl<'a> Resolution<'a> {
    fn report(&mut self, kind: IncompatibilityKind, message: String, location: &str) {
        self.found.push(Incompatibility {
            kind,
            message,
            location: display_location(location),
        });
    }

    fn deref_reader(&self, schema: &'a Schema) -> &'a Schema {
        deref(schema, &self.reader_names)
    }

    fn deref_writer(&self, schema: &'a Schema) -> &'a Schema {
        deref(schema, &self.writer_names)
    }

    /// Whether `reader` can read `writer` without recording findings
    fn matches(&mut self, reader: &'a Schema, writer: &'a Schema) -> bool {
        let before = self.found.len();
        self.check(reader, writer, "");
        let ok = self.found.len() == before;
        self.found.truncate(before);
        ok
    }

    fn check(&mut self, reader: &'a Schema, writer: &'a Schema, location: &str) {
        let reader = strip_logical(self.deref_reader(reader));
        let writer = strip_logical(self.deref_writer(writer));

        if let Schema::Union(branches) = writer {
            for (i, branch) in branches.iter().enumerate() {
                self.check(reader, branch, &child(location, i));
            }
            return;
        }

        match (reader, writer) {
            (Schema::Union(branches), _) => {
                if !branches.iter().any(|b| self.matches(b, writer)) {
                    self.report(
                        IncompatibilityKind::MissingUnionBranch,
                        format!("reader union lacking writer type: {}", type_label(writer)),
                        location,
                    );
                }
            }
            (Schema::Record(r), Schema::Record(w)) => {
                if r.name.name != w.name.name {
                    self.report(
                        IncompatibilityKind::NameMismatch,
                        format!("expected: {}", w.name.fullname()),
                        &child(location, "name"),
                    );
                    return;
                }
                if !self.in_progress.insert((r.name.clone(), w.name.clone())) {
                    return;
                }
                for (i, field) in r.fields.iter().enumerate() {
                    let field_location = child(&child(location, "fields"), i);
                    match w.fields.iter().find(|f| f.name == field.name) {
                        Some(written) => {
                            self.check(&field.schema, &written.schema, &child(&field_location, "type"))
                        }
                        None if field.default.is_none() => self.report(
                            IncompatibilityKind::ReaderFieldMissingDefaultValue,
                            field.name.clone(),
                            &field_location,
                        ),
                        None => {}
                    }
                }
                self.in_progress.remove(&(r.name.clone(), w.name.clone()));
            }
            (Schema::Enum(r), Schema::Enum(w)) => {
                if r.name.name != w.name.name {
                    self.report(
                        IncompatibilityKind::NameMismatch,
                        format!("expected: {}", w.name.fullname()),
                        &child(location, "name"),
                    );
                    return;
                }
                let missing: Vec<&str> = w
                    .symbols
                    .iter()
                    .filter(|s| !r.symbols.contains(s))
                    .map(String::as_str)
                    .collect();
                if !missing.is_empty() && r.default.is_none() {
                    self.report(
                        IncompatibilityKind::MissingEnumSymbols,
                        format!("[{}]", missing.join(", ")),
                        &child(location, "symbols"),
                    );
                }
            }
            (Schema::Fixed(r), Schema::Fixed(w)) => {
                if r.name.name != w.name.name {
                    self.report(
                        IncompatibilityKind::NameMismatch,
                        format!("expected: {}", w.name.fullname()),
                        &child(location, "name"),
                    );
                } else if r.size != w.size {
                    self.report(
                        IncompatibilityKind::FixedSizeMismatch,
                        format!("expected: {}, found: {}", w.size, r.size),
                        &child(location, "size"),
                    );
                }
            }
            (Schema::Array(r), Schema::Array(w)) => self.check(r, w, &child(location, "items")),
            (Schema::Map(r), Schema::Map(w)) => self.check(r, w, &child(location, "values")),
            (r, w) if promotes(w, r) => {}
            (r, w) => self.report(
                IncompatibilityKind::TypeMismatch,
                format!(
                    "reader type: {} not compatible with writer type: {}",
                    type_label(r),
                    type_label(w)
                ),
                location,
            ),
        }
    }
}

fn deref<'a>(schema: &'a Schema, names: &HashMap<Name, &'a Schema>) -> &'a Schema {
    match schema {
        Schema::Ref(name) => names.get(name).copied().unwrap_or(schema),
        other => other,
    }
}

fn strip_logical(schema: &Schema) -> &Schema {
    match schema {
        Schema::Logical(l) => &l.base,
        other => other,
    }
}

/// Whether a primitive written as `writer` can be read as `reader`
fn promotes(writer: &Schema, reader: &Schema) -> bool {
    use Schema::*;
    matches!(
        (writer, reader),
        (Null, Null)
            | (Boolean, Boolean)
            | (Int, Int | Long | Float | Double)
            | (Long, Long | Float | Double)
            | (Float, Float | Double)
            | (Double, Double)
            | (String, String | Bytes)
            | (Bytes, Bytes | String)
    ) || matches!((writer, reader), (Ref(w), Ref(r)) if w == r)
}
