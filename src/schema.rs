//! Avro schema model
//!
//! Schemas are produced by the IDL parser for local sources and by
//! [`Schema::parse_str`] for schema text fetched from a registry. Both paths
//! must agree, so equality is structural: documentation is ignored and the
//! JSON rendering always spells out namespaces.

use std::fmt;

use serde_json::{json, Map, Value};

use crate::error::{MediatorError, Result};

/// Fully qualified Avro name
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Name {
    pub name: String,
    pub namespace: Option<String>,
}

impl Name {
    pub fn new(name: impl Into<String>, namespace: Option<&str>) -> Self {
        Self {
            name: name.into(),
            namespace: namespace.filter(|ns| !ns.is_empty()).map(String::from),
        }
    }

    /// Resolve a possibly dotted name against an enclosing namespace
    pub fn resolve(raw: &str, enclosing: Option<&str>) -> Self {
        match raw.rsplit_once('.') {
            Some((namespace, name)) => Self::new(name, Some(namespace)),
            None => Self::new(raw, enclosing),
        }
    }

    pub fn fullname(&self) -> String {
        match &self.namespace {
            Some(ns) => format!("{}.{}", ns, self.name),
            None => self.name.clone(),
        }
    }
}

impl fmt::Display for Name {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.fullname())
    }
}

/// Coarse classification of a schema
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SchemaKind {
    Null,
    Boolean,
    Int,
    Long,
    Float,
    Double,
    Bytes,
    String,
    Array,
    Map,
    Union,
    Record,
    Enum,
    Fixed,
    Logical,
    Reference,
}

impl fmt::Display for SchemaKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            SchemaKind::Null => "null",
            SchemaKind::Boolean => "boolean",
            SchemaKind::Int => "int",
            SchemaKind::Long => "long",
            SchemaKind::Float => "float",
            SchemaKind::Double => "double",
            SchemaKind::Bytes => "bytes",
            SchemaKind::String => "string",
            SchemaKind::Array => "array",
            SchemaKind::Map => "map",
            SchemaKind::Union => "union",
            SchemaKind::Record => "record",
            SchemaKind::Enum => "enum",
            SchemaKind::Fixed => "fixed",
            SchemaKind::Logical => "logical",
            SchemaKind::Reference => "reference",
        };
        write!(f, "{}", label)
    }
}

/// A parsed Avro schema
#[derive(Debug, Clone, PartialEq)]
pub enum Schema {
    Null,
    Boolean,
    Int,
    Long,
    Float,
    Double,
    Bytes,
    String,
    Array(Box<Schema>),
    Map(Box<Schema>),
    Union(Vec<Schema>),
    Record(RecordSchema),
    Enum(EnumSchema),
    Fixed(FixedSchema),
    Logical(LogicalSchema),
    /// Reference to a named type defined earlier in the same tree
    Ref(Name),
}

#[derive(Debug, Clone)]
pub struct RecordSchema {
    pub name: Name,
    pub doc: Option<String>,
    pub fields: Vec<Field>,
}

impl PartialEq for RecordSchema {
    fn eq(&self, other: &Self) -> bool {
        self.name == other.name && self.fields == other.fields
    }
}

#[derive(Debug, Clone)]
pub struct Field {
    pub name: String,
    pub doc: Option<String>,
    pub schema: Schema,
    pub default: Option<Value>,
}

impl PartialEq for Field {
    fn eq(&self, other: &Self) -> bool {
        self.name == other.name && self.schema == other.schema && self.default == other.default
    }
}

#[derive(Debug, Clone)]
pub struct EnumSchema {
    pub name: Name,
    pub doc: Option<String>,
    pub symbols: Vec<String>,
    pub default: Option<String>,
}

impl PartialEq for EnumSchema {
    fn eq(&self, other: &Self) -> bool {
        self.name == other.name && self.symbols == other.symbols && self.default == other.default
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FixedSchema {
    pub name: Name,
    pub size: usize,
}

/// A primitive or fixed schema annotated with a logical type
#[derive(Debug, Clone, PartialEq)]
pub struct LogicalSchema {
    pub logical_type: String,
    pub base: Box<Schema>,
    pub precision: Option<u32>,
    pub scale: Option<u32>,
}

impl Schema {
    /// Primitive schema for an Avro type name, if it is one
    pub fn primitive(name: &str) -> Option<Schema> {
        let schema = match name {
            "null" => Schema::Null,
            "boolean" => Schema::Boolean,
            "int" => Schema::Int,
            "long" => Schema::Long,
            "float" => Schema::Float,
            "double" => Schema::Double,
            "bytes" => Schema::Bytes,
            "string" => Schema::String,
            _ => return None,
        };
        Some(schema)
    }

    pub fn kind(&self) -> SchemaKind {
        match self {
            Schema::Null => SchemaKind::Null,
            Schema::Boolean => SchemaKind::Boolean,
            Schema::Int => SchemaKind::Int,
            Schema::Long => SchemaKind::Long,
            Schema::Float => SchemaKind::Float,
            Schema::Double => SchemaKind::Double,
            Schema::Bytes => SchemaKind::Bytes,
            Schema::String => SchemaKind::String,
            Schema::Array(_) => SchemaKind::Array,
            Schema::Map(_) => SchemaKind::Map,
            Schema::Union(_) => SchemaKind::Union,
            Schema::Record(_) => SchemaKind::Record,
            Schema::Enum(_) => SchemaKind::Enum,
            Schema::Fixed(_) => SchemaKind::Fixed,
            Schema::Logical(_) => SchemaKind::Logical,
            Schema::Ref(_) => SchemaKind::Reference,
        }
    }

    /// Name of a named type (record, enum, fixed) or reference
    pub fn name(&self) -> Option<&Name> {
        match self {
            Schema::Record(r) => Some(&r.name),
            Schema::Enum(e) => Some(&e.name),
            Schema::Fixed(f) => Some(&f.name),
            Schema::Ref(n) => Some(n),
            _ => None,
        }
    }

    pub fn namespace(&self) -> Option<&str> {
        self.name().and_then(|n| n.namespace.as_deref())
    }

    /// Render as Avro JSON
    pub fn to_json(&self) -> Value {
        self.json_in(None)
    }

    /// Render as indented Avro JSON
    pub fn to_pretty_string(&self) -> String {
        serde_json::to_string_pretty(&self.to_json()).unwrap_or_default()
    }

    fn json_in(&self, enclosing: Option<&str>) -> Value {
        match self {
            Schema::Null => json!("null"),
            Schema::Boolean => json!("boolean"),
            Schema::Int => json!("int"),
            Schema::Long => json!("long"),
            Schema::Float => json!("float"),
            Schema::Double => json!("double"),
            Schema::Bytes => json!("bytes"),
            Schema::String => json!("string"),
            Schema::Array(items) => json!({ "type": "array", "items": items.json_in(enclosing) }),
            Schema::Map(values) => json!({ "type": "map", "values": values.json_in(enclosing) }),
            Schema::Union(branches) => {
                Value::Array(branches.iter().map(|b| b.json_in(enclosing)).collect())
            }
            Schema::Record(record) => {
                let mut obj = named_object("record", &record.name, enclosing);
                if let Some(doc) = &record.doc {
                    obj.insert("doc".into(), json!(doc));
                }
                let inner = record.name.namespace.as_deref();
                let fields: Vec<Value> = record
                    .fields
                    .iter()
                    .map(|field| {
                        let mut f = Map::new();
                        f.insert("name".into(), json!(field.name));
                        f.insert("type".into(), field.schema.json_in(inner));
                        if let Some(doc) = &field.doc {
                            f.insert("doc".into(), json!(doc));
                        }
                        if let Some(default) = &field.default {
                            f.insert("default".into(), default.clone());
                        }
                        Value::Object(f)
                    })
                    .collect();
                obj.insert("fields".into(), Value::Array(fields));
                Value::Object(obj)
            }
            Schema::Enum(e) => {
                let mut obj = named_object("enum", &e.name, enclosing);
                if let Some(doc) = &e.doc {
                    obj.insert("doc".into(), json!(doc));
                }
                obj.insert("symbols".into(), json!(e.symbols));
                if let Some(default) = &e.default {
                    obj.insert("default".into(), json!(default));
                }
                Value::Object(obj)
            }
            Schema::Fixed(f) => {
                let mut obj = named_object("fixed", &f.name, enclosing);
                obj.insert("size".into(), json!(f.size));
                Value::Object(obj)
            }
            Schema::Logical(l) => {
                let mut obj = match l.base.json_in(enclosing) {
                    Value::Object(obj) => obj,
                    base => {
                        let mut obj = Map::new();
                        obj.insert("type".into(), base);
                        obj
                    }
                };
                obj.insert("logicalType".into(), json!(l.logical_type));
                if let Some(precision) = l.precision {
                    obj.insert("precision".into(), json!(precision));
                }
                if let Some(scale) = l.scale {
                    obj.insert("scale".into(), json!(scale));
                }
                Value::Object(obj)
            }
            Schema::Ref(name) => json!(name.fullname()),
        }
    }

    /// Parse Avro JSON schema text
    pub fn parse_str(text: &str) -> Result<Schema> {
        let value: Value = serde_json::from_str(text)
            .map_err(|e| MediatorError::Parse(format!("Schema text is not valid JSON: {}", e)))?;
        Schema::from_json(&value)
    }

    pub fn from_json(value: &Value) -> Result<Schema> {
        parse_value(value, None)
    }

    /// Parse an Avro JSON schema whose unqualified names live in `namespace`
    pub fn from_json_in(value: &Value, namespace: Option<&str>) -> Result<Schema> {
        parse_value(value, namespace)
    }

    /// Cross-check this schema with the `apache-avro` parser
    pub fn check_with_avro(&self) -> Result<apache_avro::Schema> {
        apache_avro::Schema::parse_str(&self.to_json().to_string())
            .map_err(|e| MediatorError::Parse(format!("Schema rejected by the Avro parser: {}", e)))
    }

    /// Avro parsing canonical form
    pub fn canonical_form(&self) -> Result<String> {
        Ok(self.check_with_avro()?.canonical_form())
    }
}

impl fmt::Display for Schema {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_json())
    }
}

fn named_object(kind: &str, name: &Name, enclosing: Option<&str>) -> Map<String, Value> {
    let mut obj = Map::new();
    obj.insert("type".into(), json!(kind));
    obj.insert("name".into(), json!(name.name));
    match (&name.namespace, enclosing) {
        (Some(ns), _) => {
            obj.insert("namespace".into(), json!(ns));
        }
        (None, Some(_)) => {
            obj.insert("namespace".into(), json!(""));
        }
        (None, None) => {}
    }
    obj
}

fn parse_error(message: impl Into<String>) -> MediatorError {
    MediatorError::Parse(message.into())
}

fn parse_value(value: &Value, enclosing: Option<&str>) -> Result<Schema> {
    match value {
        Value::String(s) => Ok(Schema::primitive(s).unwrap_or_else(|| Schema::Ref(Name::resolve(s, enclosing)))),
        Value::Array(branches) => Ok(Schema::Union(
            branches
                .iter()
                .map(|b| parse_value(b, enclosing))
                .collect::<Result<Vec<_>>>()?,
        )),
        Value::Object(obj) => parse_object(obj, enclosing),
        other => Err(parse_error(format!("Unexpected schema value: {}", other))),
    }
}

fn parse_object(obj: &Map<String, Value>, enclosing: Option<&str>) -> Result<Schema> {
    let type_value = obj
        .get("type")
        .ok_or_else(|| parse_error("Schema object is missing \"type\""))?;

    let base = match type_value {
        Value::String(t) => match t.as_str() {
            "record" | "error" => {
                let name = parse_name(obj, enclosing)?;
                let inner = name.namespace.clone();
                let fields = obj
                    .get("fields")
                    .and_then(Value::as_array)
                    .ok_or_else(|| parse_error(format!("Record {} has no fields array", name)))?
                    .iter()
                    .map(|f| parse_field(f, inner.as_deref()))
                    .collect::<Result<Vec<_>>>()?;
                Schema::Record(RecordSchema {
                    name,
                    doc: string_attr(obj, "doc"),
                    fields,
                })
            }
            "enum" => {
                let name = parse_name(obj, enclosing)?;
                let symbols = obj
                    .get("symbols")
                    .and_then(Value::as_array)
                    .ok_or_else(|| parse_error(format!("Enum {} has no symbols array", name)))?
                    .iter()
                    .map(|s| {
                        s.as_str()
                            .map(String::from)
                            .ok_or_else(|| parse_error(format!("Enum {} has a non-string symbol", name)))
                    })
                    .collect::<Result<Vec<_>>>()?;
                Schema::Enum(EnumSchema {
                    name,
                    doc: string_attr(obj, "doc"),
                    symbols,
                    default: string_attr(obj, "default"),
                })
            }
            "fixed" => {
                let name = parse_name(obj, enclosing)?;
                let size = obj
                    .get("size")
                    .and_then(Value::as_u64)
                    .ok_or_else(|| parse_error(format!("Fixed {} has no size", name)))?;
                Schema::Fixed(FixedSchema {
                    name,
                    size: size as usize,
                })
            }
            "array" => {
                let items = obj
                    .get("items")
                    .ok_or_else(|| parse_error("Array schema is missing \"items\""))?;
                Schema::Array(Box::new(parse_value(items, enclosing)?))
            }
            "map" => {
                let values = obj
                    .get("values")
                    .ok_or_else(|| parse_error("Map schema is missing \"values\""))?;
                Schema::Map(Box::new(parse_value(values, enclosing)?))
            }
            other => parse_value(&json!(other), enclosing)?,
        },
        nested => parse_value(nested, enclosing)?,
    };

    match obj.get("logicalType").and_then(Value::as_str) {
        Some(logical_type) => Ok(Schema::Logical(LogicalSchema {
            logical_type: logical_type.to_string(),
            base: Box::new(base),
            precision: obj.get("precision").and_then(Value::as_u64).map(|p| p as u32),
            scale: obj.get("scale").and_then(Value::as_u64).map(|s| s as u32),
        })),
        None => Ok(base),
    }
}

fn parse_name(obj: &Map<String, Value>, enclosing: Option<&str>) -> Result<Name> {
    let raw = obj
        .get("name")
        .and_then(Value::as_str)
        .ok_or_else(|| parse_error("Named schema is missing \"name\""))?;
    let namespace = match obj.get("namespace").and_then(Value::as_str) {
        Some(ns) => Some(ns),
        None => enclosing,
    };
    Ok(Name::resolve(raw, namespace))
}

fn parse_field(value: &Value, enclosing: Option<&str>) -> Result<Field> {
    let obj = value
        .as_object()
        .ok_or_else(|| parse_error(format!("Field definition is not an object: {}", value)))?;
    let name = obj
        .get("name")
        .and_then(Value::as_str)
        .ok_or_else(|| parse_error("Field is missing \"name\""))?;
    let schema = obj
        .get("type")
        .ok_or_else(|| parse_error(format!("Field {} is missing \"type\"", name)))?;
    Ok(Field {
        name: name.to_string(),
        doc: string_attr(obj, "doc"),
        schema: parse_value(schema, enclosing)?,
        default: obj.get("default").cloned(),
    })
}

fn string_attr(obj: &Map<String, Value>, key: &str) -> Option<String> {
    obj.get(key).and_then(Value::as_str).map(String::from)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn click_event() -> Schema {
        Schema::Record(RecordSchema {
            name: Name::new("ClickEvent", Some("events.schemas")),
            doc: Some("A click".to_string()),
            fields: vec![
                Field {
                    name: "url".to_string(),
                    doc: None,
                    schema: Schema::String,
                    default: None,
                },
                Field {
                    name: "source".to_string(),
                    doc: None,
                    schema: Schema::Union(vec![Schema::Null, Schema::String]),
                    default: Some(Value::Null),
                },
            ],
        })
    }

    #[test]
    fn test_json_rendering_parses_back() {
        let schema = click_event();
        let parsed = Schema::parse_str(&schema.to_json().to_string()).unwrap();
        assert_eq!(parsed, schema);
    }

    #[test]
    fn test_equality_ignores_docs_and_key_order() {
        let text = r#"{
            "fields": [
                {"type": "string", "name": "url"},
                {"default": null, "name": "source", "type": ["null", "string"], "doc": "where"}
            ],
            "namespace": "events.schemas",
            "name": "ClickEvent",
            "type": "record"
        }"#;
        assert_eq!(Schema::parse_str(text).unwrap(), click_event());
    }

    #[test]
    fn test_namespace_inheritance() {
        let text = r#"{
            "type": "record", "name": "Outer", "namespace": "a.b",
            "fields": [
                {"name": "inner", "type": {"type": "enum", "name": "Kind", "symbols": ["UNKNOWN"]}},
                {"name": "other", "type": "c.Other"},
                {"name": "again", "type": "Kind"}
            ]
        }"#;
        let schema = Schema::parse_str(text).unwrap();
        let Schema::Record(record) = schema else {
            panic!("expected record");
        };
        assert_eq!(record.fields[0].schema.namespace(), Some("a.b"));
        assert_eq!(record.fields[1].schema, Schema::Ref(Name::new("Other", Some("c"))));
        assert_eq!(record.fields[2].schema, Schema::Ref(Name::new("Kind", Some("a.b"))));
    }

    #[test]
    fn test_logical_type_rendering() {
        let schema = Schema::Logical(LogicalSchema {
            logical_type: "timestamp-millis".to_string(),
            base: Box::new(Schema::Long),
            precision: None,
            scale: None,
        });
        assert_eq!(schema.to_json(), json!({"type": "long", "logicalType": "timestamp-millis"}));
        assert_eq!(Schema::from_json(&schema.to_json()).unwrap(), schema);
    }

    #[test]
    fn test_avro_cross_check() {
        assert!(click_event().check_with_avro().is_ok());
        let bad = Schema::Enum(EnumSchema {
            name: Name::new("Bad", None),
            doc: None,
            symbols: vec!["A".into(), "A".into()],
            default: None,
        });
        assert!(bad.check_with_avro().is_err());
    }
}
