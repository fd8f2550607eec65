//! Recursive-descent parser for Avro IDL protocols.
//!
//! Supports the subset used by schema repositories: protocol-level and
//! type-level `@namespace`, records and errors, enums with defaults, fixed
//! types, arrays, maps, unions, `T?` optionals, logical type keywords and
//! JSON field defaults. Messages are parsed and discarded.
//!
//! `import idl`, `import protocol` and `import schema` resolve relative to
//! the importing file. Imported types are merged ahead of the file's own
//! declarations; a file imported twice contributes its types once.

use std::collections::HashSet;
use std::fs;
use std::iter;
use std::path::{Path, PathBuf};

use serde_json::{Map, Value};

use super::lexer::{IdlLexer, Token, TokenKind};
use super::Protocol;
use crate::schema::{EnumSchema, Field, FixedSchema, LogicalSchema, Name, RecordSchema, Schema};

/// Parse IDL source into a protocol whose types have all references resolved.
///
/// The source has no location, so any import is an error.
pub fn parse_protocol(source: &str) -> Result<Protocol, String> {
    ImportLoader::default().compile(source, None)
}

/// Parse IDL source read from `path`, resolving imports against its directory
pub fn parse_protocol_at(source: &str, path: &Path) -> Result<Protocol, String> {
    ImportLoader::default().compile(source, Some(path))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ImportKind {
    Idl,
    Protocol,
    Schema,
}

struct Import {
    kind: ImportKind,
    path: String,
    line: usize,
}

#[derive(Default)]
struct ImportLoader {
    /// Files being compiled, outermost first
    stack: Vec<PathBuf>,
    /// Files whose types are already merged
    loaded: HashSet<PathBuf>,
}

impl ImportLoader {
    fn compile(mut self, source: &str, origin: Option<&Path>) -> Result<Protocol, String> {
        if let Some(path) = origin {
            let canonical = path
                .canonicalize()
                .map_err(|e| format!("could not resolve {}: {}", path.display(), e))?;
            self.loaded.insert(canonical.clone());
            self.stack.push(canonical);
        }
        let (name, declared) = self.declarations(source, origin)?;
        let types = resolve_types(&declared)?;
        Ok(Protocol { name, types })
    }

    /// Imported types followed by the unit's own declarations, unresolved
    fn declarations(&mut self, source: &str, origin: Option<&Path>) -> Result<(Name, Vec<Schema>), String> {
        let tokens = IdlLexer::tokenize(source)?;
        let mut parser = IdlParserState {
            tokens,
            pos: 0,
            namespace: None,
            imports: Vec::new(),
        };
        let (name, declared) = parser.protocol()?;

        let mut types = Vec::new();
        for import in parser.imports {
            let Some(dir) = origin.and_then(Path::parent) else {
                return Err(format!(
                    "line {}: cannot resolve import \"{}\" without a source file location",
                    import.line, import.path
                ));
            };
            let imported = self
                .import(&dir.join(&import.path), import.kind)
                .map_err(|e| format!("line {}: {}", import.line, e))?;
            types.extend(imported);
        }
        types.extend(declared);
        Ok((name, types))
    }

    fn import(&mut self, path: &Path, kind: ImportKind) -> Result<Vec<Schema>, String> {
        let canonical = path
            .canonicalize()
            .map_err(|e| format!("could not resolve import {}: {}", path.display(), e))?;
        if self.stack.contains(&canonical) {
            let chain: Vec<_> = self
                .stack
                .iter()
                .chain(iter::once(&canonical))
                .map(|p| p.display().to_string())
                .collect();
            return Err(format!("import cycle: {}", chain.join(" -> ")));
        }
        if !self.loaded.insert(canonical.clone()) {
            return Ok(Vec::new());
        }

        let source = fs::read_to_string(&canonical)
            .map_err(|e| format!("could not read import {}: {}", path.display(), e))?;
        self.stack.push(canonical.clone());
        let types = match kind {
            ImportKind::Idl => self
                .declarations(&source, Some(canonical.as_path()))
                .map(|(_, types)| types),
            ImportKind::Protocol => protocol_json_types(&source),
            ImportKind::Schema => schema_json_types(&source),
        };
        self.stack.pop();
        types.map_err(|e| format!("in {}: {}", path.display(), e))
    }
}

/// Named types of an `.avsc` file
fn schema_json_types(source: &str) -> Result<Vec<Schema>, String> {
    let schema = Schema::parse_str(source).map_err(|e| e.to_string())?;
    let mut types = Vec::new();
    named_definitions(&schema, &mut types);
    Ok(types)
}

/// Named types of an `.avpr` file
fn protocol_json_types(source: &str) -> Result<Vec<Schema>, String> {
    let value: Value =
        serde_json::from_str(source).map_err(|e| format!("protocol is not valid JSON: {}", e))?;
    let namespace = value.get("namespace").and_then(Value::as_str);
    let declared = value
        .get("types")
        .and_then(Value::as_array)
        .map(Vec::as_slice)
        .unwrap_or_default();

    let mut types = Vec::new();
    for definition in declared {
        let schema = Schema::from_json_in(definition, namespace).map_err(|e| e.to_string())?;
        named_definitions(&schema, &mut types);
    }
    Ok(types)
}

/// Every named type defined inside `schema`, outermost first
fn named_definitions(schema: &Schema, out: &mut Vec<Schema>) {
    match schema {
        Schema::Record(record) => {
            out.push(schema.clone());
            for field in &record.fields {
                named_definitions(&field.schema, out);
            }
        }
        Schema::Enum(_) | Schema::Fixed(_) => out.push(schema.clone()),
        Schema::Array(inner) | Schema::Map(inner) => named_definitions(inner, out),
        Schema::Union(branches) => {
            for branch in branches {
                named_definitions(branch, out);
            }
        }
        Schema::Logical(l) => named_definitions(&l.base, out),
        _ => {}
    }
}

#[derive(Default)]
struct Annotations {
    namespace: Option<String>,
    logical_type: Option<String>,
}

struct IdlParserState {
    tokens: Vec<Token>,
    pos: usize,
    namespace: Option<String>,
    imports: Vec<Import>,
}

impl IdlParserState {
    fn peek(&self) -> &TokenKind {
        &self.tokens[self.pos.min(self.tokens.len() - 1)].kind
    }

    fn line(&self) -> usize {
        self.tokens[self.pos.min(self.tokens.len() - 1)].line
    }

    fn advance(&mut self) -> TokenKind {
        let kind = self.peek().clone();
        if self.pos < self.tokens.len() - 1 {
            self.pos += 1;
        }
        kind
    }

    fn error<T>(&self, message: impl std::fmt::Display) -> Result<T, String> {
        Err(format!("line {}: {}", self.line(), message))
    }

    fn is_punct(&self, c: char) -> bool {
        *self.peek() == TokenKind::Punct(c)
    }

    fn eat_punct(&mut self, c: char) -> bool {
        if self.is_punct(c) {
            self.advance();
            true
        } else {
            false
        }
    }

    fn expect_punct(&mut self, c: char) -> Result<(), String> {
        if self.eat_punct(c) {
            Ok(())
        } else {
            self.error(format!("expected '{}', found {:?}", c, self.peek()))
        }
    }

    fn expect_ident(&mut self) -> Result<String, String> {
        match self.peek().clone() {
            TokenKind::Ident(ident) => {
                self.advance();
                Ok(ident)
            }
            other => self.error(format!("expected identifier, found {:?}", other)),
        }
    }

    fn is_keyword(&self, keyword: &str) -> bool {
        matches!(self.peek(), TokenKind::Ident(ident) if ident == keyword)
    }

    fn doc(&mut self) -> Option<String> {
        let mut doc = None;
        while let TokenKind::Doc(text) = self.peek() {
            doc = Some(text.clone());
            self.advance();
        }
        doc
    }

    fn annotations(&mut self) -> Result<Annotations, String> {
        let mut annotations = Annotations::default();
        while let TokenKind::Annotation(name) = self.peek().clone() {
            self.advance();
            self.expect_punct('(')?;
            let value = self.json_value()?;
            self.expect_punct(')')?;
            match (name.as_str(), value) {
                ("namespace", Value::String(ns)) => annotations.namespace = Some(ns),
                ("logicalType", Value::String(lt)) => annotations.logical_type = Some(lt),
                ("namespace" | "logicalType", other) => {
                    return self.error(format!("@{} expects a string, found {}", name, other))
                }
                _ => {}
            }
        }
        Ok(annotations)
    }

    fn protocol(&mut self) -> Result<(Name, Vec<Schema>), String> {
        self.doc();
        let annotations = self.annotations()?;
        self.doc();
        if !self.is_keyword("protocol") {
            return self.error("expected 'protocol' declaration");
        }
        self.advance();
        let raw_name = self.expect_ident()?;
        let name = Name::resolve(&raw_name, annotations.namespace.as_deref());
        self.namespace = name.namespace.clone();
        self.expect_punct('{')?;

        let mut types = Vec::new();
        while !self.eat_punct('}') {
            if *self.peek() == TokenKind::Eof {
                return self.error(format!("unterminated protocol {}", name.name));
            }
            if let Some(schema) = self.declaration()? {
                types.push(schema);
            }
        }
        Ok((name, types))
    }

    fn declaration(&mut self) -> Result<Option<Schema>, String> {
        let doc = self.doc();
        let annotations = self.annotations()?;
        let doc = self.doc().or(doc);

        let keyword = match self.peek() {
            TokenKind::Ident(ident) => ident.clone(),
            other => return self.error(format!("expected a declaration, found {:?}", other)),
        };

        match keyword.as_str() {
            "record" | "error" => {
                self.advance();
                self.record(doc, annotations).map(Some)
            }
            "enum" => {
                self.advance();
                self.enumeration(doc, annotations).map(Some)
            }
            "fixed" => {
                self.advance();
                self.fixed(annotations).map(Some)
            }
            "import" => {
                self.advance();
                self.import()?;
                Ok(None)
            }
            _ => {
                self.message()?;
                Ok(None)
            }
        }
    }

    /// `import idl|protocol|schema "path";`
    fn import(&mut self) -> Result<(), String> {
        let line = self.line();
        let kind = match self.expect_ident()?.as_str() {
            "idl" => ImportKind::Idl,
            "protocol" => ImportKind::Protocol,
            "schema" => ImportKind::Schema,
            other => return self.error(format!("unknown import kind '{}'", other)),
        };
        let path = match self.advance() {
            TokenKind::Str(path) => path,
            other => return self.error(format!("expected an import path, found {:?}", other)),
        };
        self.expect_punct(';')?;
        self.imports.push(Import { kind, path, line });
        Ok(())
    }

    fn type_name(&self, raw: &str, annotations: &Annotations) -> Name {
        let namespace = annotations.namespace.as_deref().or(self.namespace.as_deref());
        Name::resolve(raw, namespace)
    }

    fn record(&mut self, doc: Option<String>, annotations: Annotations) -> Result<Schema, String> {
        let raw_name = self.expect_ident()?;
        let name = self.type_name(&raw_name, &annotations);
        self.expect_punct('{')?;
        let mut fields = Vec::new();
        let mut seen = HashSet::new();
        while !self.eat_punct('}') {
            for field in self.fields()? {
                if !seen.insert(field.name.clone()) {
                    return self.error(format!("duplicate field '{}' in {}", field.name, name));
                }
                fields.push(field);
            }
        }
        Ok(Schema::Record(RecordSchema { name, doc, fields }))
    }

    fn fields(&mut self) -> Result<Vec<Field>, String> {
        let doc = self.doc();
        let type_annotations = self.annotations()?;
        let (base, optional) = self.field_type(&type_annotations)?;

        let mut fields = Vec::new();
        loop {
            let field_doc = self.doc().or_else(|| doc.clone());
            self.annotations()?;
            let name = self.expect_ident()?;
            let default = if self.eat_punct('=') {
                Some(self.json_value()?)
            } else {
                None
            };
            // A union default must match the first branch
            let schema = match (optional, &default) {
                (false, _) => base.clone(),
                (true, Some(value)) if !value.is_null() => Schema::Union(vec![base.clone(), Schema::Null]),
                (true, _) => Schema::Union(vec![Schema::Null, base.clone()]),
            };
            fields.push(Field {
                name,
                doc: field_doc,
                schema,
                default,
            });
            if !self.eat_punct(',') {
                break;
            }
        }
        self.expect_punct(';')?;
        Ok(fields)
    }

    /// Field type and whether it was written as `T?`
    fn field_type(&mut self, annotations: &Annotations) -> Result<(Schema, bool), String> {
        let schema = self.base_type()?;
        let schema = match &annotations.logical_type {
            Some(logical_type) => Schema::Logical(LogicalSchema {
                logical_type: logical_type.clone(),
                base: Box::new(schema),
                precision: None,
                scale: None,
            }),
            None => schema,
        };
        Ok((schema, self.eat_punct('?')))
    }

    fn type_ref(&mut self) -> Result<Schema, String> {
        let schema = self.base_type()?;
        if self.eat_punct('?') {
            return Ok(Schema::Union(vec![Schema::Null, schema]));
        }
        Ok(schema)
    }

    fn base_type(&mut self) -> Result<Schema, String> {
        let ident = self.expect_ident()?;
        Ok(match ident.as_str() {
            "array" => {
                self.expect_punct('<')?;
                let items = self.type_ref()?;
                self.expect_punct('>')?;
                Schema::Array(Box::new(items))
            }
            "map" => {
                self.expect_punct('<')?;
                let values = self.type_ref()?;
                self.expect_punct('>')?;
                Schema::Map(Box::new(values))
            }
            "union" => {
                self.expect_punct('{')?;
                let mut branches = vec![self.type_ref()?];
                while self.eat_punct(',') {
                    branches.push(self.type_ref()?);
                }
                self.expect_punct('}')?;
                Schema::Union(branches)
            }
            "decimal" => {
                self.expect_punct('(')?;
                let precision = self.integer()?;
                let scale = if self.eat_punct(',') { self.integer()? } else { 0 };
                self.expect_punct(')')?;
                logical("decimal", Schema::Bytes, Some(precision), Some(scale))
            }
            "date" => logical("date", Schema::Int, None, None),
            "time_ms" => logical("time-millis", Schema::Int, None, None),
            "timestamp_ms" => logical("timestamp-millis", Schema::Long, None, None),
            "local_timestamp_ms" => logical("local-timestamp-millis", Schema::Long, None, None),
            "uuid" => logical("uuid", Schema::String, None, None),
            "void" => Schema::Null,
            other => match Schema::primitive(other) {
                Some(primitive) => primitive,
                None => Schema::Ref(Name::resolve(other, self.namespace.as_deref())),
            },
        })
    }

    fn integer(&mut self) -> Result<u32, String> {
        match self.advance() {
            TokenKind::Number(n) => n
                .parse()
                .or_else(|_| self.error(format!("expected a non-negative integer, found {}", n))),
            other => self.error(format!("expected a number, found {:?}", other)),
        }
    }

    fn enumeration(&mut self, doc: Option<String>, annotations: Annotations) -> Result<Schema, String> {
        let raw_name = self.expect_ident()?;
        let name = self.type_name(&raw_name, &annotations);
        self.expect_punct('{')?;
        let mut symbols = Vec::new();
        if !self.is_punct('}') {
            loop {
                symbols.push(self.expect_ident()?);
                if !self.eat_punct(',') {
                    break;
                }
            }
        }
        self.expect_punct('}')?;
        let default = if self.eat_punct('=') {
            Some(self.expect_ident()?)
        } else {
            None
        };
        self.eat_punct(';');
        Ok(Schema::Enum(EnumSchema {
            name,
            doc,
            symbols,
            default,
        }))
    }

    fn fixed(&mut self, annotations: Annotations) -> Result<Schema, String> {
        let raw_name = self.expect_ident()?;
        let name = self.type_name(&raw_name, &annotations);
        self.expect_punct('(')?;
        let size = self.integer()? as usize;
        self.expect_punct(')')?;
        self.expect_punct(';')?;
        Ok(Schema::Fixed(FixedSchema { name, size }))
    }

    /// Skip a message declaration: `type name(params) [throws X] [oneway];`
    fn message(&mut self) -> Result<(), String> {
        self.type_ref()?;
        self.expect_ident()?;
        let mut depth = 0usize;
        loop {
            match self.advance() {
                TokenKind::Punct('(') | TokenKind::Punct('{') | TokenKind::Punct('[') => depth += 1,
                TokenKind::Punct(')') | TokenKind::Punct('}') | TokenKind::Punct(']') => {
                    depth = depth.saturating_sub(1)
                }
                TokenKind::Punct(';') if depth == 0 => return Ok(()),
                TokenKind::Eof => return self.error("unterminated message declaration"),
                _ => {}
            }
        }
    }

    fn json_value(&mut self) -> Result<Value, String> {
        match self.advance() {
            TokenKind::Str(s) => Ok(Value::String(s)),
            TokenKind::Number(n) => serde_json::from_str(&n)
                .or_else(|_| self.error(format!("invalid number literal {}", n))),
            TokenKind::Ident(ident) => match ident.as_str() {
                "null" => Ok(Value::Null),
                "true" => Ok(Value::Bool(true)),
                "false" => Ok(Value::Bool(false)),
                other => self.error(format!("expected a JSON value, found {}", other)),
            },
            TokenKind::Punct('[') => {
                let mut items = Vec::new();
                if !self.eat_punct(']') {
                    loop {
                        items.push(self.json_value()?);
                        if !self.eat_punct(',') {
                            break;
                        }
                    }
                    self.expect_punct(']')?;
                }
                Ok(Value::Array(items))
            }
            TokenKind::Punct('{') => {
                let mut object = Map::new();
                if !self.eat_punct('}') {
                    loop {
                        let key = match self.advance() {
                            TokenKind::Str(key) => key,
                            other => return self.error(format!("expected an object key, found {:?}", other)),
                        };
                        self.expect_punct(':')?;
                        object.insert(key, self.json_value()?);
                        if !self.eat_punct(',') {
                            break;
                        }
                    }
                    self.expect_punct('}')?;
                }
                Ok(Value::Object(object))
            }
            other => self.error(format!("expected a JSON value, found {:?}", other)),
        }
    }
}

fn logical(logical_type: &str, base: Schema, precision: Option<u32>, scale: Option<u32>) -> Schema {
    Schema::Logical(LogicalSchema {
        logical_type: logical_type.to_string(),
        base: Box::new(base),
        precision,
        scale,
    })
}

/// Inline named-type references so every declared type is self-contained.
///
/// The first occurrence of a named type in a tree carries its definition;
/// later occurrences (and recursive ones) stay references.
fn resolve_types(declared: &[Schema]) -> Result<Vec<Schema>, String> {
    let mut names = HashSet::new();
    for schema in declared {
        if let Some(name) = schema.name() {
            if !names.insert(name.clone()) {
                return Err(format!("type {} is declared more than once", name));
            }
        }
    }

    declared
        .iter()
        .map(|schema| resolve(schema, declared, &mut HashSet::new()))
        .collect()
}

fn resolve(schema: &Schema, declared: &[Schema], defined: &mut HashSet<Name>) -> Result<Schema, String> {
    Ok(match schema {
        Schema::Record(record) => {
            defined.insert(record.name.clone());
            let fields = record
                .fields
                .iter()
                .map(|field| {
                    Ok(Field {
                        schema: resolve(&field.schema, declared, defined)?,
                        ..field.clone()
                    })
                })
                .collect::<Result<Vec<_>, String>>()?;
            Schema::Record(RecordSchema {
                fields,
                ..record.clone()
            })
        }
        Schema::Enum(e) => {
            defined.insert(e.name.clone());
            schema.clone()
        }
        Schema::Fixed(f) => {
            defined.insert(f.name.clone());
            schema.clone()
        }
        Schema::Array(items) => Schema::Array(Box::new(resolve(items, declared, defined)?)),
        Schema::Map(values) => Schema::Map(Box::new(resolve(values, declared, defined)?)),
        Schema::Union(branches) => Schema::Union(
            branches
                .iter()
                .map(|b| resolve(b, declared, defined))
                .collect::<Result<Vec<_>, String>>()?,
        ),
        Schema::Logical(l) => Schema::Logical(LogicalSchema {
            base: Box::new(resolve(&l.base, declared, defined)?),
            ..l.clone()
        }),
        Schema::Ref(name) => {
            let definition = lookup(name, declared)
                .ok_or_else(|| format!("undefined name: {}", name))?;
            let resolved_name = definition.name().cloned().unwrap_or_else(|| name.clone());
            if defined.contains(&resolved_name) {
                Schema::Ref(resolved_name)
            } else {
                resolve(definition, declared, defined)?
            }
        }
        primitive => primitive.clone(),
    })
}

/// Find a declared type by full name, falling back to a unique simple name
fn lookup<'a>(name: &Name, declared: &'a [Schema]) -> Option<&'a Schema> {
    declared
        .iter()
        .find(|s| s.name() == Some(name))
        .or_else(|| {
            let mut candidates = declared
                .iter()
                .filter(|s| s.name().map(|n| n.name == name.name).unwrap_or(false));
            match (candidates.next(), candidates.next()) {
                (Some(only), None) => Some(only),
                _ => None,
            }
        })
}
