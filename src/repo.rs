//! Local schema repository
//!
//! Reads schema sources from a directory tree laid out by [`ItemType`]:
//!
//! ```text
//! <root>/
//! ├── common/
//! │   └── Address.avdl            common type, namespace events.schemas
//! └── event/
//!     ├── ClickEvent.avdl         event, namespace events.schemas
//!     └── checkout/
//!         └── OrderPlaced.avdl    event, namespace events.schemas.checkout
//! ```
//!
//! Namespaces and nesting depth are both measured from the item type's base
//! directory.
//!
//! Nothing is cached: every call walks the tree and parses the sources again.

use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};

use fuzzy_matcher::skim::SkimMatcherV2;
use fuzzy_matcher::FuzzyMatcher;
use tracing::{debug, info};
use walkdir::WalkDir;

use crate::error::{MediatorError, Result};
use crate::idl::{IdlParser, SchemaParser};
use crate::item::{ItemType, RepoItem};
use crate::naming;
use crate::report::{self, OutcomeMap};
use crate::schema::Schema;

/// Namespace of schemas at the root of their item type
pub const BASE_NAMESPACE: &str = "events.schemas";

/// Symbol every enum must declare and use as its default
pub const ENUM_DEFAULT_SYMBOL: &str = "UNKNOWN";

/// Item type → (registry subject → schema)
pub type SchemaSnapshot = BTreeMap<ItemType, BTreeMap<String, Schema>>;

/// The local schema repository
pub struct LocalRepository<P = IdlParser> {
    root: PathBuf,
    allowed_namespace_depth: usize,
    parser: P,
}

impl LocalRepository<IdlParser> {
    /// Open a repository of Avro IDL sources
    pub fn open(root: impl AsRef<Path>, allowed_namespace_depth: usize) -> Result<Self> {
        Self::with_parser(root, allowed_namespace_depth, IdlParser::new())
    }
}

impl<P: SchemaParser> LocalRepository<P> {
    /// Open a repository with a custom source parser.
    ///
    /// The root must exist; anything else is a configuration error.
    pub fn with_parser(root: impl AsRef<Path>, allowed_namespace_depth: usize, parser: P) -> Result<Self> {
        let root = root.as_ref().to_path_buf();
        if !root.is_dir() {
            return Err(MediatorError::Configuration(format!(
                "The provided local repo path {} does not exist.",
                root.display()
            )));
        }
        Ok(Self {
            root,
            allowed_namespace_depth,
            parser,
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn allowed_namespace_depth(&self) -> usize {
        self.allowed_namespace_depth
    }

    /// Items of every type, in declared type order
    pub fn list_all(&self) -> Result<Vec<RepoItem>> {
        let mut items = Vec::new();
        for item_type in ItemType::all() {
            items.extend(self.list(item_type)?);
        }
        Ok(items)
    }

    /// Items of one type, sorted by source path
    pub fn list(&self, item_type: ItemType) -> Result<Vec<RepoItem>> {
        let base = item_type.base_path(&self.root);
        if !base.is_dir() {
            debug!("No {} directory at {}", item_type.log_label(), base.display());
            return Ok(Vec::new());
        }

        let excluded = item_type.excluded_paths(&self.root);
        let walker = WalkDir::new(&base)
            .sort_by_file_name()
            .into_iter()
            .filter_entry(|entry| !(entry.file_type().is_dir() && excluded.iter().any(|p| p.as_path() == entry.path())));

        let mut items = Vec::new();
        for entry in walker {
            let entry = entry.map_err(|e| {
                let context = format!("Could not retrieve local {} listings", item_type.log_label());
                debug!("{}: {}", context, e);
                MediatorError::io(context, e.into())
            })?;
            let path = entry.path();
            if !entry.file_type().is_file() || !self.is_source(path) {
                continue;
            }
            let Some(stem) = path.file_stem().and_then(|s| s.to_str()) else {
                continue;
            };
            items.push(RepoItem::new(naming::file_to_subject(stem), item_type, path));
        }
        items.sort_by(|a, b| a.source_path.cmp(&b.source_path));
        Ok(items)
    }

    fn is_source(&self, path: &Path) -> bool {
        path.extension()
            .and_then(|e| e.to_str())
            .map(|e| e == self.parser.extension())
            .unwrap_or(false)
    }

    /// Find an item by name, ignoring case
    pub fn get_item(&self, name: &str) -> Result<RepoItem> {
        find_item(name, &self.list_all()?)
    }

    /// Parsed schema of the item with this name
    pub fn get_schema(&self, name: &str) -> Result<Schema> {
        let item = self.get_item(name)?;
        self.schema_for(&item)
    }

    /// Parsed schema of an item: the type named after its file
    pub fn schema_for(&self, item: &RepoItem) -> Result<Schema> {
        let type_name = naming::subject_to_file(&item.name);
        let extracted = self.parser.extract(&item.source_path, &type_name).map_err(|e| {
            let context = format!(
                "Could not retrieve or parse schema for {} {}",
                item.item_type.log_label(),
                item.name
            );
            debug!("{}: {}", context, e);
            match e {
                MediatorError::Io { source, .. } => MediatorError::io(context, source),
                other => MediatorError::Parse(format!("{}: {}", context, other)),
            }
        })?;

        extracted.ok_or_else(|| {
            MediatorError::Parse(format!(
                "An Avro record with the name {} does not exist within {}",
                type_name,
                item.source_path.display()
            ))
        })
    }

    /// Validate the item with this name, stopping at the first broken rule
    pub fn validate(&self, name: &str) -> Result<()> {
        let items = self.list_all()?;
        let item = find_item(name, &items)?;
        self.validate_item(&item, &items)
    }

    /// Validate every item, failing with one report covering all broken items
    pub fn validate_all(&self) -> Result<()> {
        let failures = self.validation_failures()?;
        if report::has_failures(&failures) {
            return Err(MediatorError::Validation(report::validation_report(&failures)));
        }
        info!("All schemas in the local repo are valid");
        Ok(())
    }

    /// Item type → (item name → first failed rule)
    pub fn validation_failures(&self) -> Result<OutcomeMap> {
        let items = self.list_all()?;
        let mut failures = OutcomeMap::new();
        for item in &items {
            if let Err(e) = self.validate_item(item, &items) {
                failures
                    .entry(item.item_type)
                    .or_default()
                    .entry(item.name.clone())
                    .or_insert_with(|| e.to_string());
            }
        }
        Ok(failures)
    }

    /// Check one item against the repository rules; `items` is the full listing
    fn validate_item(&self, item: &RepoItem, items: &[RepoItem]) -> Result<()> {
        check_source_name(item, items)?;
        self.check_parses(item)?;
        let schema = self.schema_for(item)?;
        self.check_namespace(item, &schema)?;
        self.check_depth(item)?;
        check_enum_default(item, &schema)
    }

    fn check_parses(&self, item: &RepoItem) -> Result<()> {
        match self.parser.parse_protocol(&item.source_path) {
            Ok(_) => Ok(()),
            Err(MediatorError::Io { source, .. }) => Err(MediatorError::io(
                format!(
                    "Could not open source file for {} {} in order to parse it",
                    item.item_type.log_label(),
                    item.name
                ),
                source,
            )),
            Err(e) => Err(MediatorError::Parse(format!(
                "Invalid source file for {} {}: {}",
                item.item_type.log_label(),
                item.name,
                e
            ))),
        }
    }

    /// Namespace implied by the item's directory under its type's base
    pub fn namespace_from_path(&self, item: &RepoItem) -> String {
        let base = item.item_type.base_path(&self.root);
        let segments = relative_segments(&base, &item.source_path);
        if segments.is_empty() {
            BASE_NAMESPACE.to_string()
        } else {
            format!("{}.{}", BASE_NAMESPACE, segments.join("."))
        }
    }

    fn check_namespace(&self, item: &RepoItem, schema: &Schema) -> Result<()> {
        let declared = schema.namespace().unwrap_or_default();
        let expected = self.namespace_from_path(item);
        if declared != expected {
            return Err(MediatorError::Validation(format!(
                "{}'s namespace ({}) does not match its location in the local repo (expected {})",
                naming::subject_to_file(&item.name),
                declared,
                expected
            )));
        }
        Ok(())
    }

    fn check_depth(&self, item: &RepoItem) -> Result<()> {
        let base = item.item_type.base_path(&self.root);
        let depth = relative_segments(&base, &item.source_path).len();
        if depth > self.allowed_namespace_depth {
            return Err(MediatorError::Validation(format!(
                "{} in its current location ({}) is nested beyond the allowed subdirectory depth of {}",
                item.name,
                item.source_path.display(),
                self.allowed_namespace_depth
            )));
        }
        Ok(())
    }

    /// Item type → (registry subject → schema) for every local item
    pub fn local_schema_map(&self) -> Result<SchemaSnapshot> {
        let mut snapshot = SchemaSnapshot::new();
        let mut subjects = BTreeSet::new();
        for item_type in ItemType::all() {
            let mut schemas = BTreeMap::new();
            for item in self.list(item_type)? {
                let subject = naming::local_to_registry_subject(&item.name);
                if !subjects.insert(subject.clone()) {
                    return Err(MediatorError::Validation(format!(
                        "Local repo defines subject {} more than once",
                        subject
                    )));
                }
                schemas.insert(subject, self.schema_for(&item)?);
            }
            if !schemas.is_empty() {
                snapshot.insert(item_type, schemas);
            }
        }
        Ok(snapshot)
    }
}

/// Source file names must follow the file naming convention and map to a
/// name no other source uses
fn check_source_name(item: &RepoItem, items: &[RepoItem]) -> Result<()> {
    let stem = item
        .source_path
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or_default();
    if !naming::is_file_name(stem) {
        return Err(MediatorError::Validation(format!(
            "{} does not follow the UpperCamelCase file naming convention",
            item.source_path.display()
        )));
    }

    let others: Vec<String> = items
        .iter()
        .filter(|other| other.name == item.name && other.source_path != item.source_path)
        .map(|other| other.source_path.display().to_string())
        .collect();
    if !others.is_empty() {
        return Err(MediatorError::Validation(format!(
            "{} in {} is also defined by {}",
            item.name,
            item.source_path.display(),
            others.join(", ")
        )));
    }
    Ok(())
}

fn find_item(name: &str, items: &[RepoItem]) -> Result<RepoItem> {
    if let Some(item) = items.iter().find(|i| i.name.eq_ignore_ascii_case(name)) {
        return Ok(item.clone());
    }

    let mut message = format!("Could not find any schemas with the name {}", name);
    let suggestions = suggest(name, items);
    if !suggestions.is_empty() {
        message.push_str(&format!(". Did you mean: {}?", suggestions.join(", ")));
    }
    Err(MediatorError::NotFound(message))
}

fn check_enum_default(item: &RepoItem, schema: &Schema) -> Result<()> {
    let Schema::Enum(e) = schema else {
        return Ok(());
    };
    if !e.symbols.iter().any(|s| s == ENUM_DEFAULT_SYMBOL) {
        return Err(MediatorError::Validation(format!(
            "Enum {} does not have required symbol {} in its list of values",
            item.name, ENUM_DEFAULT_SYMBOL
        )));
    }
    if e.default.as_deref() != Some(ENUM_DEFAULT_SYMBOL) {
        return Err(MediatorError::Validation(format!(
            "Enum {} does not have required symbol {} listed as its default value",
            item.name, ENUM_DEFAULT_SYMBOL
        )));
    }
    Ok(())
}

/// Directory names between `base` and the file's parent directory
fn relative_segments(base: &Path, file: &Path) -> Vec<String> {
    file.parent()
        .and_then(|parent| parent.strip_prefix(base).ok())
        .map(|rel| {
            rel.components()
                .map(|c| c.as_os_str().to_string_lossy().into_owned())
                .collect()
        })
        .unwrap_or_default()
}

fn suggest(name: &str, items: &[RepoItem]) -> Vec<String> {
    let matcher = SkimMatcherV2::default();
    let mut scored: Vec<(i64, &str)> = items
        .iter()
        .filter_map(|item| {
            matcher
                .fuzzy_match(&item.name, name)
                .map(|score| (score, item.name.as_str()))
        })
        .collect();
    scored.sort_by(|a, b| b.0.cmp(&a.0).then(a.1.cmp(b.1)));
    scored.into_iter().take(3).map(|(_, n)| n.to_string()).collect()
}
