//! Directory-backed registry
//!
//! Every registered version is an append-only JSON file committed to git:
//!
//! ```text
//! <root>/
//! ├── ids.json
//! └── subjects/
//!     └── click-event-value/
//!         ├── v1.json
//!         └── v2.json
//! ```

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use git2::{Commit, Oid, Repository, Signature};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tracing::{debug, info, warn};

use super::{RegistryGateway, SchemaMetadata};
use crate::compatibility::{AvroCompatibility, CompatibilityMode};
use crate::error::RegistryError;
use crate::naming;
use crate::schema::Schema;

const SUBJECTS_DIR: &str = "subjects";
const IDS_FILE: &str = "ids.json";

/// One stored version of a subject
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegisteredSchema {
    pub subject: String,
    pub id: u32,
    pub version: u32,
    /// Avro JSON text
    pub schema: String,
    /// SHA-256 of the schema's parsing canonical form
    pub fingerprint: String,
    pub registered_at: DateTime<Utc>,
}

impl RegisteredSchema {
    pub fn metadata(&self) -> SchemaMetadata {
        SchemaMetadata {
            id: self.id,
            version: self.version,
            schema: self.schema.clone(),
        }
    }

    /// Parse the stored schema text, rejecting it if it no longer matches
    /// its fingerprint
    pub fn parse(&self) -> Result<Schema, RegistryError> {
        let schema = Schema::parse_str(&self.schema).map_err(|e| {
            RegistryError::InvalidSchema(format!("{} (subject {} v{})", e, self.subject, self.version))
        })?;
        if fingerprint(&schema)? != self.fingerprint {
            debug!(subject = %self.subject, version = self.version, "Fingerprint mismatch");
            return Err(RegistryError::InvalidSchema(format!(
                "stored schema does not match its fingerprint (subject {} v{})",
                self.subject, self.version
            )));
        }
        Ok(schema)
    }
}

/// SHA-256 of a schema's parsing canonical form, hex encoded
pub fn fingerprint(schema: &Schema) -> Result<String, RegistryError> {
    let canonical = schema
        .canonical_form()
        .map_err(|e| RegistryError::InvalidSchema(e.to_string()))?;
    Ok(format!("{:x}", Sha256::digest(canonical.as_bytes())))
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct IdCounter {
    last_id: u32,
}

/// A schema registry stored in a local git repository
pub struct DirectoryRegistry {
    root: PathBuf,
    repo: Repository,
    mode: CompatibilityMode,
    evaluator: AvroCompatibility,
}

fn storage(path: &Path) -> impl FnOnce(io::Error) -> RegistryError + '_ {
    move |source| RegistryError::Storage {
        path: path.to_path_buf(),
        source,
    }
}

impl DirectoryRegistry {
    /// Open an existing registry or create a new one
    pub fn open(path: impl AsRef<Path>, mode: CompatibilityMode) -> Result<Self, RegistryError> {
        let root = path.as_ref().to_path_buf();
        let subjects = root.join(SUBJECTS_DIR);
        fs::create_dir_all(&subjects).map_err(storage(&subjects))?;

        let repo = match Repository::open(&root) {
            Ok(repo) => repo,
            Err(_) => Repository::init(&root)?,
        };

        Ok(Self {
            root,
            repo,
            mode,
            evaluator: AvroCompatibility::new(),
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn mode(&self) -> CompatibilityMode {
        self.mode
    }

    fn subject_dir(&self, subject: &str) -> Result<PathBuf, RegistryError> {
        if !naming::is_subject_name(subject) {
            return Err(RegistryError::Communication(format!(
                "Invalid subject name '{}'",
                subject
            )));
        }
        Ok(self.root.join(SUBJECTS_DIR).join(subject))
    }

    /// All stored versions of `subject`, oldest first
    pub fn load_versions(&self, subject: &str) -> Result<Vec<RegisteredSchema>, RegistryError> {
        let dir = self.subject_dir(subject)?;
        if !dir.is_dir() {
            return Ok(Vec::new());
        }

        let mut versions = Vec::new();
        for entry in fs::read_dir(&dir).map_err(storage(&dir))? {
            let path = entry.map_err(storage(&dir))?.path();
            let is_version = path
                .file_name()
                .and_then(|n| n.to_str())
                .map(|n| n.starts_with('v') && n.ends_with(".json"))
                .unwrap_or(false);
            if !is_version {
                continue;
            }
            let content = fs::read_to_string(&path).map_err(storage(&path))?;
            let stored: RegisteredSchema = serde_json::from_str(&content).map_err(|e| {
                RegistryError::InvalidSchema(format!("{}: {}", path.display(), e))
            })?;
            versions.push(stored);
        }
        versions.sort_by_key(|v| v.version);
        Ok(versions)
    }

    /// Latest stored version of `subject`
    pub fn latest(&self, subject: &str) -> Result<RegisteredSchema, RegistryError> {
        self.load_versions(subject)?
            .pop()
            .ok_or_else(|| RegistryError::NotFound(format!("subject {}", subject)))
    }

    /// Contents of `ids.json`, if it exists, and the counter it holds
    fn read_ids(&self) -> Result<(Option<String>, IdCounter), RegistryError> {
        let path = self.root.join(IDS_FILE);
        if !path.exists() {
            return Ok((None, IdCounter::default()));
        }
        let content = fs::read_to_string(&path).map_err(storage(&path))?;
        let counter = serde_json::from_str(&content)
            .map_err(|e| RegistryError::InvalidSchema(format!("{}: {}", path.display(), e)))?;
        Ok((Some(content), counter))
    }

    fn write_json<T: Serialize>(path: &Path, value: &T) -> Result<(), RegistryError> {
        let content = serde_json::to_string_pretty(value)
            .map_err(|e| RegistryError::InvalidSchema(e.to_string()))?;
        fs::write(path, content).map_err(storage(path))
    }

    /// Remove a version whose commit failed and restore the previous id counter
    fn discard(&self, version_file: &Path, previous_ids: Option<&str>) {
        let ids_file = self.root.join(IDS_FILE);
        let restored = match previous_ids {
            Some(content) => fs::write(&ids_file, content),
            None => fs::remove_file(&ids_file),
        };
        let removed = match fs::remove_file(version_file) {
            Err(e) if e.kind() != io::ErrorKind::NotFound => Err(e),
            _ => Ok(()),
        };
        if let Err(e) = removed.and(restored) {
            warn!("Could not undo uncommitted registration {}: {}", version_file.display(), e);
        }
    }

    /// Create a Git commit with the current registry contents
    fn git_commit(&self, summary: &str) -> Result<Oid, RegistryError> {
        let pathspecs = [format!("{}/*", SUBJECTS_DIR), IDS_FILE.to_string()];
        let mut index = self.repo.index()?;
        // Drop entries for files removed after an earlier failed commit
        index.update_all(pathspecs.iter(), None)?;
        index.add_all(pathspecs.iter(), git2::IndexAddOption::DEFAULT, None)?;
        index.write()?;

        let oid = index.write_tree()?;
        let tree = self.repo.find_tree(oid)?;
        let sig = Signature::now("Schema Registry", "registry@events.schemas")?;

        let parent_commit = self.head_commit();
        let parents: Vec<&Commit> = parent_commit.iter().collect();

        Ok(self.repo.commit(Some("HEAD"), &sig, &sig, summary, &tree, &parents)?)
    }

    fn head_commit(&self) -> Option<Commit<'_>> {
        self.repo
            .head()
            .ok()
            .and_then(|head| head.peel_to_commit().ok())
    }
}

impl RegistryGateway for DirectoryRegistry {
    fn register(&self, subject: &str, schema: &Schema) -> Result<u32, RegistryError> {
        let fingerprint = fingerprint(schema)?;
        let existing = self.load_versions(subject)?;

        for stored in &existing {
            if stored.parse()? == *schema {
                debug!(subject, id = stored.id, "Schema already registered");
                return Ok(stored.id);
            }
        }

        if let Some(latest) = existing.last() {
            let check = self.mode.check(&self.evaluator, schema, &latest.parse()?);
            if !check.is_compatible() {
                return Err(RegistryError::Incompatible {
                    subject: subject.to_string(),
                    details: check.describe(),
                });
            }
        }

        let (previous_ids, mut counter) = self.read_ids()?;
        counter.last_id += 1;
        let version = existing.last().map(|v| v.version + 1).unwrap_or(1);
        let stored = RegisteredSchema {
            subject: subject.to_string(),
            id: counter.last_id,
            version,
            schema: schema.to_json().to_string(),
            fingerprint,
            registered_at: Utc::now(),
        };

        let dir = self.subject_dir(subject)?;
        fs::create_dir_all(&dir).map_err(storage(&dir))?;
        let path = dir.join(format!("v{}.json", version));

        // Nothing is reported as registered unless it is committed
        let committed = Self::write_json(&path, &stored)
            .and_then(|_| Self::write_json(&self.root.join(IDS_FILE), &counter))
            .and_then(|_| self.git_commit(&format!("Register {} v{}", subject, version)));
        if let Err(e) = committed {
            self.discard(&path, previous_ids.as_deref());
            return Err(e);
        }
        info!(subject, id = stored.id, version, "Registered schema");

        Ok(stored.id)
    }

    fn latest_metadata(&self, subject: &str) -> Result<SchemaMetadata, RegistryError> {
        let latest = self.latest(subject)?;
        latest.parse()?;
        Ok(latest.metadata())
    }

    fn versions(&self, subject: &str) -> Result<Vec<u32>, RegistryError> {
        let versions: Vec<u32> = self
            .load_versions(subject)?
            .iter()
            .map(|v| v.version)
            .collect();
        if versions.is_empty() {
            return Err(RegistryError::NotFound(format!("subject {}", subject)));
        }
        Ok(versions)
    }

    fn test_compatibility(&self, subject: &str, schema: &Schema) -> Result<bool, RegistryError> {
        let latest = match self.latest(subject) {
            Ok(latest) => latest.parse()?,
            Err(e) if e.is_not_found() => return Ok(true),
            Err(e) => return Err(e),
        };
        Ok(self
            .mode
            .check(&self.evaluator, schema, &latest)
            .is_compatible())
    }

    fn list_subjects(&self) -> Result<Vec<String>, RegistryError> {
        let dir = self.root.join(SUBJECTS_DIR);
        let mut subjects = Vec::new();
        for entry in fs::read_dir(&dir).map_err(storage(&dir))? {
            let entry = entry.map_err(storage(&dir))?;
            if !entry.path().is_dir() {
                continue;
            }
            if let Some(name) = entry.file_name().to_str() {
                if !self.load_versions(name)?.is_empty() {
                    subjects.push(name.to_string());
                }
            }
        }
        subjects.sort();
        Ok(subjects)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::{Field, Name, RecordSchema};
    use tempfile::tempdir;

    fn click_event(extra: Option<(&str, Option<serde_json::Value>)>) -> Schema {
        let mut fields = vec![Field {
            name: "url".to_string(),
            doc: None,
            schema: Schema::String,
            default: None,
        }];
        if let Some((name, default)) = extra {
            fields.push(Field {
                name: name.to_string(),
                doc: None,
                schema: Schema::String,
                default,
            });
        }
        Schema::Record(RecordSchema {
            name: Name::new("ClickEvent", Some("events.schemas")),
            doc: None,
            fields,
        })
    }

    #[test]
    fn test_create_registry() {
        let dir = tempdir().unwrap();
        let registry = DirectoryRegistry::open(dir.path(), CompatibilityMode::Backward).unwrap();
        assert!(registry.list_subjects().unwrap().is_empty());
        assert!(registry.latest_schema("click-event-value").unwrap_err().is_not_found());
    }

    #[test]
    fn test_register_is_idempotent() {
        let dir = tempdir().unwrap();
        let registry = DirectoryRegistry::open(dir.path(), CompatibilityMode::Backward).unwrap();
        let schema = click_event(None);

        let first = registry.register("click-event-value", &schema).unwrap();
        let second = registry.register("click-event-value", &schema).unwrap();
        assert_eq!(first, second);
        assert_eq!(registry.versions("click-event-value").unwrap(), vec![1]);
        assert_eq!(registry.latest_schema("click-event-value").unwrap(), schema);
        assert_eq!(registry.list_subjects().unwrap(), vec!["click-event-value"]);
    }

    #[test]
    fn test_tampered_version_is_rejected() {
        let dir = tempdir().unwrap();
        let registry = DirectoryRegistry::open(dir.path(), CompatibilityMode::Backward).unwrap();
        registry.register("click-event-value", &click_event(None)).unwrap();

        let path = dir.path().join("subjects/click-event-value/v1.json");
        let mut stored: RegisteredSchema =
            serde_json::from_str(&fs::read_to_string(&path).unwrap()).unwrap();
        stored.schema = click_event(Some(("referrer", None))).to_json().to_string();
        fs::write(&path, serde_json::to_string(&stored).unwrap()).unwrap();

        let err = registry.latest_metadata("click-event-value").unwrap_err();
        assert!(matches!(err, RegistryError::InvalidSchema(_)));
        assert!(err.to_string().contains("does not match its fingerprint"), "{err}");
    }

    #[test]
    fn test_invalid_subject_name() {
        let dir = tempdir().unwrap();
        let registry = DirectoryRegistry::open(dir.path(), CompatibilityMode::Backward).unwrap();
        for subject in ["../escape", "ClickEvent", ""] {
            assert!(registry.register(subject, &click_event(None)).is_err(), "{subject}");
        }
        assert!(registry.list_subjects().unwrap().is_empty());
    }

    #[test]
    fn test_failed_commit_leaves_no_version_behind() {
        let dir = tempdir().unwrap();
        let registry = DirectoryRegistry::open(dir.path(), CompatibilityMode::None).unwrap();
        registry.register("click-event-value", &click_event(None)).unwrap();

        // A held index lock makes the commit fail
        let lock = dir.path().join(".git/index.lock");
        fs::write(&lock, "").unwrap();
        let evolved = click_event(Some(("referrer", None)));
        let err = registry.register("click-event-value", &evolved).unwrap_err();
        assert!(matches!(err, RegistryError::Git(_)));
        assert_eq!(registry.versions("click-event-value").unwrap(), vec![1]);
        assert!(!dir.path().join("subjects/click-event-value/v2.json").exists());

        fs::remove_file(&lock).unwrap();
        assert_eq!(registry.register("click-event-value", &evolved).unwrap(), 2);
        assert_eq!(
            registry.head_commit().unwrap().summary(),
            Some("Register click-event-value v2")
        );
    }

    #[test]
    fn test_compatible_evolution_adds_version() {
        let dir = tempdir().unwrap();
        let registry = DirectoryRegistry::open(dir.path(), CompatibilityMode::Full).unwrap();
        registry.register("click-event-value", &click_event(None)).unwrap();

        let evolved = click_event(Some(("referrer", Some(serde_json::json!("")))));
        assert!(registry.test_compatibility("click-event-value", &evolved).unwrap());
        let id = registry.register("click-event-value", &evolved).unwrap();

        let latest = registry.latest_metadata("click-event-value").unwrap();
        assert_eq!(latest.id, id);
        assert_eq!(latest.version, 2);
        assert_eq!(registry.versions("click-event-value").unwrap(), vec![1, 2]);
    }

    #[test]
    fn test_incompatible_registration_is_rejected() {
        let dir = tempdir().unwrap();
        let registry = DirectoryRegistry::open(dir.path(), CompatibilityMode::Backward).unwrap();
        registry.register("click-event-value", &click_event(None)).unwrap();

        let breaking = click_event(Some(("referrer", None)));
        assert!(!registry.test_compatibility("click-event-value", &breaking).unwrap());
        let err = registry.register("click-event-value", &breaking).unwrap_err();
        assert!(matches!(err, RegistryError::Incompatible { .. }));
        assert!(err.to_string().contains("READER_FIELD_MISSING_DEFAULT_VALUE"));
        assert_eq!(registry.versions("click-event-value").unwrap(), vec![1]);
    }

    #[test]
    fn test_registrations_are_committed() {
        let dir = tempdir().unwrap();
        let registry = DirectoryRegistry::open(dir.path(), CompatibilityMode::None).unwrap();
        registry.register("click-event-value", &click_event(None)).unwrap();
        registry
            .register("click-event-value", &click_event(Some(("referrer", None))))
            .unwrap();

        let head = registry.head_commit().unwrap();
        assert_eq!(head.summary(), Some("Register click-event-value v2"));
        assert_eq!(head.parent_count(), 1);
    }

    #[test]
    fn test_reopen_keeps_history() {
        let dir = tempdir().unwrap();
        {
            let registry = DirectoryRegistry::open(dir.path(), CompatibilityMode::Backward).unwrap();
            registry.register("click-event-value", &click_event(None)).unwrap();
        }
        let registry = DirectoryRegistry::open(dir.path(), CompatibilityMode::Backward).unwrap();
        assert_eq!(registry.list_subjects().unwrap(), vec!["click-event-value"]);
        let next = registry
            .register("page-view-value", &click_event(None))
            .unwrap();
        assert_eq!(next, 2);
    }
}
