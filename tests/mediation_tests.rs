//! Mediation Tests
//!
//! Sync and compatibility flows against a scripted registry and evaluator,
//! plus a full round trip through the directory registry.

use std::cell::{Cell, RefCell};
use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::path::Path;

use avro_mediator::{
    AvroCompatibility, CompatibilityCheck, CompatibilityEvaluator, CompatibilityMode,
    DirectoryRegistry, Incompatibility, IncompatibilityKind, ItemType, LocalRepository,
    MediationEngine, MediatorError, RegistryError, RegistryGateway, Schema, SchemaMetadata,
};
use tempfile::{tempdir, TempDir};

// =============================================================================
// Stand-ins
// =============================================================================

/// In-memory registry with scripted verdicts and failures
#[derive(Default)]
struct ScriptedRegistry {
    subjects: RefCell<BTreeMap<String, Vec<Schema>>>,
    verdicts: BTreeMap<String, bool>,
    failing_registrations: BTreeSet<String>,
    unreachable_tests: BTreeSet<String>,
    unreachable: bool,
    registrations: Cell<usize>,
}

impl ScriptedRegistry {
    fn seed(&self, subject: &str, schema: Schema) {
        self.subjects
            .borrow_mut()
            .entry(subject.to_string())
            .or_default()
            .push(schema);
    }
}

impl RegistryGateway for ScriptedRegistry {
    fn register(&self, subject: &str, schema: &Schema) -> Result<u32, RegistryError> {
        if self.failing_registrations.contains(subject) {
            return Err(RegistryError::Communication("connection reset".to_string()));
        }
        self.registrations.set(self.registrations.get() + 1);
        let mut subjects = self.subjects.borrow_mut();
        let versions = subjects.entry(subject.to_string()).or_default();
        if versions.last() != Some(schema) {
            versions.push(schema.clone());
        }
        Ok(versions.len() as u32)
    }

    fn latest_metadata(&self, subject: &str) -> Result<SchemaMetadata, RegistryError> {
        let subjects = self.subjects.borrow();
        let versions = subjects
            .get(subject)
            .ok_or_else(|| RegistryError::NotFound(format!("subject {}", subject)))?;
        let latest = versions.last().expect("seeded subjects have a version");
        Ok(SchemaMetadata {
            id: versions.len() as u32,
            version: versions.len() as u32,
            schema: latest.to_json().to_string(),
        })
    }

    fn versions(&self, subject: &str) -> Result<Vec<u32>, RegistryError> {
        let subjects = self.subjects.borrow();
        let count = subjects.get(subject).map(Vec::len).unwrap_or(0) as u32;
        Ok((1..=count).collect())
    }

    fn test_compatibility(&self, subject: &str, _schema: &Schema) -> Result<bool, RegistryError> {
        if self.unreachable_tests.contains(subject) {
            return Err(RegistryError::Communication("timed out".to_string()));
        }
        Ok(self.verdicts.get(subject).copied().unwrap_or(true))
    }

    fn list_subjects(&self) -> Result<Vec<String>, RegistryError> {
        if self.unreachable {
            return Err(RegistryError::Communication("registry unavailable".to_string()));
        }
        Ok(self.subjects.borrow().keys().cloned().collect())
    }

    fn latest_schema(&self, subject: &str) -> Result<Schema, RegistryError> {
        self.subjects
            .borrow()
            .get(subject)
            .and_then(|versions| versions.last().cloned())
            .ok_or_else(|| RegistryError::NotFound(format!("subject {}", subject)))
    }
}

/// Evaluator whose findings are scripted per reader schema
#[derive(Default)]
struct ScriptedEvaluator {
    findings: Vec<(Schema, Vec<Incompatibility>)>,
}

impl CompatibilityEvaluator for ScriptedEvaluator {
    fn check(&self, reader: &Schema, _writer: &Schema) -> CompatibilityCheck {
        let found = self
            .findings
            .iter()
            .find(|(schema, _)| schema == reader)
            .map(|(_, findings)| findings.clone())
            .unwrap_or_default();
        CompatibilityCheck::incompatible(found)
    }
}

// =============================================================================
// Fixtures
// =============================================================================

fn write(root: &Path, rel: &str, source: &str) {
    let path = root.join(rel);
    fs::create_dir_all(path.parent().unwrap()).unwrap();
    fs::write(path, source).unwrap();
}

fn record(name: &str, fields: &str) -> String {
    format!(
        r#"@namespace("events.schemas")
protocol {name}Protocol {{
    record {name} {{
        {fields}
    }}
}}"#
    )
}

const CLICK_V1: &str = "string url;";
const CLICK_V2_REQUIRED: &str = "string url; string email;";
const CLICK_V2_OPTIONAL: &str = "string url; string email = \"\";";

fn local_repo() -> (TempDir, LocalRepository) {
    let dir = tempdir().unwrap();
    let repo = LocalRepository::open(dir.path(), 1).unwrap();
    (dir, repo)
}

fn engine<E: CompatibilityEvaluator>(
    repo: LocalRepository,
    registry: ScriptedRegistry,
    evaluator: E,
) -> MediationEngine<ScriptedRegistry, E> {
    MediationEngine::new(repo, registry, evaluator)
}

fn mediation_message(err: MediatorError) -> String {
    match err {
        MediatorError::Mediation(message) => message,
        other => panic!("Expected a mediation error, got {:?}", other),
    }
}

// =============================================================================
// Sync
// =============================================================================

#[test]
fn test_sync_registers_changes_and_is_idempotent() {
    let (dir, repo) = local_repo();
    write(dir.path(), "event/ClickEvent.avdl", &record("ClickEvent", CLICK_V1));
    write(dir.path(), "common/Address.avdl", &record("Address", "string city;"));

    let engine = engine(repo, ScriptedRegistry::default(), AvroCompatibility::new());
    assert_eq!(engine.pending_changes().unwrap().len(), 2);

    let first = engine.sync_local_with_remote().unwrap();
    assert!(first.is_empty());
    assert_eq!(engine.gateway().registrations.get(), 2);
    assert_eq!(
        engine.gateway().latest_schema("click-event-value").unwrap(),
        engine.repository().get_schema("click-event").unwrap()
    );

    let second = engine.sync_local_with_remote().unwrap();
    assert!(second.is_empty());
    assert_eq!(engine.gateway().registrations.get(), 2);
    assert!(engine.pending_changes().unwrap().is_empty());
}

#[test]
fn test_sync_only_registers_differences() {
    let (dir, repo) = local_repo();
    write(dir.path(), "event/ClickEvent.avdl", &record("ClickEvent", CLICK_V1));
    write(dir.path(), "event/PageView.avdl", &record("PageView", "string path;"));

    let registry = ScriptedRegistry::default();
    registry.seed("click-event-value", repo.get_schema("click-event").unwrap());
    let engine = engine(repo, registry, AvroCompatibility::new());

    engine.sync_local_with_remote().unwrap();
    assert_eq!(engine.gateway().registrations.get(), 1);
    assert_eq!(engine.gateway().versions("click-event-value").unwrap(), vec![1]);
    assert_eq!(engine.gateway().versions("page-view-value").unwrap(), vec![1]);
}

#[test]
fn test_sync_collects_every_failure() {
    let (dir, repo) = local_repo();
    write(dir.path(), "event/ClickEvent.avdl", &record("ClickEvent", CLICK_V1));
    write(dir.path(), "event/PageView.avdl", &record("PageView", "string path;"));
    write(dir.path(), "common/Address.avdl", &record("Address", "string city;"));

    let registry = ScriptedRegistry {
        failing_registrations: ["click-event-value", "page-view-value"]
            .into_iter()
            .map(String::from)
            .collect(),
        ..Default::default()
    };
    let engine = engine(repo, registry, AvroCompatibility::new());

    let message = mediation_message(engine.sync_local_with_remote().unwrap_err());
    assert_eq!(
        message,
        "Sync completed with some failures. Updated schemas and their registration results:\n\n\
         event:\n\
         click-event-value: An error occurred when communicating with the schema registry: connection reset\n\
         page-view-value: An error occurred when communicating with the schema registry: connection reset\n\n"
    );
    // The healthy subject was still registered
    assert!(engine.gateway().latest_schema("address-value").is_ok());
}

#[test]
fn test_unreachable_registry_fails_snapshot() {
    let (dir, repo) = local_repo();
    write(dir.path(), "event/ClickEvent.avdl", &record("ClickEvent", CLICK_V1));

    let registry = ScriptedRegistry {
        unreachable: true,
        ..Default::default()
    };
    let engine = engine(repo, registry, AvroCompatibility::new());
    let message = mediation_message(engine.sync_local_with_remote().unwrap_err());
    assert!(
        message.starts_with("There was a problem building local and/or remote schema map(s)"),
        "{message}"
    );
}

// =============================================================================
// Compatibility
// =============================================================================

#[test]
fn test_explanation_reports_backward_only() {
    let (dir, repo) = local_repo();
    write(dir.path(), "event/ClickEvent.avdl", &record("ClickEvent", CLICK_V1));
    let remote = repo.get_schema("click-event").unwrap();
    write(dir.path(), "event/ClickEvent.avdl", &record("ClickEvent", CLICK_V2_REQUIRED));
    let local = repo.get_schema("click-event").unwrap();

    let engine = engine(repo, ScriptedRegistry::default(), AvroCompatibility::new());
    let explanation = engine.explain_incompatibility(&local, &remote).unwrap();
    assert_eq!(
        explanation,
        "Not backwards-compatible: [READER_FIELD_MISSING_DEFAULT_VALUE: email (/fields/1)]"
    );
    assert!(!explanation.contains("Not forwards-compatible"));

    let compatible = engine.explain_incompatibility(&remote, &remote);
    assert!(compatible.is_none());
}

#[test]
fn test_explanation_lists_both_directions_in_order() {
    let (_dir, repo) = local_repo();
    let finding = |kind, message: &str, location: &str| Incompatibility {
        kind,
        message: message.to_string(),
        location: location.to_string(),
    };
    let evaluator = ScriptedEvaluator {
        findings: vec![
            (
                Schema::Long,
                vec![
                    finding(IncompatibilityKind::TypeMismatch, "first", "/"),
                    finding(IncompatibilityKind::NameMismatch, "second", "/name"),
                ],
            ),
            (
                Schema::Int,
                vec![finding(IncompatibilityKind::MissingUnionBranch, "third", "/0")],
            ),
        ],
    };

    let engine = engine(repo, ScriptedRegistry::default(), evaluator);
    assert_eq!(
        engine.explain_incompatibility(&Schema::Long, &Schema::Int).unwrap(),
        "Not backwards-compatible: [TYPE_MISMATCH: first (/)], [NAME_MISMATCH: second (/name)]\n\
         Not forwards-compatible: [MISSING_UNION_BRANCH: third (/0)]"
    );
}

#[test]
fn test_single_compatibility_for_unregistered_schema() {
    let (dir, repo) = local_repo();
    write(dir.path(), "event/ClickEvent.avdl", &record("ClickEvent", CLICK_V1));

    let engine = engine(repo, ScriptedRegistry::default(), AvroCompatibility::new());
    assert_eq!(
        engine.test_compatibility("click-event").unwrap(),
        "Schema for click-event has not been registered yet. No need to test compatibility."
    );
}

#[test]
fn test_single_compatibility_outcomes() {
    let (dir, repo) = local_repo();
    write(dir.path(), "event/ClickEvent.avdl", &record("ClickEvent", CLICK_V1));
    let registry = ScriptedRegistry {
        verdicts: [("click-event-value".to_string(), false)].into_iter().collect(),
        ..Default::default()
    };
    registry.seed("click-event-value", repo.get_schema("click-event").unwrap());
    let engine = engine(repo, registry, AvroCompatibility::new());

    // Equal schemas never reach the registry's verdict
    assert_eq!(
        engine.test_compatibility("CLICK-EVENT").unwrap(),
        "Local schema for click-event is compatible with the corresponding schema in the registry"
    );

    write(dir.path(), "event/ClickEvent.avdl", &record("ClickEvent", CLICK_V2_REQUIRED));
    let message = mediation_message(engine.test_compatibility("click-event").unwrap_err());
    assert!(message.starts_with("Not backwards-compatible: "), "{message}");

    // Registry rejects what the evaluator cannot explain
    write(dir.path(), "event/ClickEvent.avdl", &record("ClickEvent", CLICK_V2_OPTIONAL));
    let message = mediation_message(engine.test_compatibility("click-event").unwrap_err());
    assert_eq!(
        message,
        "Local schema for click-event is NOT compatible with the corresponding schema in the registry"
    );
}

#[test]
fn test_single_compatibility_for_unknown_item() {
    let (_dir, repo) = local_repo();
    let engine = engine(repo, ScriptedRegistry::default(), AvroCompatibility::new());
    let message = mediation_message(engine.test_compatibility("click-event").unwrap_err());
    assert!(message.contains("Could not find any schemas with the name click-event"));
}

#[test]
fn test_global_compatibility() {
    let (dir, repo) = local_repo();
    write(dir.path(), "event/ClickEvent.avdl", &record("ClickEvent", CLICK_V1));
    write(dir.path(), "event/PageView.avdl", &record("PageView", "string path;"));
    write(dir.path(), "event/Search.avdl", &record("Search", "string query;"));
    write(dir.path(), "common/Address.avdl", &record("Address", "string city;"));

    let registry = ScriptedRegistry {
        verdicts: [
            ("click-event-value".to_string(), false),
            ("page-view-value".to_string(), false),
        ]
        .into_iter()
        .collect(),
        unreachable_tests: ["search-value".to_string()].into_iter().collect(),
        ..Default::default()
    };
    registry.seed("click-event-value", repo.get_schema("click-event").unwrap());
    registry.seed("search-value", Schema::String);
    registry.seed("page-view-value", Schema::String);

    write(dir.path(), "event/ClickEvent.avdl", &record("ClickEvent", CLICK_V2_OPTIONAL));
    let engine = engine(repo, registry, AvroCompatibility::new());

    let message = mediation_message(engine.test_global_compatibility().unwrap_err());
    assert!(message.starts_with(
        "Compatibility check completed with some failures. Updated schemas and their compatibility test results:\n\nevent:\n"
    ));
    // Click event evolved compatibly, so only the registry's word is left
    assert!(message.contains("click-event-value: Remote registry says invalid."), "{message}");
    assert!(message.contains("page-view-value: Not backwards-compatible: [TYPE_MISMATCH"), "{message}");
    // Unreachable and unregistered subjects are skipped
    assert!(!message.contains("search-value"));
    assert!(!message.contains("address-value"));
    assert!(!message.contains("common:"));
}

#[test]
fn test_global_compatibility_when_in_sync() {
    let (dir, repo) = local_repo();
    write(dir.path(), "event/ClickEvent.avdl", &record("ClickEvent", CLICK_V1));
    let registry = ScriptedRegistry::default();
    registry.seed("click-event-value", repo.get_schema("click-event").unwrap());

    let engine = engine(repo, registry, AvroCompatibility::new());
    assert!(engine.test_global_compatibility().unwrap().is_empty());
}

// =============================================================================
// Directory registry round trip
// =============================================================================

#[test]
fn test_round_trip_through_directory_registry() {
    let (dir, repo) = local_repo();
    let registry_dir = tempdir().unwrap();
    write(dir.path(), "event/ClickEvent.avdl", &record("ClickEvent", CLICK_V1));

    let registry = DirectoryRegistry::open(registry_dir.path(), CompatibilityMode::Backward).unwrap();
    let engine = MediationEngine::with_defaults(repo, registry);

    engine.sync_local_with_remote().unwrap();
    assert!(engine.pending_changes().unwrap().is_empty());
    assert!(engine.diff("click-event").unwrap().contains("matches the registry"));
    assert_eq!(
        engine.print("click-event", true).unwrap(),
        engine.print("click-event", false).unwrap()
    );

    write(dir.path(), "event/ClickEvent.avdl", &record("ClickEvent", CLICK_V2_REQUIRED));
    let pending = engine.pending_changes().unwrap();
    assert!(pending[&ItemType::Event].contains_key("click-event-value"));

    let diff = engine.diff("click-event").unwrap();
    assert!(diff.starts_with("--- registry click-event-value\n"), "{diff}");
    assert!(diff.contains("+"), "{diff}");
    assert!(diff.contains("\"email\""), "{diff}");

    let message = mediation_message(engine.test_compatibility("click-event").unwrap_err());
    assert!(message.contains("READER_FIELD_MISSING_DEFAULT_VALUE: email"), "{message}");

    let message = mediation_message(engine.sync_local_with_remote().unwrap_err());
    assert!(message.contains("click-event-value: Schema being registered is incompatible"), "{message}");

    write(dir.path(), "event/ClickEvent.avdl", &record("ClickEvent", CLICK_V2_OPTIONAL));
    assert!(engine.test_compatibility("click-event").unwrap().contains("is compatible"));
    let id = engine.register("click-event").unwrap();
    assert_eq!(id, 2);
    assert_eq!(engine.gateway().versions("click-event-value").unwrap(), vec![1, 2]);
}
