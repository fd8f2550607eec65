//! Mediation between the local repository and the schema registry
//!
//! Every operation takes fresh snapshots of both sides, diffs them and acts on
//! the subjects that differ. Nothing is kept between calls.

use std::collections::BTreeMap;

use similar::{ChangeTag, TextDiff};
use tracing::{debug, info, warn};

use crate::compatibility::{AvroCompatibility, CompatibilityEvaluator};
use crate::error::{MediatorError, Result};
use crate::idl::{IdlParser, SchemaParser};
use crate::naming;
use crate::registry::RegistryGateway;
use crate::repo::{LocalRepository, SchemaSnapshot};
use crate::report::{self, OutcomeMap};
use crate::schema::Schema;

/// Message recorded when the registry rejects a schema and no reason can be computed
pub const REMOTE_INVALID: &str = "Remote registry says invalid.";

/// Subject → latest schema, as read from the registry
pub type RegistrySnapshot = BTreeMap<String, Schema>;

/// Reconciles a [`LocalRepository`] with a registry behind a [`RegistryGateway`]
pub struct MediationEngine<R, E = AvroCompatibility, P = IdlParser> {
    repository: LocalRepository<P>,
    gateway: R,
    evaluator: E,
}

impl<R: RegistryGateway> MediationEngine<R, AvroCompatibility, IdlParser> {
    /// Engine for an IDL repository using Avro resolution rules for explanations
    pub fn with_defaults(repository: LocalRepository, gateway: R) -> Self {
        Self::new(repository, gateway, AvroCompatibility::new())
    }
}

impl<R, E, P> MediationEngine<R, E, P>
where
    R: RegistryGateway,
    E: CompatibilityEvaluator,
    P: SchemaParser,
{
    pub fn new(repository: LocalRepository<P>, gateway: R, evaluator: E) -> Self {
        Self {
            repository,
            gateway,
            evaluator,
        }
    }

    pub fn repository(&self) -> &LocalRepository<P> {
        &self.repository
    }

    pub fn gateway(&self) -> &R {
        &self.gateway
    }

    fn snapshots(&self) -> Result<(SchemaSnapshot, RegistrySnapshot)> {
        self.repository
            .local_schema_map()
            .and_then(|local| Ok((local, self.gateway.current_schema_map()?)))
            .map_err(|e| {
                debug!("Building schema maps failed: {}", e);
                MediatorError::Mediation(format!(
                    "There was a problem building local and/or remote schema map(s): {}",
                    e
                ))
            })
    }

    /// Local schemas that differ from, or are missing in, the registry
    pub fn pending_changes(&self) -> Result<SchemaSnapshot> {
        let (local, remote) = self.snapshots()?;
        Ok(changed_subjects(local, &remote))
    }

    /// Register every local schema that differs from the registry.
    ///
    /// Returns the per-type failure map, which is empty when every
    /// registration succeeded. Any failure turns into a
    /// [`MediatorError::Mediation`] carrying the full sync report.
    pub fn sync_local_with_remote(&self) -> Result<OutcomeMap> {
        let (local, remote) = self.snapshots()?;
        let mut outcomes = OutcomeMap::new();
        let mut registered = 0;

        for (item_type, schemas) in changed_subjects(local, &remote) {
            let mut failures = BTreeMap::new();
            for (subject, schema) in schemas {
                match self.gateway.register(&subject, &schema) {
                    Ok(id) => {
                        info!(subject = subject.as_str(), id, "Registered {}", item_type.log_label());
                        registered += 1;
                    }
                    Err(e) => {
                        debug!("Registering {} failed: {}", subject, e);
                        failures.insert(subject, e.to_string());
                    }
                }
            }
            if !failures.is_empty() {
                outcomes.insert(item_type, failures);
            }
        }

        if report::has_failures(&outcomes) {
            return Err(MediatorError::Mediation(report::sync_summary(&outcomes)));
        }
        info!(registered, "Sync finished");
        Ok(outcomes)
    }

    /// Test every changed local schema against the registry.
    ///
    /// Subjects the registry does not know yet are skipped, as are subjects
    /// whose test could not be run at all.
    pub fn test_global_compatibility(&self) -> Result<OutcomeMap> {
        let (local, remote) = self.snapshots()?;
        let mut outcomes = OutcomeMap::new();

        for (item_type, schemas) in changed_subjects(local, &remote) {
            let mut failures = BTreeMap::new();
            for (subject, schema) in schemas {
                let Some(remote_schema) = remote.get(&subject) else {
                    debug!("{} is not registered yet", subject);
                    continue;
                };
                match self.gateway.test_compatibility(&subject, &schema) {
                    Ok(true) => {}
                    Ok(false) => {
                        let message = self
                            .explain_incompatibility(&schema, remote_schema)
                            .unwrap_or_else(|| REMOTE_INVALID.to_string());
                        failures.insert(subject, message);
                    }
                    Err(e) => warn!("Error communicating with schema registry: {}", e),
                }
            }
            if !failures.is_empty() {
                outcomes.insert(item_type, failures);
            }
        }

        if report::has_failures(&outcomes) {
            return Err(MediatorError::Mediation(report::compatibility_summary(&outcomes)));
        }
        Ok(outcomes)
    }

    /// Test one local schema against the latest registered version of its subject
    pub fn test_compatibility(&self, name: &str) -> Result<String> {
        let item = self.repository.get_item(name).map_err(wrap)?;
        let local = self.repository.schema_for(&item).map_err(wrap)?;
        let subject = naming::local_to_registry_subject(&item.name);

        let remote = match self.gateway.latest_schema(&subject) {
            Ok(remote) => remote,
            Err(e) if e.is_not_found() => {
                return Ok(format!(
                    "Schema for {} has not been registered yet. No need to test compatibility.",
                    item.name
                ))
            }
            Err(e) => return Err(wrap(e.into())),
        };

        let compatible =
            local == remote || self.gateway.test_compatibility(&subject, &local).map_err(|e| wrap(e.into()))?;
        if compatible {
            return Ok(format!(
                "Local schema for {} is compatible with the corresponding schema in the registry",
                item.name
            ));
        }

        Err(MediatorError::Mediation(
            self.explain_incompatibility(&local, &remote).unwrap_or_else(|| {
                format!(
                    "Local schema for {} is NOT compatible with the corresponding schema in the registry",
                    item.name
                )
            }),
        ))
    }

    /// Why `local` and `remote` cannot evolve into each other, or `None` if
    /// they can in both directions
    pub fn explain_incompatibility(&self, local: &Schema, remote: &Schema) -> Option<String> {
        let backward = self.evaluator.check(local, remote);
        let forward = self.evaluator.check(remote, local);

        let mut lines = Vec::new();
        if !backward.is_compatible() {
            lines.push(format!("Not backwards-compatible: {}", backward.describe()));
        }
        if !forward.is_compatible() {
            lines.push(format!("Not forwards-compatible: {}", forward.describe()));
        }
        if lines.is_empty() {
            None
        } else {
            Some(lines.join("\n"))
        }
    }

    /// Register one local schema, returning its registry id
    pub fn register(&self, name: &str) -> Result<u32> {
        let item = self.repository.get_item(name)?;
        let schema = self.repository.schema_for(&item)?;
        let subject = naming::local_to_registry_subject(&item.name);
        let id = self.gateway.register(&subject, &schema)?;
        info!(subject = subject.as_str(), id, "Registered {}", item.item_type.log_label());
        Ok(id)
    }

    /// Avro JSON of the local schema, or of its latest registered version
    pub fn print(&self, name: &str, remote: bool) -> Result<String> {
        let item = self.repository.get_item(name)?;
        let schema = if remote {
            self.gateway
                .latest_schema(&naming::local_to_registry_subject(&item.name))?
        } else {
            self.repository.schema_for(&item)?
        };
        Ok(schema.to_pretty_string())
    }

    /// Line diff from the latest registered version to the local schema
    pub fn diff(&self, name: &str) -> Result<String> {
        let item = self.repository.get_item(name)?;
        let local = self.repository.schema_for(&item)?;
        let subject = naming::local_to_registry_subject(&item.name);
        let remote = self.gateway.latest_schema(&subject)?;

        if local == remote {
            return Ok(format!(
                "Local schema for {} matches the registry",
                item.name
            ));
        }

        let old_text = remote.to_pretty_string();
        let new_text = local.to_pretty_string();
        let diff = TextDiff::from_lines(&old_text, &new_text);

        let mut out = format!("--- registry {}\n+++ local {}\n", subject, item.source_path.display());
        for change in diff.iter_all_changes() {
            let sign = match change.tag() {
                ChangeTag::Delete => "-",
                ChangeTag::Insert => "+",
                ChangeTag::Equal => " ",
            };
            out.push_str(sign);
            out.push_str(change.value());
            if change.missing_newline() {
                out.push('\n');
            }
        }
        Ok(out)
    }
}

fn wrap(e: MediatorError) -> MediatorError {
    debug!("{}", e);
    match e {
        MediatorError::Mediation(_) => e,
        other => MediatorError::Mediation(other.to_string()),
    }
}

/// Local subjects whose schema is absent from, or different in, the registry.
/// Types left without subjects are dropped.
fn changed_subjects(local: SchemaSnapshot, remote: &RegistrySnapshot) -> SchemaSnapshot {
    local
        .into_iter()
        .filter_map(|(item_type, schemas)| {
            let changed: BTreeMap<String, Schema> = schemas
                .into_iter()
                .filter(|(subject, schema)| remote.get(subject) != Some(schema))
                .collect();
            (!changed.is_empty()).then_some((item_type, changed))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::item::ItemType;

    #[test]
    fn test_changed_subjects_drops_matching_types() {
        let mut local = SchemaSnapshot::new();
        local
            .entry(ItemType::Common)
            .or_default()
            .insert("address-value".to_string(), Schema::String);
        local
            .entry(ItemType::Event)
            .or_default()
            .insert("click-event-value".to_string(), Schema::Long);
        local
            .entry(ItemType::Event)
            .or_default()
            .insert("page-view-value".to_string(), Schema::Int);

        let mut remote = RegistrySnapshot::new();
        remote.insert("address-value".to_string(), Schema::String);
        remote.insert("click-event-value".to_string(), Schema::Int);

        let changed = changed_subjects(local, &remote);
        assert!(!changed.contains_key(&ItemType::Common));
        let events: Vec<_> = changed[&ItemType::Event].keys().cloned().collect();
        assert_eq!(events, vec!["click-event-value", "page-view-value"]);
    }
}
