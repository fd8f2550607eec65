//! Per-type outcome maps and their human-readable reports

use std::collections::BTreeMap;

use crate::item::ItemType;

/// Item type → (subject → message). A missing type means nothing happened
/// for it; an empty map means nothing happened at all.
pub type OutcomeMap = BTreeMap<ItemType, BTreeMap<String, String>>;

/// Whether any item type carries at least one message
pub fn has_failures(outcomes: &OutcomeMap) -> bool {
    outcomes.values().any(|subjects| !subjects.is_empty())
}

/// One section per item type, one `subject: message` line per entry
pub fn format_sections(outcomes: &OutcomeMap) -> String {
    let mut out = String::new();
    for (item_type, subjects) in outcomes {
        if subjects.is_empty() {
            continue;
        }
        out.push_str(item_type.report_heading());
        out.push_str(":\n");
        let lines: Vec<String> = subjects
            .iter()
            .map(|(subject, message)| format!("{}: {}", subject, message))
            .collect();
        out.push_str(&lines.join("\n"));
        out.push_str("\n\n");
    }
    out
}

/// Report for a failed `validate_all`
pub fn validation_report(outcomes: &OutcomeMap) -> String {
    format!("Local repo has validation errors:\n\n{}", format_sections(outcomes))
}

/// Summary for the result of a sync
pub fn sync_summary(outcomes: &OutcomeMap) -> String {
    if outcomes.is_empty() {
        "The local repo already matches the schema registry. No need to sync.".to_string()
    } else if has_failures(outcomes) {
        format!(
            "Sync completed with some failures. Updated schemas and their registration results:\n\n{}",
            format_sections(outcomes)
        )
    } else {
        "Sync of local repo completed successfully.".to_string()
    }
}

/// Summary for the result of a global compatibility test
pub fn compatibility_summary(outcomes: &OutcomeMap) -> String {
    if outcomes.is_empty() {
        "The local repo already matches the schema registry. No need to check compatibility."
            .to_string()
    } else if has_failures(outcomes) {
        format!(
            "Compatibility check completed with some failures. Updated schemas and their compatibility test results:\n\n{}",
            format_sections(outcomes)
        )
    } else {
        "Compatibility check completed successfully. All local schemas are compatible with their registry counterparts."
            .to_string()
    }
}
