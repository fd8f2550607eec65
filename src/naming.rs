//! Naming conventions
//!
//! One place to convert between the conventions used for schema file names
//! (`ClickEvent`), registry subjects (`click-event`), namespaces (`clickevent`)
//! and full registry subjects (`click-event-value`).
//!
//! The functions are named after the role of the string rather than its case
//! format, so the conventions can change here without renaming call sites.

use std::sync::OnceLock;

use regex::Regex;

/// Suffix the registry tooling expects on value-schema subjects
pub const VALUE_SUBJECT_SUFFIX: &str = "-value";

const SUBJECT_SEPARATOR: char = '-';

/// Convert a file stem (`UpperCamel`) to a subject name (`lower-hyphen`)
pub fn file_to_subject(name: &str) -> String {
    let mut out = String::with_capacity(name.len() + 4);
    for (i, c) in name.chars().enumerate() {
        if c.is_ascii_uppercase() {
            if i > 0 {
                out.push(SUBJECT_SEPARATOR);
            }
            out.push(c.to_ascii_lowercase());
        } else {
            out.push(c);
        }
    }
    out
}

/// Convert a subject name (`lower-hyphen`) to a file stem (`UpperCamel`)
pub fn subject_to_file(name: &str) -> String {
    name.split(SUBJECT_SEPARATOR)
        .map(capitalize)
        .collect()
}

/// Convert a subject name to the namespace segment convention
pub fn subject_to_namespace(name: &str) -> String {
    name.to_lowercase().replace(SUBJECT_SEPARATOR, "")
}

/// Append the value-subject suffix to a local item name
pub fn local_to_registry_subject(name: &str) -> String {
    format!("{}{}", name, VALUE_SUBJECT_SUFFIX).to_lowercase()
}

/// Whether `name` follows the file name convention
pub fn is_file_name(name: &str) -> bool {
    static FILE_NAME: OnceLock<Regex> = OnceLock::new();
    FILE_NAME
        .get_or_init(|| Regex::new(r"^([A-Z][a-z0-9]*)+$").expect("valid file name pattern"))
        .is_match(name)
}

/// Whether `name` follows the subject name convention
pub fn is_subject_name(name: &str) -> bool {
    static SUBJECT_NAME: OnceLock<Regex> = OnceLock::new();
    SUBJECT_NAME
        .get_or_init(|| {
            Regex::new(r"^[a-z][a-z0-9]*(-[a-z][a-z0-9]*)*$").expect("valid subject pattern")
        })
        .is_match(name)
}

fn capitalize(word: &str) -> String {
    let mut chars = word.chars();
    match chars.next() {
        None => String::new(),
        Some(first) => first
            .to_uppercase()
            .chain(chars.map(|c| c.to_ascii_lowercase()))
            .collect(),
    }
}
