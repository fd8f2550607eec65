//! Repository item taxonomy
//!
//! The local repository is opinionated about its layout: every schema source
//! belongs to exactly one [`ItemType`], and each type owns a base directory
//! under the repository root.

use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Kind of item kept in the local repository
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ItemType {
    /// Shared types referenced by events (`common/`)
    Common,
    /// Event schemas (`event/`)
    Event,
}

/// Static description of an [`ItemType`]
#[derive(Debug, Clone, Copy)]
pub struct ItemTypeInfo {
    pub label: &'static str,
    /// Base directory relative to the repository root (empty for the root itself)
    pub directory: &'static str,
    /// Subdirectories of the base directory that are never scanned
    pub excluded_subdirectories: &'static [&'static str],
}

const ITEM_TYPES: [(ItemType, ItemTypeInfo); 2] = [
    (
        ItemType::Common,
        ItemTypeInfo {
            label: "common",
            directory: "common",
            excluded_subdirectories: &[],
        },
    ),
    (
        ItemType::Event,
        ItemTypeInfo {
            label: "event",
            directory: "event",
            excluded_subdirectories: &["common"],
        },
    ),
];

impl ItemType {
    /// All item types, in declaration order
    pub fn all() -> impl Iterator<Item = ItemType> {
        ITEM_TYPES.iter().map(|(t, _)| *t)
    }

    pub fn info(&self) -> &'static ItemTypeInfo {
        ITEM_TYPES
            .iter()
            .find(|(t, _)| t == self)
            .map(|(_, info)| info)
            .unwrap_or(&ITEM_TYPES[0].1)
    }

    pub fn label(&self) -> &'static str {
        self.info().label
    }

    /// Label used in log and error messages (e.g. "event type")
    pub fn log_label(&self) -> String {
        format!("{} type", self.label())
    }

    pub fn directory(&self) -> &'static str {
        self.info().directory
    }

    /// Heading used for this type in reports
    pub fn report_heading(&self) -> &'static str {
        match self.directory() {
            "" => self.label(),
            dir => dir,
        }
    }

    /// Absolute base directory of this type under `root`
    pub fn base_path(&self, root: &Path) -> PathBuf {
        match self.directory() {
            "" => root.to_path_buf(),
            dir => root.join(dir),
        }
    }

    /// Absolute paths of the excluded subdirectories under `root`
    pub fn excluded_paths(&self, root: &Path) -> Vec<PathBuf> {
        let base = self.base_path(root);
        self.info()
            .excluded_subdirectories
            .iter()
            .map(|dir| base.join(dir))
            .collect()
    }
}

impl fmt::Display for ItemType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.label())
    }
}

impl FromStr for ItemType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        ItemType::all()
            .find(|t| t.label().eq_ignore_ascii_case(s))
            .ok_or_else(|| {
                let labels: Vec<_> = ItemType::all().map(|t| t.label()).collect();
                format!("Unknown item type '{}'. Expected one of: {}", s, labels.join(", "))
            })
    }
}

/// A schema source found in the local repository
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RepoItem {
    /// Name in subject convention (e.g. "click-event")
    pub name: String,
    pub item_type: ItemType,
    pub source_path: PathBuf,
}

impl RepoItem {
    pub fn new(name: impl Into<String>, item_type: ItemType, source_path: impl Into<PathBuf>) -> Self {
        Self {
            name: name.into(),
            item_type,
            source_path: source_path.into(),
        }
    }
}

impl fmt::Display for RepoItem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.name, self.source_path.display())
    }
}
