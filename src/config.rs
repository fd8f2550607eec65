//! Configuration management for the mediator
//!
//! Supports loading configuration from:
//! - Default values
//! - Config file (mediator.toml)
//! - Environment variables (MEDIATOR__*)
//!
//! ## Example config file (mediator.toml):
//! ```toml
//! [repository]
//! root = "./schemas"
//! allowed_namespace_depth = 2
//!
//! [registry]
//! path = "./registry"
//! compatibility = "backward"
//! ```

use config_crate::{Config, ConfigError, Environment, File};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::compatibility::CompatibilityMode;

/// Main configuration for the mediator
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MediatorConfig {
    #[serde(default)]
    pub repository: RepositoryConfig,

    #[serde(default)]
    pub registry: RegistryConfig,
}

/// Local schema repository settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RepositoryConfig {
    /// Root of the local repository; must exist
    #[serde(default = "default_repository_root")]
    pub root: PathBuf,

    /// How many subdirectories deep a schema may sit under its type's directory
    #[serde(default = "default_namespace_depth")]
    pub allowed_namespace_depth: usize,
}

/// Registry settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegistryConfig {
    /// Directory of the registry
    #[serde(default = "default_registry_path")]
    pub path: PathBuf,

    /// Directions enforced when registering a new version
    #[serde(default)]
    pub compatibility: CompatibilityMode,
}

fn default_repository_root() -> PathBuf {
    PathBuf::from(".")
}

fn default_namespace_depth() -> usize {
    1
}

fn default_registry_path() -> PathBuf {
    PathBuf::from("registry")
}

impl Default for RepositoryConfig {
    fn default() -> Self {
        Self {
            root: default_repository_root(),
            allowed_namespace_depth: default_namespace_depth(),
        }
    }
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            path: default_registry_path(),
            compatibility: CompatibilityMode::default(),
        }
    }
}

impl MediatorConfig {
    /// Load configuration from default locations
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_from(None)
    }

    /// Load configuration, adding a specific file on top of the default locations
    pub fn load_from(config_path: Option<&Path>) -> Result<Self, ConfigError> {
        let mut builder = Config::builder();

        for location in ["mediator.toml", ".mediator.toml", "config/mediator.toml"] {
            builder = builder.add_source(File::with_name(location).required(false));
        }

        if let Some(dirs) = directories::ProjectDirs::from("io", "events", "avro-mediator") {
            let xdg_config = dirs.config_dir().join("mediator.toml");
            if xdg_config.exists() {
                builder = builder.add_source(File::from(xdg_config).required(false));
            }
        }

        if let Some(path) = config_path {
            builder = builder.add_source(File::from(path).required(true));
        }

        // MEDIATOR__REPOSITORY__ROOT, MEDIATOR__REGISTRY__COMPATIBILITY, ...
        builder = builder.add_source(
            Environment::with_prefix("MEDIATOR")
                .prefix_separator("__")
                .separator("__")
                .try_parsing(true),
        );

        builder.build()?.try_deserialize()
    }

    /// Save configuration to a file
    pub fn save(&self, path: impl AsRef<Path>) -> std::io::Result<()> {
        let content = toml::to_string_pretty(self)
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))?;
        std::fs::write(path, content)
    }

    /// Repository root, resolved against the working directory
    pub fn repository_root(&self) -> PathBuf {
        absolute(&self.repository.root)
    }

    /// Registry path, resolved against the working directory
    pub fn registry_path(&self) -> PathBuf {
        absolute(&self.registry.path)
    }
}

fn absolute(path: &Path) -> PathBuf {
    if path.is_absolute() {
        path.to_path_buf()
    } else {
        std::env::current_dir().unwrap_or_default().join(path)
    }
}
