//! Configuration for an index

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::hasher::DEFAULT_ALGORITHM;
use crate::scanner::ScanConfig;

/// File name of the index database when none is configured
pub const DEFAULT_DATABASE_NAME: &str = "_index.db";

/// Main configuration for one index
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexConfig {
    /// Directory tree to index (`~` is expanded)
    #[serde(default = "default_root")]
    pub root: PathBuf,

    /// SQLite database; defaults to `<root>/_index.db`
    #[serde(default)]
    pub database_path: Option<PathBuf>,

    /// Primary digest algorithm for new content
    #[serde(default = "default_algorithm")]
    pub algorithm: String,

    /// Files hashed concurrently during a sweep
    #[serde(default = "default_hash_workers")]
    pub hash_workers: usize,

    #[serde(default)]
    pub scan: ScanConfig,
}

fn default_root() -> PathBuf {
    PathBuf::from(".")
}

fn default_algorithm() -> String {
    DEFAULT_ALGORITHM.to_string()
}

fn default_hash_workers() -> usize {
    1
}

impl Default for IndexConfig {
    fn default() -> Self {
        Self {
            root: default_root(),
            database_path: None,
            algorithm: default_algorithm(),
            hash_workers: default_hash_workers(),
            scan: ScanConfig::default(),
        }
    }
}

impl IndexConfig {
    /// Configuration for `root` with every other field defaulted.
    pub fn for_root(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            ..Self::default()
        }
    }

    /// Load configuration from a TOML file
    pub fn load(path: &Path) -> crate::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: IndexConfig =
            toml::from_str(&content).map_err(|e| crate::IndexError::Config(e.to_string()))?;
        Ok(config)
    }

    /// Save configuration to a TOML file
    pub fn save(&self, path: &Path) -> crate::Result<()> {
        let content =
            toml::to_string_pretty(self).map_err(|e| crate::IndexError::Config(e.to_string()))?;
        std::fs::write(path, content)?;
        Ok(())
    }

    /// The configured database path, or `<root>/_index.db`.
    pub fn database_path_for(&self, root: &Path) -> PathBuf {
        match &self.database_path {
            Some(path) => crate::root::expand_home(path),
            None => root.join(DEFAULT_DATABASE_NAME),
        }
    }
}
