//! Configuration file for storage and transport.
//!
//! ```toml
//! [storage]
//! kind = "persistent"          # or "temporary" (default)
//! quota_bytes = 4194304
//! root = "/var/lib/fsbatch"    # persistent only
//!
//! [transport]
//! base_url = "https://example.com/assets/"
//! timeout_secs = 30
//! user_agent = "fsbatch/0.1"
//! ```
//!
//! Every field is optional; an empty file yields [`Config::default`].

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Default quota: 4 MiB.
pub const DEFAULT_QUOTA_BYTES: u64 = 4 * 1024 * 1024;

/// Errors loading a config file.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid config: {0}")]
    Parse(#[from] toml::de::Error),
}

/// Whether storage outlives the process.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StorageKind {
    /// In-memory; gone when the session drops.
    #[default]
    Temporary,
    /// On disk under a root directory.
    Persistent,
}

/// Storage section.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    pub kind: StorageKind,
    pub quota_bytes: u64,
    /// Root directory for persistent storage.
    pub root: Option<PathBuf>,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            kind: StorageKind::Temporary,
            quota_bytes: DEFAULT_QUOTA_BYTES,
            root: None,
        }
    }
}

impl StorageConfig {
    /// Temporary storage with the given quota.
    pub fn temporary(quota_bytes: u64) -> Self {
        Self {
            kind: StorageKind::Temporary,
            quota_bytes,
            root: None,
        }
    }

    /// Persistent storage under `root` with the given quota.
    pub fn persistent(root: impl Into<PathBuf>, quota_bytes: u64) -> Self {
        Self {
            kind: StorageKind::Persistent,
            quota_bytes,
            root: Some(root.into()),
        }
    }

    /// Root used for persistent storage: the configured one, else
    /// `<data_local_dir>/fsbatch`.
    pub fn persistent_root(&self) -> Option<PathBuf> {
        self.root
            .clone()
            .or_else(|| dirs::data_local_dir().map(|p| p.join("fsbatch")))
    }
}

/// Transport section.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TransportConfig {
    /// Base for resolving relative fetch URLs.
    pub base_url: Option<String>,
    /// Per-request timeout. Unset means no timeout.
    pub timeout_secs: Option<u64>,
    pub user_agent: Option<String>,
}

/// Top-level configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub storage: StorageConfig,
    pub transport: TransportConfig,
}

impl Config {
    /// Parse TOML text.
    pub fn from_toml(text: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(text)?)
    }

    /// Load a TOML file.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml(&text)
    }

    /// Default config file location: `<config_dir>/fsbatch/config.toml`.
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|p| p.join("fsbatch").join("config.toml"))
    }
}
