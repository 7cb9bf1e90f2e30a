//! rulevault.toml configuration parser.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

const DEFAULT_DATA_DIR: &str = "./data";
const DEFAULT_SQLITE_FILE: &str = "rulevault.db";
const DEFAULT_BUSY_TIMEOUT_MS: u64 = 5_000;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct VaultConfig {
    /// Root of the file backend tree (`<data_dir>/workflows/...`).
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,
    #[serde(default)]
    pub backends: BackendSelection,
    #[serde(default)]
    pub sqlite: SqliteConfig,
}

/// Storage backend for one entity type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Backend {
    File,
    Sqlite,
}

/// Which backend serves each entity type. Selected once at startup.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct BackendSelection {
    #[serde(default = "sqlite_backend")]
    pub chains: Backend,
    #[serde(default = "sqlite_backend")]
    pub components: Backend,
    #[serde(default = "sqlite_backend")]
    pub run_logs: Backend,
    #[serde(default = "file_backend")]
    pub share_nodes: Backend,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SqliteConfig {
    /// Database file; relative paths resolve under `data_dir`.
    #[serde(default = "default_sqlite_path")]
    pub path: PathBuf,
    #[serde(default = "default_busy_timeout_ms")]
    pub busy_timeout_ms: u64,
}

fn default_data_dir() -> PathBuf {
    PathBuf::from(DEFAULT_DATA_DIR)
}

fn default_sqlite_path() -> PathBuf {
    PathBuf::from(DEFAULT_SQLITE_FILE)
}

fn default_busy_timeout_ms() -> u64 {
    DEFAULT_BUSY_TIMEOUT_MS
}

fn sqlite_backend() -> Backend {
    Backend::Sqlite
}

fn file_backend() -> Backend {
    Backend::File
}

impl Default for BackendSelection {
    fn default() -> Self {
        Self {
            chains: Backend::Sqlite,
            components: Backend::Sqlite,
            run_logs: Backend::Sqlite,
            share_nodes: Backend::File,
        }
    }
}

impl BackendSelection {
    /// Every entity on the file backend.
    pub fn all_file() -> Self {
        Self {
            chains: Backend::File,
            components: Backend::File,
            run_logs: Backend::File,
            share_nodes: Backend::File,
        }
    }

    /// Every entity on SQLite.
    pub fn all_sqlite() -> Self {
        Self {
            chains: Backend::Sqlite,
            components: Backend::Sqlite,
            run_logs: Backend::Sqlite,
            share_nodes: Backend::Sqlite,
        }
    }

    fn any_sqlite(&self) -> bool {
        [self.chains, self.components, self.run_logs, self.share_nodes].contains(&Backend::Sqlite)
    }
}

impl Default for SqliteConfig {
    fn default() -> Self {
        Self {
            path: default_sqlite_path(),
            busy_timeout_ms: DEFAULT_BUSY_TIMEOUT_MS,
        }
    }
}

impl Default for VaultConfig {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
            backends: BackendSelection::default(),
            sqlite: SqliteConfig::default(),
        }
    }
}

impl VaultConfig {
    pub fn from_file(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: VaultConfig = toml::from_str(&content)?;
        Ok(config)
    }

    pub fn to_toml_string(&self) -> anyhow::Result<String> {
        Ok(toml::to_string_pretty(self)?)
    }

    /// Resolved database file path.
    pub fn sqlite_path(&self) -> PathBuf {
        if self.sqlite.path.is_absolute() {
            self.sqlite.path.clone()
        } else {
            self.data_dir.join(&self.sqlite.path)
        }
    }

    /// Whether any entity type is served by SQLite.
    pub fn needs_sql(&self) -> bool {
        self.backends.any_sqlite()
    }
}
