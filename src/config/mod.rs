//! Coordinator configuration
//!
//! A JSON file with per-field defaults: any subset of the fields may be
//! present and the rest fall back to defaults, so an empty file is a
//! valid configuration.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::engine::EngineSettings;
use crate::http_api::HttpServerConfig;
use crate::store::{FileStore, MemoryStore, ObjectStore, SqlStore, StoreResult};

/// Configuration load failures.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("cannot read configuration: {0}")]
    Io(#[from] std::io::Error),

    #[error("cannot parse configuration: {0}")]
    Parse(#[from] serde_json::Error),
}

/// Object-store backend selection.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum StoreConfig {
    /// Volatile, for tests and throwaway deployments
    Memory,
    /// One file per record under `dir`
    File { dir: PathBuf },
    /// SQLite table in the database at `path`
    Sql {
        path: PathBuf,
        #[serde(default)]
        table_prefix: String,
    },
}

impl Default for StoreConfig {
    fn default() -> Self {
        StoreConfig::File {
            dir: PathBuf::from("./sagad-data"),
        }
    }
}

/// Top-level coordinator configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CoordinatorConfig {
    /// HTTP bind and routing settings
    #[serde(default)]
    pub http: HttpServerConfig,

    /// Base URL minted into LRA ids, when the externally reachable
    /// address differs from the bind address
    #[serde(default)]
    pub external_base: Option<String>,

    /// Recovery scan period in milliseconds
    #[serde(default = "default_recovery_interval_ms")]
    pub recovery_interval_ms: u64,

    /// Bound on each outbound participant call, in milliseconds
    #[serde(default = "default_callback_timeout_ms")]
    pub callback_timeout_ms: u64,

    /// First retry delay for failed participant callbacks
    #[serde(default = "default_retry_backoff_base_ms")]
    pub retry_backoff_base_ms: u64,

    /// Upper bound on the exponential retry delay
    #[serde(default = "default_retry_backoff_cap_ms")]
    pub retry_backoff_cap_ms: u64,

    /// Object-store backend
    #[serde(default)]
    pub store: StoreConfig,
}

fn default_recovery_interval_ms() -> u64 {
    2_000
}

fn default_callback_timeout_ms() -> u64 {
    5_000
}

fn default_retry_backoff_base_ms() -> u64 {
    500
}

fn default_retry_backoff_cap_ms() -> u64 {
    30_000
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            http: HttpServerConfig::default(),
            external_base: None,
            recovery_interval_ms: default_recovery_interval_ms(),
            callback_timeout_ms: default_callback_timeout_ms(),
            retry_backoff_base_ms: default_retry_backoff_base_ms(),
            retry_backoff_cap_ms: default_retry_backoff_cap_ms(),
            store: StoreConfig::default(),
        }
    }
}

impl CoordinatorConfig {
    /// Loads the configuration from a JSON file.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let contents = fs::read_to_string(path)?;
        Ok(serde_json::from_str(&contents)?)
    }

    /// The base URL minted into LRA ids.
    ///
    /// Binding to the wildcard address still needs a concrete host in
    /// minted ids, so the wildcard maps to localhost unless an external
    /// base is configured.
    pub fn coordinator_base(&self) -> String {
        if let Some(base) = &self.external_base {
            return base.trim_end_matches('/').to_string();
        }
        let host = match self.http.host.as_str() {
            "0.0.0.0" | "::" => "localhost",
            other => other,
        };
        format!("http://{}:{}{}", host, self.http.port, self.http.path_prefix)
    }

    /// Engine knobs derived from this configuration.
    pub fn engine_settings(&self) -> EngineSettings {
        EngineSettings {
            callback_timeout: Duration::from_millis(self.callback_timeout_ms),
            retry_backoff_base_ms: self.retry_backoff_base_ms,
            retry_backoff_cap_ms: self.retry_backoff_cap_ms,
        }
    }

    /// The recovery scan period.
    pub fn recovery_interval(&self) -> Duration {
        Duration::from_millis(self.recovery_interval_ms.max(100))
    }

    /// Opens the configured object-store backend.
    pub fn build_store(&self) -> StoreResult<Arc<dyn ObjectStore>> {
        Ok(match &self.store {
            StoreConfig::Memory => Arc::new(MemoryStore::new()),
            StoreConfig::File { dir } => Arc::new(FileStore::open(dir)?),
            StoreConfig::Sql { path, table_prefix } => {
                Arc::new(SqlStore::open(path, table_prefix)?)
            }
        })
    }
}
