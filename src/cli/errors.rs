//! CLI error reporting
//!
//! Errors leave the process through a single JSON line on stderr; each
//! carries a stable code string.

use std::path::PathBuf;

use thiserror::Error;

use crate::config::ConfigError;
use crate::engine::CoordinatorError;
use crate::store::StoreError;

/// Failures surfaced by CLI commands.
#[derive(Debug, Error)]
pub enum CliError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Engine(#[from] CoordinatorError),

    #[error("I/O failure: {0}")]
    Io(#[from] std::io::Error),

    #[error("configuration file already exists: {}", .0.display())]
    AlreadyInitialized(PathBuf),
}

impl CliError {
    /// Stable code string for the JSON error line.
    pub fn code_str(&self) -> &'static str {
        match self {
            CliError::Config(_) => "SAGA_CONFIG",
            CliError::Store(_) => "SAGA_STORE",
            CliError::Engine(_) => "SAGA_ENGINE",
            CliError::Io(_) => "SAGA_IO",
            CliError::AlreadyInitialized(_) => "SAGA_ALREADY_INITIALIZED",
        }
    }

    /// Human-readable message.
    pub fn message(&self) -> String {
        self.to_string()
    }
}
