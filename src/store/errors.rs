//! Object-store error types
//!
//! Corruption is the only fatal condition: a record that fails its
//! checksum means the backing medium can no longer be trusted and the
//! coordinator must not serve from it.

use std::fmt;
use std::io;

use thiserror::Error;

use super::RecordKind;

/// Severity of a store failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    /// The operation fails, the coordinator continues
    Error,
    /// The store can no longer be trusted
    Fatal,
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Severity::Error => write!(f, "ERROR"),
            Severity::Fatal => write!(f, "FATAL"),
        }
    }
}

/// Object-store failures.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Disk or database I/O failure
    #[error("store I/O failure: {0}")]
    Io(#[from] io::Error),

    /// A persisted record failed its integrity check
    #[error("record corrupted: {0}")]
    Corrupt(String),

    /// The record named by a remove/relocate does not exist
    #[error("record not found: {kind}/{uid}")]
    NotFound { kind: RecordKind, uid: String },

    /// SQL backend failure
    #[error("sql store failure: {0}")]
    Sql(String),
}

impl StoreError {
    /// Stable code string for logs and operator tooling.
    pub fn code(&self) -> &'static str {
        match self {
            StoreError::Io(_) => "SAGA_STORE_IO",
            StoreError::Corrupt(_) => "SAGA_STORE_CORRUPTION",
            StoreError::NotFound { .. } => "SAGA_STORE_NOT_FOUND",
            StoreError::Sql(_) => "SAGA_STORE_SQL",
        }
    }

    /// Severity of this failure.
    pub fn severity(&self) -> Severity {
        match self {
            StoreError::Corrupt(_) => Severity::Fatal,
            _ => Severity::Error,
        }
    }

    /// Whether the backing medium can no longer be trusted.
    pub fn is_fatal(&self) -> bool {
        self.severity() == Severity::Fatal
    }
}

impl From<rusqlite::Error> for StoreError {
    fn from(e: rusqlite::Error) -> Self {
        StoreError::Sql(e.to_string())
    }
}

/// Result type for store operations.
pub type StoreResult<T> = Result<T, StoreError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_corruption_is_fatal() {
        let err = StoreError::Corrupt("checksum mismatch".to_string());
        assert!(err.is_fatal());
        assert_eq!(err.code(), "SAGA_STORE_CORRUPTION");
    }

    #[test]
    fn test_io_is_recoverable() {
        let err = StoreError::Io(io::Error::new(io::ErrorKind::Other, "disk full"));
        assert!(!err.is_fatal());
        assert_eq!(err.severity(), Severity::Error);
    }
}
