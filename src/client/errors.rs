//! Clustered client errors

use thiserror::Error;

use crate::id::IdError;

/// Failures surfaced to participant applications.
#[derive(Debug, Error)]
pub enum ClientError {
    /// No coordinator instance could serve the request
    #[error("no coordinator available after {attempted} attempt(s): [{}]", .attempts.join("; "))]
    Unavailable {
        attempted: usize,
        attempts: Vec<String>,
    },

    /// The coordinator answered with an unexpected status
    #[error("coordinator answered {status}: {body}")]
    UnexpectedStatus { status: u16, body: String },

    /// Transport-level failure
    #[error("transport failure: {0}")]
    Transport(#[from] reqwest::Error),

    /// The coordinator's response could not be interpreted
    #[error("unusable coordinator response: {0}")]
    InvalidResponse(String),

    /// An LRA id could not be parsed
    #[error(transparent)]
    Id(#[from] IdError),
}
