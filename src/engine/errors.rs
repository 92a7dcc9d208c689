//! Coordinator engine errors
//!
//! Every variant corresponds to one of the error kinds exposed at the
//! HTTP surface; the mapping to status codes lives with the API layer.

use thiserror::Error;

use crate::id::IdError;
use crate::lra::EndpointError;
use crate::store::StoreError;

/// Failures raised by coordinator verbs.
#[derive(Debug, Error)]
pub enum CoordinatorError {
    /// No LRA known under the given id
    #[error("unknown LRA: {0}")]
    NotFound(String),

    /// `leave` named a participant that is not enlisted
    #[error("unknown participant: {0}")]
    UnknownParticipant(String),

    /// The LRA has reached a terminal state; mutating verbs are refused
    #[error("LRA has ended: {0}")]
    Gone(String),

    /// The status filter names no known status token
    #[error("unknown status filter: {0}")]
    UnknownStatus(String),

    /// Participant endpoints could not be resolved
    #[error(transparent)]
    Enlist(#[from] EndpointError),

    /// A supplied id could not be parsed
    #[error(transparent)]
    Id(#[from] IdError),

    /// The write-through to the object store failed
    #[error(transparent)]
    Store(#[from] StoreError),

    /// A record could not be encoded for the store
    #[error("record encoding failure: {0}")]
    Encoding(#[from] serde_json::Error),

    /// Engine-internal failure
    #[error("internal error: {0}")]
    Internal(String),
}

/// Result type for coordinator verbs.
pub type CoordinatorResult<T> = Result<T, CoordinatorError>;
