//! LRA and participant status tokens
//!
//! Both enums serialize to the exact token strings that travel on the
//! wire (`Closing`, `FailedToCompensate`, ...). The numeric ordinal of
//! `LraStatus` is the value stored in column 2 of the SQL store backend
//! and must stay stable across releases.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Raised when a wire token does not name a known status.
#[derive(Debug, Clone, Error)]
#[error("unknown status token: {0}")]
pub struct StatusParseError(pub String);

/// Lifecycle state of an LRA.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum LraStatus {
    /// Accepting enlistments and nested starts
    Active,
    /// Close requested; complete callbacks in flight
    Closing,
    /// All participants completed
    Closed,
    /// Cancel requested; compensate callbacks in flight
    Cancelling,
    /// All participants compensated
    Cancelled,
    /// At least one participant permanently failed to complete
    FailedToClose,
    /// At least one participant permanently failed to compensate
    FailedToCancel,
}

impl LraStatus {
    /// Stable numeric ordinal for the SQL store column.
    pub fn ordinal(&self) -> i64 {
        match self {
            LraStatus::Active => 0,
            LraStatus::Closing => 1,
            LraStatus::Closed => 2,
            LraStatus::Cancelling => 3,
            LraStatus::Cancelled => 4,
            LraStatus::FailedToClose => 5,
            LraStatus::FailedToCancel => 6,
        }
    }

    /// Terminal statuses are sticky: once reached they never change.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            LraStatus::Closed
                | LraStatus::Cancelled
                | LraStatus::FailedToClose
                | LraStatus::FailedToCancel
        )
    }

    /// True while an end phase is in flight.
    pub fn is_ending(&self) -> bool {
        matches!(self, LraStatus::Closing | LraStatus::Cancelling)
    }

    /// The wire token for this status.
    pub fn as_str(&self) -> &'static str {
        match self {
            LraStatus::Active => "Active",
            LraStatus::Closing => "Closing",
            LraStatus::Closed => "Closed",
            LraStatus::Cancelling => "Cancelling",
            LraStatus::Cancelled => "Cancelled",
            LraStatus::FailedToClose => "FailedToClose",
            LraStatus::FailedToCancel => "FailedToCancel",
        }
    }
}

impl fmt::Display for LraStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for LraStatus {
    type Err = StatusParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "Active" => Ok(LraStatus::Active),
            "Closing" => Ok(LraStatus::Closing),
            "Closed" => Ok(LraStatus::Closed),
            "Cancelling" => Ok(LraStatus::Cancelling),
            "Cancelled" => Ok(LraStatus::Cancelled),
            "FailedToClose" => Ok(LraStatus::FailedToClose),
            "FailedToCancel" => Ok(LraStatus::FailedToCancel),
            other => Err(StatusParseError(other.to_string())),
        }
    }
}

/// State of a single enlistment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ParticipantState {
    /// Enlisted, no end-phase callback attempted yet
    Active,
    /// Complete callback accepted but not finished (202)
    Completing,
    /// Complete callback finished
    Completed,
    /// Compensate callback accepted but not finished (202)
    Compensating,
    /// Compensate callback finished
    Compensated,
    /// Participant permanently failed to complete
    FailedToComplete,
    /// Participant permanently failed to compensate
    FailedToCompensate,
}

impl ParticipantState {
    /// Terminal states are sticky and never revert.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            ParticipantState::Completed
                | ParticipantState::Compensated
                | ParticipantState::FailedToComplete
                | ParticipantState::FailedToCompensate
        )
    }

    /// True while a callback has been accepted but not finished.
    pub fn is_in_progress(&self) -> bool {
        matches!(
            self,
            ParticipantState::Completing | ParticipantState::Compensating
        )
    }

    /// True for the two permanent-failure states.
    pub fn is_failed(&self) -> bool {
        matches!(
            self,
            ParticipantState::FailedToComplete | ParticipantState::FailedToCompensate
        )
    }

    /// The wire token for this state.
    pub fn as_str(&self) -> &'static str {
        match self {
            ParticipantState::Active => "Active",
            ParticipantState::Completing => "Completing",
            ParticipantState::Completed => "Completed",
            ParticipantState::Compensating => "Compensating",
            ParticipantState::Compensated => "Compensated",
            ParticipantState::FailedToComplete => "FailedToComplete",
            ParticipantState::FailedToCompensate => "FailedToCompensate",
        }
    }
}

impl fmt::Display for ParticipantState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ParticipantState {
    type Err = StatusParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "Active" => Ok(ParticipantState::Active),
            "Completing" => Ok(ParticipantState::Completing),
            "Completed" => Ok(ParticipantState::Completed),
            "Compensating" => Ok(ParticipantState::Compensating),
            "Compensated" => Ok(ParticipantState::Compensated),
            "FailedToComplete" => Ok(ParticipantState::FailedToComplete),
            "FailedToCompensate" => Ok(ParticipantState::FailedToCompensate),
            other => Err(StatusParseError(other.to_string())),
        }
    }
}
