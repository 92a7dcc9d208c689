//! LRA identifier service
//!
//! Every LRA id is an absolute URI of the form `<coordinator-base>/<uid>`.
//! The base embedded in the id is what gives clients per-LRA affinity:
//! any verb against an existing LRA is routed to the coordinator that
//! minted it, bypassing load balancing.
//!
//! Recovery URIs name a single enlistment and live under
//! `<coordinator-base>/recovery/<lra-uid>/<participant-uid>`.

use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

/// Identifier parse errors
#[derive(Debug, Clone, Error)]
pub enum IdError {
    /// The id is not an absolute http(s) URI
    #[error("not an absolute http(s) URI: {0}")]
    NotAbsolute(String),

    /// The id has no uid path segment after the coordinator base
    #[error("missing uid segment: {0}")]
    MissingUid(String),

    /// The URI is not a recovery URI minted by a coordinator
    #[error("not a recovery URI: {0}")]
    NotRecovery(String),
}

/// Absolute LRA identifier: `<coordinator-base>/<uid>`.
///
/// The uid is an opaque URI-safe token; the base is the URL prefix under
/// which the minting coordinator serves its API.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct LraId {
    uri: String,
}

impl LraId {
    /// Mints a fresh id under the given coordinator base.
    ///
    /// Trailing slashes on the base are ignored so that
    /// `http://host/lra-coordinator` and `http://host/lra-coordinator/`
    /// mint under the same base.
    pub fn mint(coordinator_base: &str) -> Self {
        let base = coordinator_base.trim_end_matches('/');
        Self {
            uri: format!("{}/{}", base, Uuid::new_v4()),
        }
    }

    /// Parses an existing id.
    ///
    /// The id must be an absolute http(s) URI with a non-empty final path
    /// segment (the uid) and a non-empty base in front of it.
    pub fn parse(s: &str) -> Result<Self, IdError> {
        let trimmed = s.trim().trim_end_matches('/');
        let rest = strip_scheme(trimmed).ok_or_else(|| IdError::NotAbsolute(s.to_string()))?;

        // The base must keep at least the authority in front of the uid:
        // "http://host/uid" splits into base "http://host" and uid "uid".
        match rest.rsplit_once('/') {
            Some((front, uid)) if !front.is_empty() && !uid.is_empty() => Ok(Self {
                uri: trimmed.to_string(),
            }),
            _ => Err(IdError::MissingUid(s.to_string())),
        }
    }

    /// The full id URI.
    pub fn as_str(&self) -> &str {
        &self.uri
    }

    /// The opaque uid minted for this LRA (final path segment).
    pub fn uid(&self) -> &str {
        match self.uri.rsplit_once('/') {
            Some((_, uid)) => uid,
            None => &self.uri,
        }
    }

    /// The base of the coordinator that minted this id (everything in
    /// front of the final path segment).
    pub fn coordinator_base(&self) -> &str {
        match self.uri.rsplit_once('/') {
            Some((base, _)) => base,
            None => &self.uri,
        }
    }
}

impl fmt::Display for LraId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.uri)
    }
}

/// Recovery URI naming a single enlistment:
/// `<coordinator-base>/recovery/<lra-uid>/<participant-uid>`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RecoveryUri {
    uri: String,
}

impl RecoveryUri {
    /// Mints a recovery URI for a new enlistment under the given LRA.
    pub fn mint(coordinator_base: &str, lra_uid: &str) -> Self {
        let base = coordinator_base.trim_end_matches('/');
        Self {
            uri: format!("{}/recovery/{}/{}", base, lra_uid, Uuid::new_v4()),
        }
    }

    /// Parses a recovery URI, validating the `/recovery/<lra>/<participant>`
    /// path shape.
    pub fn parse(s: &str) -> Result<Self, IdError> {
        let trimmed = s.trim().trim_end_matches('/');
        strip_scheme(trimmed).ok_or_else(|| IdError::NotAbsolute(s.to_string()))?;

        let mut tail = trimmed.rsplitn(4, '/');
        let participant = tail.next().unwrap_or("");
        let lra = tail.next().unwrap_or("");
        let marker = tail.next().unwrap_or("");
        if marker != "recovery" || lra.is_empty() || participant.is_empty() {
            return Err(IdError::NotRecovery(s.to_string()));
        }
        Ok(Self {
            uri: trimmed.to_string(),
        })
    }

    /// The full recovery URI.
    pub fn as_str(&self) -> &str {
        &self.uri
    }

    /// The uid of the LRA owning the enlistment.
    pub fn lra_uid(&self) -> &str {
        let mut tail = self.uri.rsplitn(3, '/');
        let _participant = tail.next();
        tail.next().unwrap_or("")
    }
}

impl fmt::Display for RecoveryUri {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.uri)
    }
}

/// Extracts the uid from either a full LRA id URI or a bare uid token.
///
/// Handlers accept both forms in the `{id}` path position; everything up
/// to the final path segment is discarded.
pub fn uid_of(id_or_uid: &str) -> &str {
    let trimmed = id_or_uid.trim().trim_end_matches('/');
    match trimmed.rsplit_once('/') {
        Some((_, uid)) => uid,
        None => trimmed,
    }
}

/// Percent-encodes a string for use as a URI query component.
///
/// Unreserved characters pass through; everything else is `%XX`-escaped.
pub fn encode_uri_component(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for byte in s.bytes() {
        match byte {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'_' | b'.' | b'~' => {
                out.push(byte as char)
            }
            _ => out.push_str(&format!("%{:02X}", byte)),
        }
    }
    out
}

fn strip_scheme(s: &str) -> Option<&str> {
    s.strip_prefix("http://")
        .or_else(|| s.strip_prefix("https://"))
        .filter(|rest| !rest.is_empty())
}
