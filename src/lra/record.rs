//! Persisted LRA and participant records
//!
//! Records are serialized to JSON for the object store; the store itself
//! only ever sees opaque bytes. Enlistment order is preserved in the
//! `participants` vector: completion walks it forward, compensation walks
//! it in reverse.

use chrono::Utc;
use serde::{Deserialize, Serialize};

use crate::id::LraId;

use super::status::{LraStatus, ParticipantState};

/// One enlistment of a participant endpoint in an LRA.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ParticipantRecord {
    /// Coordinator-assigned URI clients use to refer to this enlistment
    pub recovery_uri: String,
    /// Owning LRA
    pub lra_id: LraId,
    /// Callback invoked on cancel to undo prior work
    pub compensate: Option<String>,
    /// Callback invoked on close to finalize work
    pub complete: Option<String>,
    /// Polled while a callback is in progress
    pub status: Option<String>,
    /// Told to drop enlistment state once the coordinator is done with it
    pub forget: Option<String>,
    /// Best-effort notification after the LRA reaches a terminal state
    pub after: Option<String>,
    /// Epoch-ms deadline after which the enlistment is void if not
    /// terminal; 0 means none
    pub time_limit: i64,
    /// Opaque payload passed back on callbacks
    pub user_data: Option<String>,
    /// Enlistment state; terminal states never revert
    pub state: ParticipantState,
    /// End-phase callback attempts so far
    #[serde(default)]
    pub attempts: u32,
    /// Epoch-ms time before which recovery must not retry; 0 means now
    #[serde(default)]
    pub next_attempt_at: i64,
}

impl ParticipantRecord {
    /// Applies a state transition, refusing to leave a terminal state.
    pub fn transition(&mut self, next: ParticipantState) {
        if self.state.is_terminal() {
            return;
        }
        self.state = next;
    }

    /// Whether the given URL refers to this enlistment.
    ///
    /// `leave` accepts the recovery URI or any of the registered callback
    /// endpoints, as well as the base URI the endpoints were derived from.
    pub fn matches(&self, url: &str) -> bool {
        let url = url.trim().trim_end_matches('/');
        if url.is_empty() {
            return false;
        }
        if self.recovery_uri.trim_end_matches('/') == url {
            return true;
        }
        [
            &self.compensate,
            &self.complete,
            &self.status,
            &self.forget,
            &self.after,
        ]
        .into_iter()
        .flatten()
        .any(|endpoint| {
            let endpoint = endpoint.trim_end_matches('/');
            endpoint == url || endpoint.strip_prefix(url).is_some_and(|rest| rest.starts_with('/'))
        })
    }

    /// Records a retryable failure and schedules the next attempt with
    /// exponential backoff bounded by `cap_ms`. A little jitter keeps a
    /// batch of participants that failed together from retrying in
    /// lockstep.
    pub fn record_retry(&mut self, base_ms: u64, cap_ms: u64) {
        self.attempts = self.attempts.saturating_add(1);
        let exp = self.attempts.min(16);
        let delay = base_ms.saturating_mul(1u64 << exp).min(cap_ms.max(base_ms));
        let jitter = if delay >= 4 {
            rand::random::<u64>() % (delay / 4)
        } else {
            0
        };
        self.next_attempt_at = Utc::now().timestamp_millis() + (delay - jitter) as i64;
    }

    /// Whether a retry is due now.
    pub fn retry_due(&self, now_ms: i64) -> bool {
        self.next_attempt_at <= now_ms
    }
}

/// A Long-Running Action: an orchestration context identifying a saga.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Lra {
    /// Absolute id minted by the owning coordinator
    pub id: LraId,
    /// Opaque caller-supplied tag, for telemetry only
    pub client_id: String,
    /// Set when this LRA is nested under another
    pub parent_id: Option<LraId>,
    /// Nested LRA ids started under this one
    pub children: Vec<LraId>,
    /// Enlistments in join order
    pub participants: Vec<ParticipantRecord>,
    /// Lifecycle state
    pub status: LraStatus,
    /// Epoch-ms creation time
    pub start_time: i64,
    /// Epoch-ms time the end phase began; 0 until then
    pub finish_time: i64,
    /// Epoch-ms timeout triggering an asynchronous cancel; 0 means none
    pub deadline: i64,
}

impl Lra {
    /// Creates a new Active LRA.
    pub fn new(id: LraId, client_id: impl Into<String>, parent_id: Option<LraId>) -> Self {
        Self {
            id,
            client_id: client_id.into(),
            parent_id,
            children: Vec::new(),
            participants: Vec::new(),
            status: LraStatus::Active,
            start_time: Utc::now().timestamp_millis(),
            finish_time: 0,
            deadline: 0,
        }
    }

    /// True while a terminal end-phase attempt has not yet completed for
    /// all participants; such LRAs are picked up by the recovery scanner.
    pub fn is_recovering(&self) -> bool {
        self.status.is_ending()
            || (self.status.is_terminal()
                && self.participants.iter().any(|p| !p.state.is_terminal()))
    }

    /// Whether every enlistment has reached a terminal state.
    pub fn all_participants_terminal(&self) -> bool {
        self.participants.iter().all(|p| p.state.is_terminal())
    }

    /// Whether any enlistment failed permanently.
    pub fn any_participant_failed(&self) -> bool {
        self.participants.iter().any(|p| p.state.is_failed())
    }

    /// Serializes the record for the object store.
    pub fn encode(&self) -> serde_json::Result<Vec<u8>> {
        serde_json::to_vec(self)
    }

    /// Deserializes a record read back from the object store.
    pub fn decode(bytes: &[u8]) -> serde_json::Result<Self> {
        serde_json::from_slice(bytes)
    }

    /// The wire snapshot served by list and info reads.
    pub fn data(&self) -> LraData {
        LraData {
            lra_id: self.id.as_str().to_string(),
            client_id: self.client_id.clone(),
            status: self.status,
            is_top_level: self.parent_id.is_none(),
            is_recovering: self.is_recovering(),
            start_time: self.start_time,
            finish_time: self.finish_time,
        }
    }
}

/// Wire snapshot of one LRA, served as JSON.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LraData {
    pub lra_id: String,
    pub client_id: String,
    pub status: LraStatus,
    pub is_top_level: bool,
    pub is_recovering: bool,
    pub start_time: i64,
    pub finish_time: i64,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn participant(lra: &LraId, base: &str) -> ParticipantRecord {
        ParticipantRecord {
            recovery_uri: format!("http://h:1/p/recovery/{}/r1", lra.uid()),
            lra_id: lra.clone(),
            compensate: Some(format!("{}/compensate", base)),
            complete: Some(format!("{}/complete", base)),
            status: None,
            forget: None,
            after: None,
            time_limit: 0,
            user_data: None,
            state: ParticipantState::Active,
            attempts: 0,
            next_attempt_at: 0,
        }
    }

    #[test]
    fn test_terminal_participant_state_is_sticky() {
        let id = LraId::mint("http://h:1/c");
        let mut p = participant(&id, "http://svc:80/order");
        p.transition(ParticipantState::Completed);
        p.transition(ParticipantState::Compensating);
        assert_eq!(p.state, ParticipantState::Completed);
    }

    #[test]
    fn test_participant_matches_endpoints_and_base() {
        let id = LraId::mint("http://h:1/c");
        let p = participant(&id, "http://svc:80/order");
        assert!(p.matches("http://svc:80/order/compensate"));
        assert!(p.matches("http://svc:80/order"));
        assert!(p.matches(&p.recovery_uri));
        assert!(!p.matches("http://svc:80/other"));
    }

    #[test]
    fn test_retry_backoff_is_bounded() {
        let id = LraId::mint("http://h:1/c");
        let mut p = participant(&id, "http://svc:80/order");
        for _ in 0..40 {
            p.record_retry(100, 5_000);
        }
        let now = Utc::now().timestamp_millis();
        assert!(p.next_attempt_at <= now + 5_000);
        assert!(p.next_attempt_at > now);
    }

    #[test]
    fn test_record_round_trip() {
        let id = LraId::mint("http://h:1/c");
        let mut lra = Lra::new(id.clone(), "client-1", None);
        lra.participants.push(participant(&id, "http://svc:80/order"));
        let bytes = lra.encode().unwrap();
        let back = Lra::decode(&bytes).unwrap();
        assert_eq!(back.id, id);
        assert_eq!(back.participants.len(), 1);
        assert_eq!(back.status, LraStatus::Active);
    }

    #[test]
    fn test_recovering_reflects_pending_participants() {
        let id = LraId::mint("http://h:1/c");
        let mut lra = Lra::new(id.clone(), "t", None);
        assert!(!lra.is_recovering());
        lra.status = LraStatus::Closing;
        assert!(lra.is_recovering());
        lra.status = LraStatus::Closed;
        assert!(!lra.is_recovering());
    }
}
