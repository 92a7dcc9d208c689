//! End-phase driver
//!
//! Drives an LRA in Closing or Cancelling to a terminal state:
//! children first (depth-first), then participant callbacks — complete in
//! enlistment order, compensate in reverse. All HTTP happens with no LRA
//! lock held; the lock is re-acquired afterwards and the state re-checked
//! before any outcome is applied.
//!
//! The driver makes exactly one attempt per participant per pass. A
//! retryable failure is left for the recovery scanner; the serving path
//! never blocks to retry.

use std::str::FromStr;
use std::sync::Arc;

use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::lra::{
    LraStatus, ParticipantRecord, ParticipantState, LRA_CONTEXT_HEADER, LRA_ENDED_CONTEXT_HEADER,
    LRA_PARENT_CONTEXT_HEADER,
};
use crate::store::RecordKind;

use super::{now_ms, Coordinator, LraHandle};

/// Releases the at-most-one-driver guard when a pass ends.
struct DriveGuard<'a>(&'a LraHandle);

impl Drop for DriveGuard<'_> {
    fn drop(&mut self) {
        self.0.end_driving();
    }
}

/// Runs one driver pass on its own task.
pub(crate) fn spawn(c: Arc<Coordinator>, handle: Arc<LraHandle>) -> JoinHandle<LraStatus> {
    tokio::spawn(drive(c, handle))
}

/// Runs one driver pass, yielding to a pass already in flight.
pub(crate) async fn drive(c: Arc<Coordinator>, handle: Arc<LraHandle>) -> LraStatus {
    if !handle.try_begin_driving() {
        // Another driver owns this LRA right now; report what it sees.
        return handle.lra.lock().await.status;
    }
    let _guard = DriveGuard(&handle);
    drive_pass(&c, &handle).await
}

async fn drive_pass(c: &Arc<Coordinator>, handle: &Arc<LraHandle>) -> LraStatus {
    let (lra_id, mut compensating, children) = {
        let lra = handle.lra.lock().await;
        if !lra.status.is_ending() {
            return lra.status;
        }
        (
            lra.id.clone(),
            lra.status == LraStatus::Cancelling,
            lra.children.clone(),
        )
    };

    // Children end before their parent's own participants. A child that
    // had to compensate forces the parent onto the cancel path.
    let mut child_cancelled = false;
    for child in &children {
        let Some(child_handle) = c.resolve(child.uid()) else {
            continue;
        };
        {
            let mut child_lra = child_handle.lra.lock().await;
            if child_lra.status == LraStatus::Active {
                child_lra.status = if compensating {
                    LraStatus::Cancelling
                } else {
                    LraStatus::Closing
                };
                child_lra.finish_time = now_ms();
                if let Err(e) = c.persist(&child_lra) {
                    warn!(lra = %child_lra.id, error = %e, "child write-through failed");
                }
            }
        }
        let child_status = Box::pin(drive(c.clone(), child_handle)).await;
        if matches!(
            child_status,
            LraStatus::Cancelling | LraStatus::Cancelled | LraStatus::FailedToCancel
        ) {
            child_cancelled = true;
        }
    }

    if child_cancelled && !compensating {
        let mut lra = handle.lra.lock().await;
        if lra.status == LraStatus::Closing {
            info!(lra = %lra.id, "child cancelled, parent switches to cancel");
            lra.status = LraStatus::Cancelling;
            if let Err(e) = c.persist(&lra) {
                warn!(lra = %lra.id, error = %e, "write-through failed");
            }
        }
        compensating = lra.status == LraStatus::Cancelling;
    }

    // Completion walks enlistment order; compensation walks it in
    // reverse.
    let order: Vec<usize> = {
        let lra = handle.lra.lock().await;
        let mut pending: Vec<usize> = (0..lra.participants.len())
            .filter(|i| !lra.participants[*i].state.is_terminal())
            .collect();
        if compensating {
            pending.reverse();
        }
        pending
    };

    for index in order {
        step_participant(c, handle, index, compensating).await;
    }

    finish_pass(c, handle, &lra_id, compensating).await
}

/// One attempt for one participant: either the end-phase callback or, if
/// a previous attempt was accepted with 202, a status poll.
async fn step_participant(
    c: &Arc<Coordinator>,
    handle: &Arc<LraHandle>,
    index: usize,
    compensating: bool,
) {
    enum Attempt {
        Invoke,
        Poll,
    }

    let (attempt, url, record, parent) = {
        let mut lra = handle.lra.lock().await;
        if !lra.status.is_ending() {
            return;
        }
        let parent = lra.parent_id.as_ref().map(|p| p.as_str().to_string());
        let Some(p) = lra.participants.get_mut(index) else {
            return;
        };
        if p.state.is_terminal() || !p.retry_due(now_ms()) {
            return;
        }

        // An enlistment whose own time limit lapsed before any callback
        // was attempted is void: nothing is called for it.
        if p.state == ParticipantState::Active
            && p.time_limit > 0
            && p.time_limit <= now_ms()
        {
            p.transition(trivial_terminal(compensating));
            if let Err(e) = c.persist(&lra) {
                warn!(lra = %lra.id, error = %e, "write-through failed");
            }
            return;
        }

        if p.state.is_in_progress() {
            match p.status.clone() {
                Some(url) => (Attempt::Poll, url, p.clone(), parent),
                // No status endpoint to poll; repeat the callback.
                None => match callback_url(p, compensating) {
                    Some(url) => (Attempt::Invoke, url, p.clone(), parent),
                    None => return,
                },
            }
        } else {
            match callback_url(p, compensating) {
                Some(url) => {
                    p.transition(if compensating {
                        ParticipantState::Compensating
                    } else {
                        ParticipantState::Completing
                    });
                    let record = p.clone();
                    if let Err(e) = c.persist(&lra) {
                        warn!(lra = %lra.id, error = %e, "write-through failed");
                    }
                    (Attempt::Invoke, url, record, parent)
                }
                None => {
                    // Nothing to call for this phase: the enlistment is
                    // trivially done and only the after notification
                    // remains.
                    p.transition(trivial_terminal(compensating));
                    if let Err(e) = c.persist(&lra) {
                        warn!(lra = %lra.id, error = %e, "write-through failed");
                    }
                    return;
                }
            }
        }
    };

    // The participant call runs with no lock held.
    let outcome = match attempt {
        Attempt::Invoke => invoke_callback(c, &url, &record, parent.as_deref(), compensating).await,
        Attempt::Poll => poll_status(c, &url, &record, compensating).await,
    };

    apply_outcome(c, handle, index, compensating, outcome).await;
}

/// Result of one participant interaction.
enum Outcome {
    Terminal(ParticipantState),
    StillWorking,
    Retry,
}

async fn invoke_callback(
    c: &Arc<Coordinator>,
    url: &str,
    record: &ParticipantRecord,
    parent: Option<&str>,
    compensating: bool,
) -> Outcome {
    let mut request = c
        .http
        .put(url)
        .header(LRA_CONTEXT_HEADER, record.lra_id.as_str())
        .body(record.user_data.clone().unwrap_or_default());
    if let Some(parent) = parent {
        request = request.header(LRA_PARENT_CONTEXT_HEADER, parent);
    }

    match request.send().await {
        Ok(response) => {
            let status = response.status().as_u16();
            let body = response.text().await.unwrap_or_default();
            debug!(url, status, "participant callback answered");
            interpret_callback(status, &body, compensating)
        }
        Err(e) => {
            debug!(url, error = %e, "participant callback unreachable");
            Outcome::Retry
        }
    }
}

/// Status poll for a participant that answered 202 earlier.
async fn poll_status(
    c: &Arc<Coordinator>,
    url: &str,
    record: &ParticipantRecord,
    compensating: bool,
) -> Outcome {
    let response = c
        .http
        .get(url)
        .header(LRA_CONTEXT_HEADER, record.lra_id.as_str())
        .send()
        .await;

    match response {
        Ok(response) => {
            let status = response.status().as_u16();
            let body = response.text().await.unwrap_or_default();
            match status {
                202 => Outcome::StillWorking,
                // The participant no longer knows the enlistment.
                404 | 410 => Outcome::Terminal(failed_terminal(compensating)),
                200..=299 => match ParticipantState::from_str(body.trim()) {
                    Ok(state) if state.is_terminal() => {
                        forget_best_effort(c, record).await;
                        Outcome::Terminal(state)
                    }
                    _ => Outcome::Retry,
                },
                _ => Outcome::Retry,
            }
        }
        Err(e) => {
            debug!(url, error = %e, "status poll unreachable");
            Outcome::Retry
        }
    }
}

async fn apply_outcome(
    c: &Arc<Coordinator>,
    handle: &Arc<LraHandle>,
    index: usize,
    compensating: bool,
    outcome: Outcome,
) {
    let mut lra = handle.lra.lock().await;
    // The state may have moved while the HTTP call was in flight; a
    // participant removed by leave or an LRA no longer ending takes
    // precedence over a stale response.
    if !lra.status.is_ending() {
        return;
    }
    let settings = c.settings.clone();
    let Some(p) = lra.participants.get_mut(index) else {
        return;
    };

    match outcome {
        Outcome::Terminal(state) => {
            p.transition(state);
            p.next_attempt_at = 0;
        }
        Outcome::StillWorking => {
            p.transition(if compensating {
                ParticipantState::Compensating
            } else {
                ParticipantState::Completing
            });
            p.record_retry(settings.retry_backoff_base_ms, settings.retry_backoff_cap_ms);
        }
        Outcome::Retry => {
            p.record_retry(settings.retry_backoff_base_ms, settings.retry_backoff_cap_ms);
        }
    }
    if let Err(e) = c.persist(&lra) {
        warn!(lra = %lra.id, error = %e, "write-through failed");
    }
}

/// Settles the LRA once every participant is terminal; otherwise leaves
/// it for the recovery scanner.
async fn finish_pass(
    c: &Arc<Coordinator>,
    handle: &Arc<LraHandle>,
    lra_id: &crate::id::LraId,
    compensating: bool,
) -> LraStatus {
    let (final_status, after_targets) = {
        let mut lra = handle.lra.lock().await;
        if !lra.status.is_ending() {
            return lra.status;
        }
        if !lra.all_participants_terminal() {
            debug!(lra = %lra.id, "end phase incomplete, left for recovery");
            return lra.status;
        }

        let failed = lra.any_participant_failed();
        lra.status = match (compensating, failed) {
            (false, false) => LraStatus::Closed,
            (false, true) => LraStatus::FailedToClose,
            (true, false) => LraStatus::Cancelled,
            (true, true) => LraStatus::FailedToCancel,
        };
        lra.finish_time = now_ms();

        let uid = lra.id.uid().to_string();
        if failed {
            // Reclassify so operators can query the failure without
            // scanning live records: first persist the terminal status
            // under the live kind, then move the record atomically.
            if let Err(e) = c.persist_as(RecordKind::LongRunningAction, &lra) {
                warn!(lra = %lra.id, error = %e, "write-through failed");
            }
            if let Err(e) = c.store.relocate(
                RecordKind::LongRunningAction,
                RecordKind::FailedLongRunningAction,
                &uid,
            ) {
                warn!(lra = %lra.id, error = %e, "failed-record relocation failed");
            }
            warn!(lra = %lra.id, status = %lra.status, "end phase failed permanently");
        }

        let after_targets: Vec<String> = lra
            .participants
            .iter()
            .filter_map(|p| p.after.clone())
            .collect();
        (lra.status, after_targets)
    };

    // Terminal notifications are best-effort and carry the final status.
    for url in &after_targets {
        let result = c
            .http
            .put(url)
            .header(LRA_ENDED_CONTEXT_HEADER, lra_id.as_str())
            .body(final_status.as_str())
            .send()
            .await;
        if let Err(e) = result {
            debug!(url, error = %e, "after notification not delivered");
        }
    }

    if matches!(final_status, LraStatus::Closed | LraStatus::Cancelled) {
        if let Err(e) = c.store.remove(RecordKind::LongRunningAction, lra_id.uid()) {
            warn!(lra = %lra_id, error = %e, "ended record removal failed");
        }
        info!(lra = %lra_id, status = %final_status, "LRA ended");
    }
    final_status
}

async fn forget_best_effort(c: &Arc<Coordinator>, record: &ParticipantRecord) {
    if let Some(url) = &record.forget {
        if let Err(e) = c
            .http
            .delete(url)
            .header(LRA_CONTEXT_HEADER, record.lra_id.as_str())
            .send()
            .await
        {
            debug!(url, error = %e, "forget not delivered");
        }
    }
}

fn callback_url(p: &ParticipantRecord, compensating: bool) -> Option<String> {
    if compensating {
        p.compensate.clone()
    } else {
        p.complete.clone()
    }
}

fn trivial_terminal(compensating: bool) -> ParticipantState {
    if compensating {
        ParticipantState::Compensated
    } else {
        ParticipantState::Completed
    }
}

fn failed_terminal(compensating: bool) -> ParticipantState {
    if compensating {
        ParticipantState::FailedToCompensate
    } else {
        ParticipantState::FailedToComplete
    }
}

/// Maps a callback response onto the participant state machine.
fn interpret_callback(status: u16, body: &str, compensating: bool) -> Outcome {
    match status {
        202 => Outcome::StillWorking,
        200..=299 => match ParticipantState::from_str(body.trim()) {
            Ok(state) if state.is_terminal() => Outcome::Terminal(state),
            // An empty or non-status body on 2xx means the callback
            // finished its phase.
            _ => Outcome::Terminal(trivial_terminal(compensating)),
        },
        // Gone: the participant already forgot the enlistment, which only
        // happens once its work reached a terminal state.
        410 => Outcome::Terminal(trivial_terminal(compensating)),
        _ => Outcome::Retry,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_interpret_terminal_body() {
        assert!(matches!(
            interpret_callback(200, "Compensated", true),
            Outcome::Terminal(ParticipantState::Compensated)
        ));
        assert!(matches!(
            interpret_callback(200, "FailedToCompensate", true),
            Outcome::Terminal(ParticipantState::FailedToCompensate)
        ));
    }

    #[test]
    fn test_interpret_empty_2xx_is_phase_terminal() {
        assert!(matches!(
            interpret_callback(200, "", false),
            Outcome::Terminal(ParticipantState::Completed)
        ));
        assert!(matches!(
            interpret_callback(204, "", true),
            Outcome::Terminal(ParticipantState::Compensated)
        ));
    }

    #[test]
    fn test_interpret_202_keeps_working() {
        assert!(matches!(
            interpret_callback(202, "", false),
            Outcome::StillWorking
        ));
    }

    #[test]
    fn test_interpret_410_already_terminal() {
        assert!(matches!(
            interpret_callback(410, "", true),
            Outcome::Terminal(ParticipantState::Compensated)
        ));
    }

    #[test]
    fn test_interpret_errors_are_retryable() {
        for code in [400, 404, 409, 500, 503] {
            assert!(
                matches!(interpret_callback(code, "", false), Outcome::Retry),
                "code {}",
                code
            );
        }
    }
}
