//! Per-LRA deadline watcher
//!
//! A positive deadline arms an asynchronous cancel that fires at or after
//! expiry. The watcher competes with explicit close/cancel through the
//! per-LRA lock, so whichever reaches the lock first wins; the loser sees
//! a terminal state and backs off.
//!
//! `renew` nudges a sleeping watcher through the handle's notifier, so a
//! shortened deadline takes effect without waiting out the old sleep.

use std::sync::Arc;
use std::time::Duration;

use tokio::time::sleep;
use tracing::debug;

use crate::lra::LraStatus;

use super::{now_ms, Coordinator};

pub(crate) fn spawn_watcher(c: Arc<Coordinator>, uid: String) {
    tokio::spawn(async move {
        loop {
            let Some(handle) = c.lookup(&uid) else {
                return;
            };
            let (deadline, status) = {
                let lra = handle.lra.lock().await;
                (lra.deadline, lra.status)
            };
            if status != LraStatus::Active {
                handle.disarm_deadline();
                return;
            }
            if deadline == 0 {
                handle.disarm_deadline();
                // A renew that re-armed while we were exiting must not be
                // lost; hand the watch back to a fresh task.
                if handle.lra.lock().await.deadline > 0 {
                    c.arm_deadline(&uid);
                }
                return;
            }

            let remaining = deadline - now_ms();
            if remaining <= 0 {
                break;
            }
            tokio::select! {
                _ = sleep(Duration::from_millis(remaining as u64)) => {}
                _ = handle.deadline_changed.notified() => {}
            }
        }

        debug!(%uid, "deadline expired, cancelling");
        if let Some(handle) = c.lookup(&uid) {
            handle.disarm_deadline();
        }
        // Gone or not-found here means an explicit end won the race.
        let _ = c.cancel(&uid).await;
    });
}
