//! Recovery scanner
//!
//! The exclusive retry mechanism of the coordinator: a periodic pass that
//! reloads unfinished LRAs from the object store, re-hydrates them into
//! the in-memory registry when the process has restarted since they were
//! written, and re-invokes the end-phase driver until each reaches a
//! terminal state.
//!
//! Per-LRA locking makes a pass idempotent: overlapping with a
//! user-triggered close/cancel is safe, and an LRA whose driver is
//! already running is simply skipped by the at-most-one-driver guard.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::engine::Coordinator;
use crate::lra::LraStatus;
use crate::store::RecordKind;

/// Outcome of one scanner pass.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct PassStats {
    /// Records enumerated from the store
    pub scanned: usize,
    /// LRAs whose driver was re-invoked
    pub driven: usize,
    /// LRAs that reached a terminal state during this pass
    pub settled: usize,
}

/// Runs one recovery pass over the persisted records.
pub async fn run_pass(coordinator: &Arc<Coordinator>) -> PassStats {
    let mut stats = PassStats::default();

    let uids = match coordinator.store().list(RecordKind::LongRunningAction) {
        Ok(uids) => uids,
        Err(e) => {
            warn!(error = %e, "recovery pass cannot enumerate the store");
            return stats;
        }
    };
    stats.scanned = uids.len();

    for uid in uids {
        let Some(handle) = coordinator.resolve(&uid) else {
            warn!(%uid, "record listed but not resolvable, skipped");
            continue;
        };

        let (status, recovering, deadline_pending) = {
            let lra = handle.lra.lock().await;
            (
                lra.status,
                lra.is_recovering(),
                lra.status == LraStatus::Active && lra.deadline > 0,
            )
        };

        // A crash inside the driver's finishing sequence can leave a
        // terminal record under the live kind: finish the relocation for
        // failed LRAs, finish the removal for cleanly ended ones.
        if status.is_terminal() {
            match status {
                LraStatus::Closed | LraStatus::Cancelled => {
                    if let Err(e) = coordinator
                        .store()
                        .remove(RecordKind::LongRunningAction, &uid)
                    {
                        warn!(%uid, error = %e, "ended record removal failed");
                    }
                }
                _ => coordinator.settle_failed_kind(status, &uid),
            }
            continue;
        }

        if deadline_pending {
            coordinator.arm_deadline(&uid);
        }

        if recovering {
            stats.driven += 1;
            let final_status = coordinator.drive_one(handle).await;
            if final_status.is_terminal() {
                stats.settled += 1;
            }
        }
    }

    if stats.driven > 0 {
        info!(
            scanned = stats.scanned,
            driven = stats.driven,
            settled = stats.settled,
            "recovery pass"
        );
    }
    stats
}

/// Periodic recovery scanner owned by a long-lived worker task.
pub struct RecoveryScanner {
    coordinator: Arc<Coordinator>,
    interval: Duration,
}

impl RecoveryScanner {
    pub fn new(coordinator: Arc<Coordinator>, interval: Duration) -> Self {
        Self {
            coordinator,
            interval,
        }
    }

    /// Spawns the scanner loop. The first pass runs immediately, which is
    /// what re-hydrates the registry after a restart.
    pub fn start(self) -> RecoveryHandle {
        let (shutdown_tx, mut shutdown_rx) = watch::channel(false);
        let task = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(self.interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        run_pass(&self.coordinator).await;
                    }
                    changed = shutdown_rx.changed() => {
                        if changed.is_err() || *shutdown_rx.borrow() {
                            break;
                        }
                    }
                }
            }
            debug!("recovery scanner stopped");
        });
        RecoveryHandle {
            shutdown: shutdown_tx,
            task,
        }
    }
}

/// Shutdown handle for the scanner task. Must be stopped before the
/// object store is closed.
pub struct RecoveryHandle {
    shutdown: watch::Sender<bool>,
    task: JoinHandle<()>,
}

impl RecoveryHandle {
    /// Signals the scanner and waits for the loop to exit.
    pub async fn shutdown(self) {
        let _ = self.shutdown.send(true);
        let _ = self.task.await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::EngineSettings;
    use crate::store::{MemoryStore, ObjectStore};

    fn coordinator_with(store: Arc<dyn ObjectStore>) -> Arc<Coordinator> {
        Arc::new(
            Coordinator::new(
                "http://localhost:8080/lra-coordinator",
                store,
                EngineSettings::default(),
            )
            .unwrap(),
        )
    }

    #[tokio::test]
    async fn test_pass_on_empty_store() {
        let c = coordinator_with(Arc::new(MemoryStore::new()));
        let stats = run_pass(&c).await;
        assert_eq!(stats, PassStats::default());
    }

    #[tokio::test]
    async fn test_pass_rehydrates_after_restart() {
        let store: Arc<dyn ObjectStore> = Arc::new(MemoryStore::new());

        let first = coordinator_with(store.clone());
        let id = first.start_lra("t1", 0, None).await.unwrap();
        drop(first);

        // Same store, fresh process
        let second = coordinator_with(store);
        let stats = run_pass(&second).await;
        assert_eq!(stats.scanned, 1);
        assert_eq!(
            second.get_status(id.as_str()).await.unwrap(),
            LraStatus::Active
        );
    }

    #[tokio::test]
    async fn test_scanner_shutdown_is_clean() {
        let c = coordinator_with(Arc::new(MemoryStore::new()));
        let handle = RecoveryScanner::new(c, Duration::from_millis(50)).start();
        tokio::time::sleep(Duration::from_millis(120)).await;
        handle.shutdown().await;
    }
}
