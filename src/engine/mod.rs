//! Coordinator engine
//!
//! Owns the in-memory registry of active LRAs and serializes all
//! mutations per LRA. Every state transition is written through to the
//! object store before it is acknowledged to the caller.
//!
//! Locking rules:
//!
//! - each LRA has its own async mutex, held only across critical
//!   sections, never across a participant HTTP call
//! - nested LRAs take locks parent before child, so nesting (a strict
//!   tree) cannot deadlock
//! - the registry map itself is behind a read-mostly lock touched only to
//!   add or remove entries

mod deadline;
mod driver;
mod errors;

pub use errors::{CoordinatorError, CoordinatorResult};

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::Duration;

use chrono::Utc;
use tokio::sync::{Mutex, Notify};
use tracing::{debug, info};

use crate::id::{self, LraId, RecoveryUri};
use crate::lra::{Endpoints, Lra, LraData, LraStatus, ParticipantRecord, ParticipantState};
use crate::store::{ObjectStore, RecordKind};

/// Engine tuning knobs, filled from the coordinator configuration.
#[derive(Debug, Clone)]
pub struct EngineSettings {
    /// Bound on every outbound participant call
    pub callback_timeout: Duration,
    /// First retry delay for a failed participant callback
    pub retry_backoff_base_ms: u64,
    /// Upper bound on the exponential retry delay
    pub retry_backoff_cap_ms: u64,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            callback_timeout: Duration::from_secs(5),
            retry_backoff_base_ms: 500,
            retry_backoff_cap_ms: 30_000,
        }
    }
}

/// How a joining participant supplied its endpoints.
#[derive(Debug, Clone)]
pub enum EnlistSource {
    /// HTTP `Link` header value with rel-qualified endpoint URIs
    Link(String),
    /// Plain-text body carrying a base URI to derive endpoints from
    Body(String),
}

/// Registry entry for one LRA.
///
/// The mutex guards the record; the `driving` flag enforces at most one
/// end-phase driver per LRA at any moment.
pub struct LraHandle {
    pub(crate) lra: Mutex<Lra>,
    driving: AtomicBool,
    deadline_armed: AtomicBool,
    pub(crate) deadline_changed: Notify,
}

impl LraHandle {
    fn new(lra: Lra) -> Self {
        Self {
            lra: Mutex::new(lra),
            driving: AtomicBool::new(false),
            deadline_armed: AtomicBool::new(false),
            deadline_changed: Notify::new(),
        }
    }

    pub(crate) fn try_begin_driving(&self) -> bool {
        !self.driving.swap(true, Ordering::AcqRel)
    }

    pub(crate) fn end_driving(&self) {
        self.driving.store(false, Ordering::Release);
    }

    fn try_arm_deadline(&self) -> bool {
        !self.deadline_armed.swap(true, Ordering::AcqRel)
    }

    pub(crate) fn disarm_deadline(&self) {
        self.deadline_armed.store(false, Ordering::Release);
    }
}

/// The coordinator engine.
pub struct Coordinator {
    base: String,
    registry: RwLock<HashMap<String, Arc<LraHandle>>>,
    pub(crate) store: Arc<dyn ObjectStore>,
    pub(crate) http: reqwest::Client,
    pub(crate) settings: EngineSettings,
}

impl Coordinator {
    /// Creates an engine minting ids under `base` and writing through to
    /// `store`.
    pub fn new(
        base: impl Into<String>,
        store: Arc<dyn ObjectStore>,
        settings: EngineSettings,
    ) -> CoordinatorResult<Self> {
        let http = reqwest::Client::builder()
            .timeout(settings.callback_timeout)
            .build()
            .map_err(|e| CoordinatorError::Internal(format!("http client: {}", e)))?;
        let base = base.into().trim_end_matches('/').to_string();
        Ok(Self {
            base,
            registry: RwLock::new(HashMap::new()),
            store,
            http,
            settings,
        })
    }

    /// The base URL this coordinator mints ids under.
    pub fn base(&self) -> &str {
        &self.base
    }

    /// The object store records are written through to.
    pub fn store(&self) -> &Arc<dyn ObjectStore> {
        &self.store
    }

    fn registry_read(&self) -> RwLockReadGuard<'_, HashMap<String, Arc<LraHandle>>> {
        self.registry.read().unwrap_or_else(|e| e.into_inner())
    }

    fn registry_write(&self) -> RwLockWriteGuard<'_, HashMap<String, Arc<LraHandle>>> {
        self.registry.write().unwrap_or_else(|e| e.into_inner())
    }

    pub(crate) fn lookup(&self, uid: &str) -> Option<Arc<LraHandle>> {
        self.registry_read().get(uid).cloned()
    }

    /// Resolves a handle, re-hydrating the record from the store when the
    /// registry does not hold it (coordinator restarted since it was
    /// persisted).
    pub(crate) fn resolve(&self, uid: &str) -> Option<Arc<LraHandle>> {
        if let Some(handle) = self.lookup(uid) {
            return Some(handle);
        }
        for kind in RecordKind::all() {
            let bytes = match self.store.read(kind, uid) {
                Ok(Some(bytes)) => bytes,
                _ => continue,
            };
            let lra = match Lra::decode(&bytes) {
                Ok(lra) => lra,
                Err(e) => {
                    tracing::warn!(uid, error = %e, "undecodable record in store");
                    continue;
                }
            };
            let mut registry = self.registry_write();
            let handle = registry
                .entry(uid.to_string())
                .or_insert_with(|| Arc::new(LraHandle::new(lra)))
                .clone();
            return Some(handle);
        }
        None
    }

    fn resolve_or_not_found(&self, id: &str) -> CoordinatorResult<Arc<LraHandle>> {
        self.resolve(id::uid_of(id))
            .ok_or_else(|| CoordinatorError::NotFound(id.to_string()))
    }

    /// Persists `lra` under the kind implied by its status.
    pub(crate) fn persist(&self, lra: &Lra) -> CoordinatorResult<()> {
        self.persist_as(kind_for(lra.status), lra)
    }

    pub(crate) fn persist_as(&self, kind: RecordKind, lra: &Lra) -> CoordinatorResult<()> {
        let bytes = lra.encode()?;
        self.store.write(kind, lra.id.uid(), &bytes)?;
        Ok(())
    }

    // ==================
    // Coordinator verbs
    // ==================

    /// Begins a new LRA, optionally nested under `parent`.
    ///
    /// The record is persisted before the id is returned; a positive
    /// `time_limit_ms` arms an asynchronous cancel at the deadline.
    pub async fn start_lra(
        self: &Arc<Self>,
        client_id: &str,
        time_limit_ms: i64,
        parent: Option<&str>,
    ) -> CoordinatorResult<LraId> {
        let parent_handle = match parent.filter(|p| !p.trim().is_empty()) {
            Some(p) => Some(self.resolve_or_not_found(p)?),
            None => None,
        };

        let lra_id = LraId::mint(&self.base);
        let mut lra = Lra::new(lra_id.clone(), client_id, None);
        if time_limit_ms > 0 {
            lra.deadline = now_ms() + time_limit_ms;
        }

        match parent_handle {
            Some(parent_handle) => {
                // Parent lock is taken before the child record exists;
                // linkage always locks parent before child.
                let mut parent_lra = parent_handle.lra.lock().await;
                if parent_lra.status != LraStatus::Active {
                    return Err(CoordinatorError::Gone(parent_lra.id.to_string()));
                }
                lra.parent_id = Some(parent_lra.id.clone());
                parent_lra.children.push(lra_id.clone());
                self.persist(&lra)?;
                self.persist(&parent_lra)?;
            }
            None => self.persist(&lra)?,
        }

        let armed = lra.deadline > 0;
        self.registry_write()
            .insert(lra_id.uid().to_string(), Arc::new(LraHandle::new(lra)));
        if armed {
            self.arm_deadline(lra_id.uid());
        }

        info!(lra = %lra_id, client_id, "started LRA");
        Ok(lra_id)
    }

    /// Replaces the deadline. A zero or negative `time_limit_ms` disables
    /// it.
    pub async fn renew(self: &Arc<Self>, id: &str, time_limit_ms: i64) -> CoordinatorResult<()> {
        let handle = self.resolve_or_not_found(id)?;
        let uid = {
            let mut lra = handle.lra.lock().await;
            if lra.status.is_terminal() {
                return Err(CoordinatorError::Gone(lra.id.to_string()));
            }
            lra.deadline = if time_limit_ms > 0 {
                now_ms() + time_limit_ms
            } else {
                0
            };
            self.persist(&lra)?;
            lra.id.uid().to_string()
        };
        handle.deadline_changed.notify_waiters();
        self.arm_deadline(&uid);
        Ok(())
    }

    /// Enlists a participant. Only an Active LRA accepts enlistments.
    pub async fn join(
        &self,
        id: &str,
        source: EnlistSource,
        time_limit_ms: i64,
        user_data: Option<String>,
    ) -> CoordinatorResult<RecoveryUri> {
        let endpoints = match &source {
            EnlistSource::Link(header) => Endpoints::from_link_header(header)?,
            EnlistSource::Body(body) => Endpoints::from_base_uri(body)?,
        };

        let handle = self.resolve_or_not_found(id)?;
        let mut lra = handle.lra.lock().await;
        if lra.status != LraStatus::Active {
            return Err(CoordinatorError::Gone(lra.id.to_string()));
        }

        let recovery = RecoveryUri::mint(&self.base, lra.id.uid());
        let lra_id = lra.id.clone();
        lra.participants.push(ParticipantRecord {
            recovery_uri: recovery.as_str().to_string(),
            lra_id,
            compensate: endpoints.compensate,
            complete: endpoints.complete,
            status: endpoints.status,
            forget: endpoints.forget,
            after: endpoints.after,
            time_limit: if time_limit_ms > 0 {
                now_ms() + time_limit_ms
            } else {
                0
            },
            user_data,
            state: ParticipantState::Active,
            attempts: 0,
            next_attempt_at: 0,
        });
        self.persist(&lra)?;

        debug!(lra = %lra.id, recovery = %recovery, "participant joined");
        Ok(recovery)
    }

    /// Removes an enlistment. The participant may be named by its
    /// recovery URI or by any endpoint registered at join time.
    pub async fn leave(&self, id: &str, participant_url: &str) -> CoordinatorResult<()> {
        let handle = self.resolve_or_not_found(id)?;
        let mut lra = handle.lra.lock().await;
        if lra.status.is_terminal() {
            return Err(CoordinatorError::Gone(lra.id.to_string()));
        }
        let index = lra
            .participants
            .iter()
            .position(|p| p.matches(participant_url))
            .ok_or_else(|| CoordinatorError::UnknownParticipant(participant_url.to_string()))?;
        lra.participants.remove(index);
        self.persist(&lra)?;
        debug!(lra = %lra.id, participant = participant_url, "participant left");
        Ok(())
    }

    /// Drives the complete phase. Returns the status reached by this
    /// attempt; convergence of stragglers belongs to recovery.
    pub async fn close(self: &Arc<Self>, id: &str) -> CoordinatorResult<LraStatus> {
        self.end(id, false).await
    }

    /// Drives the compensate phase.
    pub async fn cancel(self: &Arc<Self>, id: &str) -> CoordinatorResult<LraStatus> {
        self.end(id, true).await
    }

    async fn end(self: &Arc<Self>, id: &str, compensating: bool) -> CoordinatorResult<LraStatus> {
        let handle = self.resolve_or_not_found(id)?;
        {
            let mut lra = handle.lra.lock().await;
            if lra.status.is_terminal() {
                return Err(CoordinatorError::Gone(lra.id.to_string()));
            }
            if lra.status == LraStatus::Active {
                lra.status = if compensating {
                    LraStatus::Cancelling
                } else {
                    LraStatus::Closing
                };
                lra.finish_time = now_ms();
                self.persist(&lra)?;
                info!(lra = %lra.id, status = %lra.status, "end phase started");
            }
        }

        // The end phase runs on its own task so a slow participant cannot
        // hold a request-servicing worker hostage.
        let status = match driver::spawn(self.clone(), handle.clone()).await {
            Ok(status) => status,
            Err(_) => handle.lra.lock().await.status,
        };
        Ok(status)
    }

    /// Current status of one LRA.
    pub async fn get_status(&self, id: &str) -> CoordinatorResult<LraStatus> {
        let handle = self.resolve_or_not_found(id)?;
        let lra = handle.lra.lock().await;
        Ok(lra.status)
    }

    /// Wire snapshot of one LRA.
    pub async fn get_info(&self, id: &str) -> CoordinatorResult<LraData> {
        let handle = self.resolve_or_not_found(id)?;
        let lra = handle.lra.lock().await;
        Ok(lra.data())
    }

    /// Snapshot of known LRAs, optionally filtered by status token.
    ///
    /// The view is not point-in-time consistent across LRAs; each element
    /// is individually consistent. Fully ended LRAs (whose records have
    /// been removed) are hidden unless the filter names their terminal
    /// status explicitly.
    pub async fn list_lras(&self, status_filter: Option<&str>) -> CoordinatorResult<Vec<LraData>> {
        let filter = match status_filter.filter(|s| !s.is_empty()) {
            Some(s) => Some(
                s.parse::<LraStatus>()
                    .map_err(|_| CoordinatorError::UnknownStatus(s.to_string()))?,
            ),
            None => None,
        };

        let handles: Vec<Arc<LraHandle>> = self.registry_read().values().cloned().collect();
        let mut out = Vec::new();
        for handle in handles {
            let lra = handle.lra.lock().await;
            match filter {
                Some(wanted) => {
                    if lra.status == wanted {
                        out.push(lra.data());
                    }
                }
                None => {
                    if !matches!(lra.status, LraStatus::Closed | LraStatus::Cancelled) {
                        out.push(lra.data());
                    }
                }
            }
        }
        Ok(out)
    }

    /// Ids of LRAs whose end phase has not yet converged.
    pub async fn recovering_ids(&self) -> Vec<String> {
        let handles: Vec<Arc<LraHandle>> = self.registry_read().values().cloned().collect();
        let mut out = Vec::new();
        for handle in handles {
            let lra = handle.lra.lock().await;
            if lra.is_recovering() {
                out.push(lra.id.as_str().to_string());
            }
        }
        out
    }

    /// Runs one end-phase driver pass for an LRA already in an ending
    /// state. Used by the recovery scanner.
    pub(crate) async fn drive_one(self: &Arc<Self>, handle: Arc<LraHandle>) -> LraStatus {
        driver::drive(self.clone(), handle).await
    }

    /// Arms the deadline watcher for an LRA, once.
    pub(crate) fn arm_deadline(self: &Arc<Self>, uid: &str) {
        if let Some(handle) = self.lookup(uid) {
            if handle.try_arm_deadline() {
                deadline::spawn_watcher(self.clone(), uid.to_string());
            } else {
                handle.deadline_changed.notify_waiters();
            }
        }
    }

    /// Settles a crash window between the failed-status write and the
    /// relocation into the failed kind: a terminal failed record still
    /// sitting under the live kind is moved, not re-driven.
    pub(crate) fn settle_failed_kind(&self, status: LraStatus, uid: &str) {
        if kind_for(status) != RecordKind::FailedLongRunningAction {
            return;
        }
        match self.store.relocate(
            RecordKind::LongRunningAction,
            RecordKind::FailedLongRunningAction,
            uid,
        ) {
            Ok(()) => debug!(uid, "completed interrupted failed-record relocation"),
            Err(crate::store::StoreError::NotFound { .. }) => {}
            Err(e) => tracing::warn!(uid, error = %e, "failed-record relocation failed"),
        }
    }
}

/// The store kind a record with this status lives under.
pub(crate) fn kind_for(status: LraStatus) -> RecordKind {
    match status {
        LraStatus::FailedToClose | LraStatus::FailedToCancel => {
            RecordKind::FailedLongRunningAction
        }
        _ => RecordKind::LongRunningAction,
    }
}

/// Epoch milliseconds now.
pub(crate) fn now_ms() -> i64 {
    Utc::now().timestamp_millis()
}
