//! Session lifecycle and progress broadcasting
//!
//! [`SyncStateCoordinator`] owns the [`SyncState`] of the run in progress.
//! Every update rebuilds the snapshot and hands it to all subscribers
//! while the writer lock is held, so observers see updates in the order
//! they were applied.
//!
//! Throughput is recomputed on updates that move bytes: the byte delta
//! since the previous sample divided by the time elapsed since then.

use std::sync::{Arc, Mutex, MutexGuard};

use mirrordrive_core::{
    domain::{
        newtypes::{AccountId, SessionId},
        sync_state::{estimate_remaining, throughput},
        AccountContext, SessionCounts, SyncDirection, SyncPhase, SyncRunStatus, SyncSessionLog,
        SyncState,
    },
    ports::IStateRepository,
};
use tokio::{sync::mpsc, time::Instant};
use tracing::{debug, info, warn};

use crate::{error::SyncError, transfer::TransferEvent};

/// One change to the progress of the current run
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProgressUpdate {
    Phase(SyncPhase),
    /// Work added to the plan
    Planned { files: u64, bytes: u64 },
    Transfer(TransferEvent),
    Conflicts(u64),
    Deletions { deleted: u64, failed: u64 },
}

pub type StateCallback = Box<dyn Fn(&SyncState) + Send + Sync>;

#[derive(Default)]
struct Inner {
    state: SyncState,
    session: Option<SyncSessionLog>,
    counts: SessionCounts,
    active: bool,
    /// Time and completed bytes at the last throughput sample
    sample: Option<(Instant, u64)>,
    callbacks: Vec<StateCallback>,
    senders: Vec<mpsc::UnboundedSender<SyncState>>,
}

impl Inner {
    fn broadcast(&mut self) {
        for callback in &self.callbacks {
            callback(&self.state);
        }
        let state = &self.state;
        self.senders.retain(|tx| tx.send(state.clone()).is_ok());
    }

    fn apply(&mut self, update: ProgressUpdate) {
        match update {
            ProgressUpdate::Phase(phase) => {
                self.state.phase = Some(phase);
                self.state.current_folder = Some(phase.label().to_string());
            }
            ProgressUpdate::Planned { files, bytes } => {
                self.state.total_files += files;
                self.state.total_bytes += bytes;
                self.refresh_eta();
            }
            ProgressUpdate::Transfer(event) => self.apply_transfer(event),
            ProgressUpdate::Conflicts(n) => {
                self.state.conflicts += n;
                self.counts.conflicts += n;
            }
            ProgressUpdate::Deletions { deleted, failed } => {
                self.counts.deleted += deleted;
                self.counts.failed += failed;
                self.state.failures += failed;
            }
        }
    }

    fn apply_transfer(&mut self, event: TransferEvent) {
        match event {
            TransferEvent::Started { direction } => *self.in_flight(direction) += 1,
            TransferEvent::Progress { bytes, .. } => {
                self.state.completed_bytes += bytes;
                self.sample_throughput();
            }
            TransferEvent::Finished {
                direction,
                success,
                bytes,
            } => {
                let slot = self.in_flight(direction);
                *slot = slot.saturating_sub(1);
                if success {
                    self.state.completed_files += 1;
                    self.counts.bytes_transferred += bytes;
                    match direction {
                        SyncDirection::Upload => self.counts.uploaded += 1,
                        SyncDirection::Download => self.counts.downloaded += 1,
                    }
                } else {
                    self.state.failures += 1;
                    self.counts.failed += 1;
                }
            }
            TransferEvent::Aborted { direction } => {
                let slot = self.in_flight(direction);
                *slot = slot.saturating_sub(1);
            }
            TransferEvent::Parked {
                direction,
                recorded,
            } => {
                let slot = self.in_flight(direction);
                *slot = slot.saturating_sub(1);
                if recorded {
                    self.state.conflicts += 1;
                    self.counts.conflicts += 1;
                }
            }
        }
    }

    fn in_flight(&mut self, direction: SyncDirection) -> &mut u32 {
        match direction {
            SyncDirection::Upload => &mut self.state.uploads_in_flight,
            SyncDirection::Download => &mut self.state.downloads_in_flight,
        }
    }

    fn sample_throughput(&mut self) {
        let now = Instant::now();
        let completed = self.state.completed_bytes;
        let (since, before) = self.sample.unwrap_or((now, 0));
        let elapsed = now.duration_since(since);
        // Several updates within the same instant fold into the next sample.
        if elapsed.is_zero() {
            return;
        }
        self.state.throughput = throughput(completed.saturating_sub(before), elapsed);
        self.sample = Some((now, completed));
        self.refresh_eta();
    }

    fn refresh_eta(&mut self) {
        self.state.eta = estimate_remaining(self.state.remaining_bytes(), self.state.throughput);
    }

    /// End the run; returns the open session row, if any
    fn finish(&mut self, status: SyncRunStatus, error: Option<String>) -> Option<SyncSessionLog> {
        self.active = false;
        self.state.status = status;
        self.state.phase = None;
        self.state.current_folder = None;
        self.state.uploads_in_flight = 0;
        self.state.downloads_in_flight = 0;
        self.state.throughput = 0.0;
        self.state.eta = None;
        if error.is_some() {
            self.state.last_error = error;
        }
        self.broadcast();
        self.session.take()
    }
}

/// Owns the session lifecycle and broadcasts progress
pub struct SyncStateCoordinator {
    store: Arc<dyn IStateRepository>,
    inner: Mutex<Inner>,
}

impl SyncStateCoordinator {
    pub fn new(store: Arc<dyn IStateRepository>) -> Self {
        Self {
            store,
            inner: Mutex::new(Inner::default()),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        // A panicking subscriber must not wedge the coordinator.
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Receive every snapshot from now on
    pub fn subscribe(&self) -> mpsc::UnboundedReceiver<SyncState> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.lock().senders.push(tx);
        rx
    }

    /// Call `callback` with every snapshot from now on
    ///
    /// Callbacks run while the coordinator's lock is held. They must not
    /// call back into the coordinator (`snapshot`, `counts`, ...), which
    /// would deadlock; use the snapshot they are given, or [`subscribe`]
    /// for anything that needs more.
    ///
    /// [`subscribe`]: Self::subscribe
    pub fn on_change(&self, callback: impl Fn(&SyncState) + Send + Sync + 'static) {
        self.lock().callbacks.push(Box::new(callback));
    }

    pub fn snapshot(&self) -> SyncState {
        self.lock().state.clone()
    }

    /// Counts accumulated by the current (or last) run
    pub fn counts(&self) -> SessionCounts {
        self.lock().counts
    }

    pub fn is_active(&self) -> bool {
        self.lock().active
    }

    /// Start a run for `account`
    ///
    /// A session log row is only written when the account has detailed
    /// logging enabled; its id is returned.
    pub async fn initialize_session(
        &self,
        account: &AccountContext,
    ) -> Result<Option<SessionId>, SyncError> {
        let session = if account.settings().detailed_logging {
            let session = SyncSessionLog::start(*account.id());
            self.store
                .save_session(&session)
                .await
                .map_err(SyncError::storage)?;
            Some(session)
        } else {
            None
        };
        let session_id = session.as_ref().map(|s| *s.id());

        let mut inner = self.lock();
        inner.state = SyncState {
            session_id,
            status: SyncRunStatus::Running,
            ..SyncState::idle(*account.id())
        };
        inner.session = session;
        inner.counts = SessionCounts::default();
        inner.active = true;
        inner.sample = Some((Instant::now(), 0));
        inner.broadcast();

        debug!(account_id = %account.id(), session_id = ?session_id, "Sync session started");
        Ok(session_id)
    }

    /// Apply an update and broadcast the new snapshot; ignored when no run is active
    pub fn update_progress(&self, update: ProgressUpdate) {
        let mut inner = self.lock();
        if !inner.active {
            return;
        }
        inner.apply(update);
        inner.broadcast();
    }

    /// Report a run turned away before it started
    ///
    /// The snapshot goes straight to `Failed` with `reason` as its last
    /// error. Nothing is written to the store. Ignored while a run is active.
    pub fn record_rejected(&self, account_id: AccountId, reason: &str) {
        let mut inner = self.lock();
        if inner.active {
            return;
        }
        inner.state = SyncState {
            status: SyncRunStatus::Failed,
            last_error: Some(reason.to_string()),
            ..SyncState::idle(account_id)
        };
        inner.counts = SessionCounts::default();
        inner.broadcast();
        warn!(account_id = %account_id, reason, "Sync run rejected");
    }

    /// Report an idle outcome without starting a run
    pub fn record_idle(&self, account: &AccountContext) {
        let mut inner = self.lock();
        if inner.active {
            return;
        }
        inner.state = SyncState::idle(*account.id());
        inner.counts = SessionCounts::default();
        inner.broadcast();
    }

    pub async fn record_completion(&self) -> Result<(), SyncError> {
        let (session, counts) = {
            let mut inner = self.lock();
            if !inner.active {
                return Ok(());
            }
            (inner.finish(SyncRunStatus::Completed, None), inner.counts)
        };
        info!(
            uploaded = counts.uploaded,
            downloaded = counts.downloaded,
            deleted = counts.deleted,
            conflicts = counts.conflicts,
            failed = counts.failed,
            "Sync session completed"
        );
        match session {
            Some(mut session) => {
                if let Err(e) = session.complete(counts) {
                    warn!(error = %e, "Session already finalized");
                }
                self.persist(&session).await
            }
            None => Ok(()),
        }
    }

    pub async fn record_failure(&self, reason: &str) -> Result<(), SyncError> {
        let (session, counts) = {
            let mut inner = self.lock();
            if !inner.active {
                return Ok(());
            }
            (
                inner.finish(SyncRunStatus::Failed, Some(reason.to_string())),
                inner.counts,
            )
        };
        match session {
            Some(mut session) => {
                if let Err(e) = session.fail(reason, counts) {
                    warn!(error = %e, "Session already finalized");
                }
                self.persist(&session).await
            }
            None => Ok(()),
        }
    }

    pub async fn record_cancellation(&self) -> Result<(), SyncError> {
        let (session, counts) = {
            let mut inner = self.lock();
            if !inner.active {
                return Ok(());
            }
            (inner.finish(SyncRunStatus::Paused, None), inner.counts)
        };
        info!("Sync session paused");
        match session {
            Some(mut session) => {
                if let Err(e) = session.pause(counts) {
                    warn!(error = %e, "Session already finalized");
                }
                self.persist(&session).await
            }
            None => Ok(()),
        }
    }

    async fn persist(&self, session: &SyncSessionLog) -> Result<(), SyncError> {
        self.store
            .save_session(session)
            .await
            .map_err(SyncError::storage)
    }
}
