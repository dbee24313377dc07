//! Sync pipeline
//!
//! [`SyncOrchestrator`] drives one sync run for one account through
//! fixed phases:
//!
//! 1. **ValidateAccount**: the account exists, can sync and has a local root
//! 2. **FetchDelta**: remote changes are classified and committed page by page
//! 3. **DetectConflicts**: the local tree is scanned and work lists are built
//! 4. **TransferUploads** / **TransferDownloads**: bounded transfer pools
//! 5. **ReconcileDeletions**: deletions on either side are mirrored
//! 6. **Finalize**: the account's sync bookkeeping is saved
//!
//! The cancellation token is checked before each phase. A cancelled run
//! ends `Paused`; any other error ends it `Failed`. Phases are never retried
//! within a run; the next scheduled run picks up whatever is still pending.

use std::{
    cmp::Reverse,
    collections::{HashMap, HashSet},
    sync::Arc,
};

use chrono::Utc;
use mirrordrive_audit::OperationLogger;
use mirrordrive_conflict::{ConflictDetectionService, Detection};
use mirrordrive_core::{
    config::{Config, DEFAULT_FIRST_SYNC_TOLERANCE_SECS},
    domain::{
        newtypes::{AccountId, DeltaToken, RemoteId, RemotePath, SessionId},
        AccountContext, DriveItem, SessionCounts, SyncDirection, SyncPhase, SyncRunStatus,
        SyncState, SyncStatus,
    },
    ports::{ILocalFileSystem, IRemoteDrive, IStateRepository},
};
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};

use crate::{
    classifier::RemoteChangeClassifier,
    deletion::{DeletionSummary, DeletionSyncService},
    delta::DeltaProcessingService,
    error::SyncError,
    scanner::{observe_download_target, FileRecord, LocalFileScanner},
    state::{ProgressUpdate, SyncStateCoordinator},
    transfer::{FileTransferService, TransferCallback, UploadWork},
};

/// Engine options shared by every account
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncOptions {
    /// Glob patterns kept out of sync
    pub exclude: Vec<String>,
    pub first_sync_tolerance_secs: u64,
}

impl Default for SyncOptions {
    fn default() -> Self {
        Self {
            exclude: Vec::new(),
            first_sync_tolerance_secs: DEFAULT_FIRST_SYNC_TOLERANCE_SECS,
        }
    }
}

impl SyncOptions {
    pub fn from_config(config: &Config) -> Self {
        Self {
            exclude: config.sync.exclude.clone(),
            first_sync_tolerance_secs: config.conflicts.first_sync_tolerance_secs,
        }
    }
}

/// Outcome of one [`SyncOrchestrator::sync`] call
#[derive(Debug, Clone)]
pub struct SyncReport {
    pub status: SyncRunStatus,
    pub session_id: Option<SessionId>,
    pub counts: SessionCounts,
    /// Final progress snapshot
    pub state: SyncState,
}

/// Work derived from the store and the local scan
#[derive(Debug, Default)]
struct SyncPlan {
    uploads: Vec<UploadWork>,
    downloads: Vec<DriveItem>,
    /// Remote copy gone, local copy present
    remote_deleted: Vec<DriveItem>,
    /// Local copy gone, remote copy present
    local_deleted: Vec<DriveItem>,
    /// Gone on both sides
    stale: Vec<DriveItem>,
    /// Conflicts recorded for downloads that would overwrite local edits
    conflicts: u64,
}

impl SyncPlan {
    fn planned_bytes(&self) -> u64 {
        let up: u64 = self.uploads.iter().map(|w| w.record.size).sum();
        let down: u64 = self.downloads.iter().map(DriveItem::size).sum();
        up + down
    }

    fn planned_files(&self) -> u64 {
        (self.uploads.len() + self.downloads.len()) as u64
    }
}

/// Runs the sync pipeline for one account at a time
pub struct SyncOrchestrator {
    store: Arc<dyn IStateRepository>,
    local: Arc<dyn ILocalFileSystem>,
    conflicts: Arc<ConflictDetectionService>,
    delta: DeltaProcessingService,
    scanner: LocalFileScanner,
    transfers: FileTransferService,
    deletions: DeletionSyncService,
    state: Arc<SyncStateCoordinator>,
    run_lock: Mutex<()>,
}

impl SyncOrchestrator {
    pub fn new(
        remote: Arc<dyn IRemoteDrive>,
        local: Arc<dyn ILocalFileSystem>,
        store: Arc<dyn IStateRepository>,
        options: SyncOptions,
    ) -> Self {
        let conflicts = Arc::new(ConflictDetectionService::new(
            Arc::clone(&store),
            options.first_sync_tolerance_secs,
        ));
        Self {
            delta: DeltaProcessingService::new(Arc::clone(&remote), Arc::clone(&store)),
            scanner: LocalFileScanner::new(Arc::clone(&local), &options.exclude),
            transfers: FileTransferService::new(
                Arc::clone(&remote),
                Arc::clone(&local),
                Arc::clone(&store),
                Arc::clone(&conflicts),
            ),
            deletions: DeletionSyncService::new(remote, Arc::clone(&local), Arc::clone(&store)),
            state: Arc::new(SyncStateCoordinator::new(Arc::clone(&store))),
            run_lock: Mutex::new(()),
            conflicts,
            store,
            local,
        }
    }

    /// Progress broadcaster for this orchestrator's runs
    pub fn state(&self) -> &Arc<SyncStateCoordinator> {
        &self.state
    }

    /// Run one sync for `account_id`
    ///
    /// Concurrent calls are serialized.
    ///
    /// # Errors
    /// - `AccountNotFound` / `AccountUnavailable` before any run starts; the
    ///   progress snapshot reports `Failed`, but no session is written
    /// - the phase error once the run has been finalized as `Failed`
    #[instrument(skip(self, cancel), fields(account_id = %account_id))]
    pub async fn sync(
        &self,
        account_id: &AccountId,
        cancel: &CancellationToken,
    ) -> Result<SyncReport, SyncError> {
        let _running = self.run_lock.lock().await;

        let stored = self
            .store
            .get_account(account_id)
            .await
            .map_err(SyncError::storage)?;
        let Some(mut account) = stored else {
            return Err(self.reject(SyncError::AccountNotFound(*account_id)));
        };

        if !account.auth_state().can_sync() {
            return Err(self.reject(SyncError::AccountUnavailable(
                *account_id,
                format!("auth state is {}", account.auth_state().as_str()),
            )));
        }

        if !account.has_selection() {
            info!("No folders selected, nothing to sync");
            self.state.record_idle(&account);
            return Ok(self.report(None));
        }

        info!(local_root = %account.local_root(), "Starting sync run");
        let session_id = self.state.initialize_session(&account).await?;
        let logger = OperationLogger::new(Arc::clone(&self.store), *account_id).with_session(session_id);

        match self.run_pipeline(&account, &logger, cancel).await {
            Ok(new_token) => {
                account.record_sync(new_token, Utc::now());
                if let Err(e) = self.store.save_account(&account).await {
                    let err = SyncError::storage(e);
                    self.finish_failed(&err).await;
                    return Err(err);
                }
                self.state.record_completion().await?;
                Ok(self.report(session_id))
            }
            Err(SyncError::Cancelled) => {
                self.state.record_cancellation().await?;
                Ok(self.report(session_id))
            }
            Err(err) => {
                if matches!(err, SyncError::DeltaTokenExpired) {
                    self.reset_delta_token(&mut account).await;
                }
                self.finish_failed(&err).await;
                Err(err)
            }
        }
    }

    /// Fail a run that never started; only the progress snapshot changes
    fn reject(&self, err: SyncError) -> SyncError {
        if let SyncError::AccountNotFound(id) | SyncError::AccountUnavailable(id, _) = &err {
            self.state.record_rejected(*id, &err.to_string());
        }
        err
    }

    async fn finish_failed(&self, err: &SyncError) {
        error!(error = %err, "Sync run failed");
        if let Err(e) = self.state.record_failure(&err.to_string()).await {
            warn!(error = %e, "Failed to record failed session");
        }
    }

    /// Forget the expired token so the next run performs a full listing
    async fn reset_delta_token(&self, account: &mut AccountContext) {
        warn!("Delta token expired, next run performs a full listing");
        account.clear_delta_token();
        if let Err(e) = self.store.clear_delta_token(account.id()).await {
            warn!(error = %e, "Failed to clear expired delta token");
        }
    }

    fn report(&self, session_id: Option<SessionId>) -> SyncReport {
        let state = self.state.snapshot();
        SyncReport {
            status: state.status,
            session_id,
            counts: self.state.counts(),
            state,
        }
    }

    fn enter(&self, phase: SyncPhase, cancel: &CancellationToken) -> Result<(), SyncError> {
        if cancel.is_cancelled() {
            debug!(phase = phase.label(), "Cancelled before phase");
            return Err(SyncError::Cancelled);
        }
        self.state.update_progress(ProgressUpdate::Phase(phase));
        Ok(())
    }

    fn transfer_events(&self) -> TransferCallback {
        let state = Arc::clone(&self.state);
        Arc::new(move |event| state.update_progress(ProgressUpdate::Transfer(event)))
    }

    /// Returns the token to record on the account
    async fn run_pipeline(
        &self,
        account: &AccountContext,
        logger: &OperationLogger,
        cancel: &CancellationToken,
    ) -> Result<Option<DeltaToken>, SyncError> {
        self.enter(SyncPhase::ValidateAccount, cancel)?;
        self.validate_local_root(account).await?;

        self.enter(SyncPhase::FetchDelta, cancel)?;
        let token = self.delta.get_continuation_token(account.id()).await?;
        let classifier = RemoteChangeClassifier::new(
            Arc::clone(&self.conflicts),
            logger.clone(),
            Arc::clone(&self.local),
            Arc::clone(&self.store),
        );
        let delta = self
            .delta
            .process_pages(
                account,
                token,
                &classifier,
                |pages, items| debug!(pages, items, "Remote changes applied so far"),
                cancel,
            )
            .await?;
        if let Some(seen) = &delta.seen_remote_ids {
            self.forget_unlisted(account, seen).await?;
        }
        self.state
            .update_progress(ProgressUpdate::Conflicts(delta.conflicts));

        self.enter(SyncPhase::DetectConflicts, cancel)?;
        let plan = self.plan(account, logger).await?;
        info!(
            uploads = plan.uploads.len(),
            downloads = plan.downloads.len(),
            conflicts = plan.conflicts,
            remote_deleted = plan.remote_deleted.len(),
            local_deleted = plan.local_deleted.len(),
            stale = plan.stale.len(),
            "Sync plan ready"
        );
        self.state.update_progress(ProgressUpdate::Planned {
            files: plan.planned_files(),
            bytes: plan.planned_bytes(),
        });
        if plan.conflicts > 0 {
            self.state
                .update_progress(ProgressUpdate::Conflicts(plan.conflicts));
        }
        let SyncPlan {
            uploads,
            downloads,
            remote_deleted,
            local_deleted,
            stale,
            ..
        } = plan;

        let events = self.transfer_events();
        let settings = account.settings();

        self.enter(SyncPhase::TransferUploads, cancel)?;
        self.transfers
            .execute_uploads(
                account,
                logger,
                uploads,
                settings.max_parallel_uploads,
                Arc::clone(&events),
                cancel,
            )
            .await?;

        self.enter(SyncPhase::TransferDownloads, cancel)?;
        self.transfers
            .execute_downloads(
                account,
                logger,
                downloads,
                settings.max_parallel_downloads,
                events,
                cancel,
            )
            .await?;

        self.enter(SyncPhase::ReconcileDeletions, cancel)?;
        let mut deletions = DeletionSummary::default();
        deletions.merge(
            &self
                .deletions
                .process_remote_to_local_deletions(account, logger, remote_deleted, cancel)
                .await?,
        );
        deletions.merge(
            &self
                .deletions
                .process_local_to_remote_deletions(account, logger, local_deleted, cancel)
                .await?,
        );
        deletions.merge(&self.deletions.cleanup_database_records(logger, stale).await?);
        self.state.update_progress(ProgressUpdate::Deletions {
            deleted: deletions.deleted,
            failed: deletions.failed,
        });

        self.enter(SyncPhase::Finalize, cancel)?;
        Ok(delta.new_token)
    }

    /// The local root must be an existing directory
    ///
    /// A missing root would look like every file was deleted locally.
    async fn validate_local_root(&self, account: &AccountContext) -> Result<(), SyncError> {
        let root = self
            .local
            .get_state(account.local_root())
            .await
            .map_err(SyncError::io)?;
        if !root.is_directory() {
            return Err(SyncError::AccountUnavailable(
                *account.id(),
                format!("local root {} is not a directory", account.local_root()),
            ));
        }
        Ok(())
    }

    /// After a full listing, rows the remote no longer lists lose their remote identity
    async fn forget_unlisted(
        &self,
        account: &AccountContext,
        seen: &HashSet<RemoteId>,
    ) -> Result<(), SyncError> {
        let gone: Vec<DriveItem> = self
            .store
            .list_items(account.id())
            .await
            .map_err(SyncError::storage)?
            .into_iter()
            .filter(|row| row.remote_id().is_some_and(|id| !seen.contains(id)))
            .map(|mut row| {
                row.clear_remote_identity();
                row
            })
            .collect();
        if gone.is_empty() {
            return Ok(());
        }
        debug!(rows = gone.len(), "Rows missing from the full listing");
        self.store
            .save_batch(&gone)
            .await
            .map_err(SyncError::storage)
    }

    fn in_scope(&self, account: &AccountContext, path: &RemotePath) -> bool {
        account.settings().is_selected(path) && !self.scanner.is_excluded_tree(path)
    }

    /// Build the work lists
    ///
    /// Paths with an unresolved conflict are left alone until the conflict
    /// is resolved. Every path lands in at most one list. A row owing a
    /// download whose local file changed since it was classified is turned
    /// into a conflict rather than queued.
    async fn plan(
        &self,
        account: &AccountContext,
        logger: &OperationLogger,
    ) -> Result<SyncPlan, SyncError> {
        let rows: HashMap<RemotePath, DriveItem> = self
            .store
            .list_items(account.id())
            .await
            .map_err(SyncError::storage)?
            .into_iter()
            .map(|row| (row.path().clone(), row))
            .collect();
        let conflicted: HashSet<RemotePath> = self
            .store
            .get_unresolved_conflicts(account.id())
            .await
            .map_err(SyncError::storage)?
            .into_iter()
            .map(|c| c.path().clone())
            .collect();

        let records: HashMap<RemotePath, FileRecord> = self
            .scanner
            .scan(account.local_root(), &rows)
            .await?
            .into_iter()
            .filter(|r| account.settings().is_selected(&r.path))
            .map(|r| (r.path.clone(), r))
            .collect();

        let mut plan = SyncPlan::default();
        let mut owed_downloads = Vec::new();

        for record in records.values() {
            if record.is_dir || conflicted.contains(&record.path) {
                continue;
            }
            let existing = rows.get(&record.path);
            let owed = match existing {
                None => true,
                Some(row) if row.is_folder() => false,
                Some(row) if row.has_local_edits() => true,
                Some(row) => {
                    row.status().is_synced()
                        && row.remote_id().is_some()
                        && row.local_content_changed(&record.metadata())
                }
            };
            if owed {
                plan.uploads.push(UploadWork {
                    record: record.clone(),
                    existing: existing.cloned(),
                });
            }
        }

        for row in rows.into_values() {
            let path = row.path();
            if conflicted.contains(path) {
                continue;
            }
            let local_present = records.contains_key(path);

            if row.remote_id().is_none() {
                if matches!(row.status(), SyncStatus::SyncOnly) {
                    plan.stale.push(row);
                } else if !self.in_scope(account, path) {
                    continue;
                } else if local_present {
                    if !row.has_local_edits() {
                        plan.remote_deleted.push(row);
                    }
                } else {
                    plan.stale.push(row);
                }
                continue;
            }

            if !self.in_scope(account, path) {
                continue;
            }
            match row.status().owed_direction() {
                Some(SyncDirection::Download) => {
                    if !row.is_folder() {
                        owed_downloads.push(row);
                    }
                }
                _ if matches!(row.status(), SyncStatus::SyncOnly) => {}
                _ => {
                    if !local_present && !row.is_folder() {
                        plan.local_deleted.push(row);
                    }
                }
            }
        }

        let mut parked = Vec::new();
        for row in owed_downloads {
            let local_path = account.local_root().join_remote(row.path())?;
            let on_disk = match observe_download_target(self.local.as_ref(), &row, &local_path).await {
                Ok(on_disk) => on_disk,
                Err(e) => {
                    warn!(path = %row.path(), error = %e, "Cannot inspect download target, retrying next run");
                    continue;
                }
            };
            match self
                .conflicts
                .recheck_download(logger, row, on_disk.as_ref())
                .await?
            {
                Detection::DownloadCandidate(row) => plan.downloads.push(row),
                held => {
                    plan.conflicts += u64::from(held.is_conflict());
                    parked.push(held.into_item());
                }
            }
        }
        if !parked.is_empty() {
            self.store
                .save_batch(&parked)
                .await
                .map_err(SyncError::storage)?;
        }

        // Files before folders, deepest folders first, so emptied folders can be removed.
        plan.remote_deleted
            .sort_by_key(|row| (row.is_folder(), Reverse(row.path().as_str().len())));
        plan.uploads.sort_by(|a, b| a.record.path.cmp(&b.record.path));
        plan.downloads.sort_by(|a, b| a.path().cmp(b.path()));
        Ok(plan)
    }
}
