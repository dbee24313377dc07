//! Deletion reconciliation
//!
//! A row whose remote copy disappeared keeps its status but loses its
//! remote id. [`DeletionSyncService`] acts on those rows, and on synced
//! rows whose local file disappeared:
//!
//! - **remote → local**: an unchanged synced file is deleted locally and its
//!   row dropped; a file with local edits is queued for upload instead
//! - **local → remote**: the remote copy of a synced file is deleted and its
//!   row dropped, after re-checking that the file is really gone
//! - **cleanup**: rows gone on both sides are purged in one batch
//!
//! Folders are never deleted remotely. A folder removed remotely is only
//! removed locally when it is empty.

use std::sync::Arc;

use chrono::Utc;
use mirrordrive_audit::{OperationLogger, ReasonCode};
use mirrordrive_core::{
    domain::{newtypes::UniqueId, AccountContext, DriveItem, FileOperation, LocalMetadata, SyncStatus},
    ports::{ILocalFileSystem, IRemoteDrive, IStateRepository, RemoteError},
};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use crate::error::SyncError;

/// Counts for one deletion pass
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DeletionSummary {
    /// Files deleted on the other side (or rows purged)
    pub deleted: u64,
    /// Rows kept and queued for upload because of local edits
    pub requeued: u64,
    pub failed: u64,
}

impl DeletionSummary {
    pub fn merge(&mut self, other: &DeletionSummary) {
        self.deleted += other.deleted;
        self.requeued += other.requeued;
        self.failed += other.failed;
    }
}

/// Reconciles items removed on one side
pub struct DeletionSyncService {
    remote: Arc<dyn IRemoteDrive>,
    local: Arc<dyn ILocalFileSystem>,
    store: Arc<dyn IStateRepository>,
}

impl DeletionSyncService {
    pub fn new(
        remote: Arc<dyn IRemoteDrive>,
        local: Arc<dyn ILocalFileSystem>,
        store: Arc<dyn IStateRepository>,
    ) -> Self {
        Self {
            remote,
            local,
            store,
        }
    }

    /// Apply remote deletions to the local tree
    ///
    /// `rows` are rows whose remote copy is gone and whose local path still
    /// exists.
    #[instrument(skip_all, fields(account_id = %account.id(), items = rows.len()))]
    pub async fn process_remote_to_local_deletions(
        &self,
        account: &AccountContext,
        logger: &OperationLogger,
        rows: Vec<DriveItem>,
        cancel: &CancellationToken,
    ) -> Result<DeletionSummary, SyncError> {
        let mut summary = DeletionSummary::default();

        for mut row in rows {
            if cancel.is_cancelled() {
                return Err(SyncError::Cancelled);
            }
            let local_path = account.local_root().join_remote(row.path())?;

            if row.is_folder() {
                match self.local.remove_empty_dir(&local_path).await {
                    Ok(removed) => {
                        debug!(path = %row.path(), removed, "Remote folder deleted");
                        if removed {
                            summary.deleted += 1;
                        }
                    }
                    Err(e) => warn!(path = %row.path(), error = %e, "Failed to remove local folder"),
                }
                self.drop_row(&row).await?;
                continue;
            }

            let state = match self.local.get_state(&local_path).await {
                Ok(state) => state,
                Err(e) => {
                    warn!(path = %row.path(), error = %e, "Failed to inspect local file");
                    summary.failed += 1;
                    continue;
                }
            };
            if !state.is_regular_file() {
                self.drop_row(&row).await?;
                continue;
            }

            let current = LocalMetadata {
                size: state.size,
                modified: state.modified.unwrap_or_else(Utc::now),
                hash: None,
            };
            let locally_edited = match row.status() {
                SyncStatus::Synced => row.local_content_changed(&current),
                SyncStatus::SyncOnly => {
                    // Outside the selection: the local file was never ours to delete.
                    self.drop_row(&row).await?;
                    continue;
                }
                _ => true,
            };

            if locally_edited {
                row.clear_remote_identity();
                row.apply_local(&current);
                if !matches!(row.status(), SyncStatus::PendingUpload) {
                    row.mark_pending_upload()?;
                }
                self.store
                    .save_item(&row)
                    .await
                    .map_err(SyncError::storage)?;
                info!(path = %row.path(), "Remote copy deleted, local edits kept for upload");
                summary.requeued += 1;
                continue;
            }

            match self.local.delete_file(&local_path).await {
                Ok(()) => {
                    self.drop_row(&row).await?;
                    logger
                        .log_deletion(row.path(), FileOperation::DeleteLocal, ReasonCode::RemoteDeleted)
                        .await;
                    debug!(path = %row.path(), "Local file deleted");
                    summary.deleted += 1;
                }
                Err(e) => {
                    warn!(path = %row.path(), error = %e, "Failed to delete local file");
                    logger
                        .log_deletion_failed(
                            row.path(),
                            FileOperation::DeleteLocal,
                            ReasonCode::LocalIoError,
                            &e.to_string(),
                        )
                        .await;
                    summary.failed += 1;
                }
            }
        }

        info!(
            deleted = summary.deleted,
            requeued = summary.requeued,
            failed = summary.failed,
            "Remote deletions applied locally"
        );
        Ok(summary)
    }

    /// Apply local deletions to the remote drive
    ///
    /// `rows` are synced rows whose local file was missing from the scan.
    /// Rows without a remote identity and folders are skipped.
    #[instrument(skip_all, fields(account_id = %account.id(), items = rows.len()))]
    pub async fn process_local_to_remote_deletions(
        &self,
        account: &AccountContext,
        logger: &OperationLogger,
        rows: Vec<DriveItem>,
        cancel: &CancellationToken,
    ) -> Result<DeletionSummary, SyncError> {
        let mut summary = DeletionSummary::default();

        for row in rows {
            if cancel.is_cancelled() {
                return Err(SyncError::Cancelled);
            }
            let Some(remote_id) = row.remote_id() else {
                debug!(path = %row.path(), "Local-only row, nothing to delete remotely");
                continue;
            };
            if row.is_folder() {
                continue;
            }

            let local_path = account.local_root().join_remote(row.path())?;
            match self.local.get_state(&local_path).await {
                Ok(state) if state.exists => {
                    debug!(path = %row.path(), "File reappeared, remote copy kept");
                    continue;
                }
                Ok(_) => {}
                Err(e) => {
                    warn!(path = %row.path(), error = %e, "Failed to inspect local file");
                    summary.failed += 1;
                    continue;
                }
            }

            let result = tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(SyncError::Cancelled),
                r = self.remote.delete(remote_id) => r,
            };
            match result {
                Ok(()) | Err(RemoteError::NotFound(_)) => {
                    self.drop_row(&row).await?;
                    logger
                        .log_deletion(row.path(), FileOperation::DeleteRemote, ReasonCode::LocalDeleted)
                        .await;
                    debug!(path = %row.path(), "Remote copy deleted");
                    summary.deleted += 1;
                }
                Err(e) => {
                    warn!(path = %row.path(), error = %e, "Failed to delete remote copy");
                    logger
                        .log_deletion_failed(
                            row.path(),
                            FileOperation::DeleteRemote,
                            ReasonCode::from(&e),
                            &e.to_string(),
                        )
                        .await;
                    summary.failed += 1;
                }
            }
        }

        info!(
            deleted = summary.deleted,
            failed = summary.failed,
            "Local deletions applied remotely"
        );
        Ok(summary)
    }

    /// Purge rows gone on both sides in one atomic batch
    #[instrument(skip_all, fields(items = rows.len()))]
    pub async fn cleanup_database_records(
        &self,
        logger: &OperationLogger,
        rows: Vec<DriveItem>,
    ) -> Result<DeletionSummary, SyncError> {
        if rows.is_empty() {
            return Ok(DeletionSummary::default());
        }

        let ids: Vec<UniqueId> = rows.iter().map(|r| *r.id()).collect();
        self.store
            .delete_batch(&ids)
            .await
            .map_err(SyncError::storage)?;
        for row in &rows {
            logger
                .log_deletion(row.path(), FileOperation::Purge, ReasonCode::GoneOnBothSides)
                .await;
        }

        info!(purged = rows.len(), "Stale rows purged");
        Ok(DeletionSummary {
            deleted: rows.len() as u64,
            ..DeletionSummary::default()
        })
    }

    async fn drop_row(&self, row: &DriveItem) -> Result<(), SyncError> {
        self.store
            .delete_item(row.id())
            .await
            .map_err(SyncError::storage)
    }
}
