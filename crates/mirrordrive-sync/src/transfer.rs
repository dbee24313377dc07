//! Bounded-parallel uploads and downloads
//!
//! [`FileTransferService`] runs one direction at a time. Each item becomes a
//! spawned task that first takes a permit from a semaphore sized to the
//! account's limit, so at most `max_parallel` transfers of that direction
//! are in flight.
//!
//! Per item: the row is persisted as pending, the content moves with a
//! progress callback, and the row ends `Synced` or `Failed { retry, reason }`
//! with an audit entry either way. A failed item never stops the batch.
//! Right before a download is written, the file on disk is compared with
//! what the row last recorded; a local edit made in the meantime turns the
//! download into a conflict and the file is left alone.
//!
//! Cancellation is checked before each item starts. Transfers already
//! running race the token; those that lose keep their pending row. The
//! batch then reports [`SyncError::Cancelled`].

use std::{
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc,
    },
    time::Instant,
};

use chrono::Utc;
use mirrordrive_audit::{OperationLogger, ReasonCode};
use mirrordrive_conflict::{ConflictDetectionService, Detection};
use mirrordrive_core::{
    domain::{
        newtypes::SyncPath, AccountContext, DriveItem, LocalMetadata, SyncDirection, SyncStatus,
    },
    ports::{ILocalFileSystem, IRemoteDrive, IStateRepository, ProgressSink, RemoteError},
};
use tokio::{sync::Semaphore, task::JoinSet};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};

use crate::{
    error::SyncError,
    scanner::{observe_download_target, FileRecord},
};

/// Progress notifications emitted by transfer workers
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransferEvent {
    Started { direction: SyncDirection },
    /// Bytes moved since the previous notification for the same item
    Progress { direction: SyncDirection, bytes: u64 },
    Finished {
        direction: SyncDirection,
        success: bool,
        bytes: u64,
    },
    /// Stopped by cancellation; the row is still pending
    Aborted { direction: SyncDirection },
    /// Held back by a local edit; the row stays parked. `recorded` is set
    /// when this added a new conflict.
    Parked {
        direction: SyncDirection,
        recorded: bool,
    },
}

pub type TransferCallback = Arc<dyn Fn(TransferEvent) + Send + Sync>;

/// Result of one transfer batch
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TransferSummary {
    pub completed: u64,
    pub bytes: u64,
    pub failed: u64,
    /// Conflicts recorded instead of overwriting local edits
    pub conflicts: u64,
}

/// A local file owed an upload, with its stored row if there is one
#[derive(Debug, Clone)]
pub struct UploadWork {
    pub record: FileRecord,
    pub existing: Option<DriveItem>,
}

enum ItemOutcome {
    Completed { bytes: u64 },
    Failed,
    Cancelled,
    Parked { recorded: bool },
}

/// Everything a spawned worker needs, cheap to clone
#[derive(Clone)]
struct Worker {
    remote: Arc<dyn IRemoteDrive>,
    local: Arc<dyn ILocalFileSystem>,
    store: Arc<dyn IStateRepository>,
    conflicts: Arc<ConflictDetectionService>,
    logger: OperationLogger,
    local_root: SyncPath,
    events: TransferCallback,
    cancel: CancellationToken,
}

/// Executes upload and download work lists
pub struct FileTransferService {
    remote: Arc<dyn IRemoteDrive>,
    local: Arc<dyn ILocalFileSystem>,
    store: Arc<dyn IStateRepository>,
    conflicts: Arc<ConflictDetectionService>,
}

impl FileTransferService {
    pub fn new(
        remote: Arc<dyn IRemoteDrive>,
        local: Arc<dyn ILocalFileSystem>,
        store: Arc<dyn IStateRepository>,
        conflicts: Arc<ConflictDetectionService>,
    ) -> Self {
        Self {
            remote,
            local,
            store,
            conflicts,
        }
    }

    fn worker(
        &self,
        account: &AccountContext,
        logger: &OperationLogger,
        events: TransferCallback,
        cancel: &CancellationToken,
    ) -> Worker {
        Worker {
            remote: Arc::clone(&self.remote),
            local: Arc::clone(&self.local),
            store: Arc::clone(&self.store),
            conflicts: Arc::clone(&self.conflicts),
            logger: logger.clone(),
            local_root: account.local_root().clone(),
            events,
            cancel: cancel.clone(),
        }
    }

    /// Upload local files with at most `max_parallel` in flight
    #[instrument(skip_all, fields(account_id = %account.id(), items = work.len(), max_parallel = max_parallel))]
    pub async fn execute_uploads(
        &self,
        account: &AccountContext,
        logger: &OperationLogger,
        work: Vec<UploadWork>,
        max_parallel: usize,
        events: TransferCallback,
        cancel: &CancellationToken,
    ) -> Result<TransferSummary, SyncError> {
        let worker = self.worker(account, logger, events, cancel);
        let summary = run_pool(work, max_parallel, cancel, move |item| {
            let worker = worker.clone();
            async move { worker.upload(item).await }
        })
        .await?;

        info!(
            uploaded = summary.completed,
            failed = summary.failed,
            bytes = summary.bytes,
            "Uploads finished"
        );
        Ok(summary)
    }

    /// Download remote content with at most `max_parallel` in flight
    #[instrument(skip_all, fields(account_id = %account.id(), items = items.len(), max_parallel = max_parallel))]
    pub async fn execute_downloads(
        &self,
        account: &AccountContext,
        logger: &OperationLogger,
        items: Vec<DriveItem>,
        max_parallel: usize,
        events: TransferCallback,
        cancel: &CancellationToken,
    ) -> Result<TransferSummary, SyncError> {
        let worker = self.worker(account, logger, events, cancel);
        let summary = run_pool(items, max_parallel, cancel, move |item| {
            let worker = worker.clone();
            async move { worker.download(item).await }
        })
        .await?;

        info!(
            downloaded = summary.completed,
            failed = summary.failed,
            conflicts = summary.conflicts,
            bytes = summary.bytes,
            "Downloads finished"
        );
        Ok(summary)
    }
}

/// Run `job` over `items` with a semaphore of `max_parallel` permits
///
/// Storage errors from a worker are returned after the in-flight tasks
/// have finished.
async fn run_pool<W, F, Fut>(
    items: Vec<W>,
    max_parallel: usize,
    cancel: &CancellationToken,
    job: F,
) -> Result<TransferSummary, SyncError>
where
    W: Send + 'static,
    F: Fn(W) -> Fut,
    Fut: std::future::Future<Output = Result<ItemOutcome, SyncError>> + Send + 'static,
{
    let semaphore = Arc::new(Semaphore::new(max_parallel.max(1)));
    let mut tasks = JoinSet::new();
    let mut cancelled = false;

    for item in items {
        let permit = tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                cancelled = true;
                break;
            }
            permit = Arc::clone(&semaphore).acquire_owned() => match permit {
                Ok(permit) => permit,
                Err(_) => break,
            },
        };
        let fut = job(item);
        tasks.spawn(async move {
            let _permit = permit;
            fut.await
        });
    }

    let mut summary = TransferSummary::default();
    let mut fatal = None;
    while let Some(joined) = tasks.join_next().await {
        match joined {
            Ok(Ok(ItemOutcome::Completed { bytes })) => {
                summary.completed += 1;
                summary.bytes += bytes;
            }
            Ok(Ok(ItemOutcome::Failed)) => summary.failed += 1,
            Ok(Ok(ItemOutcome::Cancelled)) => cancelled = true,
            Ok(Ok(ItemOutcome::Parked { recorded })) => summary.conflicts += u64::from(recorded),
            Ok(Err(e)) => {
                error!(error = %e, "Transfer worker failed");
                fatal.get_or_insert(e);
            }
            Err(e) => {
                error!(error = %e, "Transfer task panicked");
                summary.failed += 1;
            }
        }
    }

    if let Some(e) = fatal {
        return Err(e);
    }
    if cancelled {
        return Err(SyncError::Cancelled);
    }
    Ok(summary)
}

/// A progress sink that turns cumulative byte counts into deltas
fn delta_sink(events: TransferCallback, direction: SyncDirection) -> ProgressSink {
    let last = Arc::new(AtomicU64::new(0));
    Arc::new(move |total: u64| {
        let previous = last.swap(total, Ordering::Relaxed);
        let bytes = total.saturating_sub(previous);
        if bytes > 0 {
            events(TransferEvent::Progress { direction, bytes });
        }
    })
}

impl Worker {
    fn progress_sink(&self, direction: SyncDirection) -> ProgressSink {
        delta_sink(Arc::clone(&self.events), direction)
    }

    async fn save(&self, row: &DriveItem) -> Result<(), SyncError> {
        self.store.save_item(row).await.map_err(SyncError::storage)
    }

    async fn fail(
        &self,
        mut row: DriveItem,
        direction: SyncDirection,
        code: ReasonCode,
        message: String,
    ) -> Result<ItemOutcome, SyncError> {
        let failure = SyncError::TransferFailed {
            path: row.path().clone(),
            reason: message.clone(),
        };
        warn!(%direction, reason = %code, error = %failure, "Transfer failed");
        row.mark_failed(message.clone())?;
        self.save(&row).await?;
        self.logger
            .log_transfer_failed(row.path(), direction, code, &message)
            .await;
        (self.events)(TransferEvent::Finished {
            direction,
            success: false,
            bytes: 0,
        });
        Ok(ItemOutcome::Failed)
    }

    /// Keep a download off a locally edited file
    async fn park(
        &self,
        held: Detection,
        direction: SyncDirection,
    ) -> Result<ItemOutcome, SyncError> {
        let recorded = held.is_conflict();
        let row = held.into_item();
        info!(path = %row.path(), recorded, "Local file changed, download held back");
        self.save(&row).await?;
        (self.events)(TransferEvent::Parked {
            direction,
            recorded,
        });
        Ok(ItemOutcome::Parked { recorded })
    }

    fn abort(&self, direction: SyncDirection) -> Result<ItemOutcome, SyncError> {
        (self.events)(TransferEvent::Aborted { direction });
        Ok(ItemOutcome::Cancelled)
    }

    async fn upload(&self, work: UploadWork) -> Result<ItemOutcome, SyncError> {
        const DIRECTION: SyncDirection = SyncDirection::Upload;
        let UploadWork { record, existing } = work;
        let local_meta = record.metadata();

        let mut row = match existing {
            Some(mut row) => {
                row.apply_local(&local_meta);
                if !matches!(row.status(), SyncStatus::PendingUpload) {
                    row.mark_pending_upload()?;
                }
                row
            }
            None => DriveItem::discovered_locally(
                *self.logger.account_id(),
                record.path.clone(),
                local_meta,
            ),
        };
        self.save(&row).await?;

        if self.cancel.is_cancelled() {
            return Ok(ItemOutcome::Cancelled);
        }
        (self.events)(TransferEvent::Started {
            direction: DIRECTION,
        });
        let started = Instant::now();

        let content = match self.local.read_file(&record.local_path).await {
            Ok(content) => content,
            Err(e) => {
                return self
                    .fail(row, DIRECTION, ReasonCode::LocalIoError, e.to_string())
                    .await
            }
        };
        let hash = match self.local.hash_bytes(&content) {
            Ok(hash) => hash,
            Err(e) => {
                return self
                    .fail(row, DIRECTION, ReasonCode::LocalIoError, e.to_string())
                    .await
            }
        };
        let bytes = content.len() as u64;
        let if_match = row.remote_id().and(row.etag()).map(str::to_owned);

        let result = tokio::select! {
            biased;
            _ = self.cancel.cancelled() => None,
            r = self.remote.upload(
                row.path(),
                content,
                if_match.as_deref(),
                self.progress_sink(DIRECTION),
            ) => Some(r),
        };

        match result {
            None => {
                debug!(path = %row.path(), "Upload interrupted by cancellation");
                self.abort(DIRECTION)
            }
            Some(Err(e)) => {
                let code = ReasonCode::from(&e);
                self.fail(row, DIRECTION, code, e.to_string()).await
            }
            Some(Ok(uploaded)) => {
                row.apply_remote(&uploaded.metadata());
                row.apply_local(&LocalMetadata {
                    size: bytes,
                    modified: record.modified,
                    hash: Some(hash),
                });
                row.mark_synced(Some(DIRECTION), Utc::now())?;
                self.save(&row).await?;

                let duration_ms = started.elapsed().as_millis() as u64;
                self.logger
                    .log_transfer(row.path(), DIRECTION, bytes, duration_ms)
                    .await;
                debug!(path = %row.path(), bytes, duration_ms, "Upload completed");
                (self.events)(TransferEvent::Finished {
                    direction: DIRECTION,
                    success: true,
                    bytes,
                });
                Ok(ItemOutcome::Completed { bytes })
            }
        }
    }

    async fn download(&self, mut row: DriveItem) -> Result<ItemOutcome, SyncError> {
        const DIRECTION: SyncDirection = SyncDirection::Download;

        if !matches!(row.status(), SyncStatus::PendingDownload) {
            row.mark_pending_download()?;
            self.save(&row).await?;
        }

        if self.cancel.is_cancelled() {
            return Ok(ItemOutcome::Cancelled);
        }
        (self.events)(TransferEvent::Started {
            direction: DIRECTION,
        });
        let started = Instant::now();

        let Some(remote_id) = row.remote_id().cloned() else {
            let err = RemoteError::NotFound(row.path().to_string());
            return self
                .fail(row, DIRECTION, ReasonCode::RemoteNotFound, err.to_string())
                .await;
        };

        let result = tokio::select! {
            biased;
            _ = self.cancel.cancelled() => None,
            r = self.remote.download(&remote_id, self.progress_sink(DIRECTION)) => Some(r),
        };
        let content = match result {
            None => {
                debug!(path = %row.path(), "Download interrupted by cancellation");
                return self.abort(DIRECTION);
            }
            Some(Err(e)) => {
                let code = ReasonCode::from(&e);
                return self.fail(row, DIRECTION, code, e.to_string()).await;
            }
            Some(Ok(content)) => content,
        };

        let actual = match self.local.hash_bytes(&content) {
            Ok(hash) => hash,
            Err(e) => {
                return self
                    .fail(row, DIRECTION, ReasonCode::LocalIoError, e.to_string())
                    .await
            }
        };
        if let Some(expected) = row.remote_hash() {
            if *expected != actual {
                let message = format!("expected hash {expected}, got {actual}");
                return self
                    .fail(row, DIRECTION, ReasonCode::HashMismatch, message)
                    .await;
            }
        }

        let local_path = self.local_root.join_remote(row.path())?;
        let on_disk =
            match observe_download_target(self.local.as_ref(), &row, &local_path).await {
                Ok(on_disk) => on_disk,
                Err(e) => {
                    return self
                        .fail(row, DIRECTION, ReasonCode::LocalIoError, e.to_string())
                        .await
                }
            };
        let mut row = match self
            .conflicts
            .recheck_download(&self.logger, row, on_disk.as_ref())
            .await?
        {
            Detection::DownloadCandidate(row) => row,
            held => return self.park(held, DIRECTION).await,
        };

        if let Err(e) = self.local.write_file(&local_path, &content).await {
            return self
                .fail(row, DIRECTION, ReasonCode::LocalIoError, e.to_string())
                .await;
        }
        let state = match self.local.get_state(&local_path).await {
            Ok(state) => state,
            Err(e) => {
                return self
                    .fail(row, DIRECTION, ReasonCode::LocalIoError, e.to_string())
                    .await
            }
        };

        let bytes = content.len() as u64;
        row.apply_local(&LocalMetadata {
            size: bytes,
            modified: state.modified.unwrap_or_else(Utc::now),
            hash: Some(actual),
        });
        row.mark_synced(Some(DIRECTION), Utc::now())?;
        self.save(&row).await?;

        let duration_ms = started.elapsed().as_millis() as u64;
        self.logger
            .log_transfer(row.path(), DIRECTION, bytes, duration_ms)
            .await;
        debug!(path = %row.path(), bytes, duration_ms, "Download completed");
        (self.events)(TransferEvent::Finished {
            direction: DIRECTION,
            success: true,
            bytes,
        });
        Ok(ItemOutcome::Completed { bytes })
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use super::*;

    #[tokio::test]
    async fn test_run_pool_bounds_parallelism() {
        let in_flight = Arc::new(AtomicU64::new(0));
        let peak = Arc::new(AtomicU64::new(0));
        let cancel = CancellationToken::new();

        let summary = run_pool((0..12u64).collect(), 3, &cancel, {
            let in_flight = Arc::clone(&in_flight);
            let peak = Arc::clone(&peak);
            move |i| {
                let in_flight = Arc::clone(&in_flight);
                let peak = Arc::clone(&peak);
                async move {
                    let now = in_flight.fetch_add(1, Ordering::SeqCst) + 1;
                    peak.fetch_max(now, Ordering::SeqCst);
                    tokio::time::sleep(std::time::Duration::from_millis(5)).await;
                    in_flight.fetch_sub(1, Ordering::SeqCst);
                    if i == 7 {
                        Ok(ItemOutcome::Failed)
                    } else {
                        Ok(ItemOutcome::Completed { bytes: 10 })
                    }
                }
            }
        })
        .await
        .unwrap();

        assert_eq!(summary.completed, 11);
        assert_eq!(summary.failed, 1);
        assert_eq!(summary.bytes, 110);
        assert!(peak.load(Ordering::SeqCst) <= 3);
    }

    #[tokio::test]
    async fn test_run_pool_cancelled_before_start() {
        let cancel = CancellationToken::new();
        cancel.cancel();
        let started = Arc::new(Mutex::new(0));

        let result = run_pool(vec![1, 2, 3], 2, &cancel, {
            let started = Arc::clone(&started);
            move |_| {
                *started.lock().unwrap() += 1;
                async { Ok(ItemOutcome::Completed { bytes: 1 }) }
            }
        })
        .await;

        assert!(matches!(result, Err(SyncError::Cancelled)));
        assert_eq!(*started.lock().unwrap(), 0);
    }

    #[test]
    fn test_delta_sink_reports_deltas() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let events: TransferCallback = {
            let seen = Arc::clone(&seen);
            Arc::new(move |e| seen.lock().unwrap().push(e))
        };

        let sink = delta_sink(events, SyncDirection::Download);
        sink(100);
        sink(100);
        sink(250);

        assert_eq!(
            *seen.lock().unwrap(),
            vec![
                TransferEvent::Progress {
                    direction: SyncDirection::Download,
                    bytes: 100
                },
                TransferEvent::Progress {
                    direction: SyncDirection::Download,
                    bytes: 150
                },
            ]
        );
    }
}
