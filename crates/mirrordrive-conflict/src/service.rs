//! Conflict detection service
//!
//! Turns the detector's verdicts into row updates. Conflicts are persisted
//! immediately together with an audit entry; the updated row is handed back
//! so the caller can save it in the same batch as the rest of its page.

use std::sync::Arc;

use chrono::Utc;
use mirrordrive_audit::{OperationLogger, ReasonCode};
use mirrordrive_core::{
    domain::{
        newtypes::{AccountId, RemotePath},
        ConflictKind, DriveItem, LocalMetadata, RemoteMetadata, SyncConflict, SyncStatus,
        VersionInfo,
    },
    ports::IStateRepository,
};
use tracing::{debug, info};

use crate::{
    detector::{ChangeSet, ConflictDetector},
    error::ConflictError,
};

/// Fresh facts about one file path from both sides
#[derive(Debug, Clone, Copy)]
pub struct Observation<'a> {
    pub path: &'a RemotePath,
    pub remote: &'a RemoteMetadata,
    /// `None` when no regular file exists at the path locally
    pub local: Option<&'a LocalMetadata>,
}

/// How a remote file change should be handled
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Detection {
    /// The row is up to date (or only owes an upload)
    NothingToDo(DriveItem),
    /// The remote content must be downloaded
    DownloadCandidate(DriveItem),
    /// A conflict was just recorded for the path; the row is parked
    Conflict(DriveItem),
    /// The path already has an unresolved conflict; the row stays parked
    Parked(DriveItem),
}

impl Detection {
    pub fn item(&self) -> &DriveItem {
        match self {
            Detection::NothingToDo(item)
            | Detection::DownloadCandidate(item)
            | Detection::Conflict(item)
            | Detection::Parked(item) => item,
        }
    }

    pub fn into_item(self) -> DriveItem {
        match self {
            Detection::NothingToDo(item)
            | Detection::DownloadCandidate(item)
            | Detection::Conflict(item)
            | Detection::Parked(item) => item,
        }
    }

    pub fn is_download(&self) -> bool {
        matches!(self, Detection::DownloadCandidate(_))
    }

    /// True only for a newly recorded conflict
    pub fn is_conflict(&self) -> bool {
        matches!(self, Detection::Conflict(_))
    }

    pub fn is_parked(&self) -> bool {
        matches!(self, Detection::Parked(_))
    }
}

/// Classifies remote file changes and records conflicts
pub struct ConflictDetectionService {
    detector: ConflictDetector,
    state_repository: Arc<dyn IStateRepository>,
}

impl ConflictDetectionService {
    pub fn new(state_repository: Arc<dyn IStateRepository>, first_sync_tolerance_secs: u64) -> Self {
        Self {
            detector: ConflictDetector::new(first_sync_tolerance_secs),
            state_repository,
        }
    }

    /// Classify a remote file change
    ///
    /// `existing` is the stored row for the path, if any. Rows tracked as
    /// metadata-only are treated as a first sync so that an item brought
    /// back into the selection is reconciled with the local disk.
    ///
    /// Every conflict parks the row as `PendingDownload`; the orchestrator
    /// keeps paths with an unresolved conflict out of its work lists.
    pub async fn detect(
        &self,
        logger: &OperationLogger,
        existing: Option<DriveItem>,
        observation: Observation<'_>,
    ) -> Result<Detection, ConflictError> {
        let account_id = existing
            .as_ref()
            .map_or(*logger.account_id(), |item| *item.account_id());

        if self.has_unresolved_conflict(&account_id, observation.path).await? {
            let item = match existing {
                Some(mut item) => {
                    item.mark_pending_download()?;
                    item
                }
                None => self.new_remote_row(logger, observation),
            };
            return Ok(Detection::Parked(item));
        }

        match existing {
            Some(item) if !matches!(item.status(), SyncStatus::SyncOnly) => {
                self.classify_known(logger, item, observation).await
            }
            Some(mut item) => {
                item.apply_remote(observation.remote);
                item.mark_pending_download()?;
                self.classify_first_sync(logger, item, observation).await
            }
            None => {
                let item = self.new_remote_row(logger, observation);
                self.classify_first_sync(logger, item, observation).await
            }
        }
    }

    /// Re-check a row that still owes a download against the file on disk
    ///
    /// A local file written after the row was classified would be lost to
    /// the download. Such a file is recorded as a conflict instead and the
    /// row is parked; an absent or unchanged file keeps the download.
    /// `local` must carry a hash whenever the row records one.
    pub async fn recheck_download(
        &self,
        logger: &OperationLogger,
        mut item: DriveItem,
        local: Option<&LocalMetadata>,
    ) -> Result<Detection, ConflictError> {
        let Some(local) = local.filter(|l| item.local_file_diverged(l)) else {
            return Ok(Detection::DownloadCandidate(item));
        };
        let Some(remote) = item.remote_metadata() else {
            return Ok(Detection::DownloadCandidate(item));
        };

        if !matches!(item.status(), SyncStatus::PendingDownload) {
            item.mark_pending_download()?;
        }
        if self.has_unresolved_conflict(item.account_id(), item.path()).await? {
            return Ok(Detection::Parked(item));
        }

        let kind = if item.local_modified().is_some() {
            ConflictKind::BothModified
        } else {
            ConflictKind::FirstSyncMismatch
        };
        let path = item.path().clone();
        self.record_conflict(
            logger,
            kind,
            Observation {
                path: &path,
                remote: &remote,
                local: Some(local),
            },
        )
        .await?;
        Ok(Detection::Conflict(item))
    }

    async fn has_unresolved_conflict(
        &self,
        account_id: &AccountId,
        path: &RemotePath,
    ) -> Result<bool, ConflictError> {
        let found = self
            .state_repository
            .get_conflict_by_path(account_id, path)
            .await?
            .is_some();
        if found {
            debug!(path = %path, "Unresolved conflict already recorded");
        }
        Ok(found)
    }

    async fn classify_known(
        &self,
        logger: &OperationLogger,
        mut item: DriveItem,
        observation: Observation<'_>,
    ) -> Result<Detection, ConflictError> {
        match ConflictDetector::compare_known(&item, observation.remote, observation.local) {
            ChangeSet::Unchanged | ChangeSet::LocalOnly => {
                item.refresh_remote_metadata(observation.remote);
                Ok(Detection::NothingToDo(item))
            }
            ChangeSet::RemoteOnly => {
                item.apply_remote(observation.remote);
                item.mark_pending_download()?;
                Ok(Detection::DownloadCandidate(item))
            }
            ChangeSet::Both => {
                self.record_conflict(logger, ConflictKind::BothModified, observation)
                    .await?;
                item.mark_pending_download()?;
                Ok(Detection::Conflict(item))
            }
        }
    }

    /// `item` already carries the remote facts and is `PendingDownload`
    async fn classify_first_sync(
        &self,
        logger: &OperationLogger,
        mut item: DriveItem,
        observation: Observation<'_>,
    ) -> Result<Detection, ConflictError> {
        let Some(local) = observation.local else {
            return Ok(Detection::DownloadCandidate(item));
        };

        if self.detector.first_sync_matches(observation.remote, local) {
            debug!(path = %observation.path, "Local file adopted on first sync");
            item.apply_local(local);
            item.mark_synced(None, Utc::now())?;
            return Ok(Detection::NothingToDo(item));
        }

        self.record_conflict(logger, ConflictKind::FirstSyncMismatch, observation)
            .await?;
        Ok(Detection::Conflict(item))
    }

    fn new_remote_row(&self, logger: &OperationLogger, observation: Observation<'_>) -> DriveItem {
        DriveItem::discovered_remotely(
            *logger.account_id(),
            observation.path.clone(),
            false,
            observation.remote,
            SyncStatus::PendingDownload,
        )
    }

    async fn record_conflict(
        &self,
        logger: &OperationLogger,
        kind: ConflictKind,
        observation: Observation<'_>,
    ) -> Result<(), ConflictError> {
        let local = observation
            .local
            .map(|l| VersionInfo::new(l.size, Some(l.modified)).with_hash(l.hash.clone()))
            .unwrap_or_else(|| VersionInfo::new(0, None));
        let remote = VersionInfo::new(observation.remote.size, observation.remote.modified)
            .with_hash(observation.remote.hash.clone())
            .with_etag(observation.remote.etag.clone());

        let conflict = SyncConflict::new(
            *logger.account_id(),
            observation.path.clone(),
            kind,
            local.clone(),
            remote.clone(),
        );
        self.state_repository.save_conflict(&conflict).await?;
        logger
            .log_conflict(observation.path, ReasonCode::from(kind), &local, &remote)
            .await;

        info!(
            path = %observation.path,
            kind = kind.as_str(),
            conflict_id = %conflict.id(),
            "Conflict recorded"
        );
        Ok(())
    }
}
