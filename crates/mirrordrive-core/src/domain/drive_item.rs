//! DriveItem domain entity
//!
//! A [`DriveItem`] unifies what is known about one file or folder on both
//! sides: remote identity and version tags, local size/timestamp/hash, and
//! the [`SyncStatus`] that says what work is still owed for it. Rows are the
//! single source of truth carried between sessions.
//!
//! ## Status Machine
//!
//! ```text
//!                    local edit                        remote edit
//!     ┌─────────────┐ ◄──────── ┌──────────┐ ────────► ┌───────────────┐
//!     │PendingUpload│           │  Synced  │           │PendingDownload│
//!     └─────────────┘ ────────► └──────────┘ ◄──────── └───────────────┘
//!            │        uploaded       ▲ │     downloaded       │
//!            │                 retry │ │ deselected           │
//!            ▼                       │ ▼                      ▼
//!     ┌────────────────┐        ┌──────────┐         ┌──────────────────┐
//!     │Failed{Upload}  │        │ SyncOnly │ ──────► │Failed{Download}  │
//!     └────────────────┘        └──────────┘ select  └──────────────────┘
//! ```
//!
//! A conflict parks the row in `PendingDownload`; the orchestrator keeps
//! such rows out of both transfer lists until the conflict is resolved.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use super::errors::DomainError;
use super::newtypes::{AccountId, FileHash, RemoteId, RemotePath, UniqueId};

// ============================================================================
// SyncDirection
// ============================================================================

/// Direction of a content transfer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncDirection {
    Upload,
    Download,
}

impl SyncDirection {
    pub fn as_str(&self) -> &'static str {
        match self {
            SyncDirection::Upload => "upload",
            SyncDirection::Download => "download",
        }
    }
}

impl fmt::Display for SyncDirection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SyncDirection {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "upload" => Ok(SyncDirection::Upload),
            "download" => Ok(SyncDirection::Download),
            other => Err(DomainError::ValidationFailed(format!(
                "Unknown sync direction: {other}"
            ))),
        }
    }
}

// ============================================================================
// SyncStatus
// ============================================================================

/// What work, if any, is owed for an item
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncStatus {
    /// Both sides match the row
    Synced,
    /// Local content must be uploaded
    PendingUpload,
    /// Remote content must be downloaded (or a conflict awaits resolution)
    PendingDownload,
    /// The last transfer failed; `retry` is the direction still owed
    Failed { retry: SyncDirection, reason: String },
    /// Tracked for metadata only, content is never transferred
    SyncOnly,
}

impl SyncStatus {
    /// Status name without failure details
    pub fn name(&self) -> &'static str {
        match self {
            SyncStatus::Synced => "synced",
            SyncStatus::PendingUpload => "pending_upload",
            SyncStatus::PendingDownload => "pending_download",
            SyncStatus::Failed { .. } => "failed",
            SyncStatus::SyncOnly => "sync_only",
        }
    }

    pub fn is_synced(&self) -> bool {
        matches!(self, SyncStatus::Synced)
    }

    /// Direction of the transfer this status still owes, if any
    pub fn owed_direction(&self) -> Option<SyncDirection> {
        match self {
            SyncStatus::PendingUpload => Some(SyncDirection::Upload),
            SyncStatus::PendingDownload => Some(SyncDirection::Download),
            SyncStatus::Failed { retry, .. } => Some(*retry),
            SyncStatus::Synced | SyncStatus::SyncOnly => None,
        }
    }

    /// Returns true if the transition to `target` is allowed
    pub fn can_transition_to(&self, target: &SyncStatus) -> bool {
        use SyncStatus::*;

        match (self, target) {
            (Synced, Synced | PendingUpload | PendingDownload | SyncOnly) => true,

            (PendingUpload, Synced | PendingUpload | PendingDownload) => true,
            (PendingUpload, Failed { retry, .. }) => *retry == SyncDirection::Upload,

            (PendingDownload, Synced | PendingDownload | PendingUpload) => true,
            (PendingDownload, Failed { retry, .. }) => *retry == SyncDirection::Download,

            (Failed { .. }, Synced | PendingUpload | PendingDownload) => true,

            (SyncOnly, SyncOnly | PendingDownload) => true,

            _ => false,
        }
    }
}

impl fmt::Display for SyncStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SyncStatus::Failed { retry, reason } => write!(f, "failed ({retry}): {reason}"),
            other => f.write_str(other.name()),
        }
    }
}

// ============================================================================
// Observed metadata value objects
// ============================================================================

/// Remote facts about an item as reported by the drive
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteMetadata {
    pub id: RemoteId,
    pub size: u64,
    pub modified: Option<DateTime<Utc>>,
    pub hash: Option<FileHash>,
    pub ctag: Option<String>,
    pub etag: Option<String>,
}

/// Local facts about a file as read from disk
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocalMetadata {
    pub size: u64,
    pub modified: DateTime<Utc>,
    pub hash: Option<FileHash>,
}

// ============================================================================
// DriveItem
// ============================================================================

/// One file or folder tracked for an account
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DriveItem {
    id: UniqueId,
    account_id: AccountId,
    remote_id: Option<RemoteId>,
    path: RemotePath,
    is_folder: bool,
    size: u64,
    local_modified: Option<DateTime<Utc>>,
    remote_modified: Option<DateTime<Utc>>,
    local_hash: Option<FileHash>,
    remote_hash: Option<FileHash>,
    ctag: Option<String>,
    etag: Option<String>,
    status: SyncStatus,
    last_sync_direction: Option<SyncDirection>,
    last_synced_at: Option<DateTime<Utc>>,
}

impl DriveItem {
    /// Create a bare row with the given status
    pub fn new(account_id: AccountId, path: RemotePath, is_folder: bool, status: SyncStatus) -> Self {
        Self {
            id: UniqueId::new(),
            account_id,
            remote_id: None,
            path,
            is_folder,
            size: 0,
            local_modified: None,
            remote_modified: None,
            local_hash: None,
            remote_hash: None,
            ctag: None,
            etag: None,
            status,
            last_sync_direction: None,
            last_synced_at: None,
        }
    }

    /// A local file seen for the first time; it is owed an upload
    pub fn discovered_locally(account_id: AccountId, path: RemotePath, local: LocalMetadata) -> Self {
        let mut item = Self::new(account_id, path, false, SyncStatus::PendingUpload);
        item.apply_local(&local);
        item
    }

    /// A remote item seen for the first time
    pub fn discovered_remotely(
        account_id: AccountId,
        path: RemotePath,
        is_folder: bool,
        remote: &RemoteMetadata,
        status: SyncStatus,
    ) -> Self {
        let mut item = Self::new(account_id, path, is_folder, status);
        item.apply_remote(remote);
        item
    }

    /// Rebuild a row from stored fields
    #[allow(clippy::too_many_arguments)]
    pub fn from_parts(
        id: UniqueId,
        account_id: AccountId,
        remote_id: Option<RemoteId>,
        path: RemotePath,
        is_folder: bool,
        size: u64,
        local_modified: Option<DateTime<Utc>>,
        remote_modified: Option<DateTime<Utc>>,
        local_hash: Option<FileHash>,
        remote_hash: Option<FileHash>,
        ctag: Option<String>,
        etag: Option<String>,
        status: SyncStatus,
        last_sync_direction: Option<SyncDirection>,
        last_synced_at: Option<DateTime<Utc>>,
    ) -> Self {
        Self {
            id,
            account_id,
            remote_id,
            path,
            is_folder,
            size,
            local_modified,
            remote_modified,
            local_hash,
            remote_hash,
            ctag,
            etag,
            status,
            last_sync_direction,
            last_synced_at,
        }
    }

    // --- Getters ---

    pub fn id(&self) -> &UniqueId {
        &self.id
    }

    pub fn account_id(&self) -> &AccountId {
        &self.account_id
    }

    pub fn remote_id(&self) -> Option<&RemoteId> {
        self.remote_id.as_ref()
    }

    pub fn path(&self) -> &RemotePath {
        &self.path
    }

    pub fn is_folder(&self) -> bool {
        self.is_folder
    }

    pub fn size(&self) -> u64 {
        self.size
    }

    pub fn local_modified(&self) -> Option<DateTime<Utc>> {
        self.local_modified
    }

    pub fn remote_modified(&self) -> Option<DateTime<Utc>> {
        self.remote_modified
    }

    pub fn local_hash(&self) -> Option<&FileHash> {
        self.local_hash.as_ref()
    }

    pub fn remote_hash(&self) -> Option<&FileHash> {
        self.remote_hash.as_ref()
    }

    pub fn ctag(&self) -> Option<&str> {
        self.ctag.as_deref()
    }

    pub fn etag(&self) -> Option<&str> {
        self.etag.as_deref()
    }

    pub fn status(&self) -> &SyncStatus {
        &self.status
    }

    pub fn last_sync_direction(&self) -> Option<SyncDirection> {
        self.last_sync_direction
    }

    pub fn last_synced_at(&self) -> Option<DateTime<Utc>> {
        self.last_synced_at
    }

    // --- Comparisons ---

    /// True if the remote content tag differs from the stored one
    ///
    /// The content tag (ctag) is compared when the remote reports one,
    /// otherwise the entity tag (etag). A row that never saw a remote
    /// version always counts as changed.
    pub fn remote_content_changed(&self, remote: &RemoteMetadata) -> bool {
        match (&remote.ctag, &self.ctag) {
            (Some(theirs), Some(ours)) => theirs != ours,
            (Some(_), None) => true,
            (None, _) => match (&remote.etag, &self.etag) {
                (Some(theirs), Some(ours)) => theirs != ours,
                _ => true,
            },
        }
    }

    /// True if the file on disk no longer matches the row
    ///
    /// Timestamps are compared at one-second granularity since not every
    /// filesystem or store keeps sub-second precision.
    pub fn local_content_changed(&self, local: &LocalMetadata) -> bool {
        if local.size != self.size {
            return true;
        }
        match self.local_modified {
            Some(stored) if stored.timestamp() == local.modified.timestamp() => false,
            _ => match (&local.hash, &self.local_hash) {
                (Some(theirs), Some(ours)) => theirs != ours,
                _ => true,
            },
        }
    }

    /// True if the file on disk is not the one this row last recorded
    ///
    /// Meant for rows that owe a download, whose size already describes the
    /// remote version. Hashes decide when both sides have one; otherwise the
    /// modification time does, and a row that never recorded a local file
    /// treats any file as new.
    pub fn local_file_diverged(&self, local: &LocalMetadata) -> bool {
        match (&self.local_hash, &local.hash) {
            (Some(ours), Some(theirs)) => ours != theirs,
            _ => self
                .local_modified
                .map_or(true, |stored| stored.timestamp() != local.modified.timestamp()),
        }
    }

    /// The remote version this row last recorded, if it has a remote identity
    pub fn remote_metadata(&self) -> Option<RemoteMetadata> {
        Some(RemoteMetadata {
            id: self.remote_id.clone()?,
            size: self.size,
            modified: self.remote_modified,
            hash: self.remote_hash.clone(),
            ctag: self.ctag.clone(),
            etag: self.etag.clone(),
        })
    }

    /// True if local edits are queued or a local upload previously failed
    pub fn has_local_edits(&self) -> bool {
        self.status.owed_direction() == Some(SyncDirection::Upload)
    }

    // --- Metadata updates ---

    /// Record remote version facts
    pub fn apply_remote(&mut self, remote: &RemoteMetadata) {
        self.remote_id = Some(remote.id.clone());
        self.size = remote.size;
        self.remote_modified = remote.modified;
        self.remote_hash = remote.hash.clone();
        self.ctag = remote.ctag.clone();
        self.etag = remote.etag.clone();
    }

    /// Refresh only the entity tag and timestamp (content unchanged)
    pub fn refresh_remote_metadata(&mut self, remote: &RemoteMetadata) {
        self.remote_id = Some(remote.id.clone());
        self.remote_modified = remote.modified;
        self.etag = remote.etag.clone();
    }

    /// Record local file facts
    pub fn apply_local(&mut self, local: &LocalMetadata) {
        self.size = local.size;
        self.local_modified = Some(local.modified);
        if local.hash.is_some() {
            self.local_hash = local.hash.clone();
        }
    }

    /// Drop the remote identity after the remote copy disappeared
    pub fn clear_remote_identity(&mut self) {
        self.remote_id = None;
        self.ctag = None;
        self.etag = None;
        self.remote_hash = None;
        self.remote_modified = None;
    }

    // --- Status transitions ---

    fn transition_to(&mut self, target: SyncStatus) -> Result<(), DomainError> {
        if !self.status.can_transition_to(&target) {
            return Err(DomainError::InvalidState {
                from: self.status.name().to_string(),
                to: target.name().to_string(),
            });
        }
        self.status = target;
        Ok(())
    }

    /// Queue an upload
    ///
    /// # Errors
    /// Returns `DomainError::InvalidState` from `SyncOnly`
    pub fn mark_pending_upload(&mut self) -> Result<(), DomainError> {
        self.transition_to(SyncStatus::PendingUpload)
    }

    /// Queue a download (also used to park a conflicted row)
    ///
    /// # Errors
    /// Never fails from any current status; returns `Result` for symmetry
    pub fn mark_pending_download(&mut self) -> Result<(), DomainError> {
        self.transition_to(SyncStatus::PendingDownload)
    }

    /// Both sides now match
    ///
    /// `direction` is `None` when the match was established without a transfer.
    ///
    /// # Errors
    /// Returns `DomainError::InvalidState` from `SyncOnly`
    pub fn mark_synced(
        &mut self,
        direction: Option<SyncDirection>,
        at: DateTime<Utc>,
    ) -> Result<(), DomainError> {
        self.transition_to(SyncStatus::Synced)?;
        if direction.is_some() {
            self.last_sync_direction = direction;
        }
        self.last_synced_at = Some(at);
        Ok(())
    }

    /// Record a transfer failure; the owed direction is kept for the retry
    ///
    /// # Errors
    /// Returns `DomainError::InvalidState` unless a transfer was pending
    pub fn mark_failed(&mut self, reason: impl Into<String>) -> Result<(), DomainError> {
        let retry = match self.status {
            SyncStatus::PendingUpload => SyncDirection::Upload,
            SyncStatus::PendingDownload => SyncDirection::Download,
            _ => {
                return Err(DomainError::InvalidState {
                    from: self.status.name().to_string(),
                    to: "failed".to_string(),
                })
            }
        };
        self.transition_to(SyncStatus::Failed {
            retry,
            reason: reason.into(),
        })
    }

    /// Stop transferring content for this item
    ///
    /// # Errors
    /// Returns `DomainError::InvalidState` while a transfer is owed
    pub fn mark_sync_only(&mut self) -> Result<(), DomainError> {
        self.transition_to(SyncStatus::SyncOnly)
    }
}
