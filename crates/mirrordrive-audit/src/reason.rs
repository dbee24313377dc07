//! Reason codes for audit log entries
//!
//! Provides structured codes for categorizing why an operation failed or
//! why a conflict was recorded. Stored as the failure code of an
//! [`OperationOutcome`](mirrordrive_core::domain::OperationOutcome).

use std::fmt;

use mirrordrive_core::{domain::ConflictKind, ports::RemoteError};
use serde::{Deserialize, Serialize};

/// Structured reason codes for failures and conflicts
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReasonCode {
    /// Both sides changed since the last sync
    BothModified,
    /// First sync found a local and a remote file that do not match
    FirstSyncMismatch,
    /// Remote file was modified while an upload was in progress
    RemoteModifiedDuringUpload,
    /// Downloaded content did not match the remote hash
    HashMismatch,
    /// Network failure, throttling or server error
    NetworkError,
    /// The remote rejected the request
    RemoteRejected,
    RemoteNotFound,
    /// Reading or writing the local file failed
    LocalIoError,
    /// The transfer was interrupted by cancellation
    Cancelled,
    /// The item disappeared remotely
    RemoteDeleted,
    /// The item disappeared locally
    LocalDeleted,
    /// The item disappeared on both sides
    GoneOnBothSides,
}

impl ReasonCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            ReasonCode::BothModified => "both_modified",
            ReasonCode::FirstSyncMismatch => "first_sync_mismatch",
            ReasonCode::RemoteModifiedDuringUpload => "remote_modified_during_upload",
            ReasonCode::HashMismatch => "hash_mismatch",
            ReasonCode::NetworkError => "network_error",
            ReasonCode::RemoteRejected => "remote_rejected",
            ReasonCode::RemoteNotFound => "remote_not_found",
            ReasonCode::LocalIoError => "local_io_error",
            ReasonCode::Cancelled => "cancelled",
            ReasonCode::RemoteDeleted => "remote_deleted",
            ReasonCode::LocalDeleted => "local_deleted",
            ReasonCode::GoneOnBothSides => "gone_on_both_sides",
        }
    }
}

impl fmt::Display for ReasonCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl From<&RemoteError> for ReasonCode {
    fn from(err: &RemoteError) -> Self {
        match err {
            RemoteError::Transient(_) => ReasonCode::NetworkError,
            RemoteError::Permanent(_) | RemoteError::TokenExpired => ReasonCode::RemoteRejected,
            RemoteError::NotFound(_) => ReasonCode::RemoteNotFound,
            RemoteError::PreconditionFailed(_) => ReasonCode::RemoteModifiedDuringUpload,
        }
    }
}

impl From<ConflictKind> for ReasonCode {
    fn from(kind: ConflictKind) -> Self {
        match kind {
            ConflictKind::BothModified => ReasonCode::BothModified,
            ConflictKind::FirstSyncMismatch => ReasonCode::FirstSyncMismatch,
        }
    }
}
