//! Error types for the sync engine

use mirrordrive_conflict::ConflictError;
use mirrordrive_core::{
    domain::{newtypes::AccountId, newtypes::RemotePath, DomainError},
    ports::RemoteError,
};
use thiserror::Error;

/// Errors that can end a sync phase
///
/// Per-item transfer and deletion failures are recorded on the row and in
/// the audit log; they only surface here when a whole phase cannot go on.
#[derive(Debug, Error)]
pub enum SyncError {
    #[error("Account not found: {0}")]
    AccountNotFound(AccountId),

    /// The account exists but cannot sync (signed out, expired credentials)
    #[error("Account {0} cannot sync: {1}")]
    AccountUnavailable(AccountId, String),

    #[error("Failed to fetch remote changes: {0}")]
    DeltaFetchFailed(#[source] RemoteError),

    /// The continuation token was rejected; a full listing is required
    #[error("Delta token expired")]
    DeltaTokenExpired,

    /// One item's transfer failed
    ///
    /// Logged by the transfer worker while the reason is stored on the row
    /// as `Failed { retry, reason }`; it never ends a phase.
    #[error("Transfer of {path} failed: {reason}")]
    TransferFailed { path: RemotePath, reason: String },

    #[error("Failed to record conflict: {0}")]
    ConflictRecordingFailed(#[source] anyhow::Error),

    #[error("Sync cancelled")]
    Cancelled,

    #[error("Storage error: {0}")]
    Storage(#[source] anyhow::Error),

    #[error("IO error: {0}")]
    Io(#[source] anyhow::Error),

    #[error("Domain error: {0}")]
    Domain(#[from] DomainError),
}

impl SyncError {
    pub(crate) fn storage(err: anyhow::Error) -> Self {
        SyncError::Storage(err)
    }

    pub(crate) fn io(err: anyhow::Error) -> Self {
        SyncError::Io(err)
    }

    /// Map a remote error raised while reading the change feed
    pub(crate) fn from_delta(err: RemoteError) -> Self {
        match err {
            RemoteError::TokenExpired => SyncError::DeltaTokenExpired,
            other => SyncError::DeltaFetchFailed(other),
        }
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, SyncError::Cancelled)
    }
}

impl From<ConflictError> for SyncError {
    fn from(err: ConflictError) -> Self {
        match err {
            ConflictError::InvalidTransition(e) => SyncError::Domain(e),
            ConflictError::Storage(e) => SyncError::ConflictRecordingFailed(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_token_expiry_is_singled_out() {
        assert!(matches!(
            SyncError::from_delta(RemoteError::TokenExpired),
            SyncError::DeltaTokenExpired
        ));
        assert!(matches!(
            SyncError::from_delta(RemoteError::Transient("timeout".into())),
            SyncError::DeltaFetchFailed(RemoteError::Transient(_))
        ));
    }

    #[test]
    fn test_conflict_storage_error_is_surfaced() {
        let err = SyncError::from(ConflictError::Storage(anyhow::anyhow!("disk full")));
        assert!(matches!(err, SyncError::ConflictRecordingFailed(_)));
        assert!(err.to_string().contains("disk full"));
    }

    #[test]
    fn test_transfer_failure_names_the_path() {
        let err = SyncError::TransferFailed {
            path: RemotePath::new("/Documents/a.txt".to_string()).unwrap(),
            reason: "upload rejected".to_string(),
        };
        assert_eq!(err.to_string(), "Transfer of /Documents/a.txt failed: upload rejected");
        assert!(!err.is_cancelled());
    }

    #[test]
    fn test_cancelled() {
        assert!(SyncError::Cancelled.is_cancelled());
        assert!(!SyncError::DeltaTokenExpired.is_cancelled());
    }
}
