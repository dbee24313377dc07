//! Remote drive port (driven/secondary port)
//!
//! The engine's view of the cloud drive: item listing, paginated delta
//! queries, and content transfer.
//!
//! ## Design Notes
//!
//! - Errors are typed as [`RemoteError`] so the engine can tell an expired
//!   delta token or a lost precondition apart from ordinary failures. The
//!   transient/permanent split is informational; the engine never retries.
//! - Delta cursors are opaque [`DeltaToken`] values. An intermediate page
//!   yields a cursor for the next page, the last page yields the token for
//!   the next session. Both are persisted the same way.
//! - Every call is cancellable by dropping its future.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use thiserror::Error;

use crate::domain::{
    newtypes::{DeltaToken, FileHash, RemoteId, RemotePath},
    RemoteMetadata,
};

/// Errors reported by a remote drive adapter
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum RemoteError {
    /// Network trouble, throttling or a server-side failure
    #[error("Transient remote error: {0}")]
    Transient(String),

    /// The request was rejected and repeating it will not help
    #[error("Remote error: {0}")]
    Permanent(String),

    #[error("Remote item not found: {0}")]
    NotFound(String),

    /// The item changed remotely since its entity tag was read
    #[error("Remote item changed since last read: {0}")]
    PreconditionFailed(String),

    /// The delta token is no longer accepted; a full listing is required
    #[error("Delta token expired")]
    TokenExpired,
}

impl RemoteError {
    pub fn is_transient(&self) -> bool {
        matches!(self, RemoteError::Transient(_))
    }

    /// Short machine-readable code for audit entries
    pub fn code(&self) -> &'static str {
        match self {
            RemoteError::Transient(_) => "REMOTE_TRANSIENT",
            RemoteError::Permanent(_) => "REMOTE_PERMANENT",
            RemoteError::NotFound(_) => "REMOTE_NOT_FOUND",
            RemoteError::PreconditionFailed(_) => "REMOTE_PRECONDITION_FAILED",
            RemoteError::TokenExpired => "DELTA_TOKEN_EXPIRED",
        }
    }
}

/// A file or folder as reported by the remote drive
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteItem {
    pub id: RemoteId,
    pub name: String,
    /// Drive-relative path; absent for tombstones and the drive root
    pub path: Option<RemotePath>,
    pub parent_id: Option<RemoteId>,
    pub is_folder: bool,
    pub is_deleted: bool,
    pub size: u64,
    pub modified: Option<DateTime<Utc>>,
    pub hash: Option<FileHash>,
    pub ctag: Option<String>,
    pub etag: Option<String>,
}

impl RemoteItem {
    /// Version facts in the shape the domain compares against
    pub fn metadata(&self) -> RemoteMetadata {
        RemoteMetadata {
            id: self.id.clone(),
            size: self.size,
            modified: self.modified,
            hash: self.hash.clone(),
            ctag: self.ctag.clone(),
            etag: self.etag.clone(),
        }
    }
}

/// One page of delta results
#[derive(Debug, Clone, Default)]
pub struct DeltaPage {
    pub items: Vec<RemoteItem>,
    /// Cursor for the following page, when more pages exist
    pub next_cursor: Option<DeltaToken>,
    /// Token for the next session, present on the last page
    pub delta_token: Option<DeltaToken>,
}

impl DeltaPage {
    pub fn is_last(&self) -> bool {
        self.next_cursor.is_none()
    }

    /// The cursor to persist once this page has been applied
    pub fn trailing_token(&self) -> Option<&DeltaToken> {
        self.next_cursor.as_ref().or(self.delta_token.as_ref())
    }
}

/// Callback receiving the number of bytes transferred so far for one item
pub type ProgressSink = Arc<dyn Fn(u64) + Send + Sync>;

/// A progress sink that discards updates
pub fn no_progress() -> ProgressSink {
    Arc::new(|_| {})
}

/// Cloud drive operations the sync engine depends on
#[async_trait::async_trait]
pub trait IRemoteDrive: Send + Sync {
    /// The drive's root folder
    async fn get_root(&self) -> Result<RemoteItem, RemoteError>;

    /// Direct children of a folder
    async fn list_children(&self, folder_id: &RemoteId) -> Result<Vec<RemoteItem>, RemoteError>;

    /// A delta token marking "now", without listing any items
    async fn latest_delta_token(&self) -> Result<DeltaToken, RemoteError>;

    /// Fetch one page of changes after `cursor` (from the beginning when `None`)
    async fn get_delta_page(&self, cursor: Option<&DeltaToken>) -> Result<DeltaPage, RemoteError>;

    /// Create or replace the file at `path`
    ///
    /// When `if_match` is given the upload only succeeds if the remote
    /// entity tag still matches.
    async fn upload(
        &self,
        path: &RemotePath,
        content: Vec<u8>,
        if_match: Option<&str>,
        progress: ProgressSink,
    ) -> Result<RemoteItem, RemoteError>;

    /// Fetch the content of a file
    async fn download(&self, id: &RemoteId, progress: ProgressSink) -> Result<Vec<u8>, RemoteError>;

    async fn delete(&self, id: &RemoteId) -> Result<(), RemoteError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    fn token(s: &str) -> DeltaToken {
        DeltaToken::new(s.to_string()).unwrap()
    }

    #[test]
    fn test_trailing_token_prefers_next_cursor() {
        let page = DeltaPage {
            items: vec![],
            next_cursor: Some(token("next")),
            delta_token: None,
        };
        assert!(!page.is_last());
        assert_eq!(page.trailing_token().unwrap().as_str(), "next");

        let last = DeltaPage {
            items: vec![],
            next_cursor: None,
            delta_token: Some(token("final")),
        };
        assert!(last.is_last());
        assert_eq!(last.trailing_token().unwrap().as_str(), "final");
    }

    #[test]
    fn test_error_classification() {
        assert!(RemoteError::Transient("timeout".into()).is_transient());
        assert!(!RemoteError::TokenExpired.is_transient());
        assert_eq!(
            RemoteError::PreconditionFailed("etag".into()).code(),
            "REMOTE_PRECONDITION_FAILED"
        );
    }
}
