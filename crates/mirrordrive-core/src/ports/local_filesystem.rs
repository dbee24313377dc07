//! Local filesystem port (driven/secondary port)
//!
//! Directory walking, file I/O and content hashing for the local replica.
//!
//! ## Design Notes
//!
//! - Uses `anyhow::Result` because filesystem errors are adapter-specific.
//! - `write_file` must be atomic (write to a temporary file, then rename)
//!   so a crash never leaves a half-written file under its final name.
//! - `hash_bytes` must use the same algorithm the remote drive reports, so
//!   downloads can be verified before they are written.

use chrono::{DateTime, Utc};

use crate::domain::newtypes::{FileHash, SyncPath};

/// Snapshot of a path on the local filesystem
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileSystemState {
    pub exists: bool,
    /// Regular file (false for directories)
    pub is_file: bool,
    pub size: u64,
    pub modified: Option<DateTime<Utc>>,
}

impl FileSystemState {
    pub fn not_found() -> Self {
        Self {
            exists: false,
            is_file: false,
            size: 0,
            modified: None,
        }
    }

    pub fn is_regular_file(&self) -> bool {
        self.exists && self.is_file
    }

    pub fn is_directory(&self) -> bool {
        self.exists && !self.is_file
    }
}

/// One entry yielded by a directory walk
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocalEntry {
    pub path: SyncPath,
    pub is_dir: bool,
    pub size: u64,
    pub modified: DateTime<Utc>,
}

/// Local filesystem operations
#[async_trait::async_trait]
pub trait ILocalFileSystem: Send + Sync {
    /// Recursively list everything under `root` (excluding `root` itself)
    async fn walk(&self, root: &SyncPath) -> anyhow::Result<Vec<LocalEntry>>;

    async fn read_file(&self, path: &SyncPath) -> anyhow::Result<Vec<u8>>;

    /// Atomically write a file, creating parent directories as needed
    async fn write_file(&self, path: &SyncPath, content: &[u8]) -> anyhow::Result<()>;

    /// Remove a file; a missing file is not an error
    async fn delete_file(&self, path: &SyncPath) -> anyhow::Result<()>;

    /// Remove a directory only if it is empty; returns whether it was removed
    async fn remove_empty_dir(&self, path: &SyncPath) -> anyhow::Result<bool>;

    async fn create_directory(&self, path: &SyncPath) -> anyhow::Result<()>;

    async fn get_state(&self, path: &SyncPath) -> anyhow::Result<FileSystemState>;

    async fn compute_hash(&self, path: &SyncPath) -> anyhow::Result<FileHash>;

    /// Hash in-memory content with the drive's algorithm
    fn hash_bytes(&self, content: &[u8]) -> anyhow::Result<FileHash>;
}
