//! Local file scanner
//!
//! Walks an account's local root and turns every entry into a [`FileRecord`]
//! keyed by its drive-relative path. Entries matching an exclude pattern,
//! and everything beneath an excluded folder, are left out.
//!
//! Content hashes are expensive, so a file is only hashed when its stored
//! row cannot settle the comparison on its own: same size, different
//! modification time, and a stored hash to compare against.

use std::{collections::HashMap, sync::Arc};

use chrono::{DateTime, Utc};
use glob::Pattern;
use mirrordrive_core::{
    domain::{
        newtypes::{FileHash, RemotePath, SyncPath},
        DriveItem, LocalMetadata,
    },
    ports::ILocalFileSystem,
};
use tracing::{debug, info, instrument, warn};

use crate::error::SyncError;

/// One local file or folder found by a scan
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileRecord {
    /// Drive-relative path (the pairing key)
    pub path: RemotePath,
    pub local_path: SyncPath,
    pub is_dir: bool,
    pub size: u64,
    pub modified: DateTime<Utc>,
    pub hash: Option<FileHash>,
}

impl FileRecord {
    pub fn metadata(&self) -> LocalMetadata {
        LocalMetadata {
            size: self.size,
            modified: self.modified,
            hash: self.hash.clone(),
        }
    }
}

/// Produces [`FileRecord`]s for a local root
pub struct LocalFileScanner {
    local: Arc<dyn ILocalFileSystem>,
    exclude: Vec<Pattern>,
}

impl LocalFileScanner {
    /// Create a scanner with the given exclude globs
    ///
    /// Invalid patterns are logged and skipped.
    pub fn new(local: Arc<dyn ILocalFileSystem>, exclude: &[String]) -> Self {
        let exclude = exclude
            .iter()
            .filter_map(|raw| match Pattern::new(raw) {
                Ok(p) => Some(p),
                Err(e) => {
                    warn!(pattern = %raw, error = %e, "Skipping invalid exclude pattern");
                    None
                }
            })
            .collect();
        Self { local, exclude }
    }

    /// True if the path or its file name matches an exclude pattern
    pub fn is_excluded(&self, path: &RemotePath) -> bool {
        let relative = path.as_str().trim_start_matches('/');
        let name = path.file_name().unwrap_or(relative);
        self.exclude
            .iter()
            .any(|p| p.matches(relative) || p.matches(name))
    }

    /// True if the path or any folder above it is excluded
    pub fn is_excluded_tree(&self, path: &RemotePath) -> bool {
        let mut current = Some(path.clone());
        while let Some(p) = current {
            if p.is_root() {
                return false;
            }
            if self.is_excluded(&p) {
                return true;
            }
            current = p.parent();
        }
        false
    }

    /// Scan `root`, comparing against the stored rows keyed by path
    ///
    /// Entries whose names cannot become drive paths (not UTF-8) and files
    /// that vanish between listing and hashing are skipped.
    #[instrument(skip(self, known), fields(root = %root))]
    pub async fn scan(
        &self,
        root: &SyncPath,
        known: &HashMap<RemotePath, DriveItem>,
    ) -> Result<Vec<FileRecord>, SyncError> {
        let entries = self.local.walk(root).await.map_err(SyncError::io)?;
        let mut excluded_dirs: Vec<RemotePath> = Vec::new();
        let mut records = Vec::with_capacity(entries.len());

        for entry in entries {
            let path = match entry
                .path
                .relative_to(root)
                .and_then(|relative| RemotePath::from_relative(&relative))
            {
                Ok(path) => path,
                Err(e) => {
                    warn!(path = %entry.path, error = %e, "Skipping entry that cannot be synced");
                    continue;
                }
            };
            if path.is_root() {
                continue;
            }
            if excluded_dirs.iter().any(|d| path.is_within(d)) {
                continue;
            }
            if self.is_excluded(&path) {
                debug!(path = %path, "Excluded from sync");
                if entry.is_dir {
                    excluded_dirs.push(path);
                }
                continue;
            }

            let hash = if entry.is_dir {
                None
            } else {
                match known.get(&path) {
                    Some(row) if needs_hash(row, entry.size, entry.modified) => {
                        match self.local.compute_hash(&entry.path).await {
                            Ok(h) => Some(h),
                            Err(e) => {
                                warn!(path = %path, error = %e, "Skipping file that could not be hashed");
                                continue;
                            }
                        }
                    }
                    _ => None,
                }
            };

            records.push(FileRecord {
                path,
                local_path: entry.path,
                is_dir: entry.is_dir,
                size: entry.size,
                modified: entry.modified,
                hash,
            });
        }

        info!(
            entries = records.len(),
            hashed = records.iter().filter(|r| r.hash.is_some()).count(),
            "Local scan completed"
        );
        Ok(records)
    }
}

/// What is on disk at `path` for a row that owes a download
///
/// `None` when no regular file is there. The file is hashed whenever the
/// row records a hash, as [`DriveItem::local_file_diverged`] expects.
pub(crate) async fn observe_download_target(
    local: &dyn ILocalFileSystem,
    row: &DriveItem,
    path: &SyncPath,
) -> anyhow::Result<Option<LocalMetadata>> {
    let state = local.get_state(path).await?;
    if !state.is_regular_file() {
        return Ok(None);
    }
    let hash = match row.local_hash() {
        Some(_) => Some(local.compute_hash(path).await?),
        None => None,
    };
    Ok(Some(LocalMetadata {
        size: state.size,
        modified: state.modified.unwrap_or_else(Utc::now),
        hash,
    }))
}

pub(crate) fn needs_hash(row: &DriveItem, size: u64, modified: DateTime<Utc>) -> bool {
    row.size() == size
        && row.local_hash().is_some()
        && row
            .local_modified()
            .map_or(true, |m| m.timestamp() != modified.timestamp())
}
