//! `tokio::fs` implementation of [`ILocalFileSystem`]
//!
//! - **Atomic writes**: content goes to `.mirrordrive-<name>.partial` next to
//!   the target and is renamed into place, so a crash never leaves a
//!   half-written file under its final name. The default exclude patterns
//!   hide these files from the scanner and [`walk`](ILocalFileSystem::walk)
//!   skips them too.
//! - **quickXorHash**: the OneDrive-compatible hash, so local and remote
//!   hashes can be compared without downloading content.

use std::{io::ErrorKind, path::Path};

use base64::Engine;
use chrono::{DateTime, Utc};
use mirrordrive_core::{
    domain::newtypes::{FileHash, SyncPath},
    ports::{FileSystemState, ILocalFileSystem, LocalEntry},
};
use tracing::{debug, instrument, warn};

/// Entry facts for a walk; `None` for symlinks
async fn inspect(entry: &tokio::fs::DirEntry) -> std::io::Result<Option<LocalEntry>> {
    if entry.file_type().await?.is_symlink() {
        return Ok(None);
    }
    let metadata = entry.metadata().await?;
    let is_dir = metadata.is_dir();
    let path = SyncPath::new(entry.path())
        .map_err(|e| std::io::Error::new(ErrorKind::InvalidInput, e))?;
    Ok(Some(LocalEntry {
        path,
        is_dir,
        size: if is_dir { 0 } else { metadata.len() },
        modified: to_utc(&metadata).unwrap_or_else(Utc::now),
    }))
}

/// Prefix of temporary files written during atomic writes
pub const PARTIAL_PREFIX: &str = ".mirrordrive-";

/// Suffix of temporary files written during atomic writes
pub const PARTIAL_SUFFIX: &str = ".partial";

/// The real local disk
///
/// Zero-sized: every operation takes its context from the [`SyncPath`]
/// arguments.
#[derive(Debug, Clone, Default)]
pub struct LocalFileSystemAdapter;

impl LocalFileSystemAdapter {
    #[must_use]
    pub fn new() -> Self {
        Self
    }
}

const XOR_HASH_BYTES: usize = 20;
const XOR_HASH_BITS: usize = XOR_HASH_BYTES * 8;
const XOR_HASH_STEP: usize = 11;

/// Raw quickXorHash digest
///
/// Byte `i` of the input is XOR-ed into a 160-bit ring at bit `11 * i mod 160`,
/// spilling into the next cell when it straddles a byte boundary. The input
/// length, little-endian, is folded into the first 8 bytes at the end.
fn quick_xor_digest(content: &[u8]) -> [u8; XOR_HASH_BYTES] {
    let mut cells = [0u8; XOR_HASH_BYTES];
    let mut bit = 0usize;
    for &byte in content {
        let cell = bit / 8;
        let [low, high] = (u16::from(byte) << (bit % 8)).to_le_bytes();
        cells[cell] ^= low;
        cells[(cell + 1) % XOR_HASH_BYTES] ^= high;
        bit = (bit + XOR_HASH_STEP) % XOR_HASH_BITS;
    }
    for (cell, len_byte) in cells.iter_mut().zip((content.len() as u64).to_le_bytes()) {
        *cell ^= len_byte;
    }
    cells
}

/// quickXorHash of in-memory content, base64-encoded as the Graph drive reports it
pub fn quick_xor_hash(content: &[u8]) -> anyhow::Result<FileHash> {
    let encoded = base64::engine::general_purpose::STANDARD.encode(quick_xor_digest(content));
    Ok(FileHash::new(encoded)?)
}

/// True for the temporary files produced by [`LocalFileSystemAdapter::write_file`]
pub fn is_partial_file(path: &Path) -> bool {
    path.file_name()
        .and_then(|n| n.to_str())
        .is_some_and(|n| n.starts_with(PARTIAL_PREFIX) && n.ends_with(PARTIAL_SUFFIX))
}

fn partial_path(target: &Path) -> std::path::PathBuf {
    let name = target
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    target.with_file_name(format!("{PARTIAL_PREFIX}{name}{PARTIAL_SUFFIX}"))
}

fn to_utc(metadata: &std::fs::Metadata) -> Option<DateTime<Utc>> {
    metadata.modified().ok().map(DateTime::<Utc>::from)
}

#[async_trait::async_trait]
impl ILocalFileSystem for LocalFileSystemAdapter {
    /// Only a failure to list `root` itself is an error. Subfolders that
    /// cannot be listed and entries that vanish or cannot be inspected
    /// mid-walk are logged and left out.
    #[instrument(skip(self), fields(root = %root))]
    async fn walk(&self, root: &SyncPath) -> anyhow::Result<Vec<LocalEntry>> {
        let mut entries = Vec::new();
        let mut pending = vec![root.as_path().to_path_buf()];

        while let Some(dir) = pending.pop() {
            let mut reader = match tokio::fs::read_dir(&dir).await {
                Ok(r) => r,
                Err(e) if e.kind() == ErrorKind::NotFound && dir == root.as_path() => {
                    debug!("sync root does not exist yet");
                    return Ok(entries);
                }
                Err(e) if dir == root.as_path() => return Err(e.into()),
                Err(e) => {
                    warn!(dir = %dir.display(), error = %e, "skipping unreadable folder");
                    continue;
                }
            };

            loop {
                let entry = match reader.next_entry().await {
                    Ok(Some(entry)) => entry,
                    Ok(None) => break,
                    Err(e) => {
                        warn!(dir = %dir.display(), error = %e, "folder listing cut short");
                        break;
                    }
                };
                let path = entry.path();
                if is_partial_file(&path) {
                    continue;
                }
                match inspect(&entry).await {
                    Ok(Some(found)) => {
                        if found.is_dir {
                            pending.push(path);
                        }
                        entries.push(found);
                    }
                    // Symlinks are neither followed nor synced.
                    Ok(None) => {}
                    Err(e) if e.kind() == ErrorKind::NotFound => {
                        debug!(path = %path.display(), "entry vanished during walk");
                    }
                    Err(e) => {
                        warn!(path = %path.display(), error = %e, "skipping entry that cannot be inspected");
                    }
                }
            }
        }

        entries.sort_by(|a, b| a.path.as_path().cmp(b.path.as_path()));
        debug!(entries = entries.len(), "walk complete");
        Ok(entries)
    }

    #[instrument(skip(self), fields(path = %path))]
    async fn read_file(&self, path: &SyncPath) -> anyhow::Result<Vec<u8>> {
        let data = tokio::fs::read(path.as_path()).await?;
        debug!(bytes = data.len(), "file read complete");
        Ok(data)
    }

    #[instrument(skip(self, content), fields(path = %path, bytes = content.len()))]
    async fn write_file(&self, path: &SyncPath, content: &[u8]) -> anyhow::Result<()> {
        let target = path.as_path();
        if let Some(parent) = target.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        let tmp_path = partial_path(target);
        debug!(?tmp_path, "writing to temporary file");
        if let Err(e) = tokio::fs::write(&tmp_path, content).await {
            let _ = tokio::fs::remove_file(&tmp_path).await;
            return Err(e.into());
        }

        tokio::fs::rename(&tmp_path, target).await?;
        debug!("write complete");
        Ok(())
    }

    #[instrument(skip(self), fields(path = %path))]
    async fn delete_file(&self, path: &SyncPath) -> anyhow::Result<()> {
        match tokio::fs::remove_file(path.as_path()).await {
            Ok(()) => {
                debug!("file removed");
                Ok(())
            }
            Err(e) if e.kind() == ErrorKind::NotFound => {
                debug!("file already gone");
                Ok(())
            }
            Err(e) => Err(e.into()),
        }
    }

    #[instrument(skip(self), fields(path = %path))]
    async fn remove_empty_dir(&self, path: &SyncPath) -> anyhow::Result<bool> {
        let mut reader = match tokio::fs::read_dir(path.as_path()).await {
            Ok(r) => r,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(false),
            Err(e) => return Err(e.into()),
        };
        if reader.next_entry().await?.is_some() {
            debug!("directory not empty, kept");
            return Ok(false);
        }
        tokio::fs::remove_dir(path.as_path()).await?;
        debug!("empty directory removed");
        Ok(true)
    }

    #[instrument(skip(self), fields(path = %path))]
    async fn create_directory(&self, path: &SyncPath) -> anyhow::Result<()> {
        tokio::fs::create_dir_all(path.as_path()).await?;
        Ok(())
    }

    #[instrument(skip(self), fields(path = %path))]
    async fn get_state(&self, path: &SyncPath) -> anyhow::Result<FileSystemState> {
        let metadata = match tokio::fs::metadata(path.as_path()).await {
            Ok(m) => m,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                debug!("path not found");
                return Ok(FileSystemState::not_found());
            }
            Err(e) => return Err(e.into()),
        };

        Ok(FileSystemState {
            exists: true,
            is_file: metadata.is_file(),
            size: metadata.len(),
            modified: to_utc(&metadata),
        })
    }

    #[instrument(skip(self), fields(path = %path))]
    async fn compute_hash(&self, path: &SyncPath) -> anyhow::Result<FileHash> {
        let data = tokio::fs::read(path.as_path()).await?;
        let hash = quick_xor_hash(&data)?;
        debug!(hash = %hash, "hash computed");
        Ok(hash)
    }

    fn hash_bytes(&self, content: &[u8]) -> anyhow::Result<FileHash> {
        quick_xor_hash(content)
    }
}
