//! Classification of remote changes into rows
//!
//! [`RemoteChangeClassifier`] is the [`DeltaPageHandler`] used by the
//! orchestrator. For every remote item in a page it finds the stored row
//! (by remote id, then by path), decides what the change means, and
//! returns the updated rows for the page's atomic commit:
//!
//! - tombstones and renames clear the remote identity of the old row;
//!   deletion reconciliation acts on it later
//! - items outside the selected folders are tracked as `SyncOnly`
//! - folders are `Synced` and created locally
//! - files go through [`ConflictDetectionService`] with fresh local facts
//!
//! A page never yields two rows for the same path.

use std::{collections::HashMap, sync::Arc};

use async_trait::async_trait;
use chrono::Utc;
use mirrordrive_audit::OperationLogger;
use mirrordrive_conflict::{ConflictDetectionService, Observation};
use mirrordrive_core::{
    domain::{
        newtypes::{RemoteId, RemotePath, UniqueId},
        AccountContext, DriveItem, LocalMetadata, SyncStatus,
    },
    ports::{ILocalFileSystem, IStateRepository, RemoteItem},
};
use tracing::{debug, warn};

use crate::{
    delta::{DeltaPageHandler, PageOutcome},
    error::SyncError,
    scanner::needs_hash,
};

/// Rows touched by the page being classified
#[derive(Default)]
struct PageRows {
    rows: Vec<DriveItem>,
    by_id: HashMap<UniqueId, usize>,
    by_path: HashMap<RemotePath, usize>,
    by_remote_id: HashMap<RemoteId, usize>,
}

impl PageRows {
    fn put(&mut self, item: DriveItem) {
        match self.by_id.get(item.id()).copied() {
            Some(idx) => {
                if let Some(old) = self.rows[idx].remote_id() {
                    self.by_remote_id.remove(old);
                }
                if let Some(new) = item.remote_id() {
                    self.by_remote_id.insert(new.clone(), idx);
                }
                self.rows[idx] = item;
            }
            None => {
                let idx = self.rows.len();
                self.by_id.insert(*item.id(), idx);
                self.by_path.insert(item.path().clone(), idx);
                if let Some(remote_id) = item.remote_id() {
                    self.by_remote_id.insert(remote_id.clone(), idx);
                }
                self.rows.push(item);
            }
        }
    }

    /// The page's version of a stored row wins over the stored one
    fn overlay(&self, stored: DriveItem) -> DriveItem {
        match self.by_id.get(stored.id()) {
            Some(&idx) => self.rows[idx].clone(),
            None => stored,
        }
    }
}

/// Turns remote items into rows for one sync run
pub struct RemoteChangeClassifier {
    conflicts: Arc<ConflictDetectionService>,
    logger: OperationLogger,
    local: Arc<dyn ILocalFileSystem>,
    store: Arc<dyn IStateRepository>,
}

impl RemoteChangeClassifier {
    pub fn new(
        conflicts: Arc<ConflictDetectionService>,
        logger: OperationLogger,
        local: Arc<dyn ILocalFileSystem>,
        store: Arc<dyn IStateRepository>,
    ) -> Self {
        Self {
            conflicts,
            logger,
            local,
            store,
        }
    }

    async fn find_by_remote_id(
        &self,
        page: &PageRows,
        account: &AccountContext,
        remote_id: &RemoteId,
    ) -> Result<Option<DriveItem>, SyncError> {
        if let Some(&idx) = page.by_remote_id.get(remote_id) {
            return Ok(Some(page.rows[idx].clone()));
        }
        let stored = self
            .store
            .get_item_by_remote_id(account.id(), remote_id)
            .await
            .map_err(SyncError::storage)?;
        // A stored row already rewritten by this page no longer carries the id.
        Ok(stored.filter(|row| !page.by_id.contains_key(row.id())))
    }

    async fn find_by_path(
        &self,
        page: &PageRows,
        account: &AccountContext,
        path: &RemotePath,
    ) -> Result<Option<DriveItem>, SyncError> {
        if let Some(&idx) = page.by_path.get(path) {
            return Ok(Some(page.rows[idx].clone()));
        }
        let stored = self
            .store
            .get_item_by_path(account.id(), path)
            .await
            .map_err(SyncError::storage)?;
        Ok(stored.map(|row| page.overlay(row)))
    }

    /// The row an item at `path` should update
    ///
    /// A row holding the item's id under another path was renamed or
    /// moved; it loses its remote identity and the new path gets its own row.
    async fn resolve_existing(
        &self,
        page: &mut PageRows,
        account: &AccountContext,
        item: &RemoteItem,
        path: &RemotePath,
    ) -> Result<Option<DriveItem>, SyncError> {
        if let Some(mut row) = self.find_by_remote_id(page, account, &item.id).await? {
            if row.path() == path {
                return Ok(Some(row));
            }
            debug!(from = %row.path(), to = %path, "Remote item moved");
            row.clear_remote_identity();
            page.put(row);
        }
        self.find_by_path(page, account, path).await
    }

    async fn classify(
        &self,
        account: &AccountContext,
        item: RemoteItem,
        page: &mut PageRows,
        outcome: &mut PageOutcome,
    ) -> Result<(), SyncError> {
        if item.is_deleted {
            if let Some(mut row) = self.find_by_remote_id(page, account, &item.id).await? {
                debug!(path = %row.path(), "Remote item deleted");
                row.clear_remote_identity();
                page.put(row);
            }
            return Ok(());
        }

        let Some(path) = item.path.clone() else {
            debug!(id = %item.id, "Skipping item without a path");
            return Ok(());
        };
        let existing = self.resolve_existing(page, account, &item, &path).await?;
        let remote = item.metadata();

        if !account.settings().is_selected(&path) {
            match existing {
                None => page.put(DriveItem::discovered_remotely(
                    *account.id(),
                    path,
                    item.is_folder,
                    &remote,
                    SyncStatus::SyncOnly,
                )),
                Some(mut row) if matches!(row.status(), SyncStatus::Synced | SyncStatus::SyncOnly) => {
                    row.apply_remote(&remote);
                    row.mark_sync_only()?;
                    page.put(row);
                }
                Some(row) => {
                    debug!(path = %row.path(), status = %row.status(), "Deselected item still owes a transfer");
                }
            }
            return Ok(());
        }

        let local_path = account.local_root().join_remote(&path)?;

        if item.is_folder {
            let row = match existing {
                Some(mut row) => {
                    row.apply_remote(&remote);
                    if matches!(row.status(), SyncStatus::SyncOnly) {
                        row.mark_pending_download()?;
                    }
                    row.mark_synced(None, Utc::now())?;
                    row
                }
                None => DriveItem::discovered_remotely(
                    *account.id(),
                    path.clone(),
                    true,
                    &remote,
                    SyncStatus::Synced,
                ),
            };
            if let Err(e) = self.local.create_directory(&local_path).await {
                warn!(path = %path, error = %e, "Failed to create local folder");
            }
            page.put(row);
            return Ok(());
        }

        let state = self
            .local
            .get_state(&local_path)
            .await
            .map_err(SyncError::io)?;
        let local = if state.is_regular_file() {
            let modified = state.modified.unwrap_or_else(Utc::now);
            let hash = match &existing {
                Some(row) if needs_hash(row, state.size, modified) => Some(
                    self.local
                        .compute_hash(&local_path)
                        .await
                        .map_err(SyncError::io)?,
                ),
                _ => None,
            };
            Some(LocalMetadata {
                size: state.size,
                modified,
                hash,
            })
        } else {
            None
        };

        let detection = self
            .conflicts
            .detect(
                &self.logger,
                existing,
                Observation {
                    path: &path,
                    remote: &remote,
                    local: local.as_ref(),
                },
            )
            .await?;

        if detection.is_download() {
            outcome.downloads += 1;
        } else if detection.is_conflict() {
            outcome.conflicts += 1;
        }
        page.put(detection.into_item());
        Ok(())
    }
}

#[async_trait]
impl DeltaPageHandler for RemoteChangeClassifier {
    async fn handle_page(
        &self,
        account: &AccountContext,
        items: Vec<RemoteItem>,
    ) -> Result<PageOutcome, SyncError> {
        let mut page = PageRows::default();
        let mut outcome = PageOutcome::default();

        for item in items {
            self.classify(account, item, &mut page, &mut outcome)
                .await?;
        }

        outcome.rows = page.rows;
        Ok(outcome)
    }
}

#[cfg(test)]
mod tests {
    use mirrordrive_core::domain::{newtypes::AccountId, RemoteMetadata};

    use super::*;

    fn row(path: &str, remote_id: &str) -> DriveItem {
        let remote = RemoteMetadata {
            id: RemoteId::new(remote_id.to_string()).unwrap(),
            size: 1,
            modified: None,
            hash: None,
            ctag: Some("c1".to_string()),
            etag: None,
        };
        DriveItem::discovered_remotely(
            AccountId::new(),
            RemotePath::new(path.to_string()).unwrap(),
            false,
            &remote,
            SyncStatus::Synced,
        )
    }

    #[test]
    fn test_page_rows_replace_keeps_single_row_per_path() {
        let mut page = PageRows::default();
        let mut item = row("/a.txt", "R1");
        page.put(item.clone());

        item.clear_remote_identity();
        page.put(item.clone());

        assert_eq!(page.rows.len(), 1);
        assert_eq!(page.by_path.len(), 1);
        assert!(page.by_remote_id.is_empty());
        assert!(page.rows[0].remote_id().is_none());
    }

    #[test]
    fn test_overlay_prefers_page_version() {
        let mut page = PageRows::default();
        let stored = row("/a.txt", "R1");
        let mut updated = stored.clone();
        updated.clear_remote_identity();
        page.put(updated);

        assert!(page.overlay(stored).remote_id().is_none());
        let other = row("/b.txt", "R2");
        assert_eq!(page.overlay(other.clone()), other);
    }
}
