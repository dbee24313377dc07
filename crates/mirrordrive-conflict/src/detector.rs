//! Conflict detection logic
//!
//! Compares the last known-synced state of an item with what the remote
//! and the local disk report now. Nothing here touches storage; the
//! [`service`](crate::service) module acts on the verdicts.

use chrono::Duration;
use mirrordrive_core::{
    config::DEFAULT_FIRST_SYNC_TOLERANCE_SECS,
    domain::{DriveItem, LocalMetadata, RemoteMetadata},
};
use tracing::debug;

/// Largest timestamp tolerance accepted for first-sync matching (one day)
const MAX_TOLERANCE_SECS: u64 = 86_400;

/// Which sides changed since the row was last synced
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangeSet {
    /// Neither side changed content
    Unchanged,
    /// Only the local file changed
    LocalOnly,
    /// Only the remote content changed
    RemoteOnly,
    /// Both sides changed content
    Both,
}

/// Detects conflicts between local and remote file versions
#[derive(Debug, Clone, Copy)]
pub struct ConflictDetector {
    first_sync_tolerance: Duration,
}

impl ConflictDetector {
    /// Create a detector with the given first-sync timestamp tolerance
    pub fn new(first_sync_tolerance_secs: u64) -> Self {
        let secs = first_sync_tolerance_secs.min(MAX_TOLERANCE_SECS) as i64;
        Self {
            first_sync_tolerance: Duration::seconds(secs),
        }
    }

    pub fn first_sync_tolerance(&self) -> Duration {
        self.first_sync_tolerance
    }

    /// Classify a known row against fresh facts from both sides
    ///
    /// The remote side changed when its content tag differs from the stored
    /// one. The local side changed when the file on disk no longer matches a
    /// synced row, or when local edits are still owed an upload. A local
    /// file that is missing counts as unchanged: the remote copy wins.
    pub fn compare_known(
        existing: &DriveItem,
        remote: &RemoteMetadata,
        local: Option<&LocalMetadata>,
    ) -> ChangeSet {
        let remote_changed = existing.remote_content_changed(remote);
        let local_changed = match local {
            None => false,
            Some(local) => {
                existing.has_local_edits()
                    || (existing.status().is_synced() && existing.local_content_changed(local))
            }
        };

        debug!(
            path = %existing.path(),
            remote_changed,
            local_changed,
            "Compared known item"
        );

        match (local_changed, remote_changed) {
            (false, false) => ChangeSet::Unchanged,
            (true, false) => ChangeSet::LocalOnly,
            (false, true) => ChangeSet::RemoteOnly,
            (true, true) => ChangeSet::Both,
        }
    }

    /// True if a local file found on first sync can be adopted as-is
    ///
    /// Sizes must be equal and the timestamps no further apart than the
    /// configured tolerance. A remote item without a timestamp never matches.
    pub fn first_sync_matches(&self, remote: &RemoteMetadata, local: &LocalMetadata) -> bool {
        if remote.size != local.size {
            return false;
        }
        match remote.modified {
            Some(remote_modified) => {
                let drift = (local.modified - remote_modified).abs();
                drift <= self.first_sync_tolerance
            }
            None => false,
        }
    }
}

impl Default for ConflictDetector {
    fn default() -> Self {
        Self::new(DEFAULT_FIRST_SYNC_TOLERANCE_SECS)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};
    use mirrordrive_core::domain::{
        newtypes::{AccountId, RemoteId, RemotePath},
        SyncStatus,
    };

    fn remote(ctag: &str, size: u64) -> RemoteMetadata {
        RemoteMetadata {
            id: RemoteId::new("ITEM1".to_string()).unwrap(),
            size,
            modified: Some(Utc.with_ymd_and_hms(2026, 3, 1, 12, 0, 0).unwrap()),
            hash: None,
            ctag: Some(ctag.to_string()),
            etag: Some(format!("{ctag}-etag")),
        }
    }

    fn local(size: u64, secs_after_remote: i64) -> LocalMetadata {
        LocalMetadata {
            size,
            modified: Utc.with_ymd_and_hms(2026, 3, 1, 12, 0, 0).unwrap()
                + Duration::seconds(secs_after_remote),
            hash: None,
        }
    }

    fn synced_item(ctag: &str, size: u64) -> DriveItem {
        let mut item = DriveItem::discovered_remotely(
            AccountId::new(),
            RemotePath::new("/Documents/file1.txt".to_string()).unwrap(),
            false,
            &remote(ctag, size),
            SyncStatus::PendingDownload,
        );
        item.apply_local(&local(size, 0));
        item.mark_synced(None, Utc::now()).unwrap();
        item
    }

    #[test]
    fn test_unchanged_when_tags_and_local_file_match() {
        let item = synced_item("c1", 100);
        let result = ConflictDetector::compare_known(&item, &remote("c1", 100), Some(&local(100, 0)));
        assert_eq!(result, ChangeSet::Unchanged);
    }

    #[test]
    fn test_remote_only_when_ctag_differs() {
        let item = synced_item("c1", 100);
        let result = ConflictDetector::compare_known(&item, &remote("c2", 120), Some(&local(100, 0)));
        assert_eq!(result, ChangeSet::RemoteOnly);
    }

    #[test]
    fn test_local_only_when_file_size_differs() {
        let item = synced_item("c1", 100);
        let result = ConflictDetector::compare_known(&item, &remote("c1", 100), Some(&local(150, 30)));
        assert_eq!(result, ChangeSet::LocalOnly);
    }

    #[test]
    fn test_both_when_each_side_changed() {
        let item = synced_item("c1", 100);
        let result = ConflictDetector::compare_known(&item, &remote("c2", 120), Some(&local(150, 30)));
        assert_eq!(result, ChangeSet::Both);
    }

    #[test]
    fn test_pending_upload_counts_as_local_change() {
        let mut item = synced_item("c1", 100);
        item.mark_pending_upload().unwrap();
        let result = ConflictDetector::compare_known(&item, &remote("c2", 100), Some(&local(100, 0)));
        assert_eq!(result, ChangeSet::Both);
    }

    #[test]
    fn test_missing_local_file_lets_remote_win() {
        let mut item = synced_item("c1", 100);
        item.mark_pending_upload().unwrap();
        let result = ConflictDetector::compare_known(&item, &remote("c2", 100), None);
        assert_eq!(result, ChangeSet::RemoteOnly);
    }

    #[test]
    fn test_pending_download_row_ignores_local_drift() {
        let mut item = synced_item("c1", 100);
        item.apply_remote(&remote("c2", 300));
        item.mark_pending_download().unwrap();
        let result = ConflictDetector::compare_known(&item, &remote("c3", 310), Some(&local(100, 0)));
        assert_eq!(result, ChangeSet::RemoteOnly);
    }

    #[test]
    fn test_first_sync_matches_within_tolerance() {
        let detector = ConflictDetector::default();
        assert!(detector.first_sync_matches(&remote("c1", 100), &local(100, 59)));
        assert!(detector.first_sync_matches(&remote("c1", 100), &local(100, -60)));
    }

    #[test]
    fn test_first_sync_rejects_drift_beyond_tolerance() {
        let detector = ConflictDetector::default();
        assert!(!detector.first_sync_matches(&remote("c1", 100), &local(100, 61)));
    }

    #[test]
    fn test_first_sync_rejects_size_mismatch() {
        let detector = ConflictDetector::default();
        assert!(!detector.first_sync_matches(&remote("c1", 100), &local(101, 0)));
    }

    #[test]
    fn test_first_sync_rejects_remote_without_timestamp() {
        let detector = ConflictDetector::default();
        let mut meta = remote("c1", 100);
        meta.modified = None;
        assert!(!detector.first_sync_matches(&meta, &local(100, 0)));
    }

    #[test]
    fn test_custom_tolerance_is_honoured() {
        let detector = ConflictDetector::new(5);
        assert_eq!(detector.first_sync_tolerance(), Duration::seconds(5));
        assert!(detector.first_sync_matches(&remote("c1", 100), &local(100, 5)));
        assert!(!detector.first_sync_matches(&remote("c1", 100), &local(100, 6)));
    }
}
