//! Conflict records
//!
//! A [`SyncConflict`] is written when both replicas changed since the last
//! known-synced state, or when a first sync finds a local file that does not
//! match the remote one. The engine creates conflicts and never touches them
//! afterwards except to mark them resolved.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::str::FromStr;

use super::errors::DomainError;
use super::newtypes::{AccountId, ConflictId, FileHash, RemotePath};

/// Facts about one side's version at detection time
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VersionInfo {
    pub size_bytes: u64,
    pub modified_at: Option<DateTime<Utc>>,
    pub hash: Option<FileHash>,
    pub etag: Option<String>,
}

impl VersionInfo {
    pub fn new(size_bytes: u64, modified_at: Option<DateTime<Utc>>) -> Self {
        Self {
            size_bytes,
            modified_at,
            hash: None,
            etag: None,
        }
    }

    pub fn with_hash(mut self, hash: Option<FileHash>) -> Self {
        self.hash = hash;
        self
    }

    pub fn with_etag(mut self, etag: Option<String>) -> Self {
        self.etag = etag;
        self
    }
}

/// Why the conflict was raised
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConflictKind {
    /// Both sides changed after the last sync
    BothModified,
    /// First sync found differing local and remote files at the same path
    FirstSyncMismatch,
}

impl ConflictKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ConflictKind::BothModified => "both_modified",
            ConflictKind::FirstSyncMismatch => "first_sync_mismatch",
        }
    }
}

impl FromStr for ConflictKind {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "both_modified" => Ok(ConflictKind::BothModified),
            "first_sync_mismatch" => Ok(ConflictKind::FirstSyncMismatch),
            other => Err(DomainError::ValidationFailed(format!(
                "Unknown conflict kind: {other}"
            ))),
        }
    }
}

/// Strategy chosen by the resolution collaborator
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Resolution {
    KeepLocal,
    KeepRemote,
    KeepBoth,
}

impl Resolution {
    pub fn as_str(&self) -> &'static str {
        match self {
            Resolution::KeepLocal => "keep_local",
            Resolution::KeepRemote => "keep_remote",
            Resolution::KeepBoth => "keep_both",
        }
    }
}

impl std::fmt::Display for Resolution {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Resolution {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "keep_local" => Ok(Resolution::KeepLocal),
            "keep_remote" => Ok(Resolution::KeepRemote),
            "keep_both" => Ok(Resolution::KeepBoth),
            other => Err(DomainError::ValidationFailed(format!(
                "Unknown resolution: {other}"
            ))),
        }
    }
}

/// A recorded disagreement between the local and remote replicas
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncConflict {
    id: ConflictId,
    account_id: AccountId,
    path: RemotePath,
    kind: ConflictKind,
    local: VersionInfo,
    remote: VersionInfo,
    detected_at: DateTime<Utc>,
    resolution: Option<Resolution>,
    resolved: bool,
    resolved_at: Option<DateTime<Utc>>,
}

impl SyncConflict {
    /// Create a new unresolved conflict
    pub fn new(
        account_id: AccountId,
        path: RemotePath,
        kind: ConflictKind,
        local: VersionInfo,
        remote: VersionInfo,
    ) -> Self {
        Self {
            id: ConflictId::new(),
            account_id,
            path,
            kind,
            local,
            remote,
            detected_at: Utc::now(),
            resolution: None,
            resolved: false,
            resolved_at: None,
        }
    }

    /// Rebuild a conflict from stored fields
    #[allow(clippy::too_many_arguments)]
    pub fn from_parts(
        id: ConflictId,
        account_id: AccountId,
        path: RemotePath,
        kind: ConflictKind,
        local: VersionInfo,
        remote: VersionInfo,
        detected_at: DateTime<Utc>,
        resolution: Option<Resolution>,
        resolved_at: Option<DateTime<Utc>>,
    ) -> Self {
        Self {
            id,
            account_id,
            path,
            kind,
            local,
            remote,
            detected_at,
            resolution,
            resolved: resolved_at.is_some(),
            resolved_at,
        }
    }

    pub fn id(&self) -> &ConflictId {
        &self.id
    }

    pub fn account_id(&self) -> &AccountId {
        &self.account_id
    }

    pub fn path(&self) -> &RemotePath {
        &self.path
    }

    pub fn kind(&self) -> ConflictKind {
        self.kind
    }

    pub fn local(&self) -> &VersionInfo {
        &self.local
    }

    pub fn remote(&self) -> &VersionInfo {
        &self.remote
    }

    pub fn detected_at(&self) -> DateTime<Utc> {
        self.detected_at
    }

    pub fn resolution(&self) -> Option<Resolution> {
        self.resolution
    }

    pub fn is_resolved(&self) -> bool {
        self.resolved
    }

    pub fn resolved_at(&self) -> Option<DateTime<Utc>> {
        self.resolved_at
    }

    /// Mark the conflict resolved with the chosen strategy
    ///
    /// # Errors
    /// Returns `DomainError::InvalidState` if it was already resolved
    pub fn mark_resolved(&mut self, resolution: Resolution) -> Result<(), DomainError> {
        if self.resolved {
            return Err(DomainError::InvalidState {
                from: "resolved".to_string(),
                to: "resolved".to_string(),
            });
        }
        self.resolution = Some(resolution);
        self.resolved = true;
        self.resolved_at = Some(Utc::now());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn conflict() -> SyncConflict {
        SyncConflict::new(
            AccountId::new(),
            RemotePath::new("/Documents/report.docx".to_string()).unwrap(),
            ConflictKind::BothModified,
            VersionInfo::new(100, Some(Utc::now())),
            VersionInfo::new(120, Some(Utc::now())).with_etag(Some("e2".into())),
        )
    }

    #[test]
    fn test_new_conflict_is_unresolved() {
        let c = conflict();
        assert!(!c.is_resolved());
        assert!(c.resolution().is_none());
        assert_eq!(c.remote().etag.as_deref(), Some("e2"));
    }

    #[test]
    fn test_mark_resolved_once() {
        let mut c = conflict();
        c.mark_resolved(Resolution::KeepBoth).unwrap();
        assert!(c.is_resolved());
        assert_eq!(c.resolution(), Some(Resolution::KeepBoth));
        assert!(c.resolved_at().is_some());
        assert!(c.mark_resolved(Resolution::KeepLocal).is_err());
    }

    #[test]
    fn test_kind_and_resolution_parse() {
        assert_eq!(
            "first_sync_mismatch".parse::<ConflictKind>().unwrap(),
            ConflictKind::FirstSyncMismatch
        );
        assert_eq!("keep_remote".parse::<Resolution>().unwrap(), Resolution::KeepRemote);
        assert!("manual".parse::<Resolution>().is_err());
    }
}
