//! In-memory progress snapshot
//!
//! [`SyncState`] is rebuilt on every progress update and broadcast to
//! observers. It is never persisted.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use super::newtypes::{AccountId, SessionId};

/// Lifecycle of one sync run as seen by observers
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncRunStatus {
    #[default]
    Idle,
    Running,
    Completed,
    Failed,
    /// Stopped by a cancellation request
    Paused,
}

impl SyncRunStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            SyncRunStatus::Completed | SyncRunStatus::Failed | SyncRunStatus::Paused
        )
    }
}

/// Pipeline phase of the orchestrator
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncPhase {
    ValidateAccount,
    FetchDelta,
    DetectConflicts,
    TransferUploads,
    TransferDownloads,
    ReconcileDeletions,
    Finalize,
}

impl SyncPhase {
    pub fn label(&self) -> &'static str {
        match self {
            SyncPhase::ValidateAccount => "Validating account",
            SyncPhase::FetchDelta => "Fetching remote changes",
            SyncPhase::DetectConflicts => "Scanning local files",
            SyncPhase::TransferUploads => "Uploading",
            SyncPhase::TransferDownloads => "Downloading",
            SyncPhase::ReconcileDeletions => "Reconciling deletions",
            SyncPhase::Finalize => "Finishing",
        }
    }
}

/// Progress snapshot of the current (or last) sync run
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SyncState {
    pub account_id: Option<AccountId>,
    pub session_id: Option<SessionId>,
    pub status: SyncRunStatus,
    pub phase: Option<SyncPhase>,
    /// Label of the folder or phase currently being worked on
    pub current_folder: Option<String>,
    pub total_files: u64,
    pub completed_files: u64,
    pub total_bytes: u64,
    pub completed_bytes: u64,
    pub uploads_in_flight: u32,
    pub downloads_in_flight: u32,
    /// Bytes per second over the last update interval
    pub throughput: f64,
    /// Time remaining at current throughput; `None` while throughput is zero
    pub eta: Option<Duration>,
    pub conflicts: u64,
    pub failures: u64,
    pub last_error: Option<String>,
}

impl SyncState {
    /// Fresh idle state for an account
    pub fn idle(account_id: AccountId) -> Self {
        Self {
            account_id: Some(account_id),
            ..Self::default()
        }
    }

    pub fn remaining_bytes(&self) -> u64 {
        self.total_bytes.saturating_sub(self.completed_bytes)
    }
}

/// Throughput in bytes/second from a byte delta over an elapsed interval
///
/// Returns 0.0 for an empty interval or no progress.
pub fn throughput(byte_delta: u64, elapsed: Duration) -> f64 {
    let secs = elapsed.as_secs_f64();
    if secs <= 0.0 || byte_delta == 0 {
        return 0.0;
    }
    byte_delta as f64 / secs
}

/// Remaining time at the given throughput, `None` when throughput is zero
pub fn estimate_remaining(remaining_bytes: u64, throughput: f64) -> Option<Duration> {
    if throughput <= 0.0 || !throughput.is_finite() {
        return None;
    }
    Some(Duration::from_secs_f64(remaining_bytes as f64 / throughput))
}
