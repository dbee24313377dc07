//! Sync session log
//!
//! One [`SyncSessionLog`] row per sync run. It is opened when a run starts
//! (only for accounts with detailed logging) and finalized exactly once.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::newtypes::{AccountId, SessionId};

/// Status of a sync session
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    #[default]
    Running,
    Completed,
    Failed(String),
    /// Stopped by a cancellation request
    Paused,
}

impl SessionStatus {
    pub fn is_running(&self) -> bool {
        matches!(self, SessionStatus::Running)
    }

    pub fn is_finished(&self) -> bool {
        !self.is_running()
    }

    /// Status name without failure details
    pub fn name(&self) -> &'static str {
        match self {
            SessionStatus::Running => "running",
            SessionStatus::Completed => "completed",
            SessionStatus::Failed(_) => "failed",
            SessionStatus::Paused => "paused",
        }
    }
}

impl std::fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SessionStatus::Failed(msg) => write!(f, "failed: {msg}"),
            other => f.write_str(other.name()),
        }
    }
}

/// Errors raised when finalizing a session
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum SessionError {
    #[error("Session {id} is already finalized as {status}")]
    AlreadyFinalized { id: SessionId, status: String },
}

/// Item counts accumulated during a run
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionCounts {
    pub uploaded: u64,
    pub downloaded: u64,
    pub deleted: u64,
    pub conflicts: u64,
    pub failed: u64,
    pub bytes_transferred: u64,
}

impl SessionCounts {
    /// Component-wise sum
    pub fn merge(&mut self, other: &SessionCounts) {
        self.uploaded += other.uploaded;
        self.downloaded += other.downloaded;
        self.deleted += other.deleted;
        self.conflicts += other.conflicts;
        self.failed += other.failed;
        self.bytes_transferred += other.bytes_transferred;
    }
}

/// Persistent record of one sync run
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncSessionLog {
    id: SessionId,
    account_id: AccountId,
    started_at: DateTime<Utc>,
    completed_at: Option<DateTime<Utc>>,
    status: SessionStatus,
    counts: SessionCounts,
}

impl SyncSessionLog {
    /// Open a running session for an account
    pub fn start(account_id: AccountId) -> Self {
        Self {
            id: SessionId::new(),
            account_id,
            started_at: Utc::now(),
            completed_at: None,
            status: SessionStatus::Running,
            counts: SessionCounts::default(),
        }
    }

    /// Rebuild a session from stored fields
    pub fn from_parts(
        id: SessionId,
        account_id: AccountId,
        started_at: DateTime<Utc>,
        completed_at: Option<DateTime<Utc>>,
        status: SessionStatus,
        counts: SessionCounts,
    ) -> Self {
        Self {
            id,
            account_id,
            started_at,
            completed_at,
            status,
            counts,
        }
    }

    pub fn id(&self) -> &SessionId {
        &self.id
    }

    pub fn account_id(&self) -> &AccountId {
        &self.account_id
    }

    pub fn started_at(&self) -> DateTime<Utc> {
        self.started_at
    }

    pub fn completed_at(&self) -> Option<DateTime<Utc>> {
        self.completed_at
    }

    pub fn status(&self) -> &SessionStatus {
        &self.status
    }

    pub fn counts(&self) -> &SessionCounts {
        &self.counts
    }

    pub fn duration(&self) -> chrono::Duration {
        self.completed_at.unwrap_or_else(Utc::now) - self.started_at
    }

    fn finalize(&mut self, status: SessionStatus, counts: SessionCounts) -> Result<(), SessionError> {
        if self.status.is_finished() {
            return Err(SessionError::AlreadyFinalized {
                id: self.id,
                status: self.status.to_string(),
            });
        }
        self.status = status;
        self.counts = counts;
        self.completed_at = Some(Utc::now());
        Ok(())
    }

    /// # Errors
    /// Returns `SessionError::AlreadyFinalized` on a second finalization
    pub fn complete(&mut self, counts: SessionCounts) -> Result<(), SessionError> {
        self.finalize(SessionStatus::Completed, counts)
    }

    /// # Errors
    /// Returns `SessionError::AlreadyFinalized` on a second finalization
    pub fn fail(&mut self, reason: impl Into<String>, counts: SessionCounts) -> Result<(), SessionError> {
        self.finalize(SessionStatus::Failed(reason.into()), counts)
    }

    /// # Errors
    /// Returns `SessionError::AlreadyFinalized` on a second finalization
    pub fn pause(&mut self, counts: SessionCounts) -> Result<(), SessionError> {
        self.finalize(SessionStatus::Paused, counts)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_start_is_running() {
        let session = SyncSessionLog::start(AccountId::new());
        assert!(session.status().is_running());
        assert!(session.completed_at().is_none());
    }

    #[test]
    fn test_finalized_exactly_once() {
        let mut session = SyncSessionLog::start(AccountId::new());
        let counts = SessionCounts {
            uploaded: 3,
            bytes_transferred: 1024,
            ..SessionCounts::default()
        };
        session.complete(counts).unwrap();
        assert_eq!(session.status(), &SessionStatus::Completed);
        assert_eq!(session.counts().uploaded, 3);
        assert!(session.completed_at().is_some());

        let err = session.fail("late", SessionCounts::default()).unwrap_err();
        assert!(matches!(err, SessionError::AlreadyFinalized { .. }));
        assert_eq!(session.status(), &SessionStatus::Completed);
    }

    #[test]
    fn test_pause_and_fail_status() {
        let mut paused = SyncSessionLog::start(AccountId::new());
        paused.pause(SessionCounts::default()).unwrap();
        assert_eq!(paused.status().name(), "paused");

        let mut failed = SyncSessionLog::start(AccountId::new());
        failed.fail("network", SessionCounts::default()).unwrap();
        assert_eq!(failed.status().to_string(), "failed: network");
    }

    #[test]
    fn test_counts_merge() {
        let mut a = SessionCounts {
            uploaded: 1,
            failed: 1,
            ..SessionCounts::default()
        };
        a.merge(&SessionCounts {
            uploaded: 2,
            downloaded: 4,
            bytes_transferred: 10,
            ..SessionCounts::default()
        });
        assert_eq!(a.uploaded, 3);
        assert_eq!(a.downloaded, 4);
        assert_eq!(a.failed, 1);
        assert_eq!(a.bytes_transferred, 10);
    }
}
