//! File operation audit log
//!
//! Every transfer attempt, deletion and conflict produces one
//! [`FileOperationLog`] entry. Entries are append-only: the store assigns
//! the id on insert and nothing ever updates them.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::str::FromStr;

use super::errors::DomainError;
use super::newtypes::{AccountId, OperationId, RemotePath, SessionId};

/// Kind of file operation recorded
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FileOperation {
    Upload,
    Download,
    /// Local file removed because the remote copy vanished
    DeleteLocal,
    /// Remote item removed because the local file vanished
    DeleteRemote,
    /// Stored row purged after the item vanished on both sides
    Purge,
    ConflictDetected,
}

impl FileOperation {
    pub fn as_str(&self) -> &'static str {
        match self {
            FileOperation::Upload => "upload",
            FileOperation::Download => "download",
            FileOperation::DeleteLocal => "delete_local",
            FileOperation::DeleteRemote => "delete_remote",
            FileOperation::Purge => "purge",
            FileOperation::ConflictDetected => "conflict_detected",
        }
    }
}

impl std::fmt::Display for FileOperation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for FileOperation {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "upload" => Ok(FileOperation::Upload),
            "download" => Ok(FileOperation::Download),
            "delete_local" => Ok(FileOperation::DeleteLocal),
            "delete_remote" => Ok(FileOperation::DeleteRemote),
            "purge" => Ok(FileOperation::Purge),
            "conflict_detected" => Ok(FileOperation::ConflictDetected),
            other => Err(DomainError::ValidationFailed(format!(
                "Unknown file operation: {other}"
            ))),
        }
    }
}

/// Outcome of a recorded operation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OperationOutcome {
    Success,
    Failed { code: String, message: String },
}

impl OperationOutcome {
    pub fn failed(code: impl Into<String>, message: impl Into<String>) -> Self {
        OperationOutcome::Failed {
            code: code.into(),
            message: message.into(),
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, OperationOutcome::Success)
    }
}

/// One append-only audit record
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FileOperationLog {
    id: Option<OperationId>,
    account_id: AccountId,
    session_id: Option<SessionId>,
    timestamp: DateTime<Utc>,
    path: RemotePath,
    operation: FileOperation,
    outcome: OperationOutcome,
    /// Human-readable reason text
    reason: String,
    bytes: u64,
    details: Value,
}

impl FileOperationLog {
    pub fn new(
        account_id: AccountId,
        path: RemotePath,
        operation: FileOperation,
        outcome: OperationOutcome,
        reason: impl Into<String>,
    ) -> Self {
        Self {
            id: None,
            account_id,
            session_id: None,
            timestamp: Utc::now(),
            path,
            operation,
            outcome,
            reason: reason.into(),
            bytes: 0,
            details: Value::Null,
        }
    }

    // --- Builder methods ---

    pub fn with_id(mut self, id: OperationId) -> Self {
        self.id = Some(id);
        self
    }

    pub fn with_session_id(mut self, session_id: Option<SessionId>) -> Self {
        self.session_id = session_id;
        self
    }

    pub fn with_timestamp(mut self, timestamp: DateTime<Utc>) -> Self {
        self.timestamp = timestamp;
        self
    }

    pub fn with_bytes(mut self, bytes: u64) -> Self {
        self.bytes = bytes;
        self
    }

    pub fn with_details(mut self, details: Value) -> Self {
        self.details = details;
        self
    }

    // --- Getters ---

    pub fn id(&self) -> Option<OperationId> {
        self.id
    }

    pub fn account_id(&self) -> &AccountId {
        &self.account_id
    }

    pub fn session_id(&self) -> Option<&SessionId> {
        self.session_id.as_ref()
    }

    pub fn timestamp(&self) -> DateTime<Utc> {
        self.timestamp
    }

    pub fn path(&self) -> &RemotePath {
        &self.path
    }

    pub fn operation(&self) -> FileOperation {
        self.operation
    }

    pub fn outcome(&self) -> &OperationOutcome {
        &self.outcome
    }

    pub fn reason(&self) -> &str {
        &self.reason
    }

    pub fn bytes(&self) -> u64 {
        self.bytes
    }

    pub fn details(&self) -> &Value {
        &self.details
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_builder() {
        let session = SessionId::new();
        let entry = FileOperationLog::new(
            AccountId::new(),
            RemotePath::new("/a.txt".to_string()).unwrap(),
            FileOperation::Upload,
            OperationOutcome::Success,
            "uploaded",
        )
        .with_session_id(Some(session))
        .with_bytes(42)
        .with_details(json!({"attempt": 1}));

        assert!(entry.id().is_none());
        assert_eq!(entry.session_id(), Some(&session));
        assert_eq!(entry.bytes(), 42);
        assert!(entry.outcome().is_success());
        assert_eq!(entry.details()["attempt"], 1);
    }

    #[test]
    fn test_operation_parse() {
        for op in [
            FileOperation::Upload,
            FileOperation::Download,
            FileOperation::DeleteLocal,
            FileOperation::DeleteRemote,
            FileOperation::Purge,
            FileOperation::ConflictDetected,
        ] {
            assert_eq!(op.as_str().parse::<FileOperation>().unwrap(), op);
        }
        assert!("rename".parse::<FileOperation>().is_err());
    }

    #[test]
    fn test_failed_outcome() {
        let outcome = OperationOutcome::failed("NET_TIMEOUT", "timed out");
        assert!(!outcome.is_success());
    }
}
