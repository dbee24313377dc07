//! OperationLogger - high-level audit logging service
//!
//! Wraps `IStateRepository::append_operation()` with convenience methods for
//! each kind of auditable file operation. All methods are non-fatal: errors
//! in audit persistence are logged via `tracing::warn!` but never propagated.

use std::sync::Arc;

use mirrordrive_core::{
    domain::{
        newtypes::{AccountId, RemotePath, SessionId},
        FileOperation, FileOperationLog, OperationOutcome, SyncDirection, VersionInfo,
    },
    ports::IStateRepository,
};
use serde_json::json;

use crate::reason::ReasonCode;

/// Audit logger scoped to one account and, optionally, one sync session.
///
/// Cheap to clone; transfer workers each carry their own copy.
#[derive(Clone)]
pub struct OperationLogger {
    state_repo: Arc<dyn IStateRepository>,
    account_id: AccountId,
    session_id: Option<SessionId>,
}

impl OperationLogger {
    pub fn new(state_repo: Arc<dyn IStateRepository>, account_id: AccountId) -> Self {
        Self {
            state_repo,
            account_id,
            session_id: None,
        }
    }

    /// Attach the session every subsequent entry belongs to.
    pub fn with_session(mut self, session_id: Option<SessionId>) -> Self {
        self.session_id = session_id;
        self
    }

    pub fn account_id(&self) -> &AccountId {
        &self.account_id
    }

    pub fn session_id(&self) -> Option<&SessionId> {
        self.session_id.as_ref()
    }

    /// Append an entry, swallowing errors with a tracing warning.
    pub async fn record(&self, entry: FileOperationLog) {
        let entry = entry.with_session_id(self.session_id);
        if let Err(e) = self.state_repo.append_operation(&entry).await {
            tracing::warn!(
                error = %e,
                path = %entry.path(),
                operation = %entry.operation(),
                "Failed to append file operation entry"
            );
        }
    }

    fn entry(
        &self,
        path: &RemotePath,
        operation: FileOperation,
        outcome: OperationOutcome,
        reason: impl Into<String>,
    ) -> FileOperationLog {
        FileOperationLog::new(self.account_id, path.clone(), operation, outcome, reason)
    }

    // ========================================================================
    // Transfers
    // ========================================================================

    /// Log a completed upload or download.
    pub async fn log_transfer(
        &self,
        path: &RemotePath,
        direction: SyncDirection,
        bytes: u64,
        duration_ms: u64,
    ) {
        let entry = self
            .entry(
                path,
                transfer_operation(direction),
                OperationOutcome::Success,
                format!("{direction} completed"),
            )
            .with_bytes(bytes)
            .with_details(json!({ "duration_ms": duration_ms }));
        self.record(entry).await;
    }

    /// Log a failed upload or download.
    pub async fn log_transfer_failed(
        &self,
        path: &RemotePath,
        direction: SyncDirection,
        code: ReasonCode,
        message: &str,
    ) {
        let entry = self.entry(
            path,
            transfer_operation(direction),
            OperationOutcome::failed(code.as_str(), message),
            format!("{direction} failed: {message}"),
        );
        self.record(entry).await;
    }

    // ========================================================================
    // Deletions
    // ========================================================================

    /// Log a local delete, remote delete or row purge.
    pub async fn log_deletion(&self, path: &RemotePath, operation: FileOperation, code: ReasonCode) {
        let entry = self.entry(path, operation, OperationOutcome::Success, code.as_str());
        self.record(entry).await;
    }

    pub async fn log_deletion_failed(
        &self,
        path: &RemotePath,
        operation: FileOperation,
        code: ReasonCode,
        message: &str,
    ) {
        let entry = self.entry(
            path,
            operation,
            OperationOutcome::failed(code.as_str(), message),
            format!("{operation} failed: {message}"),
        );
        self.record(entry).await;
    }

    // ========================================================================
    // Conflicts
    // ========================================================================

    /// Log detection of a conflict with both sides' versions.
    pub async fn log_conflict(
        &self,
        path: &RemotePath,
        code: ReasonCode,
        local: &VersionInfo,
        remote: &VersionInfo,
    ) {
        let entry = self
            .entry(
                path,
                FileOperation::ConflictDetected,
                OperationOutcome::Success,
                code.as_str(),
            )
            .with_details(json!({
                "local": local,
                "remote": remote,
            }));
        self.record(entry).await;
    }
}

impl std::fmt::Debug for OperationLogger {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OperationLogger")
            .field("account_id", &self.account_id)
            .field("session_id", &self.session_id)
            .finish()
    }
}

fn transfer_operation(direction: SyncDirection) -> FileOperation {
    match direction {
        SyncDirection::Upload => FileOperation::Upload,
        SyncDirection::Download => FileOperation::Download,
    }
}
