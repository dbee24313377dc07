//! State repository port (driven/secondary port)
//!
//! Persistence for accounts, drive items, delta tokens, conflicts, session
//! logs and the file operation audit trail.
//!
//! ## Design Notes
//!
//! - Uses `anyhow::Result` because storage errors are adapter-specific;
//!   the engine wraps them into its own typed errors with context.
//! - Lookups return `Ok(None)` for missing rows instead of an error.
//! - `save_item` and `save_batch` are add-or-update keyed by the item id.
//!   `save_batch` and `delete_batch` are atomic: either every row is
//!   written or none is.
//! - The delta token is stored separately from the rows it covers; callers
//!   save it only after the corresponding batch has been committed.

use chrono::{DateTime, Utc};

use crate::domain::{
    newtypes::{AccountId, DeltaToken, RemoteId, RemotePath, SessionId, UniqueId},
    AccountContext, DriveItem, FileOperationLog, SyncConflict, SyncSessionLog,
};

/// Filter for reading back audit entries
#[derive(Debug, Clone, Default)]
pub struct OperationFilter {
    pub account_id: Option<AccountId>,
    pub session_id: Option<SessionId>,
    pub since: Option<DateTime<Utc>>,
    pub limit: Option<u32>,
}

impl OperationFilter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_account_id(mut self, account_id: AccountId) -> Self {
        self.account_id = Some(account_id);
        self
    }

    pub fn with_session_id(mut self, session_id: SessionId) -> Self {
        self.session_id = Some(session_id);
        self
    }

    pub fn with_since(mut self, since: DateTime<Utc>) -> Self {
        self.since = Some(since);
        self
    }

    pub fn with_limit(mut self, limit: u32) -> Self {
        self.limit = Some(limit);
        self
    }
}

/// Persistent storage for all sync state
#[async_trait::async_trait]
pub trait IStateRepository: Send + Sync {
    // --- Accounts ---

    async fn get_account(&self, id: &AccountId) -> anyhow::Result<Option<AccountContext>>;

    async fn save_account(&self, account: &AccountContext) -> anyhow::Result<()>;

    async fn list_accounts(&self) -> anyhow::Result<Vec<AccountContext>>;

    // --- Drive items ---

    /// All rows for an account, ordered by path
    async fn list_items(&self, account_id: &AccountId) -> anyhow::Result<Vec<DriveItem>>;

    async fn get_item(&self, id: &UniqueId) -> anyhow::Result<Option<DriveItem>>;

    async fn get_item_by_path(
        &self,
        account_id: &AccountId,
        path: &RemotePath,
    ) -> anyhow::Result<Option<DriveItem>>;

    async fn get_item_by_remote_id(
        &self,
        account_id: &AccountId,
        remote_id: &RemoteId,
    ) -> anyhow::Result<Option<DriveItem>>;

    /// Add or update one row
    async fn save_item(&self, item: &DriveItem) -> anyhow::Result<()>;

    async fn delete_item(&self, id: &UniqueId) -> anyhow::Result<()>;

    /// Add or update many rows in one atomic unit
    async fn save_batch(&self, items: &[DriveItem]) -> anyhow::Result<()>;

    /// Delete many rows in one atomic unit
    async fn delete_batch(&self, ids: &[UniqueId]) -> anyhow::Result<()>;

    // --- Delta tokens ---

    async fn get_delta_token(&self, account_id: &AccountId) -> anyhow::Result<Option<DeltaToken>>;

    async fn save_delta_token(
        &self,
        account_id: &AccountId,
        token: &DeltaToken,
    ) -> anyhow::Result<()>;

    async fn clear_delta_token(&self, account_id: &AccountId) -> anyhow::Result<()>;

    // --- Conflicts ---

    async fn get_unresolved_conflicts(
        &self,
        account_id: &AccountId,
    ) -> anyhow::Result<Vec<SyncConflict>>;

    /// The unresolved conflict recorded for a path, if any
    async fn get_conflict_by_path(
        &self,
        account_id: &AccountId,
        path: &RemotePath,
    ) -> anyhow::Result<Option<SyncConflict>>;

    /// Add or update a conflict
    async fn save_conflict(&self, conflict: &SyncConflict) -> anyhow::Result<()>;

    // --- Session logs ---

    /// Add or update a session log row
    async fn save_session(&self, session: &SyncSessionLog) -> anyhow::Result<()>;

    async fn get_session(&self, id: &SessionId) -> anyhow::Result<Option<SyncSessionLog>>;

    // --- File operation log ---

    /// Append an audit entry and return its assigned id
    async fn append_operation(&self, entry: &FileOperationLog) -> anyhow::Result<i64>;

    async fn list_operations(&self, filter: &OperationFilter) -> anyhow::Result<Vec<FileOperationLog>>;
}
