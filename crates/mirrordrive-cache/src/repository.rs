//! SQLite implementation of IStateRepository
//!
//! This module provides the concrete SQLite-based implementation of the
//! state repository port defined in mirrordrive-core. It handles all domain
//! type serialization/deserialization and SQL query construction.
//!
//! ## Type Mapping
//!
//! | Domain Type                    | SQL Type | Strategy                                     |
//! |--------------------------------|----------|----------------------------------------------|
//! | UniqueId, AccountId, SessionId | TEXT     | UUID string via `.to_string()` / `FromStr`   |
//! | RemotePath, RemoteId, FileHash | TEXT     | String via `.as_str()` / `::new()`           |
//! | SyncPath                       | TEXT     | Path string via `.to_string()` / `SyncPath::new()` |
//! | DateTime<Utc>                  | TEXT     | ISO 8601 via `to_rfc3339()`                  |
//! | SyncStatus                     | TEXT x3  | name + retry direction + failure reason      |
//! | AccountSettings, VersionInfo   | TEXT     | serde_json serialization                     |
//!
//! ## Delta tokens
//!
//! Tokens live in their own table. `get_account` reads the current token
//! through a join, but `save_account` never writes it: only
//! `save_delta_token` advances a token, so a stale account value cannot
//! roll it back.

use std::path::PathBuf;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqliteConnection, SqlitePool};

use mirrordrive_core::domain::{
    newtypes::{
        AccountId, ConflictId, DeltaToken, FileHash, OperationId, RemoteId, RemotePath, SessionId,
        SyncPath, UniqueId,
    },
    AccountContext, AccountSettings, AuthState, ConflictKind, DriveItem, FileOperation,
    FileOperationLog, OperationOutcome, Resolution, SessionCounts, SessionStatus, SyncConflict,
    SyncDirection, SyncSessionLog, SyncStatus, VersionInfo,
};
use mirrordrive_core::ports::{IStateRepository, OperationFilter};

use crate::CacheError;

/// SQLite-based implementation of the state repository port
///
/// All operations are performed through a connection pool. Batch writes
/// run inside one transaction each.
pub struct SqliteStateRepository {
    pool: SqlitePool,
}

impl SqliteStateRepository {
    /// Creates a new repository instance with the given connection pool
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

// ============================================================================
// Helper functions for type conversion
// ============================================================================

fn parse_datetime(s: &str) -> Result<DateTime<Utc>, CacheError> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .or_else(|_| {
            // SQLite's own datetime() format
            chrono::NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S").map(|ndt| ndt.and_utc())
        })
        .map_err(|e| {
            CacheError::SerializationError(format!("Failed to parse datetime '{}': {}", s, e))
        })
}

fn parse_optional_datetime(s: Option<String>) -> Result<Option<DateTime<Utc>>, CacheError> {
    match s {
        Some(ref val) if !val.is_empty() => parse_datetime(val).map(Some),
        _ => Ok(None),
    }
}

/// Parse any `FromStr` domain value, naming the column on failure
fn parse_column<T>(column: &str, value: &str) -> Result<T, CacheError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    value.parse::<T>().map_err(|e| {
        CacheError::SerializationError(format!("Invalid {} '{}': {}", column, value, e))
    })
}

fn parse_optional_column<T>(column: &str, value: Option<String>) -> Result<Option<T>, CacheError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match value {
        Some(ref v) if !v.is_empty() => parse_column(column, v).map(Some),
        _ => Ok(None),
    }
}

/// Split a status into (name, retry direction, failure reason) columns
fn status_columns(status: &SyncStatus) -> (&'static str, Option<&'static str>, Option<String>) {
    match status {
        SyncStatus::Failed { retry, reason } => {
            (status.name(), Some(retry.as_str()), Some(reason.clone()))
        }
        other => (other.name(), None, None),
    }
}

fn status_from_columns(
    name: &str,
    retry: Option<String>,
    reason: Option<String>,
) -> Result<SyncStatus, CacheError> {
    match name {
        "synced" => Ok(SyncStatus::Synced),
        "pending_upload" => Ok(SyncStatus::PendingUpload),
        "pending_download" => Ok(SyncStatus::PendingDownload),
        "sync_only" => Ok(SyncStatus::SyncOnly),
        "failed" => {
            let retry = retry.ok_or_else(|| {
                CacheError::SerializationError("Failed status without retry direction".into())
            })?;
            Ok(SyncStatus::Failed {
                retry: parse_column::<SyncDirection>("retry_direction", &retry)?,
                reason: reason.unwrap_or_default(),
            })
        }
        other => Err(CacheError::SerializationError(format!(
            "Unknown sync status: {}",
            other
        ))),
    }
}

fn session_status_columns(status: &SessionStatus) -> (&'static str, Option<String>) {
    match status {
        SessionStatus::Failed(msg) => (status.name(), Some(msg.clone())),
        other => (other.name(), None),
    }
}

fn session_status_from_columns(
    name: &str,
    error_message: Option<String>,
) -> Result<SessionStatus, CacheError> {
    match name {
        "running" => Ok(SessionStatus::Running),
        "completed" => Ok(SessionStatus::Completed),
        "paused" => Ok(SessionStatus::Paused),
        "failed" => Ok(SessionStatus::Failed(error_message.unwrap_or_default())),
        other => Err(CacheError::SerializationError(format!(
            "Unknown session status: {}",
            other
        ))),
    }
}

// ============================================================================
// Row mapping functions
// ============================================================================

fn account_from_row(row: &SqliteRow) -> Result<AccountContext, CacheError> {
    let id: String = row.try_get("id")?;
    let local_root: String = row.try_get("local_root")?;
    let auth_state: String = row.try_get("auth_state")?;
    let settings: String = row.try_get("settings")?;
    let token: Option<String> = row.try_get("token")?;

    let local_root = SyncPath::new(PathBuf::from(&local_root)).map_err(|e| {
        CacheError::SerializationError(format!("Invalid local_root '{}': {}", local_root, e))
    })?;
    let settings: AccountSettings = serde_json::from_str(&settings)
        .map_err(|e| CacheError::SerializationError(format!("Invalid settings JSON: {}", e)))?;

    Ok(AccountContext::from_parts(
        parse_column::<AccountId>("id", &id)?,
        row.try_get("external_id")?,
        row.try_get("display_name")?,
        local_root,
        parse_column::<AuthState>("auth_state", &auth_state)?,
        parse_optional_column::<DeltaToken>("token", token)?,
        parse_optional_datetime(row.try_get("last_sync")?)?,
        settings,
        parse_datetime(&row.try_get::<String, _>("created_at")?)?,
    ))
}

fn drive_item_from_row(row: &SqliteRow) -> Result<DriveItem, CacheError> {
    let id: String = row.try_get("id")?;
    let account_id: String = row.try_get("account_id")?;
    let path: String = row.try_get("path")?;
    let is_folder: i64 = row.try_get("is_folder")?;
    let size_bytes: i64 = row.try_get("size_bytes")?;
    let status: String = row.try_get("status")?;

    let status = status_from_columns(
        &status,
        row.try_get("retry_direction")?,
        row.try_get("failure_reason")?,
    )?;

    Ok(DriveItem::from_parts(
        parse_column::<UniqueId>("id", &id)?,
        parse_column::<AccountId>("account_id", &account_id)?,
        parse_optional_column::<RemoteId>("remote_id", row.try_get("remote_id")?)?,
        parse_column::<RemotePath>("path", &path)?,
        is_folder != 0,
        size_bytes as u64,
        parse_optional_datetime(row.try_get("local_modified")?)?,
        parse_optional_datetime(row.try_get("remote_modified")?)?,
        parse_optional_column::<FileHash>("local_hash", row.try_get("local_hash")?)?,
        parse_optional_column::<FileHash>("remote_hash", row.try_get("remote_hash")?)?,
        row.try_get("ctag")?,
        row.try_get("etag")?,
        status,
        parse_optional_column::<SyncDirection>(
            "last_sync_direction",
            row.try_get("last_sync_direction")?,
        )?,
        parse_optional_datetime(row.try_get("last_synced_at")?)?,
    ))
}

fn conflict_from_row(row: &SqliteRow) -> Result<SyncConflict, CacheError> {
    let id: String = row.try_get("id")?;
    let account_id: String = row.try_get("account_id")?;
    let path: String = row.try_get("path")?;
    let kind: String = row.try_get("kind")?;
    let local_version: String = row.try_get("local_version")?;
    let remote_version: String = row.try_get("remote_version")?;

    let local: VersionInfo = serde_json::from_str(&local_version)
        .map_err(|e| CacheError::SerializationError(format!("Invalid VersionInfo JSON: {}", e)))?;
    let remote: VersionInfo = serde_json::from_str(&remote_version)
        .map_err(|e| CacheError::SerializationError(format!("Invalid VersionInfo JSON: {}", e)))?;

    Ok(SyncConflict::from_parts(
        parse_column::<ConflictId>("id", &id)?,
        parse_column::<AccountId>("account_id", &account_id)?,
        parse_column::<RemotePath>("path", &path)?,
        parse_column::<ConflictKind>("kind", &kind)?,
        local,
        remote,
        parse_datetime(&row.try_get::<String, _>("detected_at")?)?,
        parse_optional_column::<Resolution>("resolution", row.try_get("resolution")?)?,
        parse_optional_datetime(row.try_get("resolved_at")?)?,
    ))
}

fn session_from_row(row: &SqliteRow) -> Result<SyncSessionLog, CacheError> {
    let id: String = row.try_get("id")?;
    let account_id: String = row.try_get("account_id")?;
    let status: String = row.try_get("status")?;

    let counts = SessionCounts {
        uploaded: row.try_get::<i64, _>("uploaded")? as u64,
        downloaded: row.try_get::<i64, _>("downloaded")? as u64,
        deleted: row.try_get::<i64, _>("deleted")? as u64,
        conflicts: row.try_get::<i64, _>("conflicts")? as u64,
        failed: row.try_get::<i64, _>("failed")? as u64,
        bytes_transferred: row.try_get::<i64, _>("bytes_transferred")? as u64,
    };

    Ok(SyncSessionLog::from_parts(
        parse_column::<SessionId>("id", &id)?,
        parse_column::<AccountId>("account_id", &account_id)?,
        parse_datetime(&row.try_get::<String, _>("started_at")?)?,
        parse_optional_datetime(row.try_get("completed_at")?)?,
        session_status_from_columns(&status, row.try_get("error_message")?)?,
        counts,
    ))
}

fn operation_from_row(row: &SqliteRow) -> Result<FileOperationLog, CacheError> {
    let id: i64 = row.try_get("id")?;
    let account_id: String = row.try_get("account_id")?;
    let path: String = row.try_get("path")?;
    let operation: String = row.try_get("operation")?;
    let outcome: String = row.try_get("outcome")?;
    let reason: String = row.try_get("reason")?;
    let bytes: i64 = row.try_get("bytes")?;
    let details: String = row.try_get("details")?;

    let outcome = match outcome.as_str() {
        "success" => OperationOutcome::Success,
        "failed" => OperationOutcome::failed(
            row.try_get::<Option<String>, _>("error_code")?.unwrap_or_default(),
            row.try_get::<Option<String>, _>("error_message")?.unwrap_or_default(),
        ),
        other => {
            return Err(CacheError::SerializationError(format!(
                "Unknown operation outcome: {}",
                other
            )))
        }
    };
    let details: serde_json::Value = serde_json::from_str(&details)
        .map_err(|e| CacheError::SerializationError(format!("Invalid details JSON: {}", e)))?;

    Ok(FileOperationLog::new(
        parse_column::<AccountId>("account_id", &account_id)?,
        parse_column::<RemotePath>("path", &path)?,
        parse_column::<FileOperation>("operation", &operation)?,
        outcome,
        reason,
    )
    .with_id(OperationId::new(id))
    .with_session_id(parse_optional_column::<SessionId>(
        "session_id",
        row.try_get("session_id")?,
    )?)
    .with_timestamp(parse_datetime(&row.try_get::<String, _>("timestamp")?)?)
    .with_bytes(bytes as u64)
    .with_details(details))
}

// ============================================================================
// Shared write helpers
// ============================================================================

async fn upsert_item(conn: &mut SqliteConnection, item: &DriveItem) -> Result<(), sqlx::Error> {
    let (status, retry_direction, failure_reason) = status_columns(item.status());

    sqlx::query(
        "INSERT INTO drive_items \
         (id, account_id, remote_id, path, is_folder, size_bytes, local_modified, \
          remote_modified, local_hash, remote_hash, ctag, etag, status, retry_direction, \
          failure_reason, last_sync_direction, last_synced_at) \
         VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?) \
         ON CONFLICT(id) DO UPDATE SET \
           remote_id = excluded.remote_id, \
           path = excluded.path, \
           is_folder = excluded.is_folder, \
           size_bytes = excluded.size_bytes, \
           local_modified = excluded.local_modified, \
           remote_modified = excluded.remote_modified, \
           local_hash = excluded.local_hash, \
           remote_hash = excluded.remote_hash, \
           ctag = excluded.ctag, \
           etag = excluded.etag, \
           status = excluded.status, \
           retry_direction = excluded.retry_direction, \
           failure_reason = excluded.failure_reason, \
           last_sync_direction = excluded.last_sync_direction, \
           last_synced_at = excluded.last_synced_at",
    )
    .bind(item.id().to_string())
    .bind(item.account_id().to_string())
    .bind(item.remote_id().map(|r| r.as_str().to_string()))
    .bind(item.path().as_str().to_string())
    .bind(item.is_folder() as i64)
    .bind(item.size() as i64)
    .bind(item.local_modified().map(|dt| dt.to_rfc3339()))
    .bind(item.remote_modified().map(|dt| dt.to_rfc3339()))
    .bind(item.local_hash().map(|h| h.as_str().to_string()))
    .bind(item.remote_hash().map(|h| h.as_str().to_string()))
    .bind(item.ctag().map(str::to_string))
    .bind(item.etag().map(str::to_string))
    .bind(status)
    .bind(retry_direction)
    .bind(failure_reason)
    .bind(item.last_sync_direction().map(|d| d.as_str()))
    .bind(item.last_synced_at().map(|dt| dt.to_rfc3339()))
    .execute(&mut *conn)
    .await?;

    Ok(())
}

// ============================================================================
// IStateRepository implementation
// ============================================================================

#[async_trait::async_trait]
impl IStateRepository for SqliteStateRepository {
    // --- Accounts ---

    async fn get_account(&self, id: &AccountId) -> anyhow::Result<Option<AccountContext>> {
        let row = sqlx::query(
            "SELECT a.*, t.token FROM accounts a \
             LEFT JOIN delta_tokens t ON t.account_id = a.id \
             WHERE a.id = ?",
        )
        .bind(id.to_string())
        .fetch_optional(&self.pool)
        .await?;

        match row {
            Some(ref r) => Ok(Some(account_from_row(r)?)),
            None => Ok(None),
        }
    }

    async fn save_account(&self, account: &AccountContext) -> anyhow::Result<()> {
        let settings = serde_json::to_string(account.settings())
            .map_err(|e| anyhow::anyhow!("Failed to serialize account settings: {}", e))?;

        sqlx::query(
            "INSERT INTO accounts \
             (id, external_id, display_name, local_root, auth_state, last_sync, settings, created_at) \
             VALUES (?, ?, ?, ?, ?, ?, ?, ?) \
             ON CONFLICT(id) DO UPDATE SET \
               external_id = excluded.external_id, \
               display_name = excluded.display_name, \
               local_root = excluded.local_root, \
               auth_state = excluded.auth_state, \
               last_sync = excluded.last_sync, \
               settings = excluded.settings",
        )
        .bind(account.id().to_string())
        .bind(account.external_id())
        .bind(account.display_name())
        .bind(account.local_root().to_string())
        .bind(account.auth_state().as_str())
        .bind(account.last_sync().map(|dt| dt.to_rfc3339()))
        .bind(&settings)
        .bind(account.created_at().to_rfc3339())
        .execute(&self.pool)
        .await?;

        tracing::trace!(account_id = %account.id(), "Saved account");
        Ok(())
    }

    async fn list_accounts(&self) -> anyhow::Result<Vec<AccountContext>> {
        let rows = sqlx::query(
            "SELECT a.*, t.token FROM accounts a \
             LEFT JOIN delta_tokens t ON t.account_id = a.id \
             ORDER BY a.created_at ASC",
        )
        .fetch_all(&self.pool)
        .await?;

        let mut accounts = Vec::with_capacity(rows.len());
        for row in &rows {
            accounts.push(account_from_row(row)?);
        }
        Ok(accounts)
    }

    // --- Drive items ---

    async fn list_items(&self, account_id: &AccountId) -> anyhow::Result<Vec<DriveItem>> {
        let rows = sqlx::query("SELECT * FROM drive_items WHERE account_id = ? ORDER BY path ASC")
            .bind(account_id.to_string())
            .fetch_all(&self.pool)
            .await?;

        let mut items = Vec::with_capacity(rows.len());
        for row in &rows {
            items.push(drive_item_from_row(row)?);
        }
        Ok(items)
    }

    async fn get_item(&self, id: &UniqueId) -> anyhow::Result<Option<DriveItem>> {
        let row = sqlx::query("SELECT * FROM drive_items WHERE id = ?")
            .bind(id.to_string())
            .fetch_optional(&self.pool)
            .await?;

        match row {
            Some(ref r) => Ok(Some(drive_item_from_row(r)?)),
            None => Ok(None),
        }
    }

    async fn get_item_by_path(
        &self,
        account_id: &AccountId,
        path: &RemotePath,
    ) -> anyhow::Result<Option<DriveItem>> {
        let row = sqlx::query("SELECT * FROM drive_items WHERE account_id = ? AND path = ?")
            .bind(account_id.to_string())
            .bind(path.as_str())
            .fetch_optional(&self.pool)
            .await?;

        match row {
            Some(ref r) => Ok(Some(drive_item_from_row(r)?)),
            None => Ok(None),
        }
    }

    async fn get_item_by_remote_id(
        &self,
        account_id: &AccountId,
        remote_id: &RemoteId,
    ) -> anyhow::Result<Option<DriveItem>> {
        let row = sqlx::query(
            "SELECT * FROM drive_items WHERE account_id = ? AND remote_id = ? LIMIT 1",
        )
        .bind(account_id.to_string())
        .bind(remote_id.as_str())
        .fetch_optional(&self.pool)
        .await?;

        match row {
            Some(ref r) => Ok(Some(drive_item_from_row(r)?)),
            None => Ok(None),
        }
    }

    async fn save_item(&self, item: &DriveItem) -> anyhow::Result<()> {
        let mut conn = self.pool.acquire().await?;
        upsert_item(&mut conn, item).await?;

        tracing::trace!(item_id = %item.id(), path = %item.path(), "Saved drive item");
        Ok(())
    }

    async fn delete_item(&self, id: &UniqueId) -> anyhow::Result<()> {
        sqlx::query("DELETE FROM drive_items WHERE id = ?")
            .bind(id.to_string())
            .execute(&self.pool)
            .await?;

        tracing::trace!(item_id = %id, "Deleted drive item");
        Ok(())
    }

    async fn save_batch(&self, items: &[DriveItem]) -> anyhow::Result<()> {
        if items.is_empty() {
            return Ok(());
        }

        let mut tx = self.pool.begin().await?;
        for item in items {
            upsert_item(&mut tx, item).await?;
        }
        tx.commit().await?;

        tracing::debug!(count = items.len(), "Saved drive item batch");
        Ok(())
    }

    async fn delete_batch(&self, ids: &[UniqueId]) -> anyhow::Result<()> {
        if ids.is_empty() {
            return Ok(());
        }

        let mut tx = self.pool.begin().await?;
        for id in ids {
            sqlx::query("DELETE FROM drive_items WHERE id = ?")
                .bind(id.to_string())
                .execute(&mut *tx)
                .await?;
        }
        tx.commit().await?;

        tracing::debug!(count = ids.len(), "Deleted drive item batch");
        Ok(())
    }

    // --- Delta tokens ---

    async fn get_delta_token(&self, account_id: &AccountId) -> anyhow::Result<Option<DeltaToken>> {
        let token: Option<String> =
            sqlx::query_scalar("SELECT token FROM delta_tokens WHERE account_id = ?")
                .bind(account_id.to_string())
                .fetch_optional(&self.pool)
                .await?;

        Ok(parse_optional_column::<DeltaToken>("token", token)?)
    }

    async fn save_delta_token(
        &self,
        account_id: &AccountId,
        token: &DeltaToken,
    ) -> anyhow::Result<()> {
        sqlx::query(
            "INSERT INTO delta_tokens (account_id, token, updated_at) VALUES (?, ?, ?) \
             ON CONFLICT(account_id) DO UPDATE SET \
               token = excluded.token, updated_at = excluded.updated_at",
        )
        .bind(account_id.to_string())
        .bind(token.as_str())
        .bind(Utc::now().to_rfc3339())
        .execute(&self.pool)
        .await?;

        tracing::trace!(account_id = %account_id, "Saved delta token");
        Ok(())
    }

    async fn clear_delta_token(&self, account_id: &AccountId) -> anyhow::Result<()> {
        sqlx::query("DELETE FROM delta_tokens WHERE account_id = ?")
            .bind(account_id.to_string())
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    // --- Conflicts ---

    async fn get_unresolved_conflicts(
        &self,
        account_id: &AccountId,
    ) -> anyhow::Result<Vec<SyncConflict>> {
        let rows = sqlx::query(
            "SELECT * FROM sync_conflicts \
             WHERE account_id = ? AND resolved_at IS NULL \
             ORDER BY detected_at DESC",
        )
        .bind(account_id.to_string())
        .fetch_all(&self.pool)
        .await?;

        let mut conflicts = Vec::with_capacity(rows.len());
        for row in &rows {
            conflicts.push(conflict_from_row(row)?);
        }
        Ok(conflicts)
    }

    async fn get_conflict_by_path(
        &self,
        account_id: &AccountId,
        path: &RemotePath,
    ) -> anyhow::Result<Option<SyncConflict>> {
        let row = sqlx::query(
            "SELECT * FROM sync_conflicts \
             WHERE account_id = ? AND path = ? AND resolved_at IS NULL \
             ORDER BY detected_at DESC LIMIT 1",
        )
        .bind(account_id.to_string())
        .bind(path.as_str())
        .fetch_optional(&self.pool)
        .await?;

        match row {
            Some(ref r) => Ok(Some(conflict_from_row(r)?)),
            None => Ok(None),
        }
    }

    async fn save_conflict(&self, conflict: &SyncConflict) -> anyhow::Result<()> {
        let local_version = serde_json::to_string(conflict.local())
            .map_err(|e| anyhow::anyhow!("Failed to serialize local version: {}", e))?;
        let remote_version = serde_json::to_string(conflict.remote())
            .map_err(|e| anyhow::anyhow!("Failed to serialize remote version: {}", e))?;

        sqlx::query(
            "INSERT INTO sync_conflicts \
             (id, account_id, path, kind, local_version, remote_version, detected_at, \
              resolution, resolved_at) \
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?) \
             ON CONFLICT(id) DO UPDATE SET \
               resolution = excluded.resolution, \
               resolved_at = excluded.resolved_at",
        )
        .bind(conflict.id().to_string())
        .bind(conflict.account_id().to_string())
        .bind(conflict.path().as_str())
        .bind(conflict.kind().as_str())
        .bind(&local_version)
        .bind(&remote_version)
        .bind(conflict.detected_at().to_rfc3339())
        .bind(conflict.resolution().map(|r| r.as_str()))
        .bind(conflict.resolved_at().map(|dt| dt.to_rfc3339()))
        .execute(&self.pool)
        .await?;

        tracing::trace!(conflict_id = %conflict.id(), path = %conflict.path(), "Saved conflict");
        Ok(())
    }

    // --- Session logs ---

    async fn save_session(&self, session: &SyncSessionLog) -> anyhow::Result<()> {
        let (status, error_message) = session_status_columns(session.status());
        let counts = session.counts();

        sqlx::query(
            "INSERT INTO sync_sessions \
             (id, account_id, started_at, completed_at, status, error_message, \
              uploaded, downloaded, deleted, conflicts, failed, bytes_transferred) \
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?) \
             ON CONFLICT(id) DO UPDATE SET \
               completed_at = excluded.completed_at, \
               status = excluded.status, \
               error_message = excluded.error_message, \
               uploaded = excluded.uploaded, \
               downloaded = excluded.downloaded, \
               deleted = excluded.deleted, \
               conflicts = excluded.conflicts, \
               failed = excluded.failed, \
               bytes_transferred = excluded.bytes_transferred",
        )
        .bind(session.id().to_string())
        .bind(session.account_id().to_string())
        .bind(session.started_at().to_rfc3339())
        .bind(session.completed_at().map(|dt| dt.to_rfc3339()))
        .bind(status)
        .bind(error_message)
        .bind(counts.uploaded as i64)
        .bind(counts.downloaded as i64)
        .bind(counts.deleted as i64)
        .bind(counts.conflicts as i64)
        .bind(counts.failed as i64)
        .bind(counts.bytes_transferred as i64)
        .execute(&self.pool)
        .await?;

        tracing::trace!(session_id = %session.id(), status = %session.status(), "Saved session");
        Ok(())
    }

    async fn get_session(&self, id: &SessionId) -> anyhow::Result<Option<SyncSessionLog>> {
        let row = sqlx::query("SELECT * FROM sync_sessions WHERE id = ?")
            .bind(id.to_string())
            .fetch_optional(&self.pool)
            .await?;

        match row {
            Some(ref r) => Ok(Some(session_from_row(r)?)),
            None => Ok(None),
        }
    }

    // --- File operation log ---

    async fn append_operation(&self, entry: &FileOperationLog) -> anyhow::Result<i64> {
        let (outcome, error_code, error_message) = match entry.outcome() {
            OperationOutcome::Success => ("success", None, None),
            OperationOutcome::Failed { code, message } => {
                ("failed", Some(code.clone()), Some(message.clone()))
            }
        };
        let details = serde_json::to_string(entry.details())
            .map_err(|e| anyhow::anyhow!("Failed to serialize operation details: {}", e))?;

        let result = sqlx::query(
            "INSERT INTO file_operations \
             (account_id, session_id, timestamp, path, operation, outcome, error_code, \
              error_message, reason, bytes, details) \
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(entry.account_id().to_string())
        .bind(entry.session_id().map(|s| s.to_string()))
        .bind(entry.timestamp().to_rfc3339())
        .bind(entry.path().as_str())
        .bind(entry.operation().as_str())
        .bind(outcome)
        .bind(error_code)
        .bind(error_message)
        .bind(entry.reason())
        .bind(entry.bytes() as i64)
        .bind(&details)
        .execute(&self.pool)
        .await?;

        Ok(result.last_insert_rowid())
    }

    async fn list_operations(
        &self,
        filter: &OperationFilter,
    ) -> anyhow::Result<Vec<FileOperationLog>> {
        let mut sql = String::from("SELECT * FROM file_operations WHERE 1=1");
        let mut binds: Vec<String> = Vec::new();

        if let Some(ref account_id) = filter.account_id {
            sql.push_str(" AND account_id = ?");
            binds.push(account_id.to_string());
        }
        if let Some(ref session_id) = filter.session_id {
            sql.push_str(" AND session_id = ?");
            binds.push(session_id.to_string());
        }
        if let Some(ref since) = filter.since {
            sql.push_str(" AND timestamp >= ?");
            binds.push(since.to_rfc3339());
        }
        sql.push_str(" ORDER BY id ASC");
        if let Some(limit) = filter.limit {
            sql.push_str(&format!(" LIMIT {}", limit));
        }

        let mut query = sqlx::query(&sql);
        for bind in &binds {
            query = query.bind(bind);
        }

        let rows = query.fetch_all(&self.pool).await?;

        let mut entries = Vec::with_capacity(rows.len());
        for row in &rows {
            entries.push(operation_from_row(row)?);
        }
        Ok(entries)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_columns_roundtrip_failed() {
        let status = SyncStatus::Failed {
            retry: SyncDirection::Upload,
            reason: "disk full".to_string(),
        };
        let (name, retry, reason) = status_columns(&status);
        assert_eq!(name, "failed");
        let parsed = status_from_columns(name, retry.map(str::to_string), reason).unwrap();
        assert_eq!(parsed, status);
    }

    #[test]
    fn test_status_from_unknown_name() {
        assert!(status_from_columns("hydrating", None, None).is_err());
        assert!(status_from_columns("failed", None, None).is_err());
    }

    #[test]
    fn test_parse_datetime_formats() {
        assert!(parse_datetime("2026-03-01T10:00:00+00:00").is_ok());
        assert!(parse_datetime("2026-03-01 10:00:00").is_ok());
        assert!(parse_datetime("yesterday").is_err());
    }

    #[test]
    fn test_session_status_columns() {
        let (name, msg) = session_status_columns(&SessionStatus::Failed("boom".into()));
        assert_eq!(name, "failed");
        assert_eq!(
            session_status_from_columns(name, msg).unwrap(),
            SessionStatus::Failed("boom".into())
        );
        assert_eq!(
            session_status_from_columns("paused", None).unwrap(),
            SessionStatus::Paused
        );
    }
}
