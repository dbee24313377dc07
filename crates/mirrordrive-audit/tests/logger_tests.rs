//! Integration test: OperationLogger → SQLite → query back
//!
//! Uses a real in-memory SQLite database to verify the full flow:
//! OperationLogger creates entries → IStateRepository persists them →
//! list_operations returns them.

use std::path::PathBuf;
use std::sync::Arc;

use chrono::{Duration, Utc};
use mirrordrive_audit::{OperationLogger, ReasonCode};
use mirrordrive_cache::{pool::DatabasePool, SqliteStateRepository};
use mirrordrive_core::{
    domain::{
        newtypes::{RemotePath, SyncPath},
        AccountContext, AccountSettings, FileOperation, OperationOutcome, SyncDirection,
        SyncSessionLog, VersionInfo,
    },
    ports::{IStateRepository, OperationFilter},
};

async fn make_repo() -> (DatabasePool, Arc<SqliteStateRepository>) {
    let pool = DatabasePool::in_memory()
        .await
        .expect("Failed to create in-memory database");
    let repo = Arc::new(SqliteStateRepository::new(pool.pool().clone()));
    (pool, repo)
}

fn path(p: &str) -> RemotePath {
    RemotePath::new(p.to_string()).unwrap()
}

async fn seed_account(repo: &SqliteStateRepository) -> AccountContext {
    let root = SyncPath::new(PathBuf::from("/tmp/mirrordrive-audit")).unwrap();
    let account = AccountContext::new("test@example.com", "Test User", root, AccountSettings::default());
    repo.save_account(&account).await.unwrap();
    account
}

#[tokio::test]
async fn test_operation_logger_writes_entries_with_session() {
    let (_pool, repo) = make_repo().await;
    let account = seed_account(&repo).await;
    let session = SyncSessionLog::start(*account.id());
    repo.save_session(&session).await.unwrap();

    let logger = OperationLogger::new(Arc::clone(&repo) as Arc<dyn IStateRepository>, *account.id())
        .with_session(Some(*session.id()));

    logger
        .log_transfer(&path("/Documents/report.pdf"), SyncDirection::Download, 4096, 150)
        .await;
    logger
        .log_transfer_failed(
            &path("/Documents/big.iso"),
            SyncDirection::Upload,
            ReasonCode::NetworkError,
            "connection reset",
        )
        .await;
    logger
        .log_conflict(
            &path("/Documents/notes.txt"),
            ReasonCode::BothModified,
            &VersionInfo::new(10, Some(Utc::now())),
            &VersionInfo::new(12, Some(Utc::now())).with_etag(Some("e2".into())),
        )
        .await;

    let entries = repo
        .list_operations(&OperationFilter::new().with_session_id(*session.id()))
        .await
        .unwrap();
    assert_eq!(entries.len(), 3, "Expected 3 entries, got {}", entries.len());

    let ops: Vec<FileOperation> = entries.iter().map(|e| e.operation()).collect();
    assert!(ops.contains(&FileOperation::Download));
    assert!(ops.contains(&FileOperation::Upload));
    assert!(ops.contains(&FileOperation::ConflictDetected));

    let failed = entries
        .iter()
        .find(|e| e.operation() == FileOperation::Upload)
        .unwrap();
    assert_eq!(
        *failed.outcome(),
        OperationOutcome::failed("network_error", "connection reset")
    );

    let download = entries
        .iter()
        .find(|e| e.operation() == FileOperation::Download)
        .unwrap();
    assert_eq!(download.bytes(), 4096);
    assert!(download.id().is_some());
    assert_eq!(download.session_id(), Some(session.id()));

    let conflict = entries
        .iter()
        .find(|e| e.operation() == FileOperation::ConflictDetected)
        .unwrap();
    assert_eq!(conflict.reason(), "both_modified");
    assert_eq!(conflict.details()["remote"]["etag"], "e2");
}

#[tokio::test]
async fn test_operation_logger_without_session() {
    let (_pool, repo) = make_repo().await;
    let account = seed_account(&repo).await;
    let logger = OperationLogger::new(Arc::clone(&repo) as Arc<dyn IStateRepository>, *account.id());

    logger
        .log_deletion(&path("/old.bak"), FileOperation::Purge, ReasonCode::GoneOnBothSides)
        .await;

    let since = Utc::now() - Duration::minutes(5);
    let entries = repo
        .list_operations(
            &OperationFilter::new()
                .with_account_id(*account.id())
                .with_since(since),
        )
        .await
        .unwrap();
    assert_eq!(entries.len(), 1);
    assert!(entries[0].session_id().is_none());
    assert_eq!(entries[0].reason(), "gone_on_both_sides");
}

#[tokio::test]
async fn test_operation_logger_swallows_storage_errors() {
    let (pool, repo) = make_repo().await;
    let account = seed_account(&repo).await;
    let logger = OperationLogger::new(Arc::clone(&repo) as Arc<dyn IStateRepository>, *account.id());

    pool.close().await;

    // Must return normally even though the store is gone
    logger
        .log_deletion_failed(
            &path("/x.txt"),
            FileOperation::DeleteRemote,
            ReasonCode::RemoteRejected,
            "403",
        )
        .await;
}
