//! MirrorDrive Cache - SQLite state store
//!
//! Implements the `IStateRepository` port on top of sqlx/SQLite. One
//! database holds every account's rows, delta tokens, conflicts, session
//! logs and audit entries.
//!
//! ```no_run
//! use std::{path::Path, sync::Arc};
//! use mirrordrive_cache::{DatabasePool, SqliteStateRepository};
//! use mirrordrive_core::ports::IStateRepository;
//!
//! # async fn open() -> anyhow::Result<Arc<dyn IStateRepository>> {
//! let pool = DatabasePool::new(Path::new("/var/lib/mirrordrive/state.db")).await?;
//! Ok(Arc::new(SqliteStateRepository::new(pool.pool().clone())))
//! # }
//! ```

pub mod pool;
pub mod repository;

pub use pool::DatabasePool;
pub use repository::SqliteStateRepository;

#[derive(Debug, thiserror::Error)]
pub enum CacheError {
    #[error("database connection failed: {0}")]
    ConnectionFailed(String),

    #[error("query failed: {0}")]
    QueryFailed(String),

    #[error("schema migration failed: {0}")]
    MigrationFailed(String),

    /// A stored column could not be decoded into its domain type
    #[error("corrupt column value: {0}")]
    SerializationError(String),
}

impl From<sqlx::Error> for CacheError {
    fn from(e: sqlx::Error) -> Self {
        CacheError::QueryFailed(e.to_string())
    }
}
