//! SQLite connection pool
//!
//! [`DatabasePool`] owns the `SqlitePool` every repository shares. Opening
//! a pool brings the schema up to date: each entry of [`MIGRATIONS`] runs
//! once, in its own transaction, and bumps `PRAGMA user_version`.

use std::{path::Path, time::Duration};

use sqlx::{
    sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions, SqliteSynchronous},
    ConnectOptions,
};
use tracing::{debug, info};

use crate::CacheError;

/// Schema migrations as `(user_version, sql)`, in ascending order
const MIGRATIONS: &[(i64, &str)] = &[(1, include_str!("migrations/20260301_initial.sql"))];

/// How long a writer waits on a locked database before giving up
const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

const FILE_POOL_CONNECTIONS: u32 = 5;

/// Shared handle to the state database
///
/// Cloning is cheap; clones share the same connections.
#[derive(Debug, Clone)]
pub struct DatabasePool {
    pool: SqlitePool,
}

impl DatabasePool {
    /// Open (creating if needed) the database at `db_path`
    ///
    /// Missing parent directories are created. The database runs in WAL mode
    /// so readers never block the engine's batch writes.
    ///
    /// # Errors
    /// `ConnectionFailed` if the file cannot be opened, `MigrationFailed` if
    /// the schema cannot be brought up to date
    pub async fn new(db_path: &Path) -> Result<Self, CacheError> {
        if let Some(parent) = db_path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| {
                CacheError::ConnectionFailed(format!("cannot create {}: {e}", parent.display()))
            })?;
        }

        let options = connect_options()
            .filename(db_path)
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .synchronous(SqliteSynchronous::Normal);

        let pool = SqlitePoolOptions::new()
            .max_connections(FILE_POOL_CONNECTIONS)
            .connect_with(options)
            .await
            .map_err(|e| {
                CacheError::ConnectionFailed(format!("cannot open {}: {e}", db_path.display()))
            })?;

        let pool = Self { pool };
        pool.migrate().await?;
        info!(path = %db_path.display(), "State database ready");
        Ok(pool)
    }

    /// Private in-memory database, used by tests
    ///
    /// The pool holds a single connection that is never recycled, since the
    /// data lives only as long as that connection.
    pub async fn in_memory() -> Result<Self, CacheError> {
        let options = connect_options().filename(":memory:");
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect_with(options)
            .await
            .map_err(|e| CacheError::ConnectionFailed(format!("in-memory database: {e}")))?;

        let pool = Self { pool };
        pool.migrate().await?;
        Ok(pool)
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Close every connection; later queries fail with `PoolClosed`
    pub async fn close(&self) {
        self.pool.close().await;
    }

    /// Current schema version
    pub async fn schema_version(&self) -> Result<i64, CacheError> {
        let version: i64 = sqlx::query_scalar("PRAGMA user_version")
            .fetch_one(&self.pool)
            .await?;
        Ok(version)
    }

    async fn migrate(&self) -> Result<(), CacheError> {
        let current = self.schema_version().await?;

        for &(version, sql) in MIGRATIONS.iter().filter(|(v, _)| *v > current) {
            let failed =
                |e: sqlx::Error| CacheError::MigrationFailed(format!("version {version}: {e}"));

            let mut tx = self.pool.begin().await.map_err(failed)?;
            sqlx::raw_sql(sql).execute(&mut *tx).await.map_err(failed)?;
            // PRAGMA does not take bind parameters.
            sqlx::raw_sql(&format!("PRAGMA user_version = {version}"))
                .execute(&mut *tx)
                .await
                .map_err(failed)?;
            tx.commit().await.map_err(failed)?;

            debug!(version, "Applied schema migration");
        }
        Ok(())
    }
}

fn connect_options() -> SqliteConnectOptions {
    SqliteConnectOptions::new()
        .foreign_keys(true)
        .busy_timeout(BUSY_TIMEOUT)
        .disable_statement_logging()
}
