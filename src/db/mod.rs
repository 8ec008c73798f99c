//! SQLite persistence for archive records.

mod migrations;
mod models;
mod queries;

pub use models::*;
pub use queries::*;

use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result};
use sqlx::sqlite::{
    SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions, SqliteSynchronous,
};
use tracing::{debug, info};

/// Connections shared by the web handlers and running archive jobs.
const MAX_CONNECTIONS: u32 = 5;

/// How long a write waits for another job's finalization to release the lock.
const BUSY_TIMEOUT: Duration = Duration::from_secs(10);

/// Handle to the archive record database.
#[derive(Debug, Clone)]
pub struct Database {
    pool: SqlitePool,
}

impl Database {
    /// Open (or create) the archive database at `path` and bring its schema
    /// up to date.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be opened, a migration fails, or
    /// the database rejects writes.
    pub async fn new(path: &Path) -> Result<Self> {
        let options = SqliteConnectOptions::new()
            .filename(path)
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .synchronous(SqliteSynchronous::Normal)
            .busy_timeout(BUSY_TIMEOUT);

        let pool = SqlitePoolOptions::new()
            .max_connections(MAX_CONNECTIONS)
            .connect_with(options)
            .await
            .with_context(|| format!("Failed to open archive database at {}", path.display()))?;

        let db = Self { pool };
        migrations::run(&db.pool).await?;
        info!(path = %path.display(), "Archive database ready");

        db.ensure_records_writable(path).await?;
        Ok(db)
    }

    /// Touch the records table inside a rolled-back transaction, so a
    /// read-only file fails at startup rather than when the first job tries
    /// to finalize.
    async fn ensure_records_writable(&self, path: &Path) -> Result<()> {
        let read_only = || {
            format!(
                "Archive database at {} is read-only; archive records cannot be saved",
                path.display()
            )
        };

        let mut tx = self.pool.begin().await.with_context(read_only)?;
        sqlx::query("UPDATE archive_records SET id = id WHERE 0")
            .execute(&mut *tx)
            .await
            .with_context(read_only)?;
        tx.rollback().await.with_context(read_only)?;

        debug!("Archive database accepts writes");
        Ok(())
    }

    /// The underlying connection pool, for the free query functions.
    #[must_use]
    pub const fn pool(&self) -> &SqlitePool {
        &self.pool
    }
}
