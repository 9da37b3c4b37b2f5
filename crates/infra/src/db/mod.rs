//! SQLite storage engine for jobs and charges.
//!
//! One backing file, opened in write-ahead-log mode: a single writer at a time
//! (the consumer, plus the API opening jobs), readers never blocked by it.
//! All writes go through explicit transactions.

use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

use sqlx::sqlite::{
    SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions, SqliteSynchronous,
};
use sqlx::{Sqlite, Transaction};
use thiserror::Error;
use tracing::{debug, info};

use chargeflow_core::JobId;

mod charges;
mod jobs;

const BUSY_TIMEOUT: Duration = Duration::from_secs(5);
const MAX_CONNECTIONS: u32 = 8;

const SCHEMA: &[&str] = &[
    r#"
    CREATE TABLE IF NOT EXISTS job (
        job_id   INTEGER PRIMARY KEY AUTOINCREMENT,
        is_done  BOOLEAN NOT NULL DEFAULT FALSE
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS charge (
        claim_id       TEXT NOT NULL,
        patient_id     TEXT NOT NULL,
        charge_amount  REAL NOT NULL,
        cpt_code       TEXT NOT NULL,
        risk_score     REAL NOT NULL
    )
    "#,
    "CREATE INDEX IF NOT EXISTS charge_claim_id_idx ON charge (claim_id)",
];

#[derive(Debug, Error)]
pub enum StoreError {
    /// The requested job or charge does not exist.
    #[error("not found")]
    NotFound,

    /// A batch referenced a job row that does not exist.
    #[error("job {0} does not exist")]
    JobMissing(JobId),

    #[error("database error: {0}")]
    Sqlx(#[from] sqlx::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl StoreError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound)
    }
}

/// Handle to the storage engine. Cheap to clone (shares the pool).
#[derive(Debug, Clone)]
pub struct Database {
    pool: SqlitePool,
}

impl Database {
    /// Open (or create) the database file at `path` with WAL enabled and the
    /// schema bootstrapped.
    pub async fn open(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let options = SqliteConnectOptions::new()
            .filename(path)
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .synchronous(SqliteSynchronous::Normal)
            .busy_timeout(BUSY_TIMEOUT);

        let pool = SqlitePoolOptions::new()
            .max_connections(MAX_CONNECTIONS)
            .connect_with(options)
            .await?;

        let db = Self { pool };
        db.bootstrap().await?;
        info!(path = %path.display(), "storage opened (wal)");
        Ok(db)
    }

    /// Private in-memory database (tests/dev).
    ///
    /// Backed by a single connection that is never recycled, since every
    /// SQLite memory connection is its own database.
    pub async fn in_memory() -> Result<Self, StoreError> {
        let options = SqliteConnectOptions::from_str("sqlite::memory:")?;
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .min_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect_with(options)
            .await?;

        let db = Self { pool };
        db.bootstrap().await?;
        Ok(db)
    }

    async fn bootstrap(&self) -> Result<(), StoreError> {
        for statement in SCHEMA {
            sqlx::query(*statement).execute(&self.pool).await?;
        }
        debug!("schema ready");
        Ok(())
    }

    /// The underlying connection pool.
    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Begin a transaction. Dropping it without `commit` rolls it back.
    pub async fn begin(&self) -> Result<Transaction<'static, Sqlite>, StoreError> {
        Ok(self.pool.begin().await?)
    }

    /// Report the journal mode actually in effect (`wal` for file databases).
    pub async fn journal_mode(&self) -> Result<String, StoreError> {
        let mode: String = sqlx::query_scalar("PRAGMA journal_mode")
            .fetch_one(&self.pool)
            .await?;
        Ok(mode.to_ascii_lowercase())
    }

    pub async fn close(&self) {
        self.pool.close().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn file_database_uses_wal() {
        let dir = tempfile::tempdir().unwrap();
        let db = Database::open(dir.path().join("nested").join("db.sqlite"))
            .await
            .unwrap();

        assert_eq!(db.journal_mode().await.unwrap(), "wal");
    }

    #[tokio::test]
    async fn bootstrap_is_repeatable() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("db.sqlite");

        let first = Database::open(&path).await.unwrap();
        let job = first.create_job().await.unwrap();
        first.close().await;

        let second = Database::open(&path).await.unwrap();
        assert_eq!(second.get_job(job.job_id).await.unwrap(), job);
    }
}
