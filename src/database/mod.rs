//! Storage
//!
//! SQLite pool with embedded migrations. File databases run in WAL mode with
//! a busy timeout so concurrent writers queue on the write lock instead of
//! failing.

use std::str::FromStr;
use std::time::Duration;

use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions};
use sqlx::{Sqlite, SqlitePool, Transaction};
use tracing::{debug, info};

use crate::error::TrustChainError;

/// How long a writer waits on the SQLite write lock before failing.
pub const BUSY_TIMEOUT: Duration = Duration::from_secs(10);
const MAX_CONNECTIONS: u32 = 8;

#[derive(Debug, Clone)]
pub struct Database {
    pool: SqlitePool,
}

impl Database {
    /// Connect and run migrations.
    pub async fn new(database_url: &str) -> Result<Self, TrustChainError> {
        if is_in_memory(database_url) {
            return Self::new_in_memory().await;
        }

        let options = SqliteConnectOptions::from_str(database_url)?
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .busy_timeout(BUSY_TIMEOUT)
            .foreign_keys(true);

        let pool = SqlitePoolOptions::new()
            .max_connections(MAX_CONNECTIONS)
            .connect_with(options)
            .await?;

        let db = Self { pool };
        db.run_migrations().await?;
        info!("Connected to {}", database_url);
        Ok(db)
    }

    /// Open an existing store for reading only. Nothing is created or
    /// migrated; a missing file or a database without the audit schema is an
    /// error.
    pub async fn open_read_only(database_url: &str) -> Result<Self, TrustChainError> {
        if is_in_memory(database_url) {
            return Err(TrustChainError::DatabaseError(format!(
                "{} is an in-memory database with no stored events",
                database_url
            )));
        }

        let options = SqliteConnectOptions::from_str(database_url)?
            .create_if_missing(false)
            .read_only(true)
            .busy_timeout(BUSY_TIMEOUT);

        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect_with(options)
            .await?;

        let schema: Option<String> = sqlx::query_scalar(
            "SELECT name FROM sqlite_master WHERE type = 'table' AND name = 'audit_events'",
        )
        .fetch_optional(&pool)
        .await?;
        if schema.is_none() {
            return Err(TrustChainError::DatabaseError(format!(
                "{} has no audit_events table",
                database_url
            )));
        }

        debug!("Opened {} read-only", database_url);
        Ok(Self { pool })
    }

    /// Private in-memory database. A single long-lived connection keeps the
    /// schema alive and serializes every transaction.
    pub async fn new_in_memory() -> Result<Self, TrustChainError> {
        let options = SqliteConnectOptions::from_str("sqlite::memory:")?.foreign_keys(true);

        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .min_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect_with(options)
            .await?;

        let db = Self { pool };
        db.run_migrations().await?;
        debug!("In-memory database ready");
        Ok(db)
    }

    pub async fn run_migrations(&self) -> Result<(), TrustChainError> {
        sqlx::migrate!("./migrations").run(&self.pool).await?;
        Ok(())
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    pub async fn begin(&self) -> Result<Transaction<'static, Sqlite>, TrustChainError> {
        Ok(self.pool.begin().await?)
    }

    pub async fn health_check(&self) -> Result<(), TrustChainError> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }
}

fn is_in_memory(database_url: &str) -> bool {
    database_url.contains(":memory:") || database_url.contains("mode=memory")
}

#[cfg(test)]
mod tests {
    use super::*;
    use sqlx::Row;

    #[tokio::test]
    async fn test_in_memory_schema() {
        let db = Database::new_in_memory().await.unwrap();
        db.health_check().await.unwrap();

        let row = sqlx::query("SELECT appends FROM audit_chain_lock WHERE id = 1")
            .fetch_one(db.pool())
            .await
            .unwrap();
        assert_eq!(row.get::<i64, _>("appends"), 0);
    }

    #[tokio::test]
    async fn test_file_database_migrates_once() {
        let dir = tempfile::tempdir().unwrap();
        let url = format!("sqlite://{}", dir.path().join("chain.db").display());

        Database::new(&url).await.unwrap();
        let db = Database::new(&url).await.unwrap();
        db.health_check().await.unwrap();
    }

    #[tokio::test]
    async fn test_read_only_open_never_creates_a_store() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("typo.db");
        let url = format!("sqlite://{}", missing.display());

        assert!(Database::open_read_only(&url).await.is_err());
        assert!(!missing.exists());
        assert!(Database::open_read_only("sqlite::memory:").await.is_err());
    }

    #[tokio::test]
    async fn test_read_only_open_requires_audit_schema() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("other.db");
        let options = SqliteConnectOptions::from_str(&format!("sqlite://{}", path.display()))
            .unwrap()
            .create_if_missing(true);
        let pool = SqlitePoolOptions::new().connect_with(options).await.unwrap();
        sqlx::query("CREATE TABLE unrelated (id INTEGER)")
            .execute(&pool)
            .await
            .unwrap();
        pool.close().await;

        let url = format!("sqlite://{}", path.display());
        assert!(matches!(
            Database::open_read_only(&url).await,
            Err(TrustChainError::DatabaseError(_))
        ));

        let chain = dir.path().join("chain.db");
        let chain_url = format!("sqlite://{}", chain.display());
        let _writer = Database::new(&chain_url).await.unwrap();
        let reader = Database::open_read_only(&chain_url).await.unwrap();
        reader.health_check().await.unwrap();
    }
}
