//! Database pool with split reader/writer connections in WAL mode.
//!
//! SQLite allows only one writer at a time. `DatabasePool` keeps a
//! multi-connection read-only pool for concurrent reads and a
//! single-connection writer pool, so every write transaction in the process
//! is serialized. Both enforce foreign keys.

use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use parley_types::config::DatabaseConfig;
use parley_types::error::StoreError;
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions};
use sqlx::{Sqlite, Transaction};

use super::storage_error;

/// File name of the database inside the data directory.
pub const DATABASE_FILE: &str = "parley.db";

/// Split read/write pool for SQLite with WAL mode.
///
/// - `reader`: read-only pool (8 connections by default) for SELECT queries.
/// - `writer`: single-connection pool for every transaction that writes.
///
/// Clones share the same pools. The pools stay open until [`close`](Self::close)
/// is called or the last clone is dropped.
#[derive(Clone)]
pub struct DatabasePool {
    pub reader: SqlitePool,
    pub writer: SqlitePool,
}

impl DatabasePool {
    /// Open `{data_dir}/parley.db`, or `config.path` when set, creating the
    /// file and its parent directory if needed.
    pub async fn open(config: &DatabaseConfig, data_dir: &Path) -> Result<Self, StoreError> {
        let path = database_path(config, data_dir);
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await.map_err(|e| {
                StoreError::Storage(format!("cannot create {}: {e}", parent.display()))
            })?;
        }
        Self::connect(&database_url(&path), config).await
    }

    /// Open the database at `database_url` with default settings.
    ///
    /// Runs migrations automatically on the writer pool.
    pub async fn new(database_url: &str) -> Result<Self, StoreError> {
        Self::connect(database_url, &DatabaseConfig::default()).await
    }

    async fn connect(database_url: &str, config: &DatabaseConfig) -> Result<Self, StoreError> {
        let base_opts = SqliteConnectOptions::from_str(database_url)
            .map_err(storage_error)?
            .journal_mode(SqliteJournalMode::Wal)
            .foreign_keys(true)
            .busy_timeout(Duration::from_secs(config.busy_timeout_secs))
            .create_if_missing(true);

        let read_opts = base_opts.clone().read_only(true);
        let write_opts = base_opts;

        let writer = SqlitePoolOptions::new()
            .max_connections(1)
            .connect_with(write_opts)
            .await
            .map_err(storage_error)?;

        // Run migrations on writer before opening reader pool
        if let Err(e) = sqlx::migrate!("../../migrations").run(&writer).await {
            tracing::error!(url = %database_url, error = %e, "Schema migration failed");
            writer.close().await;
            return Err(StoreError::Storage(format!("schema migration failed: {e}")));
        }

        let reader = SqlitePoolOptions::new()
            .max_connections(config.max_reader_connections.max(1))
            .connect_with(read_opts)
            .await
            .map_err(storage_error)?;

        tracing::debug!(url = %database_url, "Database opened");
        Ok(Self { reader, writer })
    }

    /// Start a transaction on the writer connection. Dropping it without
    /// `commit` rolls it back.
    ///
    /// `BEGIN IMMEDIATE` takes the database write lock up front, so a writer
    /// in another process makes this wait for up to `busy_timeout` instead
    /// of failing at the first write after a read.
    pub async fn begin_write(&self) -> Result<Transaction<'static, Sqlite>, StoreError> {
        self.writer
            .begin_with("BEGIN IMMEDIATE")
            .await
            .map_err(storage_error)
    }

    /// Close both pools, waiting for checked-out connections to be returned.
    pub async fn close(&self) {
        self.reader.close().await;
        self.writer.close().await;
        tracing::debug!("Database closed");
    }

    pub fn is_closed(&self) -> bool {
        self.writer.is_closed()
    }
}

/// The database file for `config` under `data_dir`.
pub fn database_path(config: &DatabaseConfig, data_dir: &Path) -> PathBuf {
    config
        .path
        .clone()
        .unwrap_or_else(|| data_dir.join(DATABASE_FILE))
}

/// sqlx connection URL for a database file.
pub fn database_url(path: &Path) -> String {
    format!("sqlite://{}", path.display())
}
