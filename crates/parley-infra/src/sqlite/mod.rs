//! SQLite storage layer.
//!
//! Repository implementations backed by SQLite with WAL mode and split
//! read/write connection pools.

pub mod chat;
pub mod pool;
pub mod user;

#[cfg(test)]
mod scenarios;

use std::path::Path;

use chrono::{DateTime, SecondsFormat, Utc};
use parley_core::repository::Repositories;
use parley_core::user::UserManager;
use parley_types::config::DatabaseConfig;
use parley_types::error::StoreError;

pub use chat::SqliteChatRepository;
pub use pool::DatabasePool;
pub use user::SqliteUserRepository;

/// Message raised by the schema triggers guarding `users.active_session_id`.
const ACTIVE_SESSION_TRIGGER: &str = "active session not owned by user";

/// Both SQLite repositories over one shared pool.
#[derive(Clone)]
pub struct SqliteRepositories {
    pool: DatabasePool,
    users: SqliteUserRepository,
    chats: SqliteChatRepository,
}

impl SqliteRepositories {
    pub fn new(pool: DatabasePool) -> Self {
        Self {
            users: SqliteUserRepository::new(pool.clone()),
            chats: SqliteChatRepository::new(pool.clone()),
            pool,
        }
    }

    pub fn pool(&self) -> &DatabasePool {
        &self.pool
    }
}

impl Repositories for SqliteRepositories {
    type Users = SqliteUserRepository;
    type Chats = SqliteChatRepository;

    fn users(&self) -> &SqliteUserRepository {
        &self.users
    }

    fn chats(&self) -> &SqliteChatRepository {
        &self.chats
    }
}

/// Open the database under `data_dir` and return a User Store bound to it.
pub async fn open_user_manager(
    config: &DatabaseConfig,
    data_dir: &Path,
) -> Result<UserManager<SqliteRepositories>, StoreError> {
    let pool = DatabasePool::open(config, data_dir).await?;
    Ok(UserManager::new(SqliteRepositories::new(pool)))
}

// ---------------------------------------------------------------------------
// Helpers shared by the repositories
// ---------------------------------------------------------------------------

pub(crate) fn storage_error(e: sqlx::Error) -> StoreError {
    tracing::error!(error = %e, "SQLite statement failed");
    StoreError::Storage(e.to_string())
}

/// Map a failed write: unique violations become `Conflict` with `conflict`
/// as the message, ownership-trigger and foreign-key failures become
/// `ReferentialViolation`, anything else `Storage`.
pub(crate) fn write_error(e: sqlx::Error, conflict: impl FnOnce() -> String) -> StoreError {
    if let sqlx::Error::Database(db_err) = &e {
        if db_err.is_unique_violation() {
            return StoreError::Conflict(conflict());
        }
        if db_err.is_foreign_key_violation() || db_err.message().contains(ACTIVE_SESSION_TRIGGER) {
            return StoreError::ReferentialViolation(db_err.message().to_string());
        }
    }
    storage_error(e)
}

pub(crate) fn parse_datetime(s: &str) -> Result<DateTime<Utc>, StoreError> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| StoreError::Storage(format!("invalid datetime '{s}': {e}")))
}

/// Fixed-width RFC 3339, so text order in SQLite is time order.
pub(crate) fn format_datetime(dt: &DateTime<Utc>) -> String {
    dt.to_rfc3339_opts(SecondsFormat::Nanos, true)
}
