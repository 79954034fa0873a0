//! SQLite user repository implementation.
//!
//! Implements `UserRepository` from `parley-core` using sqlx with split
//! read/write pools: raw queries, a private Row struct, reads on the reader
//! pool and every write in a writer transaction.

use chrono::Utc;
use parley_core::repository::UserRepository;
use parley_types::chat::SessionId;
use parley_types::error::StoreError;
use parley_types::user::{User, UserId};
use sqlx::{Row, SqliteConnection};

use super::pool::DatabasePool;
use super::{format_datetime, parse_datetime, storage_error, write_error};

/// SQLite-backed implementation of `UserRepository`.
#[derive(Clone)]
pub struct SqliteUserRepository {
    pool: DatabasePool,
}

impl SqliteUserRepository {
    pub fn new(pool: DatabasePool) -> Self {
        Self { pool }
    }
}

/// Internal row type for mapping SQLite rows to domain User.
struct UserRow {
    id: String,
    name: String,
    api_token: String,
    active_session_id: Option<String>,
    created_at: String,
    updated_at: String,
}

impl UserRow {
    fn from_row(row: &sqlx::sqlite::SqliteRow) -> Result<Self, sqlx::Error> {
        Ok(Self {
            id: row.try_get("id")?,
            name: row.try_get("name")?,
            api_token: row.try_get("api_token")?,
            active_session_id: row.try_get("active_session_id")?,
            created_at: row.try_get("created_at")?,
            updated_at: row.try_get("updated_at")?,
        })
    }

    fn into_user(self) -> Result<User, StoreError> {
        let id: UserId = self
            .id
            .parse()
            .map_err(|e| StoreError::Storage(format!("invalid user id: {e}")))?;
        let active_session_id = self
            .active_session_id
            .as_deref()
            .map(|s| s.parse::<SessionId>())
            .transpose()
            .map_err(|e| StoreError::Storage(format!("invalid active_session_id: {e}")))?;

        Ok(User {
            id,
            name: self.name,
            api_token: self.api_token,
            active_session_id,
            created_at: parse_datetime(&self.created_at)?,
            updated_at: parse_datetime(&self.updated_at)?,
        })
    }
}

fn decode(row: &sqlx::sqlite::SqliteRow) -> Result<User, StoreError> {
    UserRow::from_row(row).map_err(storage_error)?.into_user()
}

fn not_found(id: &UserId) -> StoreError {
    StoreError::NotFound(format!("user '{id}'"))
}

/// Re-read a user inside the caller's transaction.
async fn fetch_user(conn: &mut SqliteConnection, id: &UserId) -> Result<User, StoreError> {
    let row = sqlx::query("SELECT * FROM users WHERE id = ?")
        .bind(id.to_string())
        .fetch_optional(&mut *conn)
        .await
        .map_err(storage_error)?;
    match row {
        Some(row) => decode(&row),
        None => Err(not_found(id)),
    }
}

impl UserRepository for SqliteUserRepository {
    #[tracing::instrument(
        skip_all,
        fields(user_id = %user.id, user_name = %user.name),
        err(level = "warn")
    )]
    async fn create_user(&self, user: &User) -> Result<User, StoreError> {
        let mut tx = self.pool.begin_write().await?;
        sqlx::query(
            r#"INSERT INTO users (id, name, api_token, active_session_id, created_at, updated_at)
               VALUES (?, ?, ?, ?, ?, ?)"#,
        )
        .bind(user.id.to_string())
        .bind(&user.name)
        .bind(&user.api_token)
        .bind(user.active_session_id.as_ref().map(|s| s.to_string()))
        .bind(format_datetime(&user.created_at))
        .bind(format_datetime(&user.updated_at))
        .execute(&mut *tx)
        .await
        .map_err(|e| write_error(e, || format!("user name '{}' already exists", user.name)))?;
        tx.commit().await.map_err(storage_error)?;

        tracing::debug!(user_id = %user.id, user_name = %user.name, "Inserted user");
        Ok(user.clone())
    }

    async fn list_users(&self) -> Result<Vec<User>, StoreError> {
        let rows = sqlx::query("SELECT * FROM users ORDER BY created_at, id")
            .fetch_all(&self.pool.reader)
            .await
            .map_err(storage_error)?;
        rows.iter().map(decode).collect()
    }

    async fn get_user(&self, id: &UserId) -> Result<Option<User>, StoreError> {
        let row = sqlx::query("SELECT * FROM users WHERE id = ?")
            .bind(id.to_string())
            .fetch_optional(&self.pool.reader)
            .await
            .map_err(storage_error)?;
        row.as_ref().map(decode).transpose()
    }

    async fn get_user_by_name(&self, name: &str) -> Result<Option<User>, StoreError> {
        let row = sqlx::query("SELECT * FROM users WHERE name = ?")
            .bind(name)
            .fetch_optional(&self.pool.reader)
            .await
            .map_err(storage_error)?;
        row.as_ref().map(decode).transpose()
    }

    #[tracing::instrument(skip_all, fields(user_id = %id), err(level = "warn"))]
    async fn delete_user(&self, id: &UserId) -> Result<u64, StoreError> {
        let mut tx = self.pool.begin_write().await?;
        // Sessions and exchanges go with it via ON DELETE CASCADE.
        let result = sqlx::query("DELETE FROM users WHERE id = ?")
            .bind(id.to_string())
            .execute(&mut *tx)
            .await
            .map_err(storage_error)?;
        tx.commit().await.map_err(storage_error)?;
        Ok(result.rows_affected())
    }

    #[tracing::instrument(
        skip_all,
        fields(user_id = %id, user_name = %new_name),
        err(level = "warn")
    )]
    async fn rename_user(&self, id: &UserId, new_name: &str) -> Result<User, StoreError> {
        let mut tx = self.pool.begin_write().await?;
        let result = sqlx::query("UPDATE users SET name = ?, updated_at = ? WHERE id = ?")
            .bind(new_name)
            .bind(format_datetime(&Utc::now()))
            .bind(id.to_string())
            .execute(&mut *tx)
            .await
            .map_err(|e| write_error(e, || format!("user name '{new_name}' already exists")))?;
        if result.rows_affected() == 0 {
            return Err(not_found(id));
        }
        let user = fetch_user(&mut tx, id).await?;
        tx.commit().await.map_err(storage_error)?;
        Ok(user)
    }

    #[tracing::instrument(skip_all, fields(user_id = %id), err(level = "warn"))]
    async fn set_api_token(&self, id: &UserId, token: &str) -> Result<User, StoreError> {
        let mut tx = self.pool.begin_write().await?;
        let result = sqlx::query("UPDATE users SET api_token = ?, updated_at = ? WHERE id = ?")
            .bind(token)
            .bind(format_datetime(&Utc::now()))
            .bind(id.to_string())
            .execute(&mut *tx)
            .await
            .map_err(storage_error)?;
        if result.rows_affected() == 0 {
            return Err(not_found(id));
        }
        let user = fetch_user(&mut tx, id).await?;
        tx.commit().await.map_err(storage_error)?;
        Ok(user)
    }

    #[tracing::instrument(
        skip_all,
        fields(user_id = %id, session_id = %session_id),
        err(level = "warn")
    )]
    async fn set_active_session(
        &self,
        id: &UserId,
        session_id: &SessionId,
    ) -> Result<User, StoreError> {
        let mut tx = self.pool.begin_write().await?;

        // Existence first, so a missing user is NotFound rather than a
        // referential error.
        fetch_user(&mut tx, id).await?;

        let owned: Option<i64> =
            sqlx::query_scalar("SELECT 1 FROM chat_sessions WHERE id = ? AND user_id = ?")
                .bind(session_id.to_string())
                .bind(id.to_string())
                .fetch_optional(&mut *tx)
                .await
                .map_err(storage_error)?;
        if owned.is_none() {
            return Err(StoreError::ReferentialViolation(format!(
                "chat session '{session_id}' is not owned by user '{id}'"
            )));
        }

        sqlx::query("UPDATE users SET active_session_id = ?, updated_at = ? WHERE id = ?")
            .bind(session_id.to_string())
            .bind(format_datetime(&Utc::now()))
            .bind(id.to_string())
            .execute(&mut *tx)
            .await
            .map_err(|e| write_error(e, || format!("user '{id}'")))?;

        let user = fetch_user(&mut tx, id).await?;
        tx.commit().await.map_err(storage_error)?;
        Ok(user)
    }

    #[tracing::instrument(skip_all, fields(user_id = %id), err(level = "warn"))]
    async fn clear_active_session(&self, id: &UserId) -> Result<User, StoreError> {
        let mut tx = self.pool.begin_write().await?;
        let result =
            sqlx::query("UPDATE users SET active_session_id = NULL, updated_at = ? WHERE id = ?")
                .bind(format_datetime(&Utc::now()))
                .bind(id.to_string())
                .execute(&mut *tx)
                .await
                .map_err(storage_error)?;
        if result.rows_affected() == 0 {
            return Err(not_found(id));
        }
        let user = fetch_user(&mut tx, id).await?;
        tx.commit().await.map_err(storage_error)?;
        Ok(user)
    }
}
