//! SQLite chat repository implementation.
//!
//! Implements `ChatRepository` from `parley-core`. Follows the same patterns
//! as `SqliteUserRepository`: raw queries, private Row structs, split
//! reader/writer pool usage. Every statement carries the owning user id, so
//! another user's session is indistinguishable from a missing one.

use chrono::Utc;
use parley_core::repository::ChatRepository;
use parley_types::chat::{ChatExchange, ChatSession, SessionId, SessionState};
use parley_types::error::StoreError;
use parley_types::params::ChatSessionParameters;
use parley_types::user::UserId;
use sqlx::{Row, SqliteConnection};
use uuid::Uuid;

use super::pool::DatabasePool;
use super::{format_datetime, parse_datetime, storage_error, write_error};

/// SQLite-backed implementation of `ChatRepository`.
#[derive(Clone)]
pub struct SqliteChatRepository {
    pool: DatabasePool,
}

impl SqliteChatRepository {
    pub fn new(pool: DatabasePool) -> Self {
        Self { pool }
    }
}

// ---------------------------------------------------------------------------
// Private Row types for SQLite-to-domain mapping
// ---------------------------------------------------------------------------

struct ChatSessionRow {
    id: String,
    user_id: String,
    state: String,
    model: String,
    settings: String,
    created_at: String,
    updated_at: String,
}

impl ChatSessionRow {
    fn from_row(row: &sqlx::sqlite::SqliteRow) -> Result<Self, sqlx::Error> {
        Ok(Self {
            id: row.try_get("id")?,
            user_id: row.try_get("user_id")?,
            state: row.try_get("state")?,
            model: row.try_get("model")?,
            settings: row.try_get("settings")?,
            created_at: row.try_get("created_at")?,
            updated_at: row.try_get("updated_at")?,
        })
    }

    fn into_session(self) -> Result<ChatSession, StoreError> {
        let id: SessionId = self
            .id
            .parse()
            .map_err(|e| StoreError::Storage(format!("invalid session id: {e}")))?;
        let user_id: UserId = self
            .user_id
            .parse()
            .map_err(|e| StoreError::Storage(format!("invalid user_id: {e}")))?;
        let state: SessionState = self.state.parse().map_err(StoreError::Storage)?;
        let settings: ChatSessionParameters = serde_json::from_str(&self.settings)
            .map_err(|e| StoreError::Storage(format!("invalid settings for session {id}: {e}")))?;

        Ok(ChatSession {
            id,
            user_id,
            state,
            model: self.model,
            settings,
            created_at: parse_datetime(&self.created_at)?,
            updated_at: parse_datetime(&self.updated_at)?,
        })
    }
}

struct ChatExchangeRow {
    request: String,
    request_ts: String,
    response: String,
    response_ts: String,
}

impl ChatExchangeRow {
    fn from_row(row: &sqlx::sqlite::SqliteRow) -> Result<Self, sqlx::Error> {
        Ok(Self {
            request: row.try_get("request")?,
            request_ts: row.try_get("request_ts")?,
            response: row.try_get("response")?,
            response_ts: row.try_get("response_ts")?,
        })
    }

    fn into_exchange(self) -> Result<ChatExchange, StoreError> {
        Ok(ChatExchange {
            request_timestamp: parse_datetime(&self.request_ts)?,
            request: self.request,
            response_timestamp: parse_datetime(&self.response_ts)?,
            response: self.response,
        })
    }
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn decode_session(row: &sqlx::sqlite::SqliteRow) -> Result<ChatSession, StoreError> {
    ChatSessionRow::from_row(row)
        .map_err(storage_error)?
        .into_session()
}

fn decode_exchange(row: &sqlx::sqlite::SqliteRow) -> Result<ChatExchange, StoreError> {
    ChatExchangeRow::from_row(row)
        .map_err(storage_error)?
        .into_exchange()
}

fn session_not_found(id: &SessionId) -> StoreError {
    StoreError::NotFound(format!("chat session '{id}'"))
}

fn encode_settings(settings: &ChatSessionParameters) -> Result<String, StoreError> {
    serde_json::to_string(settings)
        .map_err(|e| StoreError::Storage(format!("cannot encode settings: {e}")))
}

/// Read a session owned by `user_id` inside the caller's transaction.
async fn fetch_owned(
    conn: &mut SqliteConnection,
    user_id: &UserId,
    session_id: &SessionId,
) -> Result<ChatSession, StoreError> {
    let row = sqlx::query("SELECT * FROM chat_sessions WHERE id = ? AND user_id = ?")
        .bind(session_id.to_string())
        .bind(user_id.to_string())
        .fetch_optional(&mut *conn)
        .await
        .map_err(storage_error)?;
    match row {
        Some(row) => decode_session(&row),
        None => Err(session_not_found(session_id)),
    }
}

/// Persist `model` and `settings` (and nothing else) of an already fetched
/// session.
async fn store_settings(
    conn: &mut SqliteConnection,
    session: &mut ChatSession,
) -> Result<(), StoreError> {
    session.model = session.settings.model.clone();
    session.updated_at = Utc::now();
    sqlx::query(
        "UPDATE chat_sessions SET model = ?, settings = ?, updated_at = ? WHERE id = ? AND user_id = ?",
    )
    .bind(&session.model)
    .bind(encode_settings(&session.settings)?)
    .bind(format_datetime(&session.updated_at))
    .bind(session.id.to_string())
    .bind(session.user_id.to_string())
    .execute(&mut *conn)
    .await
    .map_err(storage_error)?;
    Ok(())
}

// ---------------------------------------------------------------------------
// ChatRepository implementation
// ---------------------------------------------------------------------------

impl ChatRepository for SqliteChatRepository {
    #[tracing::instrument(
        skip_all,
        fields(user_id = %session.user_id, session_id = %session.id),
        err(level = "warn")
    )]
    async fn create_session(&self, session: &ChatSession) -> Result<ChatSession, StoreError> {
        let mut tx = self.pool.begin_write().await?;

        let owner: Option<i64> = sqlx::query_scalar("SELECT 1 FROM users WHERE id = ?")
            .bind(session.user_id.to_string())
            .fetch_optional(&mut *tx)
            .await
            .map_err(storage_error)?;
        if owner.is_none() {
            return Err(StoreError::NotFound(format!("user '{}'", session.user_id)));
        }

        sqlx::query(
            r#"INSERT INTO chat_sessions (id, user_id, state, model, settings, created_at, updated_at)
               VALUES (?, ?, ?, ?, ?, ?, ?)"#,
        )
        .bind(session.id.to_string())
        .bind(session.user_id.to_string())
        .bind(session.state.as_str())
        .bind(&session.model)
        .bind(encode_settings(&session.settings)?)
        .bind(format_datetime(&session.created_at))
        .bind(format_datetime(&session.updated_at))
        .execute(&mut *tx)
        .await
        .map_err(|e| write_error(e, || format!("chat session '{}' already exists", session.id)))?;

        tx.commit().await.map_err(storage_error)?;
        tracing::debug!(user_id = %session.user_id, session_id = %session.id, "Inserted chat session");
        Ok(session.clone())
    }

    async fn list_sessions(&self, user_id: &UserId) -> Result<Vec<ChatSession>, StoreError> {
        let rows =
            sqlx::query("SELECT * FROM chat_sessions WHERE user_id = ? ORDER BY created_at, id")
                .bind(user_id.to_string())
                .fetch_all(&self.pool.reader)
                .await
                .map_err(storage_error)?;
        rows.iter().map(decode_session).collect()
    }

    async fn get_session(
        &self,
        user_id: &UserId,
        session_id: &SessionId,
    ) -> Result<Option<ChatSession>, StoreError> {
        let row = sqlx::query("SELECT * FROM chat_sessions WHERE id = ? AND user_id = ?")
            .bind(session_id.to_string())
            .bind(user_id.to_string())
            .fetch_optional(&self.pool.reader)
            .await
            .map_err(storage_error)?;
        row.as_ref().map(decode_session).transpose()
    }

    #[tracing::instrument(
        skip_all,
        fields(user_id = %user_id, session_id = %session_id),
        err(level = "warn")
    )]
    async fn close_session(
        &self,
        user_id: &UserId,
        session_id: &SessionId,
    ) -> Result<ChatSession, StoreError> {
        let mut tx = self.pool.begin_write().await?;
        sqlx::query(
            "UPDATE chat_sessions SET state = ?, updated_at = ? WHERE id = ? AND user_id = ? AND state != ?",
        )
        .bind(SessionState::Closed.as_str())
        .bind(format_datetime(&Utc::now()))
        .bind(session_id.to_string())
        .bind(user_id.to_string())
        .bind(SessionState::Closed.as_str())
        .execute(&mut *tx)
        .await
        .map_err(storage_error)?;

        let session = fetch_owned(&mut tx, user_id, session_id).await?;
        tx.commit().await.map_err(storage_error)?;
        Ok(session)
    }

    #[tracing::instrument(
        skip_all,
        fields(user_id = %user_id, session_id = %session_id),
        err(level = "warn")
    )]
    async fn change_model(
        &self,
        user_id: &UserId,
        session_id: &SessionId,
        model: &str,
    ) -> Result<ChatSession, StoreError> {
        let mut tx = self.pool.begin_write().await?;
        let mut session = fetch_owned(&mut tx, user_id, session_id).await?;
        session.settings.model = model.to_string();
        store_settings(&mut tx, &mut session).await?;
        tx.commit().await.map_err(storage_error)?;
        Ok(session)
    }

    #[tracing::instrument(
        skip_all,
        fields(user_id = %user_id, session_id = %session_id),
        err(level = "warn")
    )]
    async fn merge_settings(
        &self,
        user_id: &UserId,
        session_id: &SessionId,
        incoming: &ChatSessionParameters,
    ) -> Result<ChatSession, StoreError> {
        let mut tx = self.pool.begin_write().await?;
        let mut session = fetch_owned(&mut tx, user_id, session_id).await?;
        session.settings.merge(incoming);
        store_settings(&mut tx, &mut session).await?;
        tx.commit().await.map_err(storage_error)?;
        tracing::debug!(session_id = %session_id, "Chat session settings updated");
        Ok(session)
    }

    #[tracing::instrument(
        skip_all,
        fields(user_id = %user_id, requested = session_ids.len()),
        err(level = "warn")
    )]
    async fn delete_sessions(
        &self,
        user_id: &UserId,
        session_ids: &[SessionId],
    ) -> Result<u64, StoreError> {
        let mut tx = self.pool.begin_write().await?;
        let mut removed = 0;
        for session_id in session_ids {
            let result = sqlx::query("DELETE FROM chat_sessions WHERE id = ? AND user_id = ?")
                .bind(session_id.to_string())
                .bind(user_id.to_string())
                .execute(&mut *tx)
                .await
                .map_err(storage_error)?;
            removed += result.rows_affected();
        }
        tx.commit().await.map_err(storage_error)?;
        Ok(removed)
    }

    #[tracing::instrument(skip_all, fields(user_id = %user_id), err(level = "warn"))]
    async fn delete_all_sessions(&self, user_id: &UserId) -> Result<u64, StoreError> {
        let mut tx = self.pool.begin_write().await?;
        let result = sqlx::query("DELETE FROM chat_sessions WHERE user_id = ?")
            .bind(user_id.to_string())
            .execute(&mut *tx)
            .await
            .map_err(storage_error)?;
        tx.commit().await.map_err(storage_error)?;
        Ok(result.rows_affected())
    }

    #[tracing::instrument(
        skip_all,
        fields(user_id = %user_id, session_id = %session_id),
        err(level = "warn")
    )]
    async fn record_exchange(
        &self,
        user_id: &UserId,
        session_id: &SessionId,
        exchange: &ChatExchange,
    ) -> Result<(), StoreError> {
        exchange.validate()?;
        let now = format_datetime(&Utc::now());
        let mut tx = self.pool.begin_write().await?;
        // Ownership check and insert in one statement.
        let result = sqlx::query(
            r#"INSERT INTO chat_session_exchanges
                   (id, session_id, request, request_ts, response, response_ts, created_at, updated_at)
               SELECT ?, ?, ?, ?, ?, ?, ?, ?
               WHERE EXISTS (SELECT 1 FROM chat_sessions WHERE id = ? AND user_id = ?)"#,
        )
        .bind(Uuid::now_v7().to_string())
        .bind(session_id.to_string())
        .bind(&exchange.request)
        .bind(format_datetime(&exchange.request_timestamp))
        .bind(&exchange.response)
        .bind(format_datetime(&exchange.response_timestamp))
        .bind(&now)
        .bind(&now)
        .bind(session_id.to_string())
        .bind(user_id.to_string())
        .execute(&mut *tx)
        .await
        .map_err(storage_error)?;

        if result.rows_affected() == 0 {
            return Err(session_not_found(session_id));
        }
        tx.commit().await.map_err(storage_error)?;
        Ok(())
    }

    async fn first_exchange(
        &self,
        user_id: &UserId,
        session_id: &SessionId,
    ) -> Result<Option<ChatExchange>, StoreError> {
        let row = sqlx::query(
            r#"SELECT e.* FROM chat_session_exchanges e
               JOIN chat_sessions s ON s.id = e.session_id
               WHERE e.session_id = ? AND s.user_id = ?
               ORDER BY e.request_ts, e.id
               LIMIT 1"#,
        )
        .bind(session_id.to_string())
        .bind(user_id.to_string())
        .fetch_optional(&self.pool.reader)
        .await
        .map_err(storage_error)?;
        row.as_ref().map(decode_exchange).transpose()
    }

    async fn list_exchanges(
        &self,
        user_id: &UserId,
        session_id: &SessionId,
    ) -> Result<Vec<ChatExchange>, StoreError> {
        let rows = sqlx::query(
            r#"SELECT e.* FROM chat_session_exchanges e
               JOIN chat_sessions s ON s.id = e.session_id
               WHERE e.session_id = ? AND s.user_id = ?
               ORDER BY e.request_ts, e.id"#,
        )
        .bind(session_id.to_string())
        .bind(user_id.to_string())
        .fetch_all(&self.pool.reader)
        .await
        .map_err(storage_error)?;
        rows.iter().map(decode_exchange).collect()
    }

    #[tracing::instrument(
        skip_all,
        fields(user_id = %user_id, session_id = %session_id),
        err(level = "warn")
    )]
    async fn delete_latest_exchange(
        &self,
        user_id: &UserId,
        session_id: &SessionId,
    ) -> Result<bool, StoreError> {
        let mut tx = self.pool.begin_write().await?;
        let result = sqlx::query(
            r#"DELETE FROM chat_session_exchanges WHERE id = (
                   SELECT e.id FROM chat_session_exchanges e
                   JOIN chat_sessions s ON s.id = e.session_id
                   WHERE e.session_id = ? AND s.user_id = ?
                   ORDER BY e.request_ts DESC, e.id DESC
                   LIMIT 1
               )"#,
        )
        .bind(session_id.to_string())
        .bind(user_id.to_string())
        .execute(&mut *tx)
        .await
        .map_err(storage_error)?;
        tx.commit().await.map_err(storage_error)?;
        Ok(result.rows_affected() > 0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sqlite::test_support::test_pool;
    use crate::sqlite::user::SqliteUserRepository;
    use chrono::{Duration, TimeZone};
    use parley_core::repository::UserRepository;
    use parley_types::user::User;

    struct Fixture {
        users: SqliteUserRepository,
        chats: SqliteChatRepository,
    }

    async fn fixture() -> Fixture {
        let pool = test_pool().await;
        Fixture {
            users: SqliteUserRepository::new(pool.clone()),
            chats: SqliteChatRepository::new(pool),
        }
    }

    fn exchange(request: &str, secs: i64) -> ChatExchange {
        let base = Utc.with_ymd_and_hms(2024, 6, 1, 8, 0, 0).unwrap();
        ChatExchange {
            request_timestamp: base + Duration::seconds(secs),
            request: request.to_string(),
            response_timestamp: base + Duration::seconds(secs + 1),
            response: format!("re: {request}"),
        }
    }

    #[tokio::test]
    async fn test_create_and_get_session() {
        let f = fixture().await;
        let alice = f.users.create_user(&User::new("alice")).await.unwrap();
        let session = ChatSession::new(alice.id.clone(), "m1");
        f.chats.create_session(&session).await.unwrap();

        let fetched = f
            .chats
            .get_session(&alice.id, &session.id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(fetched, session);
    }

    #[tokio::test]
    async fn test_create_session_for_missing_user() {
        let f = fixture().await;
        let err = f
            .chats
            .create_session(&ChatSession::new(UserId::new(), "m1"))
            .await
            .unwrap_err();
        assert!(err.is_not_found());
    }

    #[tokio::test]
    async fn test_close_is_idempotent() {
        let f = fixture().await;
        let alice = f.users.create_user(&User::new("alice")).await.unwrap();
        let session = ChatSession::new(alice.id.clone(), "m1");
        f.chats.create_session(&session).await.unwrap();

        let closed = f.chats.close_session(&alice.id, &session.id).await.unwrap();
        assert_eq!(closed.state, SessionState::Closed);
        let again = f.chats.close_session(&alice.id, &session.id).await.unwrap();
        assert_eq!(again.state, SessionState::Closed);
        assert_eq!(again.updated_at, closed.updated_at);
    }

    #[tokio::test]
    async fn test_merge_settings_keeps_model_column_in_sync() {
        let f = fixture().await;
        let alice = f.users.create_user(&User::new("alice")).await.unwrap();
        let session = ChatSession::new(alice.id.clone(), "m1");
        f.chats.create_session(&session).await.unwrap();

        let mut incoming = ChatSessionParameters::new("m2");
        incoming.top_p = Some(0.5);
        let merged = f
            .chats
            .merge_settings(&alice.id, &session.id, &incoming)
            .await
            .unwrap();
        assert_eq!(merged.model, "m2");
        assert_eq!(merged.settings.top_p, Some(0.5));

        let changed = f
            .chats
            .change_model(&alice.id, &session.id, "m3")
            .await
            .unwrap();
        assert_eq!(changed.settings.top_p, Some(0.5));

        let stored = f
            .chats
            .get_session(&alice.id, &session.id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(stored.model, "m3");
        assert_eq!(stored.settings.model, "m3");
    }

    #[tokio::test]
    async fn test_exchanges_ordered_by_request_ts() {
        let f = fixture().await;
        let alice = f.users.create_user(&User::new("alice")).await.unwrap();
        let session = ChatSession::new(alice.id.clone(), "m1");
        f.chats.create_session(&session).await.unwrap();

        for (request, secs) in [("c", 30), ("a", 10), ("b", 20)] {
            f.chats
                .record_exchange(&alice.id, &session.id, &exchange(request, secs))
                .await
                .unwrap();
        }

        let listed: Vec<String> = f
            .chats
            .list_exchanges(&alice.id, &session.id)
            .await
            .unwrap()
            .into_iter()
            .map(|e| e.request)
            .collect();
        assert_eq!(listed, vec!["a", "b", "c"]);

        assert!(f
            .chats
            .delete_latest_exchange(&alice.id, &session.id)
            .await
            .unwrap());
        let first = f
            .chats
            .first_exchange(&alice.id, &session.id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(first, exchange("a", 10));
        assert_eq!(
            f.chats
                .list_exchanges(&alice.id, &session.id)
                .await
                .unwrap()
                .len(),
            2
        );
    }

    #[tokio::test]
    async fn test_other_users_exchanges_untouchable() {
        let f = fixture().await;
        let alice = f.users.create_user(&User::new("alice")).await.unwrap();
        let bob = f.users.create_user(&User::new("bob")).await.unwrap();
        let b_session = ChatSession::new(bob.id.clone(), "m1");
        f.chats.create_session(&b_session).await.unwrap();
        f.chats
            .record_exchange(&bob.id, &b_session.id, &exchange("mine", 0))
            .await
            .unwrap();

        let err = f
            .chats
            .record_exchange(&alice.id, &b_session.id, &exchange("theirs", 1))
            .await
            .unwrap_err();
        assert!(err.is_not_found());
        assert!(!f
            .chats
            .delete_latest_exchange(&alice.id, &b_session.id)
            .await
            .unwrap());
        assert!(f
            .chats
            .list_exchanges(&alice.id, &b_session.id)
            .await
            .unwrap()
            .is_empty());
        assert_eq!(
            f.chats
                .list_exchanges(&bob.id, &b_session.id)
                .await
                .unwrap()
                .len(),
            1
        );
    }

    #[tokio::test]
    async fn test_delete_sessions_cascades_exchanges() {
        let pool = test_pool().await;
        let users = SqliteUserRepository::new(pool.clone());
        let chats = SqliteChatRepository::new(pool.clone());
        let alice = users.create_user(&User::new("alice")).await.unwrap();
        let session = ChatSession::new(alice.id.clone(), "m1");
        chats.create_session(&session).await.unwrap();
        chats
            .record_exchange(&alice.id, &session.id, &exchange("x", 0))
            .await
            .unwrap();

        let removed = chats
            .delete_sessions(&alice.id, &[session.id.clone(), SessionId::new()])
            .await
            .unwrap();
        assert_eq!(removed, 1);

        let count: (i64,) = sqlx::query_as("SELECT COUNT(*) FROM chat_session_exchanges")
            .fetch_one(&pool.reader)
            .await
            .unwrap();
        assert_eq!(count.0, 0);
    }

    #[tokio::test]
    async fn test_exchange_beyond_year_9999_is_not_stored() {
        let f = fixture().await;
        let alice = f.users.create_user(&User::new("alice")).await.unwrap();
        let session = ChatSession::new(alice.id.clone(), "m1");
        f.chats.create_session(&session).await.unwrap();

        let last_year = ChatExchange {
            request_timestamp: Utc.with_ymd_and_hms(9999, 1, 1, 0, 0, 0).unwrap(),
            request: "late".to_string(),
            response_timestamp: Utc.with_ymd_and_hms(9999, 1, 1, 0, 0, 1).unwrap(),
            response: "still fits".to_string(),
        };
        let mut too_late = last_year.clone();
        too_late.request_timestamp = Utc.with_ymd_and_hms(10000, 1, 1, 0, 0, 0).unwrap();

        let err = f
            .chats
            .record_exchange(&alice.id, &session.id, &too_late)
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::InvalidExchange(_)));

        f.chats
            .record_exchange(&alice.id, &session.id, &last_year)
            .await
            .unwrap();
        let first = f
            .chats
            .first_exchange(&alice.id, &session.id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(first, last_year);
        assert_eq!(
            f.chats
                .list_exchanges(&alice.id, &session.id)
                .await
                .unwrap()
                .len(),
            1
        );
    }
}
