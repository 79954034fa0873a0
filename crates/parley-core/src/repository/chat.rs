//! ChatRepository trait definition.
//!
//! Every method is scoped by the owning user: a session belonging to another
//! user behaves exactly like a session that does not exist.

use parley_types::chat::{ChatExchange, ChatSession, SessionId};
use parley_types::error::StoreError;
use parley_types::params::ChatSessionParameters;
use parley_types::user::UserId;

/// Repository trait for chat session and exchange persistence.
///
/// Follows the same RPITIT pattern as `UserRepository`.
pub trait ChatRepository: Send + Sync {
    /// Insert a new session for `session.user_id`.
    fn create_session(
        &self,
        session: &ChatSession,
    ) -> impl std::future::Future<Output = Result<ChatSession, StoreError>> + Send;

    /// Sessions owned by `user_id`, oldest first.
    fn list_sessions(
        &self,
        user_id: &UserId,
    ) -> impl std::future::Future<Output = Result<Vec<ChatSession>, StoreError>> + Send;

    fn get_session(
        &self,
        user_id: &UserId,
        session_id: &SessionId,
    ) -> impl std::future::Future<Output = Result<Option<ChatSession>, StoreError>> + Send;

    /// Move the session to `Closed`. Closing a closed session is a no-op.
    fn close_session(
        &self,
        user_id: &UserId,
        session_id: &SessionId,
    ) -> impl std::future::Future<Output = Result<ChatSession, StoreError>> + Send;

    /// Change the target model (both the column and `settings.model`).
    fn change_model(
        &self,
        user_id: &UserId,
        session_id: &SessionId,
        model: &str,
    ) -> impl std::future::Future<Output = Result<ChatSession, StoreError>> + Send;

    /// Read the stored settings, merge `incoming` onto them and write the
    /// result back, all in one unit of work. `incoming` is assumed valid.
    fn merge_settings(
        &self,
        user_id: &UserId,
        session_id: &SessionId,
        incoming: &ChatSessionParameters,
    ) -> impl std::future::Future<Output = Result<ChatSession, StoreError>> + Send;

    /// Delete the listed sessions owned by `user_id`; ids that are unknown or
    /// owned by others are skipped. Returns the number of sessions removed.
    fn delete_sessions(
        &self,
        user_id: &UserId,
        session_ids: &[SessionId],
    ) -> impl std::future::Future<Output = Result<u64, StoreError>> + Send;

    /// Delete every session owned by `user_id`.
    fn delete_all_sessions(
        &self,
        user_id: &UserId,
    ) -> impl std::future::Future<Output = Result<u64, StoreError>> + Send;

    /// Append one exchange. `NotFound` if the session is not (or no longer)
    /// owned by `user_id`; `InvalidExchange` if a timestamp falls outside
    /// years 0000..=9999. Nothing is written on failure.
    fn record_exchange(
        &self,
        user_id: &UserId,
        session_id: &SessionId,
        exchange: &ChatExchange,
    ) -> impl std::future::Future<Output = Result<(), StoreError>> + Send;

    /// Exchange with the earliest request timestamp.
    fn first_exchange(
        &self,
        user_id: &UserId,
        session_id: &SessionId,
    ) -> impl std::future::Future<Output = Result<Option<ChatExchange>, StoreError>> + Send;

    /// All exchanges, ascending by request timestamp.
    fn list_exchanges(
        &self,
        user_id: &UserId,
        session_id: &SessionId,
    ) -> impl std::future::Future<Output = Result<Vec<ChatExchange>, StoreError>> + Send;

    /// Delete the exchange with the latest request timestamp. Returns `false`
    /// when the session has no exchanges.
    fn delete_latest_exchange(
        &self,
        user_id: &UserId,
        session_id: &SessionId,
    ) -> impl std::future::Future<Output = Result<bool, StoreError>> + Send;
}
