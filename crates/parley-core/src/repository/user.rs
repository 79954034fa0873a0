//! User repository trait definition.

use parley_types::chat::SessionId;
use parley_types::error::StoreError;
use parley_types::user::{User, UserId};

/// Repository trait for user persistence.
///
/// Implementations live in parley-infra (e.g., `SqliteUserRepository`).
/// Uses native async fn in traits (Rust 2024 edition, no async_trait macro).
pub trait UserRepository: Send + Sync {
    /// Insert a new user. `Conflict` if the name is already taken.
    fn create_user(
        &self,
        user: &User,
    ) -> impl std::future::Future<Output = Result<User, StoreError>> + Send;

    /// All users, in one consistent read.
    fn list_users(&self) -> impl std::future::Future<Output = Result<Vec<User>, StoreError>> + Send;

    fn get_user(
        &self,
        id: &UserId,
    ) -> impl std::future::Future<Output = Result<Option<User>, StoreError>> + Send;

    fn get_user_by_name(
        &self,
        name: &str,
    ) -> impl std::future::Future<Output = Result<Option<User>, StoreError>> + Send;

    /// Delete a user and, by cascade, its sessions and their exchanges.
    /// Returns the number of user rows removed (0 when the id is unknown).
    fn delete_user(
        &self,
        id: &UserId,
    ) -> impl std::future::Future<Output = Result<u64, StoreError>> + Send;

    /// Rename a user. `Conflict` if another user already has `new_name`.
    fn rename_user(
        &self,
        id: &UserId,
        new_name: &str,
    ) -> impl std::future::Future<Output = Result<User, StoreError>> + Send;

    fn set_api_token(
        &self,
        id: &UserId,
        token: &str,
    ) -> impl std::future::Future<Output = Result<User, StoreError>> + Send;

    /// Point the user at one of its own sessions.
    ///
    /// `NotFound` if the user is gone; `ReferentialViolation` if the session
    /// does not exist or belongs to someone else. The stored pointer is left
    /// unchanged on failure.
    fn set_active_session(
        &self,
        id: &UserId,
        session_id: &SessionId,
    ) -> impl std::future::Future<Output = Result<User, StoreError>> + Send;

    fn clear_active_session(
        &self,
        id: &UserId,
    ) -> impl std::future::Future<Output = Result<User, StoreError>> + Send;
}
