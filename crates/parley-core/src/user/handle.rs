//! Mutable view of one user row.

use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard};

use parley_types::chat::SessionId;
use parley_types::error::StoreError;
use parley_types::user::{User, UserId};

use crate::chat::manager::ChatSessionManager;
use crate::repository::{Repositories, UserRepository};

/// Handle to a single user.
///
/// Holds the last row read or written through it. Every mutator writes
/// through the repository in one unit of work and then replaces the cached
/// row with what storage returned. Clones share the cached row; handles
/// obtained separately from a [`UserManager`](super::UserManager) do not,
/// so they only converge after [`refresh`](Self::refresh).
pub struct UserHandle<R: Repositories> {
    repos: Arc<R>,
    entry: Arc<RwLock<User>>,
}

impl<R: Repositories> Clone for UserHandle<R> {
    fn clone(&self) -> Self {
        Self {
            repos: Arc::clone(&self.repos),
            entry: Arc::clone(&self.entry),
        }
    }
}

impl<R: Repositories> std::fmt::Debug for UserHandle<R> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UserHandle")
            .field("user", &*self.read())
            .finish()
    }
}

impl<R: Repositories> UserHandle<R> {
    pub(crate) fn new(repos: Arc<R>, user: User) -> Self {
        Self {
            repos,
            entry: Arc::new(RwLock::new(user)),
        }
    }

    fn read(&self) -> RwLockReadGuard<'_, User> {
        self.entry.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn replace(&self, user: User) {
        *self.entry.write().unwrap_or_else(PoisonError::into_inner) = user;
    }

    pub(crate) fn repos(&self) -> &Arc<R> {
        &self.repos
    }

    pub fn id(&self) -> UserId {
        self.read().id.clone()
    }

    pub fn name(&self) -> String {
        self.read().name.clone()
    }

    /// Rename the user. `Conflict` if another user already has `new_name`;
    /// the cached row is left untouched on failure.
    pub async fn set_name(&self, new_name: &str) -> Result<(), StoreError> {
        let id = self.id();
        let updated = self.repos.users().rename_user(&id, new_name).await?;
        tracing::debug!(user_id = %id, user_name = %new_name, "User renamed");
        self.replace(updated);
        Ok(())
    }

    pub fn api_token(&self) -> String {
        self.read().api_token.clone()
    }

    pub async fn set_api_token(&self, token: &str) -> Result<(), StoreError> {
        let id = self.id();
        let updated = self.repos.users().set_api_token(&id, token).await?;
        self.replace(updated);
        Ok(())
    }

    pub fn active_session_id(&self) -> Option<SessionId> {
        self.read().active_session_id.clone()
    }

    /// Point the user at one of its own sessions.
    ///
    /// Fails with `ReferentialViolation` when `session_id` is unknown or owned
    /// by another user; the stored and cached pointers stay as they were.
    pub async fn set_active_session_id(&self, session_id: &SessionId) -> Result<(), StoreError> {
        let id = self.id();
        let updated = match self.repos.users().set_active_session(&id, session_id).await {
            Ok(user) => user,
            Err(e) => {
                tracing::warn!(
                    user_id = %id,
                    session_id = %session_id,
                    error = %e,
                    "Rejected active session"
                );
                return Err(e);
            }
        };
        self.replace(updated);
        Ok(())
    }

    /// Drop the active-session pointer. Only a storage fault fails this; a
    /// user row that is already gone has no pointer left to clear.
    pub async fn clear_active_session_id(&self) -> Result<(), StoreError> {
        let id = self.id();
        match self.repos.users().clear_active_session(&id).await {
            Ok(updated) => self.replace(updated),
            Err(e) if e.is_not_found() => {
                tracing::debug!(user_id = %id, "User already deleted; nothing to clear");
                self.entry
                    .write()
                    .unwrap_or_else(PoisonError::into_inner)
                    .active_session_id = None;
            }
            Err(e) => return Err(e),
        }
        Ok(())
    }

    /// Reload the cached row. `NotFound` once the user has been deleted.
    pub async fn refresh(&self) -> Result<(), StoreError> {
        let id = self.id();
        let user = self
            .repos
            .users()
            .get_user(&id)
            .await?
            .ok_or_else(|| StoreError::NotFound(format!("user '{id}'")))?;
        self.replace(user);
        Ok(())
    }

    /// Chat store scoped to this user. The manager shares this handle's
    /// cached row.
    pub fn chat_session_manager(&self) -> ChatSessionManager<R> {
        ChatSessionManager::new(self.clone())
    }

    /// Copy of the cached row.
    pub fn snapshot(&self) -> User {
        self.read().clone()
    }
}

impl<R: Repositories> std::fmt::Display for UserHandle<R> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        std::fmt::Display::fmt(&*self.read(), f)
    }
}
