//! Session lifecycle for a single user.

use std::sync::Arc;

use parley_types::chat::{ChatSession, SessionId};
use parley_types::error::StoreError;
use tracing::{debug, info};

use crate::chat::ChatSessionHandle;
use crate::repository::{ChatRepository, Repositories};
use crate::user::UserHandle;

/// Chat Store scoped to the user it was created from.
///
/// Sessions of other users are never listed and look exactly like missing
/// sessions to every method here. After any delete the owning user's cached
/// row is reloaded, so an active-session pointer cleared by the delete is
/// visible through the user handle straight away.
pub struct ChatSessionManager<R: Repositories> {
    repos: Arc<R>,
    user: UserHandle<R>,
}

impl<R: Repositories> Clone for ChatSessionManager<R> {
    fn clone(&self) -> Self {
        Self {
            repos: Arc::clone(&self.repos),
            user: self.user.clone(),
        }
    }
}

impl<R: Repositories> ChatSessionManager<R> {
    pub(crate) fn new(user: UserHandle<R>) -> Self {
        Self {
            repos: Arc::clone(user.repos()),
            user,
        }
    }

    /// The owning user.
    pub fn user(&self) -> &UserHandle<R> {
        &self.user
    }

    fn handle(&self, session: ChatSession) -> ChatSessionHandle<R> {
        ChatSessionHandle::new(Arc::clone(&self.repos), self.user.clone(), session)
    }

    /// Create an open session for `model` with default parameters.
    pub async fn new_session(&self, model: &str) -> Result<ChatSessionHandle<R>, StoreError> {
        let session = ChatSession::new(self.user.id(), model);
        session.settings.validate()?;

        let session = self.repos.chats().create_session(&session).await?;
        info!(
            user_id = %session.user_id,
            session_id = %session.id,
            model = %session.model,
            "Chat session created"
        );
        Ok(self.handle(session))
    }

    /// Sessions of the owning user, oldest first.
    pub async fn list_sessions(&self) -> Result<Vec<ChatSessionHandle<R>>, StoreError> {
        let sessions = self.repos.chats().list_sessions(&self.user.id()).await?;
        Ok(sessions.into_iter().map(|s| self.handle(s)).collect())
    }

    /// `NotFound` both for unknown ids and for sessions of other users.
    pub async fn get_session(&self, id: &SessionId) -> Result<ChatSessionHandle<R>, StoreError> {
        match self.repos.chats().get_session(&self.user.id(), id).await? {
            Some(session) => Ok(self.handle(session)),
            None => Err(StoreError::NotFound(format!("chat session '{id}'"))),
        }
    }

    /// Resolve the user's active session from the cached user row.
    ///
    /// `None` when no session is active. A pointer that no longer resolves
    /// surfaces the `NotFound` from [`get_session`](Self::get_session).
    pub async fn current_active_session(
        &self,
    ) -> Result<Option<ChatSessionHandle<R>>, StoreError> {
        match self.user.active_session_id() {
            Some(id) => self.get_session(&id).await.map(Some),
            None => Ok(None),
        }
    }

    /// Make `session` the user's active session.
    pub async fn set_active_session(
        &self,
        session: &ChatSessionHandle<R>,
    ) -> Result<(), StoreError> {
        self.user.set_active_session_id(session.session_id()).await
    }

    /// Delete one session and its exchanges. Unknown or foreign ids delete
    /// nothing and are not an error.
    pub async fn delete_session(&self, id: &SessionId) -> Result<(), StoreError> {
        self.delete_multiple_sessions(std::slice::from_ref(id))
            .await
            .map(|_| ())
    }

    /// Delete the listed sessions owned by this user. Returns how many were
    /// removed.
    pub async fn delete_multiple_sessions(&self, ids: &[SessionId]) -> Result<u64, StoreError> {
        let user_id = self.user.id();
        let removed = self.repos.chats().delete_sessions(&user_id, ids).await?;
        debug!(user_id = %user_id, requested = ids.len(), removed, "Chat sessions deleted");
        self.resync_owner().await?;
        Ok(removed)
    }

    pub async fn delete_all_sessions(&self) -> Result<u64, StoreError> {
        let user_id = self.user.id();
        let removed = self.repos.chats().delete_all_sessions(&user_id).await?;
        info!(user_id = %user_id, removed, "All chat sessions deleted");
        self.resync_owner().await?;
        Ok(removed)
    }

    /// Storage clears a deleted session from `active_session_id` on its own;
    /// the cached user row has to be reloaded to see it.
    async fn resync_owner(&self) -> Result<(), StoreError> {
        self.user.refresh().await
    }
}
