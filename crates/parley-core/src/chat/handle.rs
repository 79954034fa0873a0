//! Mutable view of one chat session row.

use std::sync::Arc;

use parley_types::chat::{ChatExchange, ChatSession, SessionId, SessionState};
use parley_types::error::{ParameterError, StoreError};
use parley_types::params::ChatSessionParameters;
use tracing::{debug, warn};

use crate::repository::{ChatRepository, Repositories};
use crate::user::UserHandle;

/// Handle to one chat session of one user.
///
/// Caches the session row as of the last read or write through this handle.
/// Exchange history is never cached; every exchange query goes to storage.
pub struct ChatSessionHandle<R: Repositories> {
    repos: Arc<R>,
    user: UserHandle<R>,
    entry: ChatSession,
}

impl<R: Repositories> Clone for ChatSessionHandle<R> {
    fn clone(&self) -> Self {
        Self {
            repos: Arc::clone(&self.repos),
            user: self.user.clone(),
            entry: self.entry.clone(),
        }
    }
}

impl<R: Repositories> std::fmt::Debug for ChatSessionHandle<R> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChatSessionHandle")
            .field("session", &self.entry)
            .finish()
    }
}

impl<R: Repositories> ChatSessionHandle<R> {
    pub(crate) fn new(repos: Arc<R>, user: UserHandle<R>, entry: ChatSession) -> Self {
        Self { repos, user, entry }
    }

    pub fn session_id(&self) -> &SessionId {
        &self.entry.id
    }

    pub fn session_state(&self) -> SessionState {
        self.entry.state
    }

    /// Move the session to `Closed`. Closing an already closed session
    /// succeeds and leaves it closed.
    pub async fn close_session(&mut self) -> Result<(), StoreError> {
        let user_id = self.user.id();
        self.entry = self
            .repos
            .chats()
            .close_session(&user_id, &self.entry.id)
            .await?;
        debug!(user_id = %user_id, session_id = %self.entry.id, "Chat session closed");
        Ok(())
    }

    /// The owner this handle was created for. Not re-queried.
    pub fn user(&self) -> &UserHandle<R> {
        &self.user
    }

    pub fn model(&self) -> &str {
        &self.entry.model
    }

    /// Switch the session to another model. Other settings are kept.
    pub async fn change_model(&mut self, model: &str) -> Result<(), StoreError> {
        if model.trim().is_empty() {
            return Err(ParameterError::EmptyModel.into());
        }
        self.entry = self
            .repos
            .chats()
            .change_model(&self.user.id(), &self.entry.id, model)
            .await?;
        Ok(())
    }

    pub fn settings(&self) -> &ChatSessionParameters {
        &self.entry.settings
    }

    /// Validate `incoming` and merge it onto the stored settings.
    ///
    /// On a validation error nothing is written and the cached settings stay
    /// as they were. On success the merged settings (and the session's
    /// model) are persisted together.
    pub async fn change_settings(
        &mut self,
        incoming: &ChatSessionParameters,
    ) -> Result<(), StoreError> {
        if let Err(e) = incoming.validate() {
            warn!(session_id = %self.entry.id, error = %e, "Rejected chat session parameters");
            return Err(e.into());
        }
        self.entry = self
            .repos
            .chats()
            .merge_settings(&self.user.id(), &self.entry.id, incoming)
            .await?;
        Ok(())
    }

    /// Append one exchange with the caller's timestamps. Permitted whatever
    /// the session state is.
    pub async fn record_one_exchange(&self, exchange: &ChatExchange) -> Result<(), StoreError> {
        self.repos
            .chats()
            .record_exchange(&self.user.id(), &self.entry.id, exchange)
            .await
    }

    /// Exchange with the earliest request timestamp.
    pub async fn first_exchange(&self) -> Result<ChatExchange, StoreError> {
        self.repos
            .chats()
            .first_exchange(&self.user.id(), &self.entry.id)
            .await?
            .ok_or_else(|| {
                StoreError::NotFound(format!("chat session '{}' has no exchanges", self.entry.id))
            })
    }

    /// All exchanges, ascending by request timestamp.
    pub async fn exchanges(&self) -> Result<Vec<ChatExchange>, StoreError> {
        self.repos
            .chats()
            .list_exchanges(&self.user.id(), &self.entry.id)
            .await
    }

    /// Remove the exchange with the latest request timestamp. `NotFound` when
    /// the session has none.
    pub async fn delete_latest_exchange(&self) -> Result<(), StoreError> {
        let deleted = self
            .repos
            .chats()
            .delete_latest_exchange(&self.user.id(), &self.entry.id)
            .await?;
        if deleted {
            Ok(())
        } else {
            Err(StoreError::NotFound(format!(
                "chat session '{}' has no exchanges",
                self.entry.id
            )))
        }
    }

    /// Reload the cached session row. `NotFound` once it has been deleted.
    pub async fn refresh(&mut self) -> Result<(), StoreError> {
        let session = self
            .repos
            .chats()
            .get_session(&self.user.id(), &self.entry.id)
            .await?
            .ok_or_else(|| StoreError::NotFound(format!("chat session '{}'", self.entry.id)))?;
        self.entry = session;
        Ok(())
    }

    /// Copy of the cached row.
    pub fn snapshot(&self) -> ChatSession {
        self.entry.clone()
    }
}
