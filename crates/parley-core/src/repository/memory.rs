//! In-memory implementation of the repository traits.
//!
//! Keeps users, sessions and exchanges behind one mutex so every trait method
//! is atomic, and mirrors the SQLite schema's rules: unique user names,
//! cascade on delete, and `ON DELETE SET NULL` for active-session pointers.
//! Nothing is persisted; dropping the last clone drops the data.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

use chrono::Utc;
use parley_types::chat::{ChatExchange, ChatSession, SessionId, SessionState};
use parley_types::error::StoreError;
use parley_types::params::ChatSessionParameters;
use parley_types::user::{User, UserId};
use uuid::Uuid;

use super::{ChatRepository, Repositories, UserRepository};

/// Shared in-memory store. Clones see the same data.
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    state: Arc<Mutex<MemoryState>>,
}

#[derive(Debug, Default)]
struct MemoryState {
    users: HashMap<UserId, User>,
    sessions: HashMap<SessionId, ChatSession>,
    exchanges: Vec<ExchangeEntry>,
}

#[derive(Debug)]
struct ExchangeEntry {
    id: Uuid,
    session_id: SessionId,
    exchange: ChatExchange,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> Result<MutexGuard<'_, MemoryState>, StoreError> {
        self.state
            .lock()
            .map_err(|_| StoreError::Storage("in-memory store lock poisoned".to_string()))
    }
}

fn user_not_found(id: &UserId) -> StoreError {
    StoreError::NotFound(format!("user '{id}'"))
}

fn session_not_found(id: &SessionId) -> StoreError {
    StoreError::NotFound(format!("chat session '{id}'"))
}

impl MemoryState {
    fn user_mut(&mut self, id: &UserId) -> Result<&mut User, StoreError> {
        self.users.get_mut(id).ok_or_else(|| user_not_found(id))
    }

    fn owned_session(&self, user_id: &UserId, session_id: &SessionId) -> Option<&ChatSession> {
        self.sessions
            .get(session_id)
            .filter(|s| &s.user_id == user_id)
    }

    fn owned_session_mut(
        &mut self,
        user_id: &UserId,
        session_id: &SessionId,
    ) -> Result<&mut ChatSession, StoreError> {
        self.sessions
            .get_mut(session_id)
            .filter(|s| &s.user_id == user_id)
            .ok_or_else(|| session_not_found(session_id))
    }

    fn name_taken(&self, name: &str, except: Option<&UserId>) -> bool {
        self.users
            .values()
            .any(|u| u.name == name && Some(&u.id) != except)
    }

    /// Remove sessions with their exchanges and null out any active-session
    /// pointer that referenced them.
    fn remove_sessions(&mut self, ids: &[SessionId]) -> u64 {
        let mut removed = 0;
        for id in ids {
            if self.sessions.remove(id).is_some() {
                removed += 1;
            }
        }
        self.exchanges.retain(|e| !ids.contains(&e.session_id));
        for user in self.users.values_mut() {
            if user
                .active_session_id
                .as_ref()
                .is_some_and(|active| ids.contains(active))
            {
                user.active_session_id = None;
            }
        }
        removed
    }

    fn sorted_exchanges(&self, session_id: &SessionId) -> Vec<&ExchangeEntry> {
        let mut entries: Vec<&ExchangeEntry> = self
            .exchanges
            .iter()
            .filter(|e| &e.session_id == session_id)
            .collect();
        entries.sort_by(|a, b| {
            a.exchange
                .request_timestamp
                .cmp(&b.exchange.request_timestamp)
                .then(a.id.cmp(&b.id))
        });
        entries
    }
}

impl UserRepository for MemoryStore {
    async fn create_user(&self, user: &User) -> Result<User, StoreError> {
        let mut state = self.lock()?;
        if state.name_taken(&user.name, None) {
            return Err(StoreError::Conflict(format!(
                "user name '{}' already exists",
                user.name
            )));
        }
        if state.users.contains_key(&user.id) {
            return Err(StoreError::Conflict(format!("user id '{}' already exists", user.id)));
        }
        state.users.insert(user.id.clone(), user.clone());
        Ok(user.clone())
    }

    async fn list_users(&self) -> Result<Vec<User>, StoreError> {
        let state = self.lock()?;
        let mut users: Vec<User> = state.users.values().cloned().collect();
        users.sort_by(|a, b| a.id.0.cmp(&b.id.0));
        Ok(users)
    }

    async fn get_user(&self, id: &UserId) -> Result<Option<User>, StoreError> {
        Ok(self.lock()?.users.get(id).cloned())
    }

    async fn get_user_by_name(&self, name: &str) -> Result<Option<User>, StoreError> {
        Ok(self
            .lock()?
            .users
            .values()
            .find(|u| u.name == name)
            .cloned())
    }

    async fn delete_user(&self, id: &UserId) -> Result<u64, StoreError> {
        let mut state = self.lock()?;
        if state.users.remove(id).is_none() {
            return Ok(0);
        }
        let owned: Vec<SessionId> = state
            .sessions
            .values()
            .filter(|s| &s.user_id == id)
            .map(|s| s.id.clone())
            .collect();
        state.remove_sessions(&owned);
        Ok(1)
    }

    async fn rename_user(&self, id: &UserId, new_name: &str) -> Result<User, StoreError> {
        let mut state = self.lock()?;
        if !state.users.contains_key(id) {
            return Err(user_not_found(id));
        }
        if state.name_taken(new_name, Some(id)) {
            return Err(StoreError::Conflict(format!(
                "user name '{new_name}' already exists"
            )));
        }
        let user = state.user_mut(id)?;
        user.name = new_name.to_string();
        user.updated_at = Utc::now();
        Ok(user.clone())
    }

    async fn set_api_token(&self, id: &UserId, token: &str) -> Result<User, StoreError> {
        let mut state = self.lock()?;
        let user = state.user_mut(id)?;
        user.api_token = token.to_string();
        user.updated_at = Utc::now();
        Ok(user.clone())
    }

    async fn set_active_session(
        &self,
        id: &UserId,
        session_id: &SessionId,
    ) -> Result<User, StoreError> {
        let mut state = self.lock()?;
        if !state.users.contains_key(id) {
            return Err(user_not_found(id));
        }
        if state.owned_session(id, session_id).is_none() {
            return Err(StoreError::ReferentialViolation(format!(
                "chat session '{session_id}' is not owned by user '{id}'"
            )));
        }
        let user = state.user_mut(id)?;
        user.active_session_id = Some(session_id.clone());
        user.updated_at = Utc::now();
        Ok(user.clone())
    }

    async fn clear_active_session(&self, id: &UserId) -> Result<User, StoreError> {
        let mut state = self.lock()?;
        let user = state.user_mut(id)?;
        user.active_session_id = None;
        user.updated_at = Utc::now();
        Ok(user.clone())
    }
}

impl ChatRepository for MemoryStore {
    async fn create_session(&self, session: &ChatSession) -> Result<ChatSession, StoreError> {
        let mut state = self.lock()?;
        if !state.users.contains_key(&session.user_id) {
            return Err(user_not_found(&session.user_id));
        }
        if state.sessions.contains_key(&session.id) {
            return Err(StoreError::Conflict(format!(
                "chat session '{}' already exists",
                session.id
            )));
        }
        state.sessions.insert(session.id.clone(), session.clone());
        Ok(session.clone())
    }

    async fn list_sessions(&self, user_id: &UserId) -> Result<Vec<ChatSession>, StoreError> {
        let state = self.lock()?;
        let mut sessions: Vec<ChatSession> = state
            .sessions
            .values()
            .filter(|s| &s.user_id == user_id)
            .cloned()
            .collect();
        sessions.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(sessions)
    }

    async fn get_session(
        &self,
        user_id: &UserId,
        session_id: &SessionId,
    ) -> Result<Option<ChatSession>, StoreError> {
        Ok(self.lock()?.owned_session(user_id, session_id).cloned())
    }

    async fn close_session(
        &self,
        user_id: &UserId,
        session_id: &SessionId,
    ) -> Result<ChatSession, StoreError> {
        let mut state = self.lock()?;
        let session = state.owned_session_mut(user_id, session_id)?;
        if session.state != SessionState::Closed {
            session.state = SessionState::Closed;
            session.updated_at = Utc::now();
        }
        Ok(session.clone())
    }

    async fn change_model(
        &self,
        user_id: &UserId,
        session_id: &SessionId,
        model: &str,
    ) -> Result<ChatSession, StoreError> {
        let mut state = self.lock()?;
        let session = state.owned_session_mut(user_id, session_id)?;
        session.model = model.to_string();
        session.settings.model = model.to_string();
        session.updated_at = Utc::now();
        Ok(session.clone())
    }

    async fn merge_settings(
        &self,
        user_id: &UserId,
        session_id: &SessionId,
        incoming: &ChatSessionParameters,
    ) -> Result<ChatSession, StoreError> {
        let mut state = self.lock()?;
        let session = state.owned_session_mut(user_id, session_id)?;
        session.settings.merge(incoming);
        session.model = session.settings.model.clone();
        session.updated_at = Utc::now();
        Ok(session.clone())
    }

    async fn delete_sessions(
        &self,
        user_id: &UserId,
        session_ids: &[SessionId],
    ) -> Result<u64, StoreError> {
        let mut state = self.lock()?;
        let owned: Vec<SessionId> = session_ids
            .iter()
            .filter(|id| state.owned_session(user_id, id).is_some())
            .cloned()
            .collect();
        Ok(state.remove_sessions(&owned))
    }

    async fn delete_all_sessions(&self, user_id: &UserId) -> Result<u64, StoreError> {
        let mut state = self.lock()?;
        let owned: Vec<SessionId> = state
            .sessions
            .values()
            .filter(|s| &s.user_id == user_id)
            .map(|s| s.id.clone())
            .collect();
        Ok(state.remove_sessions(&owned))
    }

    async fn record_exchange(
        &self,
        user_id: &UserId,
        session_id: &SessionId,
        exchange: &ChatExchange,
    ) -> Result<(), StoreError> {
        exchange.validate()?;
        let mut state = self.lock()?;
        if state.owned_session(user_id, session_id).is_none() {
            return Err(session_not_found(session_id));
        }
        state.exchanges.push(ExchangeEntry {
            id: Uuid::now_v7(),
            session_id: session_id.clone(),
            exchange: exchange.clone(),
        });
        Ok(())
    }

    async fn first_exchange(
        &self,
        user_id: &UserId,
        session_id: &SessionId,
    ) -> Result<Option<ChatExchange>, StoreError> {
        let state = self.lock()?;
        if state.owned_session(user_id, session_id).is_none() {
            return Ok(None);
        }
        Ok(state
            .sorted_exchanges(session_id)
            .first()
            .map(|e| e.exchange.clone()))
    }

    async fn list_exchanges(
        &self,
        user_id: &UserId,
        session_id: &SessionId,
    ) -> Result<Vec<ChatExchange>, StoreError> {
        let state = self.lock()?;
        if state.owned_session(user_id, session_id).is_none() {
            return Ok(Vec::new());
        }
        Ok(state
            .sorted_exchanges(session_id)
            .into_iter()
            .map(|e| e.exchange.clone())
            .collect())
    }

    async fn delete_latest_exchange(
        &self,
        user_id: &UserId,
        session_id: &SessionId,
    ) -> Result<bool, StoreError> {
        let mut state = self.lock()?;
        if state.owned_session(user_id, session_id).is_none() {
            return Ok(false);
        }
        let latest = state.sorted_exchanges(session_id).last().map(|e| e.id);
        match latest {
            Some(id) => {
                state.exchanges.retain(|e| e.id != id);
                Ok(true)
            }
            None => Ok(false),
        }
    }
}

/// [`Repositories`] backed by a single [`MemoryStore`].
#[derive(Debug, Clone, Default)]
pub struct MemoryRepositories {
    store: MemoryStore,
}

impl MemoryRepositories {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Repositories for MemoryRepositories {
    type Users = MemoryStore;
    type Chats = MemoryStore;

    fn users(&self) -> &MemoryStore {
        &self.store
    }

    fn chats(&self) -> &MemoryStore {
        &self.store
    }
}
