//! Entry point for user registration and lookup.

use std::sync::Arc;

use parley_types::error::StoreError;
use parley_types::user::{User, UserId};
use tracing::{debug, info};

use crate::repository::{Repositories, UserRepository};
use crate::user::UserHandle;

/// User Store bound to one storage backend.
///
/// Cheap to clone; all clones (and every handle they hand out) share the
/// same backend.
pub struct UserManager<R: Repositories> {
    repos: Arc<R>,
}

impl<R: Repositories> Clone for UserManager<R> {
    fn clone(&self) -> Self {
        Self {
            repos: Arc::clone(&self.repos),
        }
    }
}

impl<R: Repositories> UserManager<R> {
    pub fn new(repos: R) -> Self {
        Self::from_shared(Arc::new(repos))
    }

    /// Build a manager over a backend that is already shared elsewhere.
    pub fn from_shared(repos: Arc<R>) -> Self {
        Self { repos }
    }

    pub fn repositories(&self) -> &Arc<R> {
        &self.repos
    }

    fn handle(&self, user: User) -> UserHandle<R> {
        UserHandle::new(Arc::clone(&self.repos), user)
    }

    /// Register a new user with an empty API token and no active session.
    ///
    /// Returns `Conflict` when `name` is already taken.
    pub async fn register_user(&self, name: &str) -> Result<UserHandle<R>, StoreError> {
        let user = self.repos.users().create_user(&User::new(name)).await?;
        info!(user_id = %user.id, user_name = %user.name, "User registered");
        Ok(self.handle(user))
    }

    pub async fn list_users(&self) -> Result<Vec<UserHandle<R>>, StoreError> {
        let users = self.repos.users().list_users().await?;
        Ok(users.into_iter().map(|u| self.handle(u)).collect())
    }

    pub async fn get_user(&self, id: &UserId) -> Result<UserHandle<R>, StoreError> {
        match self.repos.users().get_user(id).await? {
            Some(user) => Ok(self.handle(user)),
            None => Err(StoreError::NotFound(format!("user '{id}'"))),
        }
    }

    pub async fn get_user_by_name(&self, name: &str) -> Result<UserHandle<R>, StoreError> {
        match self.repos.users().get_user_by_name(name).await? {
            Some(user) => Ok(self.handle(user)),
            None => Err(StoreError::NotFound(format!("user named '{name}'"))),
        }
    }

    /// Delete a user together with its sessions and their exchanges.
    ///
    /// Deleting an id that does not exist succeeds without changing anything.
    pub async fn delete_user(&self, id: &UserId) -> Result<(), StoreError> {
        let removed = self.repos.users().delete_user(id).await?;
        if removed == 0 {
            debug!(user_id = %id, "Delete of unknown user ignored");
        } else {
            info!(user_id = %id, "User deleted");
        }
        Ok(())
    }
}
