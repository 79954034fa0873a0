//! User Store: registration, lookup and deletion of users, plus the
//! per-user handle through which a user's own row is read and changed.

pub mod handle;
pub mod manager;

pub use handle::UserHandle;
pub use manager::UserManager;
