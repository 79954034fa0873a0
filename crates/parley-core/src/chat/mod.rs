//! Chat Store: the sessions of one user and the exchanges recorded in them.
//!
//! [`ChatSessionManager`] is obtained from a
//! [`UserHandle`](crate::user::UserHandle) and only ever sees that user's
//! sessions. [`ChatSessionHandle`] reads and changes a single session.
//! [`prompt`] and [`dispatch`] are the pieces a request-dispatching caller
//! needs to turn a session into a backend request and record the result.

pub mod dispatch;
pub mod handle;
pub mod manager;
pub mod prompt;

pub use handle::ChatSessionHandle;
pub use manager::ChatSessionManager;
