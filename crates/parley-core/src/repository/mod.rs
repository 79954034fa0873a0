//! Repository trait definitions (ports).
//!
//! These traits define the storage interface that the infrastructure layer
//! (parley-infra) implements. Handles and managers in this crate only ever
//! talk to storage through them, so a different backend can be substituted
//! without touching the handle contracts.
//!
//! Each method is one unit of work: implementations run it inside a single
//! transaction (or an equivalent critical section) so it is atomic with
//! respect to every other call.

pub mod chat;
pub mod memory;
pub mod user;

pub use chat::ChatRepository;
pub use user::UserRepository;

/// One storage backend: a user repository and a chat repository that share
/// the same underlying store.
pub trait Repositories: Send + Sync + 'static {
    type Users: UserRepository;
    type Chats: ChatRepository;

    fn users(&self) -> &Self::Users;

    fn chats(&self) -> &Self::Chats;
}
