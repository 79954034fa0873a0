//! Handles, stores and repository traits for Parley.
//!
//! This crate defines the "ports" (repository traits) that the infrastructure
//! layer implements, plus the User Store and Chat Store built on top of them.
//! It depends only on `parley-types` -- never on `parley-infra` or any
//! database crate. [`repository::memory`] provides a backend that keeps
//! everything in process.

pub mod chat;
pub mod context;
pub mod repository;
pub mod user;

pub use chat::{ChatSessionHandle, ChatSessionManager};
pub use context::OperationContext;
pub use user::{UserHandle, UserManager};
