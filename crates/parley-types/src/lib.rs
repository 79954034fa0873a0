//! Shared domain types for Parley.
//!
//! Users, chat sessions, chat exchanges, the per-session parameter bag and
//! the error type returned by every store operation.
//!
//! Zero infrastructure dependencies -- only serde, uuid, chrono, thiserror.

pub mod chat;
pub mod config;
pub mod error;
pub mod params;
pub mod user;
