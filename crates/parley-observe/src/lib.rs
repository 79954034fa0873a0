//! Observability setup for processes embedding Parley.
//!
//! The library crates only emit `tracing` events; this crate installs the
//! subscriber that prints them.

pub mod tracing_setup;
