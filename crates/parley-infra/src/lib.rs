//! Infrastructure layer for Parley.
//!
//! Contains the SQLite implementations of the repository traits defined in
//! `parley-core`, plus loading of `config.toml` and data directory
//! resolution.

pub mod config;
pub mod filesystem;
pub mod sqlite;
