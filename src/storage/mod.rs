//! Database and credential storage.
//!
//! - SQLite persistence for rules, categories, senders, cleanup jobs and the
//!   action execution ledger
//! - OS keychain lookup for the AI API key
//! - Async-safe database operations via `tokio::task::spawn_blocking`

mod database;
mod keychain;
pub mod queries;
mod schema;
mod store;

pub use database::{Database, DatabaseError, Result};
pub use keychain::{KeychainAccess, KeychainError, API_KEY_ENV};
pub use store::SqliteStore;
