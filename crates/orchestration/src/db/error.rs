//! Storage-layer errors of the orchestration store.
//!
//! The scheduler surfaces these through `OrchestrationError`, which maps busy
//! and foreign-key failures to their own variants.

use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum DatabaseError {
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    /// The directory holding the database file could not be created.
    #[error("Cannot create database directory '{path}': {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Schema migration v{version} failed: {reason}")]
    Migration { version: u32, reason: String },

    /// A thread panicked while holding the connection.
    #[error("Database handle lock poisoned")]
    LockPoisoned,
}
