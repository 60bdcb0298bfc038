//! Database module for persistent job and task state.
//!
//! Uses rusqlite (SQLite) with a thread-safe `Database` handle. Calls made
//! through one handle are serialized by a `Mutex<Connection>`; several
//! handles (threads or processes) may open the same file and are kept apart
//! by SQLite's own locking, since every write runs in a `BEGIN IMMEDIATE`
//! transaction.

use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use rusqlite::{Connection, Transaction, TransactionBehavior};

use crate::config::DatabaseConfig;
use crate::error::OrchestrationError;

pub mod error;
pub mod job_repo;
pub mod migrations;
mod sql_types;
pub mod task_repo;

pub use error::DatabaseError;

/// How long a connection waits on a locked database before giving up.
pub const DEFAULT_BUSY_TIMEOUT: Duration = Duration::from_millis(5_000);

/// Thread-safe database handle wrapping a single rusqlite connection.
///
/// Cloning is cheap (inner `Arc`).
#[derive(Clone)]
pub struct Database {
    conn: Arc<Mutex<Connection>>,
}

impl Database {
    /// Opens (or creates) the database at the given path and runs all
    /// pending migrations.
    pub fn open(path: &Path) -> Result<Self, DatabaseError> {
        Self::open_with_timeout(path, DEFAULT_BUSY_TIMEOUT)
    }

    pub fn open_with_timeout(path: &Path, busy_timeout: Duration) -> Result<Self, DatabaseError> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(|e| DatabaseError::Io {
                path: parent.to_path_buf(),
                source: e,
            })?;
        }

        let conn = Connection::open(path)?;
        conn.busy_timeout(busy_timeout)?;
        conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA foreign_keys=ON;")?;

        let applied = migrations::run_all(&conn)?;

        log::info!(
            "Database opened at {} ({} migration(s) applied)",
            path.display(),
            applied
        );

        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Opens the database described by a configuration section.
    pub fn connect(config: &DatabaseConfig) -> Result<Self, DatabaseError> {
        Self::open_with_timeout(&config.path, config.busy_timeout())
    }

    /// Opens an in-memory database for testing. Runs all migrations.
    pub fn open_in_memory() -> Result<Self, DatabaseError> {
        let conn = Connection::open_in_memory()?;
        conn.execute_batch("PRAGMA foreign_keys=ON;")?;

        migrations::run_all(&conn)?;

        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Provides locked access to the underlying connection.
    pub fn with_conn<F, T>(&self, f: F) -> Result<T, DatabaseError>
    where
        F: FnOnce(&Connection) -> Result<T, DatabaseError>,
    {
        let conn = self.conn.lock().map_err(|_| DatabaseError::LockPoisoned)?;
        f(&conn)
    }

    /// Runs read-only store queries on the locked connection.
    pub fn read<F, T>(&self, f: F) -> Result<T, OrchestrationError>
    where
        F: FnOnce(&Connection) -> Result<T, OrchestrationError>,
    {
        let conn = self.conn.lock().map_err(|_| DatabaseError::LockPoisoned)?;
        f(&conn)
    }

    /// Runs `f` inside an IMMEDIATE transaction.
    ///
    /// The write lock is taken up front, so concurrent writers queue on the
    /// busy timeout instead of failing on lock upgrade. The transaction is
    /// committed only if `f` succeeds; any error rolls everything back.
    pub fn with_tx<F, T>(&self, f: F) -> Result<T, OrchestrationError>
    where
        F: FnOnce(&Transaction<'_>) -> Result<T, OrchestrationError>,
    {
        let mut conn = self.conn.lock().map_err(|_| DatabaseError::LockPoisoned)?;
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
        let value = f(&tx)?;
        tx.commit()?;
        Ok(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_open_in_memory() {
        let db = Database::open_in_memory().unwrap();
        db.with_conn(|conn| {
            let count: u32 =
                conn.query_row("SELECT COUNT(*) FROM _migrations", [], |r| r.get(0))?;
            assert!(count > 0);
            Ok(())
        })
        .unwrap();
    }

    #[test]
    fn test_open_file_db() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("orchestration.db");
        let db = Database::open(&path).unwrap();
        db.with_conn(|conn| {
            let count: u32 =
                conn.query_row("SELECT COUNT(*) FROM _migrations", [], |r| r.get(0))?;
            assert!(count > 0);
            Ok(())
        })
        .unwrap();
        assert!(path.exists());
    }

    #[test]
    fn test_foreign_keys_enabled() {
        let db = Database::open_in_memory().unwrap();
        db.with_conn(|conn| {
            let enabled: i64 = conn.query_row("PRAGMA foreign_keys", [], |r| r.get(0))?;
            assert_eq!(enabled, 1);
            Ok(())
        })
        .unwrap();
    }

    #[test]
    fn test_failed_transaction_rolls_back() {
        let db = Database::open_in_memory().unwrap();
        let result: Result<(), OrchestrationError> = db.with_tx(|tx| {
            tx.execute(
                "INSERT INTO search_jobs (status, creation_time, config) VALUES ('SCHEDULING', '2026-01-01 00:00:00+00:00', x'00')",
                [],
            )?;
            Err(OrchestrationError::InvalidInput("abort".into()))
        });
        assert!(result.is_err());

        db.with_conn(|conn| {
            let count: u32 = conn.query_row("SELECT COUNT(*) FROM search_jobs", [], |r| r.get(0))?;
            assert_eq!(count, 0);
            Ok(())
        })
        .unwrap();
    }

    #[test]
    fn test_database_is_clone() {
        let db = Database::open_in_memory().unwrap();
        let db2 = db.clone();
        db.with_conn(|conn| {
            conn.execute(
                "INSERT INTO search_jobs (status, creation_time, config) VALUES ('SCHEDULING', '2026-01-01 00:00:00+00:00', x'00')",
                [],
            )?;
            Ok(())
        })
        .unwrap();
        db2.with_conn(|conn| {
            let count: u32 = conn.query_row("SELECT COUNT(*) FROM search_jobs", [], |r| r.get(0))?;
            assert_eq!(count, 1);
            Ok(())
        })
        .unwrap();
    }
}
