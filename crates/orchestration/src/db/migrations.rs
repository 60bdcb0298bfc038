//! Schema migrations for the orchestration tables.
//!
//! Tracks applied migrations in a `_migrations` table and applies pending
//! ones in order. Every statement is create-if-absent, so running the
//! migrations against a store that already has the tables leaves existing
//! rows untouched.

use rusqlite::Connection;

use super::error::DatabaseError;

/// A single migration definition.
struct Migration {
    version: u32,
    description: &'static str,
    sql: &'static str,
}

/// All migrations in order. Each is applied at most once.
const MIGRATIONS: &[Migration] = &[
    Migration {
        version: 1,
        description: "create_compression_jobs_table",
        sql: include_str!("sql/001_create_compression_jobs.sql"),
    },
    Migration {
        version: 2,
        description: "create_compression_tasks_table",
        sql: include_str!("sql/002_create_compression_tasks.sql"),
    },
    Migration {
        version: 3,
        description: "create_search_jobs_table",
        sql: include_str!("sql/003_create_search_jobs.sql"),
    },
    Migration {
        version: 4,
        description: "create_search_tasks_table",
        sql: include_str!("sql/004_create_search_tasks.sql"),
    },
];

/// Tables owned by the orchestration schema.
pub const TABLES: [&str; 4] = [
    "compression_jobs",
    "compression_tasks",
    "search_jobs",
    "search_tasks",
];

/// Runs all pending migrations on the given connection and returns how many
/// were applied.
pub fn run_all(conn: &Connection) -> Result<usize, DatabaseError> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS _migrations (
            version INTEGER PRIMARY KEY,
            description TEXT NOT NULL,
            applied_at TEXT NOT NULL DEFAULT (datetime('now'))
        );",
    )?;

    let current_version = schema_version(conn)?;
    let mut applied = 0;

    for migration in MIGRATIONS {
        if migration.version <= current_version {
            continue;
        }

        log::info!(
            "Running migration v{}: {}",
            migration.version,
            migration.description
        );

        // Each migration commits together with its bookkeeping row. A second
        // process racing on the same version hits the IF NOT EXISTS guards and
        // the OR IGNORE below.
        let tx = conn.unchecked_transaction()?;
        tx.execute_batch(migration.sql)
            .map_err(|e| DatabaseError::Migration {
                version: migration.version,
                reason: e.to_string(),
            })?;
        tx.execute(
            "INSERT OR IGNORE INTO _migrations (version, description) VALUES (?1, ?2)",
            rusqlite::params![migration.version, migration.description],
        )?;
        tx.commit()?;
        applied += 1;
    }

    Ok(applied)
}

/// Highest applied migration version, 0 for a fresh store.
pub fn schema_version(conn: &Connection) -> Result<u32, DatabaseError> {
    let version = conn.query_row(
        "SELECT COALESCE(MAX(version), 0) FROM _migrations",
        [],
        |r| r.get(0),
    )?;
    Ok(version)
}

/// Number of migrations this build knows about.
pub fn latest_version() -> u32 {
    MIGRATIONS.last().map(|m| m.version).unwrap_or(0)
}

/// Returns the stored DDL of every orchestration table and index, ordered by
/// name. Used to compare schemas across initializations.
pub fn schema_sql(conn: &Connection) -> Result<Vec<String>, DatabaseError> {
    let mut stmt = conn.prepare(
        "SELECT sql FROM sqlite_master
         WHERE sql IS NOT NULL AND name NOT LIKE 'sqlite_%'
         ORDER BY type, name",
    )?;
    let rows = stmt
        .query_map([], |row| row.get::<_, String>(0))?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}
