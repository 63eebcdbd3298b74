//! Schema migrations, embedded at compile time and applied in order at
//! start-up. `_callbridge_migrations` records which ones have run.

use std::collections::HashSet;

use rusqlite::Connection;
use thiserror::Error;

struct Migration {
    name: &'static str,
    sql: &'static str,
}

/// Append only; names are the ledger keys.
const MIGRATIONS: &[Migration] = &[
    Migration {
        name: "001_catalog",
        sql: include_str!("migrations/001_catalog.sql"),
    },
    Migration {
        name: "002_caller_records",
        sql: include_str!("migrations/002_caller_records.sql"),
    },
    Migration {
        name: "003_event_log",
        sql: include_str!("migrations/003_event_log.sql"),
    },
    Migration {
        name: "004_policy_versions",
        sql: include_str!("migrations/004_policy_versions.sql"),
    },
];

#[derive(Debug, Error)]
pub enum MigrationError {
    #[error("migration '{name}' failed: {source}")]
    ExecutionFailed {
        name: String,
        source: rusqlite::Error,
    },

    #[error("failed to read applied migrations: {0}")]
    StateQuery(rusqlite::Error),
}

const LEDGER_DDL: &str = "CREATE TABLE IF NOT EXISTS _callbridge_migrations (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    name TEXT NOT NULL UNIQUE,
    applied_at TEXT NOT NULL DEFAULT (datetime('now'))
);";

/// Brings the schema up to date. Returns how many migrations were applied.
pub fn run_migrations(conn: &Connection) -> Result<usize, MigrationError> {
    run_migrations_from_list(conn, MIGRATIONS)
}

fn run_migrations_from_list(
    conn: &Connection,
    migrations: &[Migration],
) -> Result<usize, MigrationError> {
    conn.execute_batch(LEDGER_DDL)
        .map_err(|source| MigrationError::ExecutionFailed {
            name: "_callbridge_migrations".to_string(),
            source,
        })?;
    let done = applied_names(conn).map_err(MigrationError::StateQuery)?;

    let pending: Vec<&Migration> = migrations
        .iter()
        .filter(|m| !done.contains(m.name))
        .collect();
    for migration in &pending {
        tracing::info!(migration = migration.name, "applying migration");
        apply(conn, migration).map_err(|source| MigrationError::ExecutionFailed {
            name: migration.name.to_string(),
            source,
        })?;
    }
    if pending.is_empty() {
        tracing::debug!("schema is up to date");
    }
    Ok(pending.len())
}

fn applied_names(conn: &Connection) -> rusqlite::Result<HashSet<String>> {
    let mut stmt = conn.prepare("SELECT name FROM _callbridge_migrations")?;
    let names = stmt.query_map([], |row| row.get::<_, String>(0))?;
    names.collect()
}

/// Runs the migration and records it in one transaction, so a failure
/// leaves neither the schema change nor the ledger row behind.
fn apply(conn: &Connection, migration: &Migration) -> rusqlite::Result<()> {
    let tx = conn.unchecked_transaction()?;
    tx.execute_batch(migration.sql)?;
    tx.execute(
        "INSERT INTO _callbridge_migrations (name) VALUES (?1)",
        [migration.name],
    )?;
    tx.commit()
}
