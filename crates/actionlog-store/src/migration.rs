//! Database schema migrations for SQLite.
//!
//! Versioned: each migration moves the schema from version N to N+1 and is
//! recorded in `schema_migrations`.

use rusqlite::Connection;

use crate::error::{Result, StoreError};

/// Current schema version.
pub const CURRENT_VERSION: u32 = 1;

/// Names of the rows in the `counters` table.
pub const COUNTER_LAST_ADDED: &str = "last_added";
pub const COUNTER_SYNCED_SENT: &str = "synced_sent";
pub const COUNTER_SYNCED_RECEIVED: &str = "synced_received";

/// Initialize or migrate the database schema.
///
/// Idempotent: running it against an up-to-date database does nothing.
pub fn migrate(conn: &mut Connection) -> Result<()> {
    conn.execute(
        "CREATE TABLE IF NOT EXISTS schema_migrations (
            version INTEGER PRIMARY KEY,
            applied_at INTEGER NOT NULL
        )",
        [],
    )?;

    let current: u32 = conn.query_row(
        "SELECT COALESCE(MAX(version), 0) FROM schema_migrations",
        [],
        |row| row.get(0),
    )?;

    if current > CURRENT_VERSION {
        return Err(StoreError::Migration(format!(
            "database schema version {current} is newer than supported version {CURRENT_VERSION}"
        )));
    }

    if current < CURRENT_VERSION {
        let tx = conn.transaction()?;

        for version in (current + 1)..=CURRENT_VERSION {
            apply_migration(&tx, version)?;

            tx.execute(
                "INSERT INTO schema_migrations (version, applied_at) VALUES (?1, ?2)",
                rusqlite::params![version, now_millis()],
            )?;
            tracing::debug!(version, "applied schema migration");
        }

        tx.commit()?;
    }

    Ok(())
}

fn apply_migration(conn: &Connection, version: u32) -> Result<()> {
    match version {
        1 => apply_v1(conn),
        _ => Err(StoreError::Migration(format!(
            "unknown migration version: {version}"
        ))),
    }
}

/// Migration v1: entries, their reasons, and the store counters.
fn apply_v1(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        r#"
        -- One row per live entry; `added` is the store-assigned counter
        CREATE TABLE entries (
            added INTEGER PRIMARY KEY,
            id_time INTEGER NOT NULL,
            id_origin TEXT NOT NULL,
            id_seq INTEGER NOT NULL,
            time INTEGER NOT NULL,
            action_type TEXT NOT NULL,
            action_fields BLOB NOT NULL,   -- CBOR map of the action's other fields
            extra BLOB NOT NULL,           -- CBOR map of extra meta fields

            UNIQUE(id_time, id_origin, id_seq)
        );

        CREATE TABLE reasons (
            added INTEGER NOT NULL,
            reason TEXT NOT NULL,
            PRIMARY KEY (added, reason)
        );

        -- Monotonic counters that survive entry deletion
        CREATE TABLE counters (
            name TEXT PRIMARY KEY,
            value INTEGER NOT NULL
        );

        INSERT INTO counters (name, value) VALUES
            ('last_added', 0),
            ('synced_sent', 0),
            ('synced_received', 0);

        CREATE INDEX idx_entries_created ON entries(time, id_origin, id_seq, id_time);
        CREATE INDEX idx_reasons_reason ON reasons(reason);
        "#,
    )?;

    Ok(())
}

fn now_millis() -> i64 {
    use std::time::{SystemTime, UNIX_EPOCH};
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or(0)
}
