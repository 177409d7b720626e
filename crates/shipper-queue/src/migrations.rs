//! Queue schema migrations.
//!
//! Migrations run in order and are tracked in the `migrations` table.

use crate::QueueResult;
use rusqlite::Connection;
use tracing::{debug, info};

/// Current schema version.
pub const CURRENT_VERSION: i32 = 1;

/// Run all pending migrations.
pub fn run_migrations(conn: &Connection) -> QueueResult<()> {
    conn.execute(
        "CREATE TABLE IF NOT EXISTS migrations (
            version INTEGER PRIMARY KEY,
            name TEXT NOT NULL,
            applied_at TEXT NOT NULL DEFAULT (datetime('now'))
        )",
        [],
    )?;

    let current_version: i32 = conn
        .query_row(
            "SELECT COALESCE(MAX(version), 0) FROM migrations",
            [],
            |row| row.get(0),
        )
        .unwrap_or(0);

    if current_version >= CURRENT_VERSION {
        debug!(current_version, "Queue schema up to date");
        return Ok(());
    }

    info!(current_version, target_version = CURRENT_VERSION, "Running queue migrations");

    if current_version < 1 {
        migrate_v1_pending_logs(conn)?;
    }

    Ok(())
}

fn record_migration(conn: &Connection, version: i32, name: &str) -> QueueResult<()> {
    conn.execute(
        "INSERT INTO migrations (version, name) VALUES (?1, ?2)",
        rusqlite::params![version, name],
    )?;
    debug!(version, name, "Migration applied");
    Ok(())
}

/// V1: pending log table.
///
/// `state` is 0 for pending rows and 1 for rows handed to a transport.
fn migrate_v1_pending_logs(conn: &Connection) -> QueueResult<()> {
    conn.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS pending_logs (
            tag INTEGER PRIMARY KEY,
            record TEXT NOT NULL,
            enqueued_at INTEGER NOT NULL,
            state INTEGER NOT NULL DEFAULT 0
        );

        CREATE INDEX IF NOT EXISTS idx_pending_logs_state_tag ON pending_logs(state, tag);
        CREATE INDEX IF NOT EXISTS idx_pending_logs_enqueued ON pending_logs(enqueued_at);
        ",
    )?;
    record_migration(conn, 1, "pending_logs")
}
