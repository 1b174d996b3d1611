//! Database schema definitions and migration runner.
//!
//! Migrations are simple SQL strings applied in order. The `schema_version`
//! user-version pragma tracks which migrations have already been applied.

use rusqlite::Connection;
use tracing::{debug, info};

use crate::errors::DatabaseError;

/// All migrations, in order. Each entry is `(version, description, sql)`.
/// Versions start at 1. The current schema version is stored in the SQLite
/// `user_version` pragma.
static MIGRATIONS: &[(u32, &str, &str)] = &[
    (
        1,
        "initial schema",
        r#"
        CREATE TABLE IF NOT EXISTS migration_runs (
            id                   TEXT PRIMARY KEY,
            mode                 TEXT NOT NULL,
            source_account       TEXT NOT NULL,
            destination_account  TEXT NOT NULL,
            status               TEXT NOT NULL DEFAULT 'running',
            started_at           TEXT NOT NULL,
            completed_at         TEXT,
            details              TEXT
        );

        CREATE INDEX IF NOT EXISTS idx_migration_runs_started_at ON migration_runs (started_at);

        CREATE TABLE IF NOT EXISTS vault_outcomes (
            id            INTEGER PRIMARY KEY AUTOINCREMENT,
            run_id        TEXT NOT NULL REFERENCES migration_runs (id),
            vault_name    TEXT NOT NULL,
            phase         TEXT NOT NULL,
            principal     TEXT,
            succeeded     INTEGER NOT NULL,
            error_detail  TEXT,
            recorded_at   TEXT NOT NULL
        );

        CREATE INDEX IF NOT EXISTS idx_vault_outcomes_run ON vault_outcomes (run_id);

        CREATE TABLE IF NOT EXISTS created_vaults (
            source_account        TEXT NOT NULL,
            destination_account   TEXT NOT NULL,
            source_vault_id       TEXT NOT NULL,
            source_vault_name     TEXT NOT NULL,
            destination_vault_id  TEXT NOT NULL,
            run_id                TEXT NOT NULL,
            created_at            TEXT NOT NULL,
            PRIMARY KEY (source_account, destination_account, source_vault_id)
        );

        CREATE TABLE IF NOT EXISTS audit_log (
            id          INTEGER PRIMARY KEY AUTOINCREMENT,
            action      TEXT NOT NULL,
            run_id      TEXT,
            details     TEXT,
            success     INTEGER NOT NULL DEFAULT 1,
            created_at  TEXT NOT NULL
        );

        CREATE INDEX IF NOT EXISTS idx_audit_log_created_at ON audit_log (created_at);
        CREATE INDEX IF NOT EXISTS idx_audit_log_action ON audit_log (action);
        "#,
    ),
];

/// Run all pending migrations against `conn`.
pub fn run_migrations(conn: &Connection) -> Result<(), DatabaseError> {
    let current_version = get_schema_version(conn)?;
    info!(
        current_version,
        target_version = MIGRATIONS.last().map(|m| m.0).unwrap_or(0),
        "checking database migrations"
    );

    for &(version, description, sql) in MIGRATIONS {
        if version > current_version {
            info!(version, description, "applying migration");
            conn.execute_batch(sql)
                .map_err(|e| DatabaseError::MigrationFailed {
                    version,
                    detail: e.to_string(),
                })?;
            set_schema_version(conn, version)?;
            debug!(version, "migration applied successfully");
        }
    }

    Ok(())
}

/// Read the current schema version from the SQLite `user_version` pragma.
fn get_schema_version(conn: &Connection) -> Result<u32, DatabaseError> {
    let version: u32 = conn.pragma_query_value(None, "user_version", |row| row.get(0))?;
    Ok(version)
}

/// Set the schema version via the SQLite `user_version` pragma.
fn set_schema_version(conn: &Connection, version: u32) -> Result<(), DatabaseError> {
    conn.pragma_update(None, "user_version", version)?;
    Ok(())
}
