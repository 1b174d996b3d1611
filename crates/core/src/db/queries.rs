//! Typed query helpers for every table in the run ledger.

use chrono::Utc;
use rusqlite::{params, OptionalExtension};
use tracing::debug;
use uuid::Uuid;

use super::Database;
use crate::errors::DatabaseError;
use crate::models::{self, MigrationResult, Phase, RunMode, Vault};

// ---------------------------------------------------------------------------
// Domain structs returned by queries
// ---------------------------------------------------------------------------

/// A row from the `migration_runs` table, with outcome counters.
#[derive(Debug, Clone)]
pub struct RunEntry {
    pub id: String,
    pub mode: String,
    pub source_account: String,
    pub destination_account: String,
    pub status: String,
    pub started_at: String,
    pub completed_at: Option<String>,
    pub details: Option<String>,
    pub failures: i64,
}

/// A row from the `created_vaults` table.
#[derive(Debug, Clone)]
pub struct CreatedVaultEntry {
    pub source_vault_id: String,
    pub source_vault_name: String,
    pub destination_vault_id: String,
    pub run_id: String,
    pub created_at: String,
}

/// A row from the `audit_log` table.
#[derive(Debug, Clone)]
pub struct AuditLogEntry {
    pub id: i64,
    pub action: String,
    pub run_id: Option<String>,
    pub details: Option<String>,
    pub success: bool,
    pub created_at: String,
}

// ---------------------------------------------------------------------------
// Query implementations
// ---------------------------------------------------------------------------

impl Database {
    // -- migration_runs -----------------------------------------------------

    /// Record the start of a run and return its id.
    pub fn start_run(
        &self,
        mode: RunMode,
        source_account: &str,
        destination_account: &str,
    ) -> Result<String, DatabaseError> {
        let id = Uuid::new_v4().to_string();
        let now = Utc::now().to_rfc3339();
        let conn = self.conn();
        conn.execute(
            "INSERT INTO migration_runs (id, mode, source_account, destination_account, started_at)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![id, mode.to_string(), source_account, destination_account, now],
        )?;
        debug!(run_id = %id, %mode, "started migration run");
        Ok(id)
    }

    /// Mark a run as finished.
    pub fn complete_run(
        &self,
        id: &str,
        status: &str,
        details: Option<&str>,
    ) -> Result<(), DatabaseError> {
        let now = Utc::now().to_rfc3339();
        let conn = self.conn();
        let changed = conn.execute(
            "UPDATE migration_runs SET status = ?1, completed_at = ?2, details = ?3 WHERE id = ?4",
            params![status, now, details, id],
        )?;
        if changed == 0 {
            return Err(DatabaseError::NotFound {
                entity: "migration_run".into(),
                id: id.to_string(),
            });
        }
        debug!(run_id = id, status, "completed migration run");
        Ok(())
    }

    /// Most recent runs first.
    pub fn list_runs(&self, limit: u32) -> Result<Vec<RunEntry>, DatabaseError> {
        let conn = self.conn();
        let mut stmt = conn.prepare(
            "SELECT r.id, r.mode, r.source_account, r.destination_account, r.status,
                    r.started_at, r.completed_at, r.details,
                    (SELECT COUNT(*) FROM vault_outcomes o
                      WHERE o.run_id = r.id AND o.succeeded = 0)
             FROM migration_runs r ORDER BY r.started_at DESC, r.rowid DESC LIMIT ?1",
        )?;
        let entries = stmt
            .query_map(params![limit], |row| {
                Ok(RunEntry {
                    id: row.get(0)?,
                    mode: row.get(1)?,
                    source_account: row.get(2)?,
                    destination_account: row.get(3)?,
                    status: row.get(4)?,
                    started_at: row.get(5)?,
                    completed_at: row.get(6)?,
                    details: row.get(7)?,
                    failures: row.get(8)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(entries)
    }

    // -- vault_outcomes -----------------------------------------------------

    /// Append one result to a run.
    pub fn insert_vault_outcome(
        &self,
        run_id: &str,
        result: &MigrationResult,
    ) -> Result<i64, DatabaseError> {
        let now = Utc::now().to_rfc3339();
        let conn = self.conn();
        conn.execute(
            "INSERT INTO vault_outcomes
                (run_id, vault_name, phase, principal, succeeded, error_detail, recorded_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                run_id,
                result.vault_name,
                result.phase.as_str(),
                result.principal,
                result.succeeded,
                result.error_detail,
                now
            ],
        )?;
        Ok(conn.last_insert_rowid())
    }

    /// All results of a run in insertion order.
    pub fn list_vault_outcomes(&self, run_id: &str) -> Result<Vec<MigrationResult>, DatabaseError> {
        let conn = self.conn();
        let mut stmt = conn.prepare(
            "SELECT vault_name, phase, principal, succeeded, error_detail
             FROM vault_outcomes WHERE run_id = ?1 ORDER BY id",
        )?;
        let rows = stmt
            .query_map(params![run_id], |row| {
                let phase: String = row.get(1)?;
                Ok((
                    row.get::<_, String>(0)?,
                    phase,
                    row.get::<_, Option<String>>(2)?,
                    row.get::<_, bool>(3)?,
                    row.get::<_, Option<String>>(4)?,
                ))
            })?
            .collect::<Result<Vec<_>, _>>()?;

        let mut results = Vec::with_capacity(rows.len());
        for (vault_name, phase, principal, succeeded, error_detail) in rows {
            let Some(phase) = Phase::from_str_val(&phase) else {
                tracing::warn!(phase = %phase, "skipping outcome with unknown phase");
                continue;
            };
            results.push(MigrationResult {
                vault_name,
                phase,
                principal,
                succeeded,
                error_detail,
            });
        }
        Ok(results)
    }

    // -- created_vaults -----------------------------------------------------

    /// Register a destination vault created for a source vault.
    pub fn record_created_vault(
        &self,
        run_id: &str,
        source_account: &str,
        destination_account: &str,
        source: &Vault,
        destination: &Vault,
    ) -> Result<(), DatabaseError> {
        let now = Utc::now().to_rfc3339();
        let conn = self.conn();
        conn.execute(
            "INSERT OR REPLACE INTO created_vaults
                (source_account, destination_account, source_vault_id, source_vault_name,
                 destination_vault_id, run_id, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                source_account,
                destination_account,
                source.id,
                source.name,
                destination.id,
                run_id,
                now
            ],
        )?;
        debug!(vault = %source.name, destination_id = %destination.id, "registered created vault");
        Ok(())
    }

    /// The register entry for a source vault, if a prior run created it.
    pub fn get_created_vault(
        &self,
        source_account: &str,
        destination_account: &str,
        source_vault_id: &str,
    ) -> Result<Option<CreatedVaultEntry>, DatabaseError> {
        let conn = self.conn();
        let entry = conn
            .query_row(
                "SELECT source_vault_id, source_vault_name, destination_vault_id, run_id, created_at
                 FROM created_vaults
                 WHERE source_account = ?1 AND destination_account = ?2 AND source_vault_id = ?3",
                params![source_account, destination_account, source_vault_id],
                |row| {
                    Ok(CreatedVaultEntry {
                        source_vault_id: row.get(0)?,
                        source_vault_name: row.get(1)?,
                        destination_vault_id: row.get(2)?,
                        run_id: row.get(3)?,
                        created_at: row.get(4)?,
                    })
                },
            )
            .optional()?;
        Ok(entry)
    }

    /// Number of vaults registered for an account pair.
    pub fn count_created_vaults(
        &self,
        source_account: &str,
        destination_account: &str,
    ) -> Result<i64, DatabaseError> {
        let conn = self.conn();
        let count: i64 = conn.query_row(
            "SELECT COUNT(*) FROM created_vaults WHERE source_account = ?1 AND destination_account = ?2",
            params![source_account, destination_account],
            |row| row.get(0),
        )?;
        Ok(count)
    }

    // -- audit_log ----------------------------------------------------------

    /// Insert an audit-log entry.
    pub fn insert_audit_log(
        &self,
        action: &str,
        run_id: Option<&str>,
        details: Option<&str>,
        success: bool,
    ) -> Result<i64, DatabaseError> {
        let now = Utc::now().to_rfc3339();
        let conn = self.conn();
        conn.execute(
            "INSERT INTO audit_log (action, run_id, details, success, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![action, run_id, details, success, now],
        )?;
        let id = conn.last_insert_rowid();
        debug!(id, action, "inserted audit_log entry");
        Ok(id)
    }

    /// Insert an audit entry from a model struct.
    pub fn insert_audit_entry(
        &self,
        run_id: Option<&str>,
        entry: &models::AuditEntry,
    ) -> Result<i64, DatabaseError> {
        self.insert_audit_log(&entry.action, run_id, Some(&entry.details), entry.success)
    }

    /// List recent audit-log entries.
    pub fn list_audit_log(&self, limit: u32) -> Result<Vec<AuditLogEntry>, DatabaseError> {
        let conn = self.conn();
        let mut stmt = conn.prepare(
            "SELECT id, action, run_id, details, success, created_at
             FROM audit_log ORDER BY id DESC LIMIT ?1",
        )?;
        let entries = stmt
            .query_map(params![limit], |row| {
                Ok(AuditLogEntry {
                    id: row.get(0)?,
                    action: row.get(1)?,
                    run_id: row.get(2)?,
                    details: row.get(3)?,
                    success: row.get(4)?,
                    created_at: row.get(5)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(entries)
    }
}
