//! Run-wide result accumulation.
//!
//! [`ResultLog`] is the append-only sink every pass records into. When a
//! ledger is attached, each result is mirrored into `vault_outcomes`; a
//! ledger write failure is logged and never affects the run.

use std::collections::BTreeSet;
use std::sync::{Arc, Mutex};

use serde::Serialize;
use tracing::{info, warn};

use crate::db::Database;
use crate::models::{MigrationResult, Phase};

/// Thread-safe, append-only log of [`MigrationResult`]s.
#[derive(Debug, Default)]
pub struct ResultLog {
    results: Mutex<Vec<MigrationResult>>,
    ledger: Option<(Arc<Database>, String)>,
}

impl ResultLog {
    pub fn new() -> Self {
        Self::default()
    }

    /// A log that mirrors every result into the ledger under `run_id`.
    pub fn with_ledger(db: Arc<Database>, run_id: impl Into<String>) -> Self {
        Self {
            results: Mutex::new(Vec::new()),
            ledger: Some((db, run_id.into())),
        }
    }

    pub fn run_id(&self) -> Option<&str> {
        self.ledger.as_ref().map(|(_, id)| id.as_str())
    }

    pub fn record(&self, result: MigrationResult) {
        if result.succeeded {
            info!(
                vault = %result.vault_name,
                phase = %result.phase,
                principal = result.principal.as_deref().unwrap_or(""),
                "step succeeded"
            );
        } else {
            warn!(
                vault = %result.vault_name,
                phase = %result.phase,
                principal = result.principal.as_deref().unwrap_or(""),
                error = result.error_detail.as_deref().unwrap_or(""),
                "step failed"
            );
        }

        if let Some((db, run_id)) = &self.ledger {
            if let Err(e) = db.insert_vault_outcome(run_id, &result) {
                warn!(error = %e, "failed to mirror result into the run ledger");
            }
        }

        self.lock().push(result);
    }

    /// Copy of everything recorded so far, in recording order.
    pub fn snapshot(&self) -> Vec<MigrationResult> {
        self.lock().clone()
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Vec<MigrationResult>> {
        self.results.lock().unwrap_or_else(|poisoned| {
            warn!("result log mutex was poisoned, recovering");
            poisoned.into_inner()
        })
    }
}

/// Counters and results of one finished run.
#[derive(Debug, Clone, Default, Serialize)]
pub struct RunSummary {
    pub run_id: Option<String>,
    pub vaults_seen: usize,
    pub vaults_excluded: usize,
    pub vaults_created: usize,
    /// Vaults a prior run already created.
    pub vaults_skipped: usize,
    /// The run stopped early on a cancel request.
    pub cancelled: bool,
    pub results: Vec<MigrationResult>,
}

impl RunSummary {
    pub fn failures(&self) -> impl Iterator<Item = &MigrationResult> {
        self.results.iter().filter(|r| !r.succeeded)
    }

    pub fn failure_count(&self) -> usize {
        self.failures().count()
    }

    /// Failed results of one phase.
    pub fn failures_in(&self, phase: Phase) -> usize {
        self.failures().filter(|r| r.phase == phase).count()
    }

    /// `true` when at least one vault could not be created. Permission
    /// failures alone do not count.
    pub fn has_end_to_end_failure(&self) -> bool {
        self.failures_in(Phase::Create) > 0
    }

    /// Names of vaults with at least one failed step.
    pub fn vaults_with_failures(&self) -> BTreeSet<&str> {
        self.failures().map(|r| r.vault_name.as_str()).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_result_log_accumulates_in_order() {
        let log = ResultLog::new();
        log.record(MigrationResult::success("A", Phase::Snapshot));
        log.record(MigrationResult::failure("B", Phase::Create, "name taken"));
        let results = log.snapshot();
        assert_eq!(results.len(), 2);
        assert_eq!(results[0].vault_name, "A");
        assert_eq!(results[1].error_detail.as_deref(), Some("name taken"));
    }

    #[test]
    fn test_result_log_mirrors_into_ledger() {
        let db = Arc::new(Database::in_memory().unwrap());
        db.initialize().unwrap();
        let run_id = db
            .start_run(crate::models::RunMode::ReportOnly, "old", "new")
            .unwrap();

        let log = ResultLog::with_ledger(db.clone(), run_id.clone());
        log.record(MigrationResult::success("A", Phase::Snapshot));

        assert_eq!(log.run_id(), Some(run_id.as_str()));
        assert_eq!(db.list_vault_outcomes(&run_id).unwrap().len(), 1);
    }

    #[test]
    fn test_end_to_end_failure_only_counts_create() {
        let mut summary = RunSummary {
            results: vec![
                MigrationResult::success("A", Phase::Create),
                MigrationResult::failure("A", Phase::Replay, "denied").with_principal("user x"),
            ],
            ..Default::default()
        };
        assert_eq!(summary.failure_count(), 1);
        assert!(!summary.has_end_to_end_failure());

        summary
            .results
            .push(MigrationResult::failure("B", Phase::Create, "exists"));
        assert!(summary.has_end_to_end_failure());
        assert_eq!(
            summary.vaults_with_failures().into_iter().collect::<Vec<_>>(),
            vec!["A", "B"]
        );
    }
}
