//! Terminal rendering of run summaries and ledger history.

use comfy_table::{presets::UTF8_FULL, Cell, Color, ContentArrangement, Table};

use vaultmigrate_core::db::queries::{AuditLogEntry, RunEntry};
use vaultmigrate_core::models::{MigrationResult, Phase};
use vaultmigrate_core::RunSummary;

use crate::style;

const PHASES: [Phase; 7] = [
    Phase::Snapshot,
    Phase::Create,
    Phase::Elevate,
    Phase::CopyItems,
    Phase::Restore,
    Phase::Replay,
    Phase::OperatorAccess,
];

/// Print the counters, a per-phase tally and every failure of a run.
pub fn print_run_summary(summary: &RunSummary) {
    println!();
    println!("{}", style::header("Run Summary"));
    if let Some(run_id) = &summary.run_id {
        println!("{}", style::dim(&format!("run {}", run_id)));
    }
    println!();

    let mut counts = Table::new();
    counts.load_preset(UTF8_FULL);
    counts.set_header(vec!["Vaults seen", "Excluded", "Created", "Skipped (prior run)"]);
    counts.add_row(vec![
        Cell::new(summary.vaults_seen),
        Cell::new(summary.vaults_excluded),
        Cell::new(summary.vaults_created),
        Cell::new(summary.vaults_skipped),
    ]);
    println!("{}", counts);

    let mut phases = Table::new();
    phases.load_preset(UTF8_FULL);
    phases.set_header(vec!["Phase", "Succeeded", "Failed"]);
    for phase in PHASES {
        let (ok, failed) = tally(&summary.results, phase);
        if ok + failed == 0 {
            continue;
        }
        let failed_cell = if failed > 0 {
            Cell::new(failed).fg(Color::Red)
        } else {
            Cell::new(failed)
        };
        phases.add_row(vec![Cell::new(phase), Cell::new(ok), failed_cell]);
    }
    println!("{}", phases);

    let failures: Vec<&MigrationResult> = summary.failures().collect();
    if !failures.is_empty() {
        println!();
        println!("{}", style::header("Failures"));
        let mut table = Table::new();
        table.load_preset(UTF8_FULL);
        table.set_content_arrangement(ContentArrangement::Dynamic);
        table.set_header(vec!["Vault", "Phase", "Principal", "Error"]);
        for failure in failures {
            table.add_row(vec![
                Cell::new(&failure.vault_name),
                Cell::new(failure.phase),
                Cell::new(failure.principal.as_deref().unwrap_or("—")),
                Cell::new(failure.error_detail.as_deref().unwrap_or("")),
            ]);
        }
        println!("{}", table);
    }

    println!();
    if summary.cancelled {
        println!("{}", style::warn("Run was cancelled before every vault was processed"));
    }
    if summary.has_end_to_end_failure() {
        println!(
            "{}",
            style::error(&format!(
                "{} vault(s) could not be created",
                summary.failures_in(Phase::Create)
            ))
        );
    } else if summary.failure_count() > 0 {
        println!(
            "{}",
            style::warn(&format!(
                "Completed with {} permission or item warning(s)",
                summary.failure_count()
            ))
        );
    } else {
        println!("{}", style::success("Completed without errors"));
    }
}

fn tally(results: &[MigrationResult], phase: Phase) -> (usize, usize) {
    results
        .iter()
        .filter(|r| r.phase == phase)
        .fold((0, 0), |(ok, failed), r| {
            if r.succeeded {
                (ok + 1, failed)
            } else {
                (ok, failed + 1)
            }
        })
}

/// Recent runs from the ledger.
pub fn print_runs(runs: &[RunEntry]) {
    let mut table = Table::new();
    table.load_preset(UTF8_FULL);
    table.set_content_arrangement(ContentArrangement::Dynamic);
    table.set_header(vec!["Run", "Mode", "Accounts", "Started", "Status", "Failures"]);

    for run in runs {
        let status_cell = match run.status.as_str() {
            "completed" => Cell::new("✓ completed").fg(Color::Green),
            "completed_with_errors" => Cell::new("⚠ with errors").fg(Color::Yellow),
            "failed" => Cell::new("✗ failed").fg(Color::Red),
            "cancelled" => Cell::new("○ cancelled").fg(Color::Yellow),
            _ => Cell::new(&run.status),
        };
        table.add_row(vec![
            Cell::new(&run.id),
            Cell::new(&run.mode),
            Cell::new(format!("{} → {}", run.source_account, run.destination_account)),
            Cell::new(&run.started_at),
            status_cell,
            Cell::new(run.failures),
        ]);
    }
    println!("{}", table);
}

/// Every recorded outcome of one run.
pub fn print_outcomes(results: &[MigrationResult]) {
    let mut table = Table::new();
    table.load_preset(UTF8_FULL);
    table.set_content_arrangement(ContentArrangement::Dynamic);
    table.set_header(vec!["Vault", "Phase", "Principal", "Result"]);

    for result in results {
        let outcome = if result.succeeded {
            Cell::new("✓").fg(Color::Green)
        } else {
            Cell::new(format!("✗ {}", result.error_detail.as_deref().unwrap_or(""))).fg(Color::Red)
        };
        table.add_row(vec![
            Cell::new(&result.vault_name),
            Cell::new(result.phase),
            Cell::new(result.principal.as_deref().unwrap_or("—")),
            outcome,
        ]);
    }
    println!("{}", table);
}

/// Recent audit log entries.
pub fn print_audit(entries: &[AuditLogEntry]) {
    for entry in entries {
        let marker = if entry.success { "OK" } else { "FAIL" };
        println!(
            "{} [{}] {:<16} {}",
            style::dim(&entry.created_at),
            marker,
            entry.action,
            entry.details.as_deref().unwrap_or("")
        );
    }
}
