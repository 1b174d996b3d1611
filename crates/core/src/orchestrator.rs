//! Migration orchestrator.
//!
//! The [`MigrationOrchestrator`] drives one run:
//!
//! 1. Precheck: CLI version floor and a signed-in session per account.
//! 2. Enumerate source vaults and apply the exclusion policy.
//! 3. Run the report pass and the create/replay pass concurrently. Both
//!    read snapshots from one [`SnapshotBoard`], so every vault is
//!    captured once.
//! 4. Record the run, its results and an audit entry in the ledger.
//!
//! Per-vault failures never abort the run; they end up in the
//! [`RunSummary`]. Only configuration-class errors (and losing the vault
//! enumeration itself) are returned as `Err`.

use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

use crate::config::AppConfig;
use crate::db::Database;
use crate::elevation::{ItemMigrator, Operator, OPERATOR_LABEL};
use crate::errors::{ConfigError, CoreError, RetrievalError};
use crate::identity::IdentityMapper;
use crate::models::{AuditEntry, MigrationResult, Phase, RunMode, Vault, VaultAclSnapshot};
use crate::op::{check_cli_version, CliVersion, OpClient, OpGateway};
use crate::operator_access::{AccessAction, OperatorAccessToggle};
use crate::policy::ExclusionPolicy;
use crate::provisioner::VaultProvisioner;
use crate::replayer::{GroupPolicy, Replayer};
use crate::report::ReportSink;
use crate::results::{ResultLog, RunSummary};
use crate::snapshot::{SnapshotBoard, SnapshotDocument, SnapshotOutcome, Snapshotter};

// ---------------------------------------------------------------------------
// Options & context
// ---------------------------------------------------------------------------

/// Everything that shapes a run apart from the accounts themselves.
#[derive(Debug, Clone)]
pub struct MigrationOptions {
    pub mode: RunMode,
    /// Copy items while creating vaults.
    pub migrate_items: bool,
    pub group_policy: GroupPolicy,
    /// Vault pipelines allowed at once.
    pub concurrency: usize,
    pub min_cli_version: CliVersion,
    pub report_path: std::path::PathBuf,
    pub snapshot_path: std::path::PathBuf,
    /// Group toggled by [`RunMode::OperatorAccess`].
    pub operator_group: String,
    /// Set for [`RunMode::OperatorAccess`].
    pub access_action: Option<AccessAction>,
}

impl MigrationOptions {
    /// Options for `mode` with every other value taken from `config`.
    pub fn from_config(config: &AppConfig, mode: RunMode) -> Result<Self, ConfigError> {
        Ok(Self {
            mode,
            migrate_items: false,
            group_policy: GroupPolicy::from_flag(config.migration.migrate_groups),
            concurrency: config.migration.concurrency,
            min_cli_version: config.min_cli_version()?,
            report_path: config.output.report_path(),
            snapshot_path: config.output.snapshot_path(),
            operator_group: config.migration.operator_group.clone(),
            access_action: None,
        })
    }
}

/// The collaborators of a run, built once and shared by `Arc`.
#[derive(Debug)]
pub struct MigrationContext {
    pub source: OpClient,
    pub destination: OpClient,
    pub mapper: Arc<IdentityMapper>,
    pub policy: Arc<ExclusionPolicy>,
    pub ledger: Option<Arc<Database>>,
    pub options: MigrationOptions,
    /// Set by signal handlers; checked before each vault pipeline starts.
    pub cancel: Arc<AtomicBool>,
}

impl MigrationContext {
    /// Build a context from configuration. Loading the identity mapping
    /// is the only step that can fail here.
    pub async fn from_config(
        config: &AppConfig,
        gateway: Arc<dyn OpGateway>,
        options: MigrationOptions,
        ledger: Option<Arc<Database>>,
    ) -> Result<Self, CoreError> {
        let mapper = IdentityMapper::load(&config.identity).await?;
        info!(mappings = mapper.len(), "identity mapping loaded");

        Ok(Self {
            source: OpClient::from_config(gateway.clone(), &config.accounts.source),
            destination: OpClient::from_config(gateway, &config.accounts.destination),
            mapper: Arc::new(mapper),
            policy: Arc::new(ExclusionPolicy::from_config(&config.exclusions)),
            ledger,
            options,
            cancel: Arc::new(AtomicBool::new(false)),
        })
    }

    fn cancelled(&self) -> bool {
        self.cancel.load(Ordering::SeqCst)
    }
}

// ---------------------------------------------------------------------------
// Orchestrator
// ---------------------------------------------------------------------------

/// Drives a migration run over a [`MigrationContext`].
pub struct MigrationOrchestrator {
    ctx: Arc<MigrationContext>,
    running: Arc<AtomicBool>,
}

impl MigrationOrchestrator {
    pub fn new(ctx: MigrationContext) -> Self {
        Self {
            ctx: Arc::new(ctx),
            running: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn context(&self) -> &MigrationContext {
        &self.ctx
    }

    /// Handle for requesting a stop between vault pipelines.
    pub fn cancel_handle(&self) -> Arc<AtomicBool> {
        self.ctx.cancel.clone()
    }

    /// Execute one run in the configured mode.
    pub async fn run(&self) -> Result<RunSummary, CoreError> {
        if self
            .running
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return Err(ConfigError::InvalidValue {
                field: "run".into(),
                detail: "a run is already in progress".into(),
            }
            .into());
        }
        let _guard = RunLockGuard(self.running.clone());

        let mode = self.ctx.options.mode;
        info!(%mode, source = self.ctx.source.account(), destination = self.ctx.destination.account(), "starting migration run");

        let operator = self.precheck().await?;

        let run_id = match &self.ctx.ledger {
            Some(db) => match db.start_run(mode, self.ctx.source.account(), self.ctx.destination.account()) {
                Ok(id) => Some(id),
                Err(e) => {
                    warn!(error = %e, "could not record run start in the ledger");
                    None
                }
            },
            None => None,
        };
        let results = Arc::new(match (&self.ctx.ledger, &run_id) {
            (Some(db), Some(id)) => ResultLog::with_ledger(db.clone(), id.clone()),
            _ => ResultLog::new(),
        });

        let mut summary = RunSummary {
            run_id: run_id.clone(),
            ..Default::default()
        };
        let outcome = match mode {
            RunMode::ReportOnly | RunMode::CreateAndReplay => {
                self.snapshot_run(operator, results.clone(), &mut summary).await
            }
            RunMode::ReplayOnly => self.replay_run(results.clone(), &mut summary).await,
            RunMode::OperatorAccess => self.operator_access_run(results.clone(), &mut summary).await,
        };
        summary.cancelled = self.ctx.cancelled();
        summary.results = results.snapshot();

        self.finish_run(run_id.as_deref(), mode, &summary, outcome.as_ref().err());
        outcome.map(|()| summary)
    }

    // -----------------------------------------------------------------------
    // Precheck
    // -----------------------------------------------------------------------

    /// Version floor and sign-in checks. Returns the operator's identity
    /// in both accounts when the run will mutate vaults.
    async fn precheck(&self) -> Result<Option<Operator>, CoreError> {
        let ctx = &self.ctx;
        check_cli_version(&ctx.source, &ctx.options.min_cli_version).await?;

        let source_me = signed_in(&ctx.source).await?;
        match ctx.options.mode {
            RunMode::CreateAndReplay => {
                let destination_me = signed_in(&ctx.destination).await?;
                Ok(Some(Operator {
                    source_user_id: source_me,
                    destination_user_id: destination_me,
                }))
            }
            RunMode::ReplayOnly | RunMode::OperatorAccess => {
                signed_in(&ctx.destination).await?;
                Ok(None)
            }
            RunMode::ReportOnly => Ok(None),
        }
    }

    // -----------------------------------------------------------------------
    // Report-only and create/replay runs
    // -----------------------------------------------------------------------

    async fn snapshot_run(
        &self,
        operator: Option<Operator>,
        results: Arc<ResultLog>,
        summary: &mut RunSummary,
    ) -> Result<(), CoreError> {
        let ctx = &self.ctx;
        let all = ctx
            .source
            .list_vaults()
            .await
            .map_err(|source| RetrievalError::Vaults {
                account: ctx.source.account().to_string(),
                source,
            })?;
        summary.vaults_seen = all.len();

        let (included, excluded): (Vec<Vault>, Vec<Vault>) =
            all.into_iter().partition(|v| !ctx.policy.is_excluded(&v.name));
        summary.vaults_excluded = excluded.len();
        for vault in &excluded {
            info!(vault = %vault.name, "skipping personal or system vault");
        }
        info!(vaults = included.len(), excluded = excluded.len(), "enumerated source vaults");

        let board = Arc::new(SnapshotBoard::new(
            Snapshotter::new(ctx.source.clone()),
            results.clone(),
            &included,
        ));

        let report = self.report_pass(&included, board.clone(), results.clone());
        let create = async {
            match (ctx.options.mode, operator) {
                (RunMode::CreateAndReplay, Some(operator)) => {
                    self.create_pass(&included, board.clone(), results.clone(), operator)
                        .await
                }
                _ => (0, 0),
            }
        };
        let ((), (created, skipped)) = tokio::join!(report, create);
        summary.vaults_created = created;
        summary.vaults_skipped = skipped;
        Ok(())
    }

    /// Write the CSV report and the snapshot document, vault by vault in
    /// enumeration order.
    async fn report_pass(&self, vaults: &[Vault], board: Arc<SnapshotBoard>, results: Arc<ResultLog>) {
        let ctx = &self.ctx;
        let sink = match ReportSink::create(&ctx.options.report_path).await {
            Ok(sink) => Some(sink),
            Err(e) => {
                warn!(error = %e, "permissions report disabled");
                self.audit(results.run_id(), AuditEntry::failure("report", &e.to_string()));
                None
            }
        };

        let mut captured: Vec<VaultAclSnapshot> = Vec::with_capacity(vaults.len());
        for vault in vaults {
            if ctx.cancelled() {
                info!("cancel requested, report pass stopping");
                break;
            }
            let Some(Ok(snapshot)) = board.get(vault).await else {
                continue;
            };
            if let Some(sink) = &sink {
                if let Err(e) = sink.write_vault(&snapshot.snapshot).await {
                    warn!(vault = %vault.name, error = %e, "could not write report rows");
                }
            }
            captured.push(snapshot.snapshot.clone());
        }

        if let Some(sink) = &sink {
            if let Err(e) = sink.finish().await {
                warn!(error = %e, "could not flush permissions report");
            }
        }

        let document = SnapshotDocument::new(ctx.source.account(), captured);
        if let Err(e) = document.save(&ctx.options.snapshot_path).await {
            warn!(error = %e, "could not persist snapshot document");
            self.audit(results.run_id(), AuditEntry::failure("snapshot_save", &e.to_string()));
        }
    }

    /// Create and replay every vault not created by a prior run. Returns
    /// (created, skipped).
    async fn create_pass(
        &self,
        vaults: &[Vault],
        board: Arc<SnapshotBoard>,
        results: Arc<ResultLog>,
        operator: Operator,
    ) -> (usize, usize) {
        let ctx = self.ctx.clone();
        let pipeline = Arc::new(VaultPipeline {
            board,
            results: results.clone(),
            provisioner: VaultProvisioner::new(ctx.destination.clone()),
            replayer: Replayer::new(ctx.destination.clone(), ctx.mapper.clone(), ctx.options.group_policy),
            migrator: ItemMigrator::new(ctx.source.clone(), ctx.destination.clone(), operator),
            ledger: ctx.ledger.clone().zip(results.run_id().map(str::to_string)),
            source_account: ctx.source.account().to_string(),
            destination_account: ctx.destination.account().to_string(),
            migrate_items: ctx.options.migrate_items,
        });

        let mut pending = Vec::with_capacity(vaults.len());
        let mut skipped = 0;
        for vault in vaults {
            if pipeline.created_by_prior_run(vault) {
                info!(vault = %vault.name, "vault was created by a prior run, skipping");
                skipped += 1;
            } else {
                pending.push(vault.clone());
            }
        }

        let created = run_bounded(&ctx, pending, move |vault| {
            let pipeline = pipeline.clone();
            async move { pipeline.run(vault).await }
        })
        .await
        .into_iter()
        .filter(|created| *created)
        .count();
        (created, skipped)
    }

    // -----------------------------------------------------------------------
    // Replay-only runs
    // -----------------------------------------------------------------------

    async fn replay_run(&self, results: Arc<ResultLog>, summary: &mut RunSummary) -> Result<(), CoreError> {
        let ctx = self.ctx.clone();
        let document = SnapshotDocument::load(&ctx.options.snapshot_path).await?;
        info!(vaults = document.vaults.len(), captured_at = %document.captured_at, "replaying persisted snapshot");
        if document.source_account != ctx.source.account() {
            warn!(
                snapshot_account = %document.source_account,
                configured = ctx.source.account(),
                "snapshot was captured from a different source account"
            );
        }

        let destination_vaults = Arc::new(ctx.destination.list_vaults().await.map_err(|source| {
            RetrievalError::Vaults {
                account: ctx.destination.account().to_string(),
                source,
            }
        })?);

        summary.vaults_seen = document.vaults.len();
        let (snapshots, excluded): (Vec<VaultAclSnapshot>, Vec<VaultAclSnapshot>) = document
            .vaults
            .into_iter()
            .partition(|s| !ctx.policy.is_excluded(&s.source_vault_name));
        summary.vaults_excluded = excluded.len();

        let replayer = Arc::new(Replayer::new(
            ctx.destination.clone(),
            ctx.mapper.clone(),
            ctx.options.group_policy,
        ));
        run_bounded(&ctx, snapshots, move |snapshot| {
            let replayer = replayer.clone();
            let destination_vaults = destination_vaults.clone();
            let results = results.clone();
            async move {
                let name = snapshot.source_vault_name.as_str();
                match VaultProvisioner::match_by_name(&destination_vaults, name) {
                    Ok(destination) => {
                        let outcome = replayer.apply(destination, &snapshot).await;
                        for result in outcome.to_results() {
                            results.record(result);
                        }
                    }
                    Err(e) => results.record(MigrationResult::failure(name, Phase::Replay, e)),
                }
            }
        })
        .await;
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Operator group access
    // -----------------------------------------------------------------------

    async fn operator_access_run(&self, results: Arc<ResultLog>, summary: &mut RunSummary) -> Result<(), CoreError> {
        let ctx = &self.ctx;
        let action = ctx.options.access_action.ok_or_else(|| ConfigError::InvalidValue {
            field: "access_action".into(),
            detail: "operator access runs need either grant or revoke".into(),
        })?;

        let toggle = OperatorAccessToggle::new(
            ctx.source.clone(),
            ctx.destination.clone(),
            ctx.options.operator_group.clone(),
            ctx.policy.clone(),
            results,
        );
        let counts = toggle.run(action).await;
        summary.vaults_seen = counts.vaults_seen;
        summary.vaults_excluded = counts.vaults_excluded;
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Bookkeeping
    // -----------------------------------------------------------------------

    fn finish_run(&self, run_id: Option<&str>, mode: RunMode, summary: &RunSummary, error: Option<&CoreError>) {
        let (status, details) = match error {
            Some(e) => ("failed", format!("{} run failed: {}", mode, e)),
            None if summary.cancelled => (
                "cancelled",
                format!("{} run cancelled after {} vault(s) created", mode, summary.vaults_created),
            ),
            None => (
                if summary.failure_count() == 0 { "completed" } else { "completed_with_errors" },
                format!(
                    "{}: seen {}, excluded {}, created {}, skipped {}, failures {}",
                    mode,
                    summary.vaults_seen,
                    summary.vaults_excluded,
                    summary.vaults_created,
                    summary.vaults_skipped,
                    summary.failure_count()
                ),
            ),
        };
        info!(status, details = %details, "migration run finished");

        if let (Some(db), Some(id)) = (&self.ctx.ledger, run_id) {
            if let Err(e) = db.complete_run(id, status, Some(&details)) {
                warn!(error = %e, "could not record run completion in the ledger");
            }
        }
        let entry = if status == "failed" {
            AuditEntry::failure("migration_run", &details)
        } else {
            AuditEntry::success("migration_run", &details)
        };
        self.audit(run_id, entry);
    }

    fn audit(&self, run_id: Option<&str>, entry: AuditEntry) {
        if let Some(db) = &self.ctx.ledger {
            if let Err(e) = db.insert_audit_entry(run_id, &entry) {
                warn!(error = %e, "could not write audit entry");
            }
        }
    }
}

/// Resolve the signed-in user of an account. Not being signed in is a
/// configuration problem: no vault may be touched.
async fn signed_in(client: &OpClient) -> Result<String, ConfigError> {
    let me = client.whoami().await.map_err(|e| {
        ConfigError::CliUnavailable(format!("not signed in to account '{}': {}", client.account(), e))
    })?;
    info!(account = client.account(), user_id = %me.user_uuid, "signed in");
    Ok(me.user_uuid)
}

/// Run `task` for every item, at most `concurrency` at a time, checking
/// the cancel flag before each start. Outputs come back in completion
/// order.
async fn run_bounded<T, F, Fut, O>(ctx: &MigrationContext, items: Vec<T>, task: F) -> Vec<O>
where
    T: Send + 'static,
    F: Fn(T) -> Fut,
    Fut: Future<Output = O> + Send + 'static,
    O: Send + 'static,
{
    let semaphore = Arc::new(Semaphore::new(ctx.options.concurrency.max(1)));
    let mut set = JoinSet::new();

    for item in items {
        let Ok(permit) = semaphore.clone().acquire_owned().await else {
            break;
        };
        if ctx.cancelled() {
            info!("cancel requested, no further vaults will be started");
            break;
        }
        let fut = task(item);
        set.spawn(async move {
            let output = fut.await;
            drop(permit);
            output
        });
    }

    let mut outputs = Vec::new();
    while let Some(joined) = set.join_next().await {
        match joined {
            Ok(output) => outputs.push(output),
            Err(e) => warn!(error = %e, "vault task did not complete"),
        }
    }
    outputs
}

// ---------------------------------------------------------------------------
// Per-vault pipeline
// ---------------------------------------------------------------------------

/// State shared by every create/replay pipeline of a run.
struct VaultPipeline {
    board: Arc<SnapshotBoard>,
    results: Arc<ResultLog>,
    provisioner: VaultProvisioner,
    replayer: Replayer,
    migrator: ItemMigrator,
    ledger: Option<(Arc<Database>, String)>,
    source_account: String,
    destination_account: String,
    migrate_items: bool,
}

impl VaultPipeline {
    fn created_by_prior_run(&self, vault: &Vault) -> bool {
        let Some((db, _)) = &self.ledger else {
            return false;
        };
        match db.get_created_vault(&self.source_account, &self.destination_account, &vault.id) {
            Ok(entry) => entry.is_some(),
            Err(e) => {
                warn!(vault = %vault.name, error = %e, "could not consult the ledger");
                false
            }
        }
    }

    /// Snapshot and create concurrently, then operator handling and replay.
    /// Returns whether the destination vault was created.
    async fn run(&self, vault: Vault) -> bool {
        let (captured, created) = tokio::join!(self.board.get(&vault), self.provisioner.create_from(&vault));

        let destination = match created {
            Ok(destination) => destination,
            Err(e) => {
                self.results
                    .record(MigrationResult::failure(&vault.name, Phase::Create, e));
                return false;
            }
        };
        self.results
            .record(MigrationResult::success(&vault.name, Phase::Create));
        if let Some((db, run_id)) = &self.ledger {
            if let Err(e) = db.record_created_vault(
                run_id,
                &self.source_account,
                &self.destination_account,
                &vault,
                &destination,
            ) {
                warn!(vault = %vault.name, error = %e, "could not register created vault");
            }
        }

        if self.migrate_items {
            for result in self.migrator.migrate(&vault, &destination).await {
                self.results.record(result);
            }
        } else {
            let result = self.migrator.revoke_destination(&destination).await;
            debug!(vault = %vault.name, succeeded = result.succeeded, principal = OPERATOR_LABEL, "dropped operator destination access");
            self.results.record(result);
        }

        match captured {
            Some(Ok(captured)) => {
                let outcome = self.replayer.apply(&destination, &captured.snapshot).await;
                for result in outcome.to_results() {
                    self.results.record(result);
                }
            }
            other => self.results.record(unreplayable(&vault.name, other)),
        }
        true
    }
}

/// Replay failure for a vault whose snapshot could not be captured.
fn unreplayable(vault_name: &str, captured: Option<&SnapshotOutcome>) -> MigrationResult {
    let detail = match captured {
        Some(Err(e)) => format!("no snapshot to replay: {}", e),
        _ => "no snapshot to replay: vault was never captured".to_string(),
    };
    MigrationResult::failure(vault_name, Phase::Replay, detail)
}

/// Drop guard that resets the `running` flag to `false`.
struct RunLockGuard(Arc<AtomicBool>);

impl Drop for RunLockGuard {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::OpError;

    #[test]
    fn test_unreplayable_names_the_missing_snapshot() {
        let failed: SnapshotOutcome = Err(RetrievalError::Users {
            vault: "Engineering".into(),
            source: OpError::CommandFailed {
                exit_code: 1,
                stderr: "forbidden".into(),
            },
        });
        let result = unreplayable("Engineering", Some(&failed));
        assert!(!result.succeeded);
        assert_eq!(result.phase, Phase::Replay);
        let detail = result.error_detail.unwrap();
        assert!(detail.starts_with("no snapshot to replay: could not list users"));

        let result = unreplayable("Engineering", None);
        assert_eq!(
            result.error_detail.as_deref(),
            Some("no snapshot to replay: vault was never captured")
        );
        assert!(!result.error_detail.unwrap().contains("destination vault"));
    }
}
