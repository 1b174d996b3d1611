//! vaultmigrate command-line tool.
//!
//! Snapshots the access control lists of shared vaults in a source
//! 1Password account, recreates the vaults in a destination account and
//! replays the permissions there. Also provides the operator group toggle,
//! identity mapping lookups, configuration scaffolding and run history.

mod logging;
mod signals;
mod style;
mod summary;

use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{ArgGroup, Parser, Subcommand};
use dialoguer::Confirm;
use tracing::info;

use vaultmigrate_core::config::AppConfig;
use vaultmigrate_core::db::Database;
use vaultmigrate_core::identity::IdentityMapper;
use vaultmigrate_core::models::RunMode;
use vaultmigrate_core::op::{OpGateway, ProcessGateway};
use vaultmigrate_core::operator_access::AccessAction;
use vaultmigrate_core::replayer::GroupPolicy;
use vaultmigrate_core::{MigrationContext, MigrationOptions, MigrationOrchestrator, RunSummary};

// ---------------------------------------------------------------------------
// CLI argument definitions
// ---------------------------------------------------------------------------

/// vaultmigrate command-line tool.
#[derive(Parser, Debug)]
#[command(
    name = "vaultmigrate",
    version,
    about = "Copy shared vaults and their permissions between 1Password accounts"
)]
struct Cli {
    /// Path to the TOML configuration file.
    #[arg(short, long, global = true, default_value = "./vaultmigrate.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Snapshot source vault permissions, create the vaults in the
    /// destination account and replay the permissions.
    Migrate {
        /// Only write the permissions report and snapshot; change nothing.
        #[arg(long)]
        permissions: bool,

        /// Also copy every item into the new vaults.
        #[arg(long, conflicts_with = "permissions")]
        items: bool,

        /// Override the output directory from the config file.
        #[arg(long)]
        output_dir: Option<PathBuf>,

        /// Do not ask for confirmation before changing the destination.
        #[arg(short, long)]
        yes: bool,
    },

    /// Replay a persisted snapshot onto existing destination vaults.
    Replay {
        /// Also replay group grants onto same-named destination groups.
        #[arg(long)]
        groups: bool,

        /// Snapshot file to replay (defaults to the configured one).
        #[arg(long)]
        snapshot: Option<PathBuf>,

        /// Do not ask for confirmation before changing the destination.
        #[arg(short, long)]
        yes: bool,
    },

    /// Grant or revoke the operator group's full access to every shared
    /// vault in both accounts.
    #[command(group(ArgGroup::new("action").required(true).args(["grant", "revoke"])))]
    OperatorAccess {
        #[arg(long)]
        grant: bool,

        #[arg(long)]
        revoke: bool,

        /// Group to toggle (defaults to `migration.operator_group`).
        #[arg(long)]
        group: Option<String>,

        /// Do not ask for confirmation.
        #[arg(short, long)]
        yes: bool,
    },

    /// Inspect the identity mapping.
    Identity {
        #[command(subcommand)]
        action: IdentityAction,
    },

    /// Generate a starter configuration file.
    Init {
        /// Output path for the generated config file.
        #[arg(short, long, default_value = "./vaultmigrate.toml")]
        output: PathBuf,
    },

    /// Validate a configuration file.
    Validate,

    /// Show recent runs from the ledger.
    History {
        /// Maximum number of runs to show.
        #[arg(short, long, default_value = "20")]
        limit: u32,

        /// Show every recorded outcome of one run.
        #[arg(long)]
        run: Option<String>,

        /// Show the audit log instead of runs.
        #[arg(long)]
        audit: bool,
    },
}

#[derive(Subcommand, Debug)]
enum IdentityAction {
    /// Show the destination email a source email resolves to.
    Lookup {
        /// Source account email.
        email: String,
    },
}

// ---------------------------------------------------------------------------
// Main
// ---------------------------------------------------------------------------

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    match run(cli).await {
        Ok(code) => code,
        Err(e) => {
            eprintln!("{}", style::error(&format!("Error: {:#}", e)));
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> Result<ExitCode> {
    match cli.command {
        Commands::Init { output } => {
            logging::init_console("warn");
            cmd_init(&output)?;
            Ok(ExitCode::SUCCESS)
        }
        Commands::Validate => {
            logging::init_console("warn");
            cmd_validate(&cli.config)?;
            Ok(ExitCode::SUCCESS)
        }
        Commands::Identity { action } => {
            logging::init_console("warn");
            let config = load_config(&cli.config)?;
            cmd_identity(&config, action).await?;
            Ok(ExitCode::SUCCESS)
        }
        Commands::History { limit, run, audit } => {
            logging::init_console("warn");
            let config = load_config(&cli.config)?;
            let db = open_database(&config)?;
            cmd_history(&db, limit, run.as_deref(), audit)?;
            Ok(ExitCode::SUCCESS)
        }
        Commands::Migrate {
            permissions,
            items,
            output_dir,
            yes,
        } => {
            let mut config = load_config(&cli.config)?;
            if let Some(dir) = output_dir {
                config.output.dir = dir;
            }
            let _guard = init_run_logging(&config)?;

            let mode = if permissions {
                RunMode::ReportOnly
            } else {
                RunMode::CreateAndReplay
            };
            let mut options = MigrationOptions::from_config(&config, mode)?;
            options.migrate_items = items;

            if mode != RunMode::ReportOnly {
                let prompt = format!(
                    "Create vaults in '{}' from the shared vaults of '{}'{}?",
                    config.accounts.destination.account,
                    config.accounts.source.account,
                    if items { " and copy their items" } else { "" }
                );
                if !confirm(&prompt, yes)? {
                    println!("Aborted.");
                    return Ok(ExitCode::SUCCESS);
                }
            }

            let summary = execute(&config, options).await?;
            Ok(exit_code(&summary))
        }
        Commands::Replay {
            groups,
            snapshot,
            yes,
        } => {
            let config = load_config(&cli.config)?;
            let _guard = init_run_logging(&config)?;

            let mut options = MigrationOptions::from_config(&config, RunMode::ReplayOnly)?;
            if groups {
                options.group_policy = GroupPolicy::MatchByName;
            }
            if let Some(path) = snapshot {
                options.snapshot_path = path;
            }

            let prompt = format!(
                "Replay permissions from {} onto vaults in '{}'?",
                options.snapshot_path.display(),
                config.accounts.destination.account
            );
            if !confirm(&prompt, yes)? {
                println!("Aborted.");
                return Ok(ExitCode::SUCCESS);
            }

            let summary = execute(&config, options).await?;
            Ok(exit_code(&summary))
        }
        Commands::OperatorAccess {
            grant,
            revoke: _,
            group,
            yes,
        } => {
            let config = load_config(&cli.config)?;
            let _guard = init_run_logging(&config)?;

            let mut options = MigrationOptions::from_config(&config, RunMode::OperatorAccess)?;
            let action = if grant {
                AccessAction::Grant
            } else {
                AccessAction::Revoke
            };
            options.access_action = Some(action);
            if let Some(group) = group {
                options.operator_group = group;
            }

            let prompt = format!(
                "{} full access for group '{}' on every shared vault in '{}' and '{}'?",
                if grant { "Grant" } else { "Revoke" },
                options.operator_group,
                config.accounts.source.account,
                config.accounts.destination.account
            );
            if !confirm(&prompt, yes)? {
                println!("Aborted.");
                return Ok(ExitCode::SUCCESS);
            }

            let summary = execute(&config, options).await?;
            Ok(exit_code(&summary))
        }
    }
}

// ---------------------------------------------------------------------------
// Config helpers
// ---------------------------------------------------------------------------

fn load_config(path: &Path) -> Result<AppConfig> {
    AppConfig::load_and_resolve(path)
        .with_context(|| format!("failed to load configuration {}", path.display()))
}

fn open_database(config: &AppConfig) -> Result<Database> {
    let db_path = config.output.ledger_path();
    Database::open(&db_path)
        .with_context(|| format!("failed to open run ledger {}", db_path.display()))
}

fn init_run_logging(config: &AppConfig) -> Result<tracing_appender::non_blocking::WorkerGuard> {
    logging::init_with_file(&config.output.log_level, &config.output.log_path())
}

fn confirm(prompt: &str, assume_yes: bool) -> Result<bool> {
    if assume_yes {
        return Ok(true);
    }
    Confirm::new()
        .with_prompt(prompt)
        .default(false)
        .interact()
        .context("failed to read confirmation")
}

fn exit_code(summary: &RunSummary) -> ExitCode {
    if summary.has_end_to_end_failure() {
        ExitCode::FAILURE
    } else {
        ExitCode::SUCCESS
    }
}

// ---------------------------------------------------------------------------
// Subcommand implementations
// ---------------------------------------------------------------------------

/// Build the context, run the orchestrator and print the summary.
async fn execute(config: &AppConfig, options: MigrationOptions) -> Result<RunSummary> {
    info!("========================================");
    info!("  vaultmigrate v{}", env!("CARGO_PKG_VERSION"));
    info!("========================================");
    info!("Mode          : {}", options.mode);
    info!("Source        : {}", config.accounts.source.account);
    info!("Destination   : {}", config.accounts.destination.account);
    info!("Concurrency   : {}", options.concurrency);
    info!("Output dir    : {}", config.output.dir.display());
    info!("========================================");

    println!(
        "{} {}",
        style::header(&options.mode.to_string()),
        style::direction(
            &config.accounts.source.account,
            &config.accounts.destination.account
        )
    );

    let ledger = Arc::new(open_database(config)?);
    let gateway: Arc<dyn OpGateway> = Arc::new(ProcessGateway::new(config.op.binary.clone()));
    let report_path = options.report_path.clone();
    let snapshot_path = options.snapshot_path.clone();
    let mode = options.mode;

    let ctx = MigrationContext::from_config(config, gateway, options, Some(ledger))
        .await
        .context("failed to prepare migration")?;
    let orchestrator = MigrationOrchestrator::new(ctx);
    let listener = signals::spawn_cancel_listener(orchestrator.cancel_handle());

    let result = orchestrator.run().await;
    listener.abort();
    let summary = result.context("migration run failed")?;

    summary::print_run_summary(&summary);
    if matches!(mode, RunMode::ReportOnly | RunMode::CreateAndReplay) {
        println!();
        println!("  Report   : {}", report_path.display());
        println!("  Snapshot : {}", snapshot_path.display());
    }
    Ok(summary)
}

fn cmd_init(output: &Path) -> Result<()> {
    if output.exists() {
        anyhow::bail!(
            "file already exists: {}. Use a different path or remove the existing file.",
            output.display()
        );
    }

    std::fs::write(output, AppConfig::template()).context("failed to write config file")?;

    println!(
        "{}",
        style::success(&format!(
            "Default configuration written to {}",
            output.display()
        ))
    );
    println!();
    println!("Next steps:");
    println!("  1. Set the source and destination account names");
    println!("  2. Sign in to both accounts with `op signin`, or set the token_env variables");
    println!(
        "  3. Validate with: vaultmigrate validate --config {}",
        output.display()
    );
    println!(
        "  4. Review the report first: vaultmigrate migrate --permissions --config {}",
        output.display()
    );

    Ok(())
}

fn cmd_validate(config_path: &Path) -> Result<()> {
    println!("Validating configuration: {}", config_path.display());
    println!();

    let config = AppConfig::load_from_file(config_path).context("failed to parse configuration")?;
    println!("  [OK] TOML structure is valid");

    let mut config = config;
    match config.resolve_env_vars() {
        Ok(()) => println!("  [OK] Token environment variables resolved"),
        Err(e) => println!("  [WARN] {}", e),
    }

    match config.validate() {
        Ok(()) => {
            println!("  [OK] All required fields are valid");
        }
        Err(e) => {
            println!("  [FAIL] Validation error: {}", e);
            anyhow::bail!("configuration validation failed");
        }
    }

    let token_state = |token: &Option<String>| if token.is_some() { "set" } else { "session" };
    println!();
    println!("Configuration summary:");
    println!(
        "  Source        : {} (token: {})",
        config.accounts.source.account,
        token_state(&config.accounts.source.token)
    );
    println!(
        "  Destination   : {} (token: {})",
        config.accounts.destination.account,
        token_state(&config.accounts.destination.token)
    );
    println!("  op binary     : {} (>= {})", config.op.binary, config.op.min_version);
    println!("  Concurrency   : {}", config.migration.concurrency);
    println!(
        "  Groups        : {}",
        if config.migration.migrate_groups {
            "replayed by name"
        } else {
            "skipped"
        }
    );
    println!(
        "  Mapping file  : {}",
        config
            .identity
            .mapping_file
            .as_ref()
            .map(|p| p.display().to_string())
            .unwrap_or_else(|| "none".to_string())
    );
    println!("  Output dir    : {}", config.output.dir.display());
    println!();
    println!("Configuration is valid.");

    Ok(())
}

async fn cmd_identity(config: &AppConfig, action: IdentityAction) -> Result<()> {
    match action {
        IdentityAction::Lookup { email } => {
            let mapper = IdentityMapper::load(&config.identity)
                .await
                .context("failed to load identity mapping")?;

            match mapper.lookup(&email) {
                Some(destination) => {
                    println!("{} -> {}", email, destination);
                    println!("{}", style::dim("(from mapping file)"));
                }
                None => {
                    println!("{} -> {}", email, mapper.resolve(&email));
                    println!("{}", style::dim("(not mapped, email kept)"));
                }
            }
            Ok(())
        }
    }
}

fn cmd_history(db: &Database, limit: u32, run: Option<&str>, audit: bool) -> Result<()> {
    if audit {
        let entries = db
            .list_audit_log(limit)
            .context("failed to read audit log")?;
        if entries.is_empty() {
            println!("No audit entries found.");
        } else {
            summary::print_audit(&entries);
        }
        return Ok(());
    }

    if let Some(run_id) = run {
        let outcomes = db
            .list_vault_outcomes(run_id)
            .context("failed to read run outcomes")?;
        if outcomes.is_empty() {
            println!("No outcomes recorded for run {}.", run_id);
        } else {
            println!("{}", style::header(&format!("Run {}", run_id)));
            summary::print_outcomes(&outcomes);
        }
        return Ok(());
    }

    let runs = db.list_runs(limit).context("failed to list runs")?;
    if runs.is_empty() {
        println!("No runs recorded yet.");
        return Ok(());
    }
    println!("{}", style::header("Migration History"));
    summary::print_runs(&runs);
    println!("{} run(s) shown", runs.len());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_migrate_flags() {
        let cli = Cli::parse_from(["vaultmigrate", "migrate", "--items", "--yes"]);
        match cli.command {
            Commands::Migrate {
                permissions,
                items,
                yes,
                ..
            } => {
                assert!(!permissions);
                assert!(items);
                assert!(yes);
            }
            other => panic!("unexpected command: {:?}", other),
        }
    }

    #[test]
    fn test_report_only_excludes_items() {
        let result = Cli::try_parse_from(["vaultmigrate", "migrate", "--permissions", "--items"]);
        assert!(result.is_err());
    }

    #[test]
    fn test_operator_access_requires_an_action() {
        assert!(Cli::try_parse_from(["vaultmigrate", "operator-access"]).is_err());
        assert!(
            Cli::try_parse_from(["vaultmigrate", "operator-access", "--grant", "--revoke"]).is_err()
        );
        let cli = Cli::parse_from(["vaultmigrate", "operator-access", "--revoke", "--group", "admins"]);
        match cli.command {
            Commands::OperatorAccess { grant, revoke, group, .. } => {
                assert!(!grant);
                assert!(revoke);
                assert_eq!(group.as_deref(), Some("admins"));
            }
            other => panic!("unexpected command: {:?}", other),
        }
    }

    #[test]
    fn test_init_writes_a_valid_template() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("vaultmigrate.toml");
        cmd_init(&path).unwrap();

        let config = AppConfig::load_from_file(&path).unwrap();
        config.validate().unwrap();
        assert!(cmd_init(&path).is_err());
    }
}
