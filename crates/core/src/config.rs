//! TOML-based configuration system for vaultmigrate.
//!
//! Service account tokens are never stored in the file. Each account may
//! name a `token_env` environment variable instead; the value is resolved
//! at runtime via [`AppConfig::resolve_env_vars`].

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::errors::ConfigError;
use crate::op::parser::CliVersion;

// ---------------------------------------------------------------------------
// Top-level config
// ---------------------------------------------------------------------------

/// Top-level application configuration loaded from a TOML file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    /// The two accounts taking part in the migration.
    pub accounts: AccountsConfig,

    /// `op` CLI settings.
    #[serde(default)]
    pub op: OpConfig,

    /// Migration behaviour.
    #[serde(default)]
    pub migration: MigrationConfig,

    /// Identity mapping settings.
    #[serde(default)]
    pub identity: IdentityConfig,

    /// Additional vault exclusions on top of the built-in list.
    #[serde(default)]
    pub exclusions: ExclusionConfig,

    /// Output files and logging.
    #[serde(default)]
    pub output: OutputConfig,
}

// ---------------------------------------------------------------------------
// Accounts
// ---------------------------------------------------------------------------

/// Source and destination accounts.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AccountsConfig {
    pub source: AccountConfig,
    pub destination: AccountConfig,
}

/// One account as `op` addresses it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AccountConfig {
    /// Account shorthand, sign-in address, or account ID, passed to
    /// `op` as `--account=`.
    pub account: String,

    /// Environment variable holding a service account token for this
    /// account. When set, it is handed to `op` as `OP_SERVICE_ACCOUNT_TOKEN`.
    #[serde(default)]
    pub token_env: Option<String>,

    /// Resolved token (populated by `resolve_env_vars`).
    #[serde(skip)]
    pub token: Option<String>,
}

// ---------------------------------------------------------------------------
// op CLI
// ---------------------------------------------------------------------------

/// Settings for invoking the `op` binary.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OpConfig {
    /// Path or name of the `op` binary.
    #[serde(default = "default_binary")]
    pub binary: String,

    /// Lowest accepted `major.minor` CLI version.
    #[serde(default = "default_min_version")]
    pub min_version: String,
}

fn default_binary() -> String {
    "op".into()
}
fn default_min_version() -> String {
    "2.25".into()
}

impl Default for OpConfig {
    fn default() -> Self {
        Self {
            binary: default_binary(),
            min_version: default_min_version(),
        }
    }
}

// ---------------------------------------------------------------------------
// Migration behaviour
// ---------------------------------------------------------------------------

/// Migration behaviour configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MigrationConfig {
    /// Number of vault pipelines allowed to run at once (1..=3).
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,

    /// Replay group grants onto same-named destination groups.
    #[serde(default)]
    pub migrate_groups: bool,

    /// Group used by `operator-access` for blanket vault access.
    #[serde(default = "default_operator_group")]
    pub operator_group: String,
}

fn default_concurrency() -> usize {
    2
}
fn default_operator_group() -> String {
    "migration_admins".into()
}

impl Default for MigrationConfig {
    fn default() -> Self {
        Self {
            concurrency: default_concurrency(),
            migrate_groups: false,
            operator_group: default_operator_group(),
        }
    }
}

// ---------------------------------------------------------------------------
// Identity
// ---------------------------------------------------------------------------

/// Identity mapping configuration.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct IdentityConfig {
    /// Two-column CSV (`source email, destination email`) with a header row.
    #[serde(default)]
    pub mapping_file: Option<PathBuf>,
}

// ---------------------------------------------------------------------------
// Exclusions
// ---------------------------------------------------------------------------

/// Extra vault exclusions. The built-in personal/system list always applies.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct ExclusionConfig {
    /// Vault names excluded on exact match.
    #[serde(default)]
    pub exact: Vec<String>,

    /// Vault names excluded when they contain one of these substrings.
    #[serde(default)]
    pub contains: Vec<String>,
}

// ---------------------------------------------------------------------------
// Output
// ---------------------------------------------------------------------------

/// Output file locations and logging.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutputConfig {
    /// Directory all output files are written to.
    #[serde(default = "default_output_dir")]
    pub dir: PathBuf,

    /// Permissions report file name.
    #[serde(default = "default_report_file")]
    pub report_file: String,

    /// Persisted snapshot file name.
    #[serde(default = "default_snapshot_file")]
    pub snapshot_file: String,

    /// SQLite run ledger file name.
    #[serde(default = "default_ledger_file")]
    pub ledger_file: String,

    /// Log file name.
    #[serde(default = "default_log_file")]
    pub log_file: String,

    /// Minimum tracing level: trace, debug, info, warn, error.
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

fn default_output_dir() -> PathBuf {
    PathBuf::from(".")
}
fn default_report_file() -> String {
    "vault_permissions_report.csv".into()
}
fn default_snapshot_file() -> String {
    "vault_permissions.json".into()
}
fn default_ledger_file() -> String {
    "vaultmigrate.db".into()
}
fn default_log_file() -> String {
    "vaultmigrate.log".into()
}
fn default_log_level() -> String {
    "info".into()
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            dir: default_output_dir(),
            report_file: default_report_file(),
            snapshot_file: default_snapshot_file(),
            ledger_file: default_ledger_file(),
            log_file: default_log_file(),
            log_level: default_log_level(),
        }
    }
}

impl OutputConfig {
    pub fn report_path(&self) -> PathBuf {
        self.dir.join(&self.report_file)
    }

    pub fn snapshot_path(&self) -> PathBuf {
        self.dir.join(&self.snapshot_file)
    }

    pub fn ledger_path(&self) -> PathBuf {
        self.dir.join(&self.ledger_file)
    }

    pub fn log_path(&self) -> PathBuf {
        self.dir.join(&self.log_file)
    }
}

// ---------------------------------------------------------------------------
// Loading & resolving
// ---------------------------------------------------------------------------

impl AppConfig {
    /// Load an [`AppConfig`] from a TOML file at the given path.
    ///
    /// This does **not** resolve environment variables -- call
    /// [`resolve_env_vars`](Self::resolve_env_vars) afterwards.
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        info!(path = %path.display(), "loading configuration");

        if !path.exists() {
            return Err(ConfigError::FileNotFound(path.display().to_string()));
        }

        let contents = std::fs::read_to_string(path)?;
        let config: AppConfig =
            toml::from_str(&contents).map_err(|e| ConfigError::ParseError(e.to_string()))?;

        debug!("configuration parsed successfully");
        Ok(config)
    }

    /// Resolve the `token_env` references of both accounts.
    ///
    /// A variable that is named but unset is an error: running against the
    /// wrong session is worse than not running.
    pub fn resolve_env_vars(&mut self) -> Result<(), ConfigError> {
        info!("resolving environment variable references in config");

        self.accounts.source.token =
            resolve_token(&self.accounts.source, "accounts.source.token_env")?;
        self.accounts.destination.token =
            resolve_token(&self.accounts.destination, "accounts.destination.token_env")?;

        debug!("environment variable resolution complete");
        Ok(())
    }

    /// Validate that all required fields are present and sane.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.accounts.source.account.trim().is_empty() {
            return Err(ConfigError::InvalidValue {
                field: "accounts.source.account".into(),
                detail: "source account must not be empty".into(),
            });
        }
        if self.accounts.destination.account.trim().is_empty() {
            return Err(ConfigError::InvalidValue {
                field: "accounts.destination.account".into(),
                detail: "destination account must not be empty".into(),
            });
        }
        if self.accounts.source.account == self.accounts.destination.account {
            return Err(ConfigError::InvalidValue {
                field: "accounts.destination.account".into(),
                detail: "source and destination must be different accounts".into(),
            });
        }
        if !(1..=3).contains(&self.migration.concurrency) {
            return Err(ConfigError::InvalidValue {
                field: "migration.concurrency".into(),
                detail: "concurrency must be between 1 and 3".into(),
            });
        }
        if self.migration.operator_group.trim().is_empty() {
            return Err(ConfigError::InvalidValue {
                field: "migration.operator_group".into(),
                detail: "operator group must not be empty".into(),
            });
        }
        if self.op.binary.trim().is_empty() {
            return Err(ConfigError::InvalidValue {
                field: "op.binary".into(),
                detail: "op binary must not be empty".into(),
            });
        }
        self.min_cli_version()?;

        Ok(())
    }

    /// The configured version floor, parsed.
    pub fn min_cli_version(&self) -> Result<CliVersion, ConfigError> {
        CliVersion::parse(&self.op.min_version).map_err(|e| ConfigError::InvalidValue {
            field: "op.min_version".into(),
            detail: e.to_string(),
        })
    }

    /// Convenience: load, resolve, and validate in one call.
    pub fn load_and_resolve<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let mut config = Self::load_from_file(path)?;
        config.resolve_env_vars()?;
        config.validate()?;
        Ok(config)
    }

    /// A commented starter configuration, written by `vaultmigrate init`.
    pub fn template() -> &'static str {
        TEMPLATE
    }
}

fn resolve_token(account: &AccountConfig, field: &str) -> Result<Option<String>, ConfigError> {
    let Some(env_name) = account.token_env.as_deref() else {
        return Ok(None);
    };
    match std::env::var(env_name) {
        Ok(val) if !val.is_empty() => {
            debug!(field, env_name, "resolved env var");
            Ok(Some(val))
        }
        Ok(_) => {
            warn!(field, env_name, "env var is set but empty");
            Err(ConfigError::EnvVarMissing {
                var: env_name.to_string(),
                field: field.to_string(),
            })
        }
        Err(_) => Err(ConfigError::EnvVarMissing {
            var: env_name.to_string(),
            field: field.to_string(),
        }),
    }
}

const TEMPLATE: &str = r#"# vaultmigrate configuration

[accounts.source]
# Account shorthand, sign-in address, or ID as accepted by `op --account`.
account = "oldco.1password.com"
# Optional: environment variable holding a service account token.
# token_env = "SVC_SOURCE"

[accounts.destination]
account = "newco.1password.com"
# token_env = "SVC_DESTINATION"

[op]
binary = "op"
min_version = "2.25"

[migration]
concurrency = 2
migrate_groups = false
operator_group = "migration_admins"

[identity]
# Two columns: source email, destination email. The first row is a header.
# mapping_file = "emailmap.csv"

[exclusions]
# Added to the built-in personal/system vault list.
exact = []
contains = []

[output]
dir = "."
report_file = "vault_permissions_report.csv"
snapshot_file = "vault_permissions.json"
ledger_file = "vaultmigrate.db"
log_file = "vaultmigrate.log"
log_level = "info"
"#;

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn sample_toml() -> &'static str {
        r#"
[accounts.source]
account = "oldco.1password.com"
token_env = "SVC_SOURCE"

[accounts.destination]
account = "newco.1password.com"

[op]
binary = "/usr/local/bin/op"
min_version = "2.26"

[migration]
concurrency = 3
migrate_groups = true
operator_group = "vault_movers"

[identity]
mapping_file = "/etc/vaultmigrate/emailmap.csv"

[exclusions]
exact = ["Scratch"]
contains = ["[archived]"]

[output]
dir = "/tmp/vaultmigrate"
log_level = "debug"
"#
    }

    #[test]
    fn test_parse_full_config() {
        let config: AppConfig = toml::from_str(sample_toml()).expect("failed to parse toml");
        assert_eq!(config.accounts.source.account, "oldco.1password.com");
        assert_eq!(config.accounts.source.token_env.as_deref(), Some("SVC_SOURCE"));
        assert_eq!(config.op.binary, "/usr/local/bin/op");
        assert_eq!(config.migration.concurrency, 3);
        assert!(config.migration.migrate_groups);
        assert_eq!(config.exclusions.exact, vec!["Scratch"]);
        assert_eq!(
            config.output.report_path(),
            PathBuf::from("/tmp/vaultmigrate/vault_permissions_report.csv")
        );
    }

    #[test]
    fn test_load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("vaultmigrate.toml");
        let mut f = std::fs::File::create(&path).unwrap();
        f.write_all(sample_toml().as_bytes()).unwrap();

        let config = AppConfig::load_from_file(&path).expect("load_from_file failed");
        assert_eq!(config.output.log_level, "debug");
    }

    #[test]
    fn test_file_not_found() {
        let result = AppConfig::load_from_file("/nonexistent/vaultmigrate.toml");
        assert!(matches!(result, Err(ConfigError::FileNotFound(_))));
    }

    #[test]
    fn test_defaults() {
        let minimal = r#"
[accounts.source]
account = "old"
[accounts.destination]
account = "new"
"#;
        let config: AppConfig = toml::from_str(minimal).unwrap();
        assert_eq!(config.op.binary, "op");
        assert_eq!(config.op.min_version, "2.25");
        assert_eq!(config.migration.concurrency, 2);
        assert!(!config.migration.migrate_groups);
        assert_eq!(config.migration.operator_group, "migration_admins");
        assert_eq!(config.output.snapshot_file, "vault_permissions.json");
        assert!(config.identity.mapping_file.is_none());
        config.validate().unwrap();
    }

    #[test]
    fn test_validate_rejects_same_account() {
        let mut config: AppConfig = toml::from_str(sample_toml()).unwrap();
        config.accounts.destination.account = config.accounts.source.account.clone();
        let result = config.validate();
        assert!(matches!(
            result,
            Err(ConfigError::InvalidValue { ref field, .. }) if field == "accounts.destination.account"
        ));
    }

    #[test]
    fn test_validate_rejects_concurrency_out_of_range() {
        let mut config: AppConfig = toml::from_str(sample_toml()).unwrap();
        config.migration.concurrency = 8;
        let result = config.validate();
        assert!(matches!(
            result,
            Err(ConfigError::InvalidValue { ref field, .. }) if field == "migration.concurrency"
        ));
    }

    #[test]
    fn test_validate_rejects_bad_version_floor() {
        let mut config: AppConfig = toml::from_str(sample_toml()).unwrap();
        config.op.min_version = "two".into();
        let result = config.validate();
        assert!(matches!(
            result,
            Err(ConfigError::InvalidValue { ref field, .. }) if field == "op.min_version"
        ));
    }

    #[test]
    fn test_resolve_env_vars() {
        std::env::set_var("VAULTMIGRATE_TEST_SRC_TOKEN", "ops_abc");

        let toml_str = r#"
[accounts.source]
account = "old"
token_env = "VAULTMIGRATE_TEST_SRC_TOKEN"
[accounts.destination]
account = "new"
"#;
        let mut config: AppConfig = toml::from_str(toml_str).unwrap();
        config.resolve_env_vars().unwrap();

        assert_eq!(config.accounts.source.token.as_deref(), Some("ops_abc"));
        assert!(config.accounts.destination.token.is_none());

        std::env::remove_var("VAULTMIGRATE_TEST_SRC_TOKEN");
    }

    #[test]
    fn test_resolve_env_vars_missing_is_error() {
        let toml_str = r#"
[accounts.source]
account = "old"
[accounts.destination]
account = "new"
token_env = "VAULTMIGRATE_TEST_UNSET_TOKEN"
"#;
        let mut config: AppConfig = toml::from_str(toml_str).unwrap();
        let result = config.resolve_env_vars();
        assert!(matches!(
            result,
            Err(ConfigError::EnvVarMissing { ref var, .. }) if var == "VAULTMIGRATE_TEST_UNSET_TOKEN"
        ));
    }

    #[test]
    fn test_load_and_resolve_minimal_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("vaultmigrate.toml");
        std::fs::write(
            &path,
            "[accounts.source]\naccount = \"old\"\n[accounts.destination]\naccount = \"new\"\n\n[output]\ndir = \"/tmp/vm-out\"\n",
        )
        .unwrap();

        let config = AppConfig::load_and_resolve(&path).expect("load_and_resolve failed");
        assert!(config.accounts.source.token.is_none());
        assert_eq!(
            config.output.log_path(),
            PathBuf::from("/tmp/vm-out").join(&config.output.log_file)
        );
    }

    #[test]
    fn test_load_and_resolve_rejects_invalid_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("vaultmigrate.toml");
        std::fs::write(
            &path,
            "[accounts.source]\naccount = \"same\"\n[accounts.destination]\naccount = \"same\"\n",
        )
        .unwrap();
        assert!(AppConfig::load_and_resolve(&path).is_err());
    }

    #[test]
    fn test_template_parses_and_validates() {
        let config: AppConfig = toml::from_str(AppConfig::template()).unwrap();
        config.validate().unwrap();
    }
}
