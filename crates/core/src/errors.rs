//! Error types for the vaultmigrate core library.
//!
//! Each subsystem has its own error type derived with `thiserror`, and a
//! top-level [`CoreError`] enum unifies them for callers that want a single
//! error type. Only configuration-class errors ([`ConfigError`],
//! [`IdentityError`]) stop a run; everything else is recorded per vault or
//! per principal and the run continues.

use thiserror::Error;

// ---------------------------------------------------------------------------
// Top-level error
// ---------------------------------------------------------------------------

/// Unified error type for the entire core library.
#[derive(Debug, Error)]
pub enum CoreError {
    #[error(transparent)]
    Op(#[from] OpError),

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Identity(#[from] IdentityError),

    #[error(transparent)]
    Retrieval(#[from] RetrievalError),

    #[error(transparent)]
    Provisioning(#[from] ProvisioningError),

    #[error(transparent)]
    Grant(#[from] GrantError),

    #[error(transparent)]
    SnapshotStore(#[from] SnapshotStoreError),

    #[error(transparent)]
    Report(#[from] ReportError),

    #[error(transparent)]
    Database(#[from] DatabaseError),
}

impl CoreError {
    /// `true` for errors that must abort a run before any mutation.
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::Config(_) | Self::Identity(_))
    }
}

// ---------------------------------------------------------------------------
// op CLI errors
// ---------------------------------------------------------------------------

/// Errors from invoking the `op` CLI.
#[derive(Debug, Error)]
pub enum OpError {
    /// The `op` binary was not found on `$PATH`.
    #[error("op binary not found: {0}")]
    BinaryNotFound(String),

    /// An `op` command exited with a non-zero status.
    #[error("op command failed (exit {exit_code}): {stderr}")]
    CommandFailed { exit_code: i32, stderr: String },

    /// Could not parse the JSON (or version string) produced by `op`.
    #[error("failed to parse op output: {0}")]
    ParseError(String),

    /// Generic I/O wrapper.
    #[error("op I/O error: {0}")]
    IoError(#[from] std::io::Error),
}

// ---------------------------------------------------------------------------
// Configuration errors
// ---------------------------------------------------------------------------

/// Errors from configuration loading, validation, and the startup prechecks.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Config file not found.
    #[error("configuration file not found: {0}")]
    FileNotFound(String),

    /// TOML parse error.
    #[error("configuration parse error: {0}")]
    ParseError(String),

    /// A required environment variable is not set.
    #[error("required environment variable '{var}' is not set (referenced by config field '{field}')")]
    EnvVarMissing { var: String, field: String },

    /// A config value is invalid.
    #[error("invalid configuration value for '{field}': {detail}")]
    InvalidValue { field: String, detail: String },

    /// The installed `op` CLI is older than the required floor.
    #[error("op CLI version {found} is below the required {required}")]
    UnsupportedCliVersion { found: String, required: String },

    /// The `op` CLI could not be run at all during the startup checks.
    #[error("op CLI precheck failed: {0}")]
    CliUnavailable(String),

    /// Generic I/O error reading the config file.
    #[error("configuration I/O error: {0}")]
    IoError(#[from] std::io::Error),
}

// ---------------------------------------------------------------------------
// Identity errors
// ---------------------------------------------------------------------------

/// Errors from loading the identity mapping table. All of them are fatal:
/// a partially loaded mapping is worse than an explicit abort.
#[derive(Debug, Error)]
pub enum IdentityError {
    /// The mapping file could not be loaded.
    #[error("identity mapping file error at '{path}': {detail}")]
    MappingFileError { path: String, detail: String },

    /// A row did not have exactly two columns.
    #[error("identity mapping line {line}: expected 2 columns, found {fields}")]
    MalformedRow { line: u64, fields: usize },

    /// The same source email was mapped to two different destinations.
    #[error("identity mapping line {line}: '{email}' is already mapped to '{existing}'")]
    DuplicateSource {
        line: u64,
        email: String,
        existing: String,
    },

    /// CSV decode error.
    #[error("identity mapping parse error: {0}")]
    ParseError(String),

    /// Generic I/O error.
    #[error("identity I/O error: {0}")]
    IoError(#[from] std::io::Error),
}

// ---------------------------------------------------------------------------
// Retrieval errors
// ---------------------------------------------------------------------------

/// A listing that the snapshot or pipeline needed could not be obtained.
#[derive(Debug, Error)]
pub enum RetrievalError {
    /// The vault list of an account could not be obtained.
    #[error("could not list vaults in account '{account}': {source}")]
    Vaults {
        account: String,
        #[source]
        source: OpError,
    },

    /// The user grants of a vault could not be obtained.
    #[error("could not list users of vault '{vault}': {source}")]
    Users {
        vault: String,
        #[source]
        source: OpError,
    },

    /// Neither listing of a vault could be obtained.
    #[error("could not list users or groups of vault '{vault}': users: {users}; groups: {groups}")]
    Listings {
        vault: String,
        #[source]
        users: OpError,
        groups: OpError,
    },

    /// The group grants of a vault could not be obtained.
    #[error("could not list groups of vault '{vault}': {source}")]
    Groups {
        vault: String,
        #[source]
        source: OpError,
    },

    /// The items of a vault could not be read.
    #[error("could not read items of vault '{vault}': {source}")]
    Items {
        vault: String,
        #[source]
        source: OpError,
    },
}

// ---------------------------------------------------------------------------
// Provisioning errors
// ---------------------------------------------------------------------------

/// Errors creating or locating a destination vault.
#[derive(Debug, Error)]
pub enum ProvisioningError {
    /// `op vault create` failed (name collisions included).
    #[error("could not create vault '{vault}': {source}")]
    CreateFailed {
        vault: String,
        #[source]
        source: OpError,
    },

    /// No destination vault carries the source vault's name.
    #[error("no destination vault named '{0}'")]
    DestinationMissing(String),
}

// ---------------------------------------------------------------------------
// Grant errors
// ---------------------------------------------------------------------------

/// Per-principal permission failures. Recorded and skipped.
#[derive(Debug, Error)]
pub enum GrantError {
    /// Granting permissions failed.
    #[error("grant to {principal} on vault '{vault}' failed: {source}")]
    Grant {
        vault: String,
        principal: String,
        #[source]
        source: OpError,
    },

    /// Revoking permissions failed.
    #[error("revoke from {principal} on vault '{vault}' failed: {source}")]
    Revoke {
        vault: String,
        principal: String,
        #[source]
        source: OpError,
    },

    /// The destination account has no group with the source group's name.
    #[error("group '{group}' does not exist in the destination account (vault '{vault}')")]
    GroupNotFound { vault: String, group: String },

    /// The destination group list could not be read.
    #[error("could not list destination groups: {0}")]
    GroupListUnavailable(String),
}

impl GrantError {
    /// The principal this error is about.
    pub fn principal(&self) -> &str {
        match self {
            Self::Grant { principal, .. } | Self::Revoke { principal, .. } => principal,
            Self::GroupNotFound { group, .. } => group,
            Self::GroupListUnavailable(_) => "",
        }
    }
}

// ---------------------------------------------------------------------------
// Snapshot store errors
// ---------------------------------------------------------------------------

/// Errors reading or writing the persisted snapshot document.
#[derive(Debug, Error)]
pub enum SnapshotStoreError {
    /// The document is not a vaultmigrate snapshot.
    #[error("not a snapshot document (format tag '{0}')")]
    WrongFormat(String),

    /// The document uses a schema version this build cannot read.
    #[error("unsupported snapshot version {found} (supported: {supported})")]
    UnsupportedVersion { found: u32, supported: u32 },

    /// The snapshot file does not exist.
    #[error("snapshot file not found: {0}")]
    NotFound(String),

    /// JSON encode/decode failure.
    #[error("snapshot JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Generic I/O error.
    #[error("snapshot I/O error: {0}")]
    IoError(#[from] std::io::Error),
}

// ---------------------------------------------------------------------------
// Report errors
// ---------------------------------------------------------------------------

/// Errors writing the CSV permissions report.
#[derive(Debug, Error)]
pub enum ReportError {
    /// CSV serialization error.
    #[error("report CSV error: {0}")]
    Csv(#[from] csv_async::Error),

    /// Generic I/O error.
    #[error("report I/O error: {0}")]
    IoError(#[from] std::io::Error),
}

// ---------------------------------------------------------------------------
// Database errors
// ---------------------------------------------------------------------------

/// Errors from the SQLite run ledger.
#[derive(Debug, Error)]
pub enum DatabaseError {
    /// Underlying rusqlite error.
    #[error("database error: {0}")]
    SqliteError(#[from] rusqlite::Error),

    /// A migration failed.
    #[error("database migration failed (version {version}): {detail}")]
    MigrationFailed { version: u32, detail: String },

    /// A record was not found.
    #[error("{entity} not found: {id}")]
    NotFound { entity: String, id: String },

    /// Generic I/O error (e.g. file permissions).
    #[error("database I/O error: {0}")]
    IoError(#[from] std::io::Error),
}
