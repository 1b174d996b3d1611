//! vaultmigrate core library.
//!
//! This crate provides the building blocks for moving shared 1Password
//! vaults between accounts: configuration, the `op` CLI client, ACL
//! snapshot capture and persistence, identity mapping, vault provisioning,
//! permission replay, item migration, the CSV report, and the run ledger.

pub mod config;
pub mod db;
pub mod elevation;
pub mod errors;
pub mod identity;
pub mod models;
pub mod op;
pub mod operator_access;
pub mod orchestrator;
pub mod policy;
pub mod provisioner;
pub mod replayer;
pub mod report;
pub mod results;
pub mod snapshot;

// Re-exports for convenience.
pub use config::AppConfig;
pub use db::Database;
pub use errors::CoreError;
pub use identity::IdentityMapper;
pub use orchestrator::{MigrationContext, MigrationOptions, MigrationOrchestrator};
pub use policy::ExclusionPolicy;
pub use results::{ResultLog, RunSummary};
