//! Access to the 1Password `op` CLI.
//!
//! [`gateway`] is the only place a process is spawned, [`client`] builds
//! typed commands for one account on top of it, and [`parser`] decodes
//! what `op` prints.

pub mod client;
pub mod gateway;
pub mod parser;

pub use client::OpClient;
pub use gateway::{OpGateway, OpOutput, OpRequest, ProcessGateway};
pub use parser::CliVersion;

use tracing::info;

use crate::errors::{ConfigError, OpError};

/// Check that the installed CLI meets the version floor.
///
/// A missing binary and a too-old CLI are both configuration errors: no
/// run may start against them.
pub async fn check_cli_version(client: &OpClient, floor: &CliVersion) -> Result<CliVersion, ConfigError> {
    let found = client.version().await.map_err(|e| match e {
        OpError::BinaryNotFound(binary) => {
            ConfigError::CliUnavailable(format!("'{}' not found on PATH", binary))
        }
        other => ConfigError::CliUnavailable(other.to_string()),
    })?;

    if !found.satisfies(floor) {
        return Err(ConfigError::UnsupportedCliVersion {
            found: found.to_string(),
            required: floor.to_string(),
        });
    }

    info!(version = %found, "op CLI version accepted");
    Ok(found)
}
