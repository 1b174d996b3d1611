//! Destination vault creation.

use tracing::{info, instrument};

use crate::errors::ProvisioningError;
use crate::models::Vault;
use crate::op::OpClient;

/// Creates destination vaults named after their source vaults.
///
/// No renaming and no dedup: if the destination already holds a vault with
/// that name, `op` decides, and a refusal surfaces as
/// [`ProvisioningError::CreateFailed`].
#[derive(Debug, Clone)]
pub struct VaultProvisioner {
    destination: OpClient,
}

impl VaultProvisioner {
    pub fn new(destination: OpClient) -> Self {
        Self { destination }
    }

    #[instrument(skip(self, source), fields(vault = %source.name))]
    pub async fn create_from(&self, source: &Vault) -> Result<Vault, ProvisioningError> {
        let created = self
            .destination
            .create_vault(&source.name)
            .await
            .map_err(|e| ProvisioningError::CreateFailed {
                vault: source.name.clone(),
                source: e,
            })?;
        info!(source_id = %source.id, destination_id = %created.id, "destination vault created");
        Ok(created)
    }

    /// Find the destination vault carrying `name` in a listing.
    pub fn match_by_name<'a>(
        destination_vaults: &'a [Vault],
        name: &str,
    ) -> Result<&'a Vault, ProvisioningError> {
        destination_vaults
            .iter()
            .find(|v| v.name == name)
            .ok_or_else(|| ProvisioningError::DestinationMissing(name.to_string()))
    }
}
