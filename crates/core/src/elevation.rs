//! Transient operator elevation and item copy.
//!
//! Copying items needs full access to the source vault, which the operator
//! usually does not hold. The operator is elevated for the duration of the
//! copy and restored to the captured permissions afterwards, whether the
//! copy worked or not. Elevation and restoration form one unit: nothing
//! between them may return early.

use tracing::{debug, info, instrument, warn};

use crate::errors::{OpError, RetrievalError};
use crate::models::{MigrationResult, PermissionSet, Phase, Vault};
use crate::op::OpClient;

/// Principal label used for the operator's own result records.
pub const OPERATOR_LABEL: &str = "operator";

/// The signed-in operator in both accounts.
#[derive(Debug, Clone)]
pub struct Operator {
    pub source_user_id: String,
    pub destination_user_id: String,
}

/// Reads, elevates and restores the operator's access, and copies items.
#[derive(Debug, Clone)]
pub struct ItemMigrator {
    source: OpClient,
    destination: OpClient,
    operator: Operator,
}

impl ItemMigrator {
    pub fn new(source: OpClient, destination: OpClient, operator: Operator) -> Self {
        Self {
            source,
            destination,
            operator,
        }
    }

    /// The operator's current permissions on a source vault. No grant at
    /// all reads as the empty set.
    pub async fn operator_permissions(&self, vault: &Vault) -> Result<PermissionSet, RetrievalError> {
        let users = self
            .source
            .list_vault_users(&vault.id)
            .await
            .map_err(|source| RetrievalError::Users {
                vault: vault.name.clone(),
                source,
            })?;
        Ok(users
            .into_iter()
            .find(|g| g.id == self.operator.source_user_id)
            .map(|g| g.permissions)
            .unwrap_or_default())
    }

    /// Elevate, copy items, restore source access, then reset the
    /// operator's destination access to the same captured set.
    #[instrument(skip_all, fields(vault = %source_vault.name))]
    pub async fn migrate(&self, source_vault: &Vault, destination_vault: &Vault) -> Vec<MigrationResult> {
        let name = source_vault.name.as_str();
        let mut results = Vec::new();

        let original = match self.operator_permissions(source_vault).await {
            Ok(original) => original,
            Err(e) => {
                // Without the original set nothing could be restored, so the
                // vault is never elevated. The destination grant from vault
                // creation is dropped as in a run without items.
                results.push(
                    MigrationResult::failure(name, Phase::Elevate, &e).with_principal(OPERATOR_LABEL),
                );
                results.push(
                    self.reset_destination(destination_vault, &PermissionSet::new())
                        .await,
                );
                return results;
            }
        };
        debug!(original = %original, "captured operator permissions");

        let elevated = self
            .source
            .grant_user(&source_vault.id, &self.operator.source_user_id, &PermissionSet::full())
            .await;
        match &elevated {
            Ok(()) => {
                info!("operator elevated on source vault");
                results.push(MigrationResult::success(name, Phase::Elevate).with_principal(OPERATOR_LABEL));
            }
            Err(e) => {
                results.push(
                    MigrationResult::failure(name, Phase::Elevate, e).with_principal(OPERATOR_LABEL),
                );
            }
        }

        if elevated.is_ok() {
            results.push(match self.copy_items(source_vault, destination_vault).await {
                Ok(count) => {
                    info!(count, "copied items");
                    MigrationResult::success(name, Phase::CopyItems)
                }
                Err(e) => MigrationResult::failure(name, Phase::CopyItems, e),
            });
        }

        // Always, even after a failed elevation: a grant may have been
        // partially applied.
        results.push(
            self.set_permissions(&self.source, source_vault, &self.operator.source_user_id, &original)
                .await,
        );
        results.push(self.reset_destination(destination_vault, &original).await);
        results
    }

    /// Copy every item of `source_vault` into `destination_vault`.
    /// Returns the number of items listed in the source.
    pub async fn copy_items(&self, source_vault: &Vault, destination_vault: &Vault) -> Result<usize, RetrievalError> {
        let items_error = |source: OpError| RetrievalError::Items {
            vault: source_vault.name.clone(),
            source,
        };

        let (listing, count) = self
            .source
            .list_items(&source_vault.id)
            .await
            .map_err(items_error)?;
        if count == 0 {
            info!("vault has no items");
            return Ok(0);
        }

        let items = self.source.get_items(listing).await.map_err(items_error)?;
        self.destination
            .create_items(&destination_vault.id, items)
            .await
            .map_err(items_error)?;
        Ok(count)
    }

    /// Drop the operator's destination access. Used when items are not
    /// migrated.
    pub async fn revoke_destination(&self, destination_vault: &Vault) -> MigrationResult {
        self.reset_destination(destination_vault, &PermissionSet::new())
            .await
    }

    async fn reset_destination(&self, destination_vault: &Vault, desired: &PermissionSet) -> MigrationResult {
        self.set_permissions(
            &self.destination,
            destination_vault,
            &self.operator.destination_user_id,
            desired,
        )
        .await
    }

    /// Revoke everything, then grant `desired` unless it is empty.
    ///
    /// A failed revoke leaves whatever the operator held before, elevated
    /// access included, so it is reported as the restore failure and no
    /// grant follows.
    async fn set_permissions(
        &self,
        client: &OpClient,
        vault: &Vault,
        user_id: &str,
        desired: &PermissionSet,
    ) -> MigrationResult {
        let label = format!("{} ({})", OPERATOR_LABEL, client.account());
        if let Err(e) = client.revoke_user(&vault.id, user_id).await {
            warn!(vault = %vault.name, account = client.account(), error = %e, "revoking operator access failed");
            return MigrationResult::failure(&vault.name, Phase::Restore, e).with_principal(label);
        }
        if desired.is_empty() {
            debug!(vault = %vault.name, account = client.account(), "operator access revoked");
            return MigrationResult::success(&vault.name, Phase::Restore).with_principal(label);
        }
        match client.grant_user(&vault.id, user_id, desired).await {
            Ok(()) => MigrationResult::success(&vault.name, Phase::Restore).with_principal(label),
            Err(e) => MigrationResult::failure(&vault.name, Phase::Restore, e).with_principal(label),
        }
    }
}
