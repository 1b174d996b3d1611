//! Blanket access toggle for the operator group.
//!
//! Before item migration an administrator can give a dedicated group (by
//! default `migration_admins`) full permissions on every shared vault in
//! both accounts, and take them away again afterwards. Personal and system
//! vaults are left alone.

use std::fmt;
use std::sync::Arc;

use tracing::{info, instrument, warn};

use crate::models::{MigrationResult, PermissionSet, Phase, Vault};
use crate::op::OpClient;
use crate::policy::ExclusionPolicy;
use crate::results::ResultLog;

/// Whether to add or remove the group's access.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AccessAction {
    Grant,
    Revoke,
}

impl fmt::Display for AccessAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Grant => write!(f, "grant"),
            Self::Revoke => write!(f, "revoke"),
        }
    }
}

/// Counters of one toggle run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AccessCounts {
    pub vaults_seen: usize,
    pub vaults_excluded: usize,
    pub changed: usize,
    pub failed: usize,
}

impl std::ops::AddAssign for AccessCounts {
    fn add_assign(&mut self, other: Self) {
        self.vaults_seen += other.vaults_seen;
        self.vaults_excluded += other.vaults_excluded;
        self.changed += other.changed;
        self.failed += other.failed;
    }
}

/// Grants or revokes the operator group's full access in both accounts.
#[derive(Debug)]
pub struct OperatorAccessToggle {
    source: OpClient,
    destination: OpClient,
    group: String,
    policy: Arc<ExclusionPolicy>,
    results: Arc<ResultLog>,
}

impl OperatorAccessToggle {
    pub fn new(
        source: OpClient,
        destination: OpClient,
        group: impl Into<String>,
        policy: Arc<ExclusionPolicy>,
        results: Arc<ResultLog>,
    ) -> Self {
        Self {
            source,
            destination,
            group: group.into(),
            policy,
            results,
        }
    }

    /// Apply `action` in both accounts concurrently.
    pub async fn run(&self, action: AccessAction) -> AccessCounts {
        info!(group = %self.group, %action, "toggling operator group access");
        let (source, destination) = tokio::join!(
            self.process_account(&self.source, action),
            self.process_account(&self.destination, action),
        );
        let mut counts = source;
        counts += destination;
        info!(
            changed = counts.changed,
            failed = counts.failed,
            excluded = counts.vaults_excluded,
            "operator group access updated"
        );
        counts
    }

    #[instrument(skip(self, client), fields(account = client.account()))]
    async fn process_account(&self, client: &OpClient, action: AccessAction) -> AccessCounts {
        let mut counts = AccessCounts::default();
        let label = format!("group {} ({})", self.group, client.account());

        let vaults = match client.list_vaults().await {
            Ok(vaults) => vaults,
            Err(e) => {
                warn!(error = %e, "could not list vaults");
                self.results.record(
                    MigrationResult::failure(
                        &format!("[{}]", client.account()),
                        Phase::OperatorAccess,
                        e,
                    )
                    .with_principal(label),
                );
                counts.failed += 1;
                return counts;
            }
        };

        let full = PermissionSet::full();
        for vault in &vaults {
            counts.vaults_seen += 1;
            if self.policy.is_excluded(&vault.name) {
                counts.vaults_excluded += 1;
                continue;
            }

            match self.apply(client, vault, action, &full).await {
                Ok(()) => {
                    counts.changed += 1;
                    self.results.record(
                        MigrationResult::success(&vault.name, Phase::OperatorAccess)
                            .with_principal(label.clone()),
                    );
                }
                Err(e) => {
                    counts.failed += 1;
                    self.results.record(
                        MigrationResult::failure(&vault.name, Phase::OperatorAccess, e)
                            .with_principal(label.clone()),
                    );
                }
            }
        }
        counts
    }

    async fn apply(
        &self,
        client: &OpClient,
        vault: &Vault,
        action: AccessAction,
        full: &PermissionSet,
    ) -> Result<(), crate::errors::OpError> {
        match action {
            AccessAction::Grant => client.grant_group(&vault.id, &self.group, full).await,
            AccessAction::Revoke => client.revoke_group(&vault.id, &self.group, Some(full)).await,
        }
    }
}
