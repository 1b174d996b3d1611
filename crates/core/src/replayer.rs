//! Permission replay onto destination vaults.
//!
//! Every principal is first stripped of all access on the destination
//! vault and then granted exactly its captured set. A principal whose
//! captured set is empty therefore ends with no access at all, whatever
//! vault creation granted by default.

use std::collections::HashSet;
use std::sync::Arc;

use tokio::sync::OnceCell;
use tracing::{debug, info, instrument, warn};

use crate::errors::{GrantError, OpError};
use crate::identity::IdentityMapper;
use crate::models::{MigrationResult, Phase, PrincipalGrant, Vault, VaultAclSnapshot};
use crate::op::OpClient;

/// Built-in group that exists in every account and is never replayed.
pub const OWNERS_GROUP: &str = "Owners";

/// What to do with group grants.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum GroupPolicy {
    /// Replay user grants only.
    #[default]
    Skip,
    /// Replay group grants onto destination groups of the identical name.
    MatchByName,
}

impl GroupPolicy {
    pub fn from_flag(migrate_groups: bool) -> Self {
        if migrate_groups {
            Self::MatchByName
        } else {
            Self::Skip
        }
    }
}

/// Per-vault result of a replay.
#[derive(Debug, Default)]
pub struct ReplayOutcome {
    pub vault_name: String,
    /// Labels of principals whose grant was applied.
    pub applied: Vec<String>,
    /// Labels of principals deliberately not replayed.
    pub skipped: Vec<String>,
    pub errors: Vec<GrantError>,
}

impl ReplayOutcome {
    pub fn is_clean(&self) -> bool {
        self.errors.is_empty()
    }

    /// Record one principal. It counts as applied only when its revoke and
    /// its grant both went through; a failed revoke may leave access the
    /// captured set does not contain.
    fn settle(
        &mut self,
        destination: &Vault,
        label: String,
        revoked: Result<(), OpError>,
        granted: Result<(), OpError>,
    ) {
        let revoke_failed = revoked.is_err();
        if let Err(source) = revoked {
            self.errors.push(GrantError::Revoke {
                vault: destination.name.clone(),
                principal: label.clone(),
                source,
            });
        }
        match granted {
            Ok(()) if !revoke_failed => self.applied.push(label),
            Ok(()) => {}
            Err(source) => self.errors.push(GrantError::Grant {
                vault: destination.name.clone(),
                principal: label,
                source,
            }),
        }
    }

    /// One result per applied principal and per error.
    pub fn to_results(&self) -> Vec<MigrationResult> {
        let mut results: Vec<MigrationResult> = self
            .applied
            .iter()
            .map(|label| {
                MigrationResult::success(&self.vault_name, Phase::Replay).with_principal(label.clone())
            })
            .collect();
        for error in &self.errors {
            let result = MigrationResult::failure(&self.vault_name, Phase::Replay, error);
            results.push(match error.principal() {
                "" => result,
                principal => result.with_principal(principal),
            });
        }
        results
    }
}

/// Applies captured grants to destination vaults.
///
/// One replayer serves a whole run; the destination group list is read at
/// most once and cached.
pub struct Replayer {
    destination: OpClient,
    mapper: Arc<IdentityMapper>,
    group_policy: GroupPolicy,
    group_names: OnceCell<Result<HashSet<String>, String>>,
}

impl std::fmt::Debug for Replayer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Replayer")
            .field("destination", &self.destination)
            .field("group_policy", &self.group_policy)
            .finish_non_exhaustive()
    }
}

impl Replayer {
    pub fn new(destination: OpClient, mapper: Arc<IdentityMapper>, group_policy: GroupPolicy) -> Self {
        Self {
            destination,
            mapper,
            group_policy,
            group_names: OnceCell::new(),
        }
    }

    /// Replay `snapshot` onto `destination`, one principal at a time.
    #[instrument(skip(self, destination, snapshot), fields(vault = %destination.name))]
    pub async fn apply(&self, destination: &Vault, snapshot: &VaultAclSnapshot) -> ReplayOutcome {
        let mut outcome = ReplayOutcome {
            vault_name: destination.name.clone(),
            ..Default::default()
        };

        for grant in snapshot.users() {
            self.apply_user(destination, grant, &mut outcome).await;
        }

        let groups: Vec<&PrincipalGrant> = snapshot.groups().collect();
        if !groups.is_empty() {
            match self.group_policy {
                GroupPolicy::Skip => {
                    debug!(count = groups.len(), "group replay disabled");
                    outcome
                        .skipped
                        .extend(groups.iter().map(|g| g.label()));
                }
                GroupPolicy::MatchByName => {
                    self.apply_groups(destination, &groups, &mut outcome).await;
                }
            }
        }

        info!(
            applied = outcome.applied.len(),
            skipped = outcome.skipped.len(),
            errors = outcome.errors.len(),
            "replay finished"
        );
        outcome
    }

    async fn apply_user(&self, destination: &Vault, grant: &PrincipalGrant, outcome: &mut ReplayOutcome) {
        let Some(source_email) = grant.email.as_deref().filter(|e| !e.is_empty()) else {
            warn!(user_id = %grant.id, "user grant without an email cannot be mapped");
            outcome.skipped.push(grant.label());
            return;
        };
        let email = self.mapper.resolve(source_email);
        let label = format!("user {}", email);

        let revoked = self.destination.revoke_user(&destination.id, &email).await;

        if grant.permissions.is_empty() {
            debug!(user = %email, "empty permission set, access stays revoked");
            outcome.settle(destination, label, revoked, Ok(()));
            return;
        }

        let granted = self
            .destination
            .grant_user(&destination.id, &email, &grant.permissions)
            .await;
        outcome.settle(destination, label, revoked, granted);
    }

    async fn apply_groups(
        &self,
        destination: &Vault,
        groups: &[&PrincipalGrant],
        outcome: &mut ReplayOutcome,
    ) {
        let known = match self.destination_groups().await {
            Ok(known) => known,
            Err(detail) => {
                outcome
                    .errors
                    .push(GrantError::GroupListUnavailable(detail.clone()));
                outcome.skipped.extend(groups.iter().map(|g| g.label()));
                return;
            }
        };

        for grant in groups {
            let name = grant.display_name.as_str();
            if name == OWNERS_GROUP {
                debug!("built-in Owners group is not replayed");
                outcome.skipped.push(grant.label());
                continue;
            }
            if !known.contains(name) {
                outcome.errors.push(GrantError::GroupNotFound {
                    vault: destination.name.clone(),
                    group: name.to_string(),
                });
                continue;
            }

            let label = grant.label();
            let revoked = self.destination.revoke_group(&destination.id, name, None).await;

            if grant.permissions.is_empty() {
                outcome.settle(destination, label, revoked, Ok(()));
                continue;
            }

            let granted = self
                .destination
                .grant_group(&destination.id, name, &grant.permissions)
                .await;
            outcome.settle(destination, label, revoked, granted);
        }
    }

    async fn destination_groups(&self) -> &Result<HashSet<String>, String> {
        self.group_names
            .get_or_init(|| async {
                match self.destination.list_groups().await {
                    Ok(groups) => {
                        debug!(count = groups.len(), "cached destination group names");
                        Ok(groups.into_iter().map(|g| g.name).collect())
                    }
                    Err(e) => {
                        warn!(error = %e, "could not list destination groups");
                        Err(e.to_string())
                    }
                }
            })
            .await
    }
}
