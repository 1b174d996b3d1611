//! Point-in-time capture of a source vault's access list.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::OnceCell;
use tracing::{info, instrument, warn};

use crate::errors::RetrievalError;
use crate::models::{MigrationResult, Phase, Vault, VaultAclSnapshot};
use crate::op::OpClient;
use crate::results::ResultLog;

/// A snapshot plus whatever could not be retrieved for it.
#[derive(Debug)]
pub struct CapturedSnapshot {
    pub snapshot: VaultAclSnapshot,
    /// Non-empty when one of the two listings failed and the snapshot
    /// holds only the other half.
    pub errors: Vec<RetrievalError>,
}

impl CapturedSnapshot {
    pub fn is_complete(&self) -> bool {
        self.errors.is_empty()
    }
}

/// Reads user and group grants of source vaults.
#[derive(Debug, Clone)]
pub struct Snapshotter {
    source: OpClient,
}

impl Snapshotter {
    pub fn new(source: OpClient) -> Self {
        Self { source }
    }

    /// Capture the active grants of `vault`.
    ///
    /// Fails only when neither listing can be obtained; a single failed
    /// listing degrades the snapshot instead.
    #[instrument(skip(self, vault), fields(vault = %vault.name))]
    pub async fn capture(&self, vault: &Vault) -> Result<CapturedSnapshot, RetrievalError> {
        let (users, groups) = tokio::join!(
            self.source.list_vault_users(&vault.id),
            self.source.list_vault_groups(&vault.id),
        );

        let mut grants = Vec::new();
        let mut errors = Vec::new();

        match (users, groups) {
            (Err(users), Err(groups)) => {
                warn!(users = %users, groups = %groups, "both listings failed");
                return Err(RetrievalError::Listings {
                    vault: vault.name.clone(),
                    users,
                    groups,
                });
            }
            (users, groups) => {
                match users {
                    Ok(users) => grants.extend(users),
                    Err(source) => errors.push(RetrievalError::Users {
                        vault: vault.name.clone(),
                        source,
                    }),
                }
                match groups {
                    Ok(groups) => grants.extend(groups),
                    Err(source) => errors.push(RetrievalError::Groups {
                        vault: vault.name.clone(),
                        source,
                    }),
                }
            }
        }

        let snapshot = VaultAclSnapshot {
            source_vault_id: vault.id.clone(),
            source_vault_name: vault.name.clone(),
            item_count: vault.item_count,
            grants,
        };
        info!(
            users = snapshot.users().count(),
            groups = snapshot.groups().count(),
            partial = !errors.is_empty(),
            "captured vault snapshot"
        );

        Ok(CapturedSnapshot { snapshot, errors })
    }
}

/// Outcome stored per vault on the board.
pub type SnapshotOutcome = Result<CapturedSnapshot, RetrievalError>;

/// Once-per-vault snapshot cells shared by every pass of a run.
///
/// The first pass to ask for a vault captures it; later callers wait for
/// and reuse that capture. The outcome is recorded in the result log
/// exactly once, by whichever caller performed the capture.
#[derive(Debug)]
pub struct SnapshotBoard {
    snapshotter: Snapshotter,
    results: Arc<ResultLog>,
    cells: HashMap<String, OnceCell<SnapshotOutcome>>,
}

impl SnapshotBoard {
    /// A board with one empty cell per vault.
    pub fn new(snapshotter: Snapshotter, results: Arc<ResultLog>, vaults: &[Vault]) -> Self {
        Self {
            snapshotter,
            results,
            cells: vaults
                .iter()
                .map(|v| (v.id.clone(), OnceCell::new()))
                .collect(),
        }
    }

    /// The snapshot of `vault`, capturing it on first use.
    ///
    /// Returns `None` for a vault the board was not built with.
    pub async fn get(&self, vault: &Vault) -> Option<&SnapshotOutcome> {
        let cell = self.cells.get(&vault.id)?;
        let outcome = cell
            .get_or_init(|| async {
                let outcome = self.snapshotter.capture(vault).await;
                self.record(vault, &outcome);
                outcome
            })
            .await;
        Some(outcome)
    }

    fn record(&self, vault: &Vault, outcome: &SnapshotOutcome) {
        match outcome {
            Ok(captured) if captured.is_complete() => {
                self.results
                    .record(MigrationResult::success(&vault.name, Phase::Snapshot));
            }
            Ok(captured) => {
                for error in &captured.errors {
                    self.results
                        .record(MigrationResult::failure(&vault.name, Phase::Snapshot, error));
                }
            }
            Err(error) => {
                self.results
                    .record(MigrationResult::failure(&vault.name, Phase::Snapshot, error));
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::OpError;
    use crate::op::{OpGateway, OpOutput, OpRequest};
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Answers user listings with one active user and group listings with
    /// one group, unless told to fail them.
    struct Listings {
        users_fail: bool,
        groups_fail: bool,
        calls: AtomicUsize,
    }

    #[async_trait]
    impl OpGateway for Listings {
        async fn invoke(&self, request: OpRequest) -> Result<OpOutput, OpError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let listing = request.args.get(1).map(String::as_str);
            let fails = match listing {
                Some("user") => self.users_fail,
                Some("group") => self.groups_fail,
                _ => false,
            };
            if fails {
                return Ok(OpOutput {
                    exit_code: 1,
                    stdout: Vec::new(),
                    stderr: b"[ERROR] forbidden".to_vec(),
                });
            }
            let stdout = match listing {
                Some("user") => r#"[{"id":"U1","name":"Alice","email":"alice@old.co","state":"ACTIVE","permissions":["view_items"]}]"#,
                Some("group") => r#"[{"id":"G1","name":"Developers","state":"ACTIVE","permissions":["view_items"]}]"#,
                _ => "[]",
            };
            Ok(OpOutput {
                exit_code: 0,
                stdout: stdout.as_bytes().to_vec(),
                stderr: Vec::new(),
            })
        }
    }

    fn board(users_fail: bool, groups_fail: bool) -> (Arc<Listings>, Arc<ResultLog>, SnapshotBoard, Vault) {
        let gateway = Arc::new(Listings {
            users_fail,
            groups_fail,
            calls: AtomicUsize::new(0),
        });
        let results = Arc::new(ResultLog::new());
        let vault = Vault {
            id: "V1".into(),
            name: "Engineering".into(),
            item_count: 3,
        };
        let board = SnapshotBoard::new(
            Snapshotter::new(OpClient::new(gateway.clone(), "oldco")),
            results.clone(),
            std::slice::from_ref(&vault),
        );
        (gateway, results, board, vault)
    }

    #[tokio::test]
    async fn test_board_captures_each_vault_once() {
        let (gateway, results, board, vault) = board(false, false);

        let (first, second) = tokio::join!(board.get(&vault), board.get(&vault));
        let first = first.unwrap().as_ref().unwrap();
        let second = second.unwrap().as_ref().unwrap();

        assert!(first.is_complete());
        assert_eq!(first.snapshot.grants.len(), 2);
        assert_eq!(first.snapshot, second.snapshot);
        assert_eq!(gateway.calls.load(Ordering::SeqCst), 2);
        assert_eq!(results.len(), 1);
        assert!(results.snapshot()[0].succeeded);
    }

    #[tokio::test]
    async fn test_failed_group_listing_yields_partial_snapshot() {
        let (_, results, board, vault) = board(false, true);

        let captured = board.get(&vault).await.unwrap().as_ref().unwrap();
        assert!(!captured.is_complete());
        assert_eq!(captured.snapshot.users().count(), 1);
        assert_eq!(captured.snapshot.groups().count(), 0);
        assert!(matches!(captured.errors[0], RetrievalError::Groups { .. }));

        let recorded = results.snapshot();
        assert_eq!(recorded.len(), 1);
        assert!(!recorded[0].succeeded);
        assert_eq!(recorded[0].phase, Phase::Snapshot);
    }

    #[tokio::test]
    async fn test_both_listings_failing_keeps_both_causes() {
        let (_, results, board, vault) = board(true, true);

        let outcome = board.get(&vault).await.unwrap();
        let Err(RetrievalError::Listings { users, groups, .. }) = outcome else {
            panic!("expected both listing errors, got {:?}", outcome);
        };
        assert!(matches!(users, OpError::CommandFailed { .. }));
        assert!(matches!(groups, OpError::CommandFailed { .. }));

        let recorded = results.snapshot();
        assert_eq!(recorded.len(), 1);
        let detail = recorded[0].error_detail.as_deref().unwrap();
        assert!(detail.contains("users:"));
        assert!(detail.contains("groups:"));
    }

    #[tokio::test]
    async fn test_unknown_vault_is_not_captured() {
        let (gateway, _, board, _) = board(false, false);
        let other = Vault {
            id: "V9".into(),
            name: "Finance".into(),
            item_count: 0,
        };
        assert!(board.get(&other).await.is_none());
        assert_eq!(gateway.calls.load(Ordering::SeqCst), 0);
    }
}
