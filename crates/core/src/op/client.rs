//! Typed `op` commands scoped to one account.

use std::sync::Arc;

use tracing::{debug, info, instrument};

use super::gateway::{OpGateway, OpRequest};
use super::parser::{
    parse_json, parse_vault_groups, parse_vault_list, parse_vault_users, CliVersion,
    GroupPayload, VaultPayload, WhoAmI,
};
use crate::config::AccountConfig;
use crate::errors::OpError;
use crate::models::{PermissionSet, PrincipalGrant, Vault};

/// Client for one account. Cheap to clone; all clones share the gateway.
#[derive(Clone)]
pub struct OpClient {
    gateway: Arc<dyn OpGateway>,
    account: String,
    token: Option<String>,
}

impl std::fmt::Debug for OpClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OpClient")
            .field("account", &self.account)
            .finish_non_exhaustive()
    }
}

impl OpClient {
    /// Create a client addressing `account` through `gateway`.
    pub fn new(gateway: Arc<dyn OpGateway>, account: impl Into<String>) -> Self {
        let client = Self {
            gateway,
            account: account.into(),
            token: None,
        };
        info!(account = %client.account, "created OpClient");
        client
    }

    /// Create a client from an account config section (with its resolved token).
    pub fn from_config(gateway: Arc<dyn OpGateway>, config: &AccountConfig) -> Self {
        let mut client = Self::new(gateway, config.account.clone());
        client.token = config.token.clone();
        client
    }

    pub fn account(&self) -> &str {
        &self.account
    }

    // -- account-independent ------------------------------------------------

    /// `op --version`.
    pub async fn version(&self) -> Result<CliVersion, OpError> {
        let stdout = self.run(vec!["--version".into()], None).await?;
        CliVersion::parse(&String::from_utf8_lossy(&stdout))
    }

    // -- identity -----------------------------------------------------------

    /// `op whoami`: the signed-in user of this account.
    #[instrument(skip(self), fields(account = %self.account))]
    pub async fn whoami(&self) -> Result<WhoAmI, OpError> {
        let stdout = self
            .run(vec!["whoami".into(), self.account_arg(), json_arg()], None)
            .await?;
        parse_json(&stdout)
    }

    // -- vaults -------------------------------------------------------------

    /// Vaults the signed-in user can manage.
    #[instrument(skip(self), fields(account = %self.account))]
    pub async fn list_vaults(&self) -> Result<Vec<Vault>, OpError> {
        let stdout = self
            .run(
                vec![
                    "vault".into(),
                    "list".into(),
                    "--permission=manage_vault".into(),
                    self.account_arg(),
                    json_arg(),
                ],
                None,
            )
            .await?;
        let vaults = parse_vault_list(&stdout)?;
        debug!(count = vaults.len(), "listed vaults");
        Ok(vaults)
    }

    /// Create a vault named `name`.
    #[instrument(skip(self), fields(account = %self.account))]
    pub async fn create_vault(&self, name: &str) -> Result<Vault, OpError> {
        let stdout = self
            .run(
                vec![
                    "vault".into(),
                    "create".into(),
                    name.to_string(),
                    self.account_arg(),
                    json_arg(),
                ],
                None,
            )
            .await?;
        let payload: VaultPayload = parse_json(&stdout)?;
        info!(name = %payload.name, id = %payload.id, "created vault");
        Ok(payload.into())
    }

    // -- vault users --------------------------------------------------------

    /// Active users of a vault with their permissions.
    #[instrument(skip(self), fields(account = %self.account))]
    pub async fn list_vault_users(&self, vault_id: &str) -> Result<Vec<PrincipalGrant>, OpError> {
        let stdout = self
            .run(
                vec![
                    "vault".into(),
                    "user".into(),
                    "list".into(),
                    vault_id.to_string(),
                    self.account_arg(),
                    json_arg(),
                ],
                None,
            )
            .await?;
        parse_vault_users(&stdout)
    }

    /// Grant `permissions` to `user` (email or ID) on a vault.
    #[instrument(skip(self, permissions), fields(account = %self.account, permissions = %permissions))]
    pub async fn grant_user(
        &self,
        vault_id: &str,
        user: &str,
        permissions: &PermissionSet,
    ) -> Result<(), OpError> {
        self.permission_command("user", "grant", vault_id, user, Some(permissions))
            .await
    }

    /// Revoke every permission of `user` on a vault.
    #[instrument(skip(self), fields(account = %self.account))]
    pub async fn revoke_user(&self, vault_id: &str, user: &str) -> Result<(), OpError> {
        self.permission_command("user", "revoke", vault_id, user, None)
            .await
    }

    // -- vault groups -------------------------------------------------------

    /// Active groups of a vault with their permissions.
    #[instrument(skip(self), fields(account = %self.account))]
    pub async fn list_vault_groups(&self, vault_id: &str) -> Result<Vec<PrincipalGrant>, OpError> {
        let stdout = self
            .run(
                vec![
                    "vault".into(),
                    "group".into(),
                    "list".into(),
                    vault_id.to_string(),
                    self.account_arg(),
                    json_arg(),
                ],
                None,
            )
            .await?;
        parse_vault_groups(&stdout)
    }

    /// Grant `permissions` to `group` (name or ID) on a vault.
    #[instrument(skip(self, permissions), fields(account = %self.account, permissions = %permissions))]
    pub async fn grant_group(
        &self,
        vault_id: &str,
        group: &str,
        permissions: &PermissionSet,
    ) -> Result<(), OpError> {
        self.permission_command("group", "grant", vault_id, group, Some(permissions))
            .await
    }

    /// Revoke `permissions` from `group` on a vault, or every permission
    /// when `permissions` is `None`.
    #[instrument(skip(self, permissions), fields(account = %self.account))]
    pub async fn revoke_group(
        &self,
        vault_id: &str,
        group: &str,
        permissions: Option<&PermissionSet>,
    ) -> Result<(), OpError> {
        self.permission_command("group", "revoke", vault_id, group, permissions)
            .await
    }

    /// All groups in the account.
    #[instrument(skip(self), fields(account = %self.account))]
    pub async fn list_groups(&self) -> Result<Vec<GroupPayload>, OpError> {
        let stdout = self
            .run(
                vec!["group".into(), "list".into(), self.account_arg(), json_arg()],
                None,
            )
            .await?;
        parse_json(&stdout)
    }

    // -- items --------------------------------------------------------------

    /// `op item list` for a vault. Returns the raw JSON array (it is fed to
    /// `op item get` unchanged) and the number of items in it.
    #[instrument(skip(self), fields(account = %self.account))]
    pub async fn list_items(&self, vault_id: &str) -> Result<(Vec<u8>, usize), OpError> {
        let stdout = self
            .run(
                vec![
                    "item".into(),
                    "list".into(),
                    format!("--vault={}", vault_id),
                    self.account_arg(),
                    json_arg(),
                ],
                None,
            )
            .await?;
        let items: Vec<serde_json::Value> = parse_json(&stdout)?;
        Ok((stdout, items.len()))
    }

    /// `op item get` for every item in an `op item list` document.
    #[instrument(skip(self, item_list), fields(account = %self.account))]
    pub async fn get_items(&self, item_list: Vec<u8>) -> Result<Vec<u8>, OpError> {
        self.run(
            vec![
                "item".into(),
                "get".into(),
                self.account_arg(),
                json_arg(),
            ],
            Some(item_list),
        )
        .await
    }

    /// `op item create` in a vault from the output of `op item get`.
    #[instrument(skip(self, items), fields(account = %self.account))]
    pub async fn create_items(&self, vault_id: &str, items: Vec<u8>) -> Result<(), OpError> {
        self.run(
            vec![
                "item".into(),
                "create".into(),
                format!("--vault={}", vault_id),
                self.account_arg(),
            ],
            Some(items),
        )
        .await?;
        Ok(())
    }

    // -- plumbing -----------------------------------------------------------

    async fn permission_command(
        &self,
        target: &str,
        action: &str,
        vault_id: &str,
        principal: &str,
        permissions: Option<&PermissionSet>,
    ) -> Result<(), OpError> {
        let mut args = vec![
            "vault".to_string(),
            target.to_string(),
            action.to_string(),
            format!("--vault={}", vault_id),
            format!("--{}={}", target, principal),
        ];
        if let Some(permissions) = permissions {
            args.push(format!("--permissions={}", permissions));
        }
        args.push(self.account_arg());
        args.push("--no-input".to_string());
        self.run(args, None).await?;
        debug!(target, action, vault_id, principal, "updated vault permissions");
        Ok(())
    }

    async fn run(&self, args: Vec<String>, stdin: Option<Vec<u8>>) -> Result<Vec<u8>, OpError> {
        let mut request = OpRequest::new(args).with_token(self.token.clone());
        if let Some(stdin) = stdin {
            request = request.with_stdin(stdin);
        }
        self.gateway.invoke(request).await?.into_result()
    }

    fn account_arg(&self) -> String {
        format!("--account={}", self.account)
    }
}

fn json_arg() -> String {
    "--format=json".to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::op::gateway::OpOutput;
    use crate::models::Permission;
    use async_trait::async_trait;
    use std::sync::Mutex;

    /// Records every request and answers with a fixed output.
    struct Recorder {
        requests: Mutex<Vec<OpRequest>>,
        reply: OpOutput,
    }

    impl Recorder {
        fn replying(stdout: &str) -> Arc<Self> {
            Arc::new(Self {
                requests: Mutex::new(Vec::new()),
                reply: OpOutput {
                    exit_code: 0,
                    stdout: stdout.as_bytes().to_vec(),
                    stderr: Vec::new(),
                },
            })
        }

        fn last_args(&self) -> Vec<String> {
            self.requests.lock().unwrap().last().unwrap().args.clone()
        }
    }

    #[async_trait]
    impl OpGateway for Recorder {
        async fn invoke(&self, request: OpRequest) -> Result<OpOutput, OpError> {
            self.requests.lock().unwrap().push(request);
            Ok(self.reply.clone())
        }
    }

    #[tokio::test]
    async fn test_grant_user_arguments() {
        let recorder = Recorder::replying("");
        let client = OpClient::new(recorder.clone(), "newco");
        let perms: PermissionSet = [Permission::EditItems, Permission::ViewItems]
            .into_iter()
            .collect();

        client.grant_user("V1", "alice@new.co", &perms).await.unwrap();

        assert_eq!(
            recorder.last_args(),
            vec![
                "vault",
                "user",
                "grant",
                "--vault=V1",
                "--user=alice@new.co",
                "--permissions=view_items,edit_items",
                "--account=newco",
                "--no-input",
            ]
        );
    }

    #[tokio::test]
    async fn test_revoke_user_has_no_permissions_flag() {
        let recorder = Recorder::replying("");
        let client = OpClient::new(recorder.clone(), "newco");

        client.revoke_user("V1", "U9").await.unwrap();

        let args = recorder.last_args();
        assert_eq!(args[2], "revoke");
        assert!(!args.iter().any(|a| a.starts_with("--permissions")));
    }

    #[tokio::test]
    async fn test_list_vaults_parses_output() {
        let recorder = Recorder::replying(r#"[{"id":"V1","name":"Engineering","items":4}]"#);
        let client = OpClient::new(recorder.clone(), "oldco");

        let vaults = client.list_vaults().await.unwrap();

        assert_eq!(vaults.len(), 1);
        assert_eq!(vaults[0].item_count, 4);
        assert!(recorder
            .last_args()
            .contains(&"--permission=manage_vault".to_string()));
    }

    #[tokio::test]
    async fn test_token_is_forwarded() {
        let recorder = Recorder::replying(r#"{"user_uuid":"ME","email":"ops@old.co"}"#);
        let config = AccountConfig {
            account: "oldco".into(),
            token_env: Some("SVC".into()),
            token: Some("ops_token".into()),
        };
        let client = OpClient::from_config(recorder.clone(), &config);

        let me = client.whoami().await.unwrap();

        assert_eq!(me.user_uuid, "ME");
        let requests = recorder.requests.lock().unwrap();
        assert_eq!(
            requests[0].service_account_token.as_deref(),
            Some("ops_token")
        );
    }

    #[tokio::test]
    async fn test_non_zero_exit_is_command_failed() {
        let recorder = Arc::new(Recorder {
            requests: Mutex::new(Vec::new()),
            reply: OpOutput {
                exit_code: 1,
                stdout: Vec::new(),
                stderr: b"[ERROR] a vault with that name already exists".to_vec(),
            },
        });
        let client = OpClient::new(recorder, "newco");

        let result = client.create_vault("Engineering").await;
        assert!(matches!(result, Err(OpError::CommandFailed { exit_code: 1, .. })));
    }
}
