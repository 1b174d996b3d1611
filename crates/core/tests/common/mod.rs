//! In-memory stand-in for the `op` CLI.
//!
//! [`FakeOp`] keeps one state per account (users, groups, vaults with their
//! ACLs and items) and answers exactly the command lines `OpClient` builds.
//! Individual command lines can be made to fail with [`FakeOp::fail_when`].

#![allow(dead_code)]

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use serde_json::{json, Value};

use vaultmigrate_core::config::AppConfig;
use vaultmigrate_core::errors::OpError;
use vaultmigrate_core::op::{OpGateway, OpOutput, OpRequest};

pub const SOURCE: &str = "oldco";
pub const DESTINATION: &str = "newco";

pub const FULL: &[&str] = &[
    "view_items",
    "create_items",
    "edit_items",
    "archive_items",
    "delete_items",
    "view_and_copy_passwords",
    "view_item_history",
    "import_items",
    "export_items",
    "copy_and_share_items",
    "print_items",
    "manage_vault",
];

// ===========================================================================
// State
// ===========================================================================

#[derive(Debug, Clone)]
pub struct SimUser {
    pub id: String,
    pub name: String,
    pub email: String,
}

#[derive(Debug, Clone, Default)]
pub struct SimVault {
    pub id: String,
    pub name: String,
    pub users: BTreeMap<String, BTreeSet<String>>,
    pub groups: BTreeMap<String, BTreeSet<String>>,
    pub items: Vec<Value>,
}

#[derive(Debug, Clone)]
pub struct SimAccount {
    pub operator_id: String,
    pub users: Vec<SimUser>,
    /// (id, name)
    pub groups: Vec<(String, String)>,
    pub vaults: Vec<SimVault>,
    next_id: u32,
    prefix: String,
}

impl SimAccount {
    fn new(prefix: &str, operator_email: &str) -> Self {
        let operator_id = format!("{}-OPERATOR", prefix);
        Self {
            operator_id: operator_id.clone(),
            users: vec![SimUser {
                id: operator_id,
                name: "Migration Operator".into(),
                email: operator_email.into(),
            }],
            groups: vec![(format!("{}-GOWNERS", prefix), "Owners".into())],
            vaults: Vec::new(),
            next_id: 0,
            prefix: prefix.into(),
        }
    }

    fn next_id(&mut self, kind: &str) -> String {
        self.next_id += 1;
        format!("{}-{}{}", self.prefix, kind, self.next_id)
    }

    fn vault_mut(&mut self, id: &str) -> Option<&mut SimVault> {
        self.vaults.iter_mut().find(|v| v.id == id)
    }

    fn user_id(&self, key: &str) -> Option<String> {
        self.users
            .iter()
            .find(|u| u.id == key || u.email == key)
            .map(|u| u.id.clone())
    }

    fn group_id(&self, key: &str) -> Option<String> {
        self.groups
            .iter()
            .find(|(id, name)| id == key || name == key)
            .map(|(id, _)| id.clone())
    }

    fn group_name(&self, id: &str) -> String {
        self.groups
            .iter()
            .find(|(gid, _)| gid == id)
            .map(|(_, name)| name.clone())
            .unwrap_or_default()
    }
}

#[derive(Debug, Default)]
struct State {
    accounts: HashMap<String, SimAccount>,
    /// (account, command line fragment)
    failures: Vec<(String, String)>,
    /// Every command line received, prefixed with its account.
    calls: Vec<String>,
    version: String,
}

// ===========================================================================
// FakeOp
// ===========================================================================

pub struct FakeOp {
    state: Mutex<State>,
}

impl FakeOp {
    /// Two empty accounts whose signed-in operator is `admin@<account>`.
    pub fn new() -> Arc<Self> {
        let mut accounts = HashMap::new();
        accounts.insert(SOURCE.to_string(), SimAccount::new("S", "admin@old.co"));
        accounts.insert(
            DESTINATION.to_string(),
            SimAccount::new("D", "admin@new.co"),
        );
        Arc::new(Self {
            state: Mutex::new(State {
                accounts,
                version: "2.30.3".into(),
                ..Default::default()
            }),
        })
    }

    pub fn set_version(&self, version: &str) {
        self.state.lock().unwrap().version = version.into();
    }

    /// Add a user and return its ID.
    pub fn add_user(&self, account: &str, name: &str, email: &str) -> String {
        let mut state = self.state.lock().unwrap();
        let acct = state.accounts.get_mut(account).unwrap();
        let id = acct.next_id("U");
        acct.users.push(SimUser {
            id: id.clone(),
            name: name.into(),
            email: email.into(),
        });
        id
    }

    /// Add a group and return its ID.
    pub fn add_group(&self, account: &str, name: &str) -> String {
        let mut state = self.state.lock().unwrap();
        let acct = state.accounts.get_mut(account).unwrap();
        let id = acct.next_id("G");
        acct.groups.push((id.clone(), name.into()));
        id
    }

    /// Add a vault with an empty ACL and return its ID.
    pub fn add_vault(&self, account: &str, name: &str) -> String {
        let mut state = self.state.lock().unwrap();
        let acct = state.accounts.get_mut(account).unwrap();
        let id = acct.next_id("V");
        acct.vaults.push(SimVault {
            id: id.clone(),
            name: name.into(),
            ..Default::default()
        });
        id
    }

    pub fn set_user_access(&self, account: &str, vault_id: &str, user_id: &str, permissions: &[&str]) {
        let mut state = self.state.lock().unwrap();
        let acct = state.accounts.get_mut(account).unwrap();
        acct.vault_mut(vault_id)
            .unwrap()
            .users
            .insert(user_id.into(), perms(permissions));
    }

    pub fn set_group_access(&self, account: &str, vault_id: &str, group_id: &str, permissions: &[&str]) {
        let mut state = self.state.lock().unwrap();
        let acct = state.accounts.get_mut(account).unwrap();
        acct.vault_mut(vault_id)
            .unwrap()
            .groups
            .insert(group_id.into(), perms(permissions));
    }

    pub fn add_item(&self, account: &str, vault_id: &str, title: &str) {
        let mut state = self.state.lock().unwrap();
        let acct = state.accounts.get_mut(account).unwrap();
        let id = acct.next_id("I");
        acct.vault_mut(vault_id)
            .unwrap()
            .items
            .push(json!({ "id": id, "title": title, "category": "LOGIN" }));
    }

    /// Make every command line of `account` containing `fragment` exit 1.
    pub fn fail_when(&self, account: &str, fragment: &str) {
        self.state
            .lock()
            .unwrap()
            .failures
            .push((account.into(), fragment.into()));
    }

    pub fn operator_id(&self, account: &str) -> String {
        self.state.lock().unwrap().accounts[account].operator_id.clone()
    }

    pub fn vault_by_name(&self, account: &str, name: &str) -> Option<SimVault> {
        self.state.lock().unwrap().accounts[account]
            .vaults
            .iter()
            .find(|v| v.name == name)
            .cloned()
    }

    pub fn vault_count(&self, account: &str) -> usize {
        self.state.lock().unwrap().accounts[account].vaults.len()
    }

    /// Permissions of a user (by ID or email) on a named vault.
    pub fn user_access(&self, account: &str, vault_name: &str, user: &str) -> Option<Vec<String>> {
        let state = self.state.lock().unwrap();
        let acct = &state.accounts[account];
        let user_id = acct.user_id(user)?;
        let vault = acct.vaults.iter().find(|v| v.name == vault_name)?;
        vault
            .users
            .get(&user_id)
            .map(|set| set.iter().cloned().collect())
    }

    /// Permissions of a group (by name) on a named vault.
    pub fn group_access(&self, account: &str, vault_name: &str, group: &str) -> Option<Vec<String>> {
        let state = self.state.lock().unwrap();
        let acct = &state.accounts[account];
        let group_id = acct.group_id(group)?;
        let vault = acct.vaults.iter().find(|v| v.name == vault_name)?;
        vault
            .groups
            .get(&group_id)
            .map(|set| set.iter().cloned().collect())
    }

    pub fn calls(&self) -> Vec<String> {
        self.state.lock().unwrap().calls.clone()
    }

    pub fn calls_matching(&self, fragment: &str) -> Vec<String> {
        self.calls()
            .into_iter()
            .filter(|c| c.contains(fragment))
            .collect()
    }

    fn handle(&self, request: &OpRequest) -> OpOutput {
        let mut state = self.state.lock().unwrap();
        let line = request.display_args();
        let account = flag(&request.args, "account").unwrap_or_default();
        state.calls.push(format!("[{}] {}", account, line));

        if state
            .failures
            .iter()
            .any(|(a, fragment)| a == &account && line.contains(fragment.as_str()))
        {
            return failed("[ERROR] simulated failure");
        }

        if request.args.first().map(String::as_str) == Some("--version") {
            return ok(format!("{}\n", state.version).into_bytes());
        }

        let Some(acct) = state.accounts.get_mut(&account) else {
            return failed(&format!("[ERROR] account '{}' is not signed in", account));
        };
        let positional: Vec<&str> = request
            .args
            .iter()
            .filter(|a| !a.starts_with("--"))
            .map(String::as_str)
            .collect();

        match positional.as_slice() {
            ["whoami"] => {
                let me = acct.users.iter().find(|u| u.id == acct.operator_id).unwrap();
                ok_json(json!({ "user_uuid": me.id, "email": me.email }))
            }
            ["vault", "list"] => ok_json(Value::Array(
                acct.vaults
                    .iter()
                    .map(|v| json!({ "id": v.id, "name": v.name, "items": v.items.len() }))
                    .collect(),
            )),
            ["vault", "create", name] => {
                let id = acct.next_id("V");
                let mut vault = SimVault {
                    id: id.clone(),
                    name: name.to_string(),
                    ..Default::default()
                };
                vault
                    .users
                    .insert(acct.operator_id.clone(), perms(FULL));
                acct.vaults.push(vault);
                ok_json(json!({ "id": id, "name": name, "items": 0 }))
            }
            ["vault", "user", "list", vault_id] => {
                let Some(vault) = acct.vaults.iter().find(|v| v.id == *vault_id) else {
                    return failed("[ERROR] vault not found");
                };
                ok_json(Value::Array(
                    vault
                        .users
                        .iter()
                        .map(|(id, set)| {
                            let user = acct.users.iter().find(|u| &u.id == id).unwrap();
                            json!({
                                "id": id,
                                "name": user.name,
                                "email": user.email,
                                "state": "ACTIVE",
                                "permissions": set.iter().collect::<Vec<_>>(),
                            })
                        })
                        .collect(),
                ))
            }
            ["vault", "group", "list", vault_id] => {
                let Some(vault) = acct.vaults.iter().find(|v| v.id == *vault_id) else {
                    return failed("[ERROR] vault not found");
                };
                ok_json(Value::Array(
                    vault
                        .groups
                        .iter()
                        .map(|(id, set)| {
                            json!({
                                "id": id,
                                "name": acct.group_name(id),
                                "state": "ACTIVE",
                                "permissions": set.iter().collect::<Vec<_>>(),
                            })
                        })
                        .collect(),
                ))
            }
            ["vault", target @ ("user" | "group"), action @ ("grant" | "revoke")] => {
                change_access(acct, &request.args, target, action)
            }
            ["group", "list"] => ok_json(Value::Array(
                acct.groups
                    .iter()
                    .map(|(id, name)| json!({ "id": id, "name": name, "state": "ACTIVE" }))
                    .collect(),
            )),
            ["item", "list"] => {
                let vault_id = flag(&request.args, "vault").unwrap_or_default();
                let Some(vault) = acct.vaults.iter().find(|v| v.id == vault_id) else {
                    return failed("[ERROR] vault not found");
                };
                ok_json(Value::Array(
                    vault
                        .items
                        .iter()
                        .map(|item| json!({ "id": item["id"], "title": item["title"] }))
                        .collect(),
                ))
            }
            ["item", "get"] => {
                let listing: Vec<Value> =
                    serde_json::from_slice(request.stdin.as_deref().unwrap_or_default())
                        .unwrap_or_default();
                let mut out = Vec::new();
                for summary in listing {
                    let full = acct
                        .vaults
                        .iter()
                        .flat_map(|v| v.items.iter())
                        .find(|item| item["id"] == summary["id"]);
                    match full {
                        Some(item) => {
                            out.extend(serde_json::to_vec(item).unwrap());
                            out.push(b'\n');
                        }
                        None => return failed("[ERROR] item not found"),
                    }
                }
                ok(out)
            }
            ["item", "create"] => {
                let vault_id = flag(&request.args, "vault").unwrap_or_default();
                let stdin = request.stdin.clone().unwrap_or_default();
                let items: Vec<Value> = serde_json::Deserializer::from_slice(&stdin)
                    .into_iter::<Value>()
                    .filter_map(Result::ok)
                    .collect();
                let Some(vault) = acct.vault_mut(&vault_id) else {
                    return failed("[ERROR] vault not found");
                };
                vault.items.extend(items);
                ok(Vec::new())
            }
            _ => failed(&format!("[ERROR] unknown command: {}", line)),
        }
    }
}

#[async_trait]
impl OpGateway for FakeOp {
    async fn invoke(&self, request: OpRequest) -> Result<OpOutput, OpError> {
        tokio::task::yield_now().await;
        Ok(self.handle(&request))
    }
}

fn change_access(acct: &mut SimAccount, args: &[String], target: &str, action: &str) -> OpOutput {
    let vault_id = flag(args, "vault").unwrap_or_default();
    let principal = flag(args, target).unwrap_or_default();
    let requested = flag(args, "permissions").map(|p| {
        p.split(',')
            .map(str::to_string)
            .collect::<BTreeSet<String>>()
    });

    let id = match target {
        "user" => acct.user_id(&principal),
        _ => acct.group_id(&principal),
    };
    let Some(id) = id else {
        return failed(&format!("[ERROR] {} '{}' not found", target, principal));
    };
    let Some(vault) = acct.vault_mut(&vault_id) else {
        return failed("[ERROR] vault not found");
    };
    let acl = match target {
        "user" => &mut vault.users,
        _ => &mut vault.groups,
    };

    match (action, requested) {
        ("grant", Some(set)) => {
            acl.entry(id).or_default().extend(set);
        }
        ("grant", None) => return failed("[ERROR] --permissions is required"),
        (_, None) => {
            acl.remove(&id);
        }
        (_, Some(set)) => {
            if let Some(current) = acl.get_mut(&id) {
                current.retain(|p| !set.contains(p));
                if current.is_empty() {
                    acl.remove(&id);
                }
            }
        }
    }
    ok(Vec::new())
}

// ===========================================================================
// Helpers
// ===========================================================================

pub fn perms(list: &[&str]) -> BTreeSet<String> {
    list.iter().map(|p| p.to_string()).collect()
}

fn flag(args: &[String], name: &str) -> Option<String> {
    let prefix = format!("--{}=", name);
    args.iter()
        .find_map(|a| a.strip_prefix(prefix.as_str()).map(str::to_string))
}

fn ok(stdout: Vec<u8>) -> OpOutput {
    OpOutput {
        exit_code: 0,
        stdout,
        stderr: Vec::new(),
    }
}

fn ok_json(value: Value) -> OpOutput {
    ok(serde_json::to_vec(&value).unwrap())
}

fn failed(stderr: &str) -> OpOutput {
    OpOutput {
        exit_code: 1,
        stdout: Vec::new(),
        stderr: stderr.as_bytes().to_vec(),
    }
}

/// A config for the two simulated accounts writing into `dir`.
pub fn make_app_config(dir: &std::path::Path) -> AppConfig {
    let toml_str = format!(
        r#"
[accounts.source]
account = "{}"

[accounts.destination]
account = "{}"

[migration]
concurrency = 2

[output]
dir = "{}"
log_level = "debug"
"#,
        SOURCE,
        DESTINATION,
        dir.display()
    );
    toml::from_str(&toml_str).unwrap()
}
