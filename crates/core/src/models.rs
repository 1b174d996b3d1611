//! Domain model types used throughout vaultmigrate.
//!
//! These types bridge the `op` client, the snapshot/replay engine, the run
//! ledger, and the report writer.

use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Vault
// ---------------------------------------------------------------------------

/// A vault as listed by `op vault list`.
///
/// `id` is local to one account; `name` is the only key that correlates a
/// vault across accounts.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Vault {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub item_count: u64,
}

// ---------------------------------------------------------------------------
// Permissions
// ---------------------------------------------------------------------------

/// A single vault permission token. Variant order is the canonical order
/// used when rendering a [`PermissionSet`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Permission {
    ViewItems,
    CreateItems,
    EditItems,
    ArchiveItems,
    DeleteItems,
    ViewAndCopyPasswords,
    ViewItemHistory,
    ImportItems,
    ExportItems,
    CopyAndShareItems,
    PrintItems,
    ManageVault,
}

impl Permission {
    /// Every permission, in canonical order.
    pub const ALL: [Permission; 12] = [
        Self::ViewItems,
        Self::CreateItems,
        Self::EditItems,
        Self::ArchiveItems,
        Self::DeleteItems,
        Self::ViewAndCopyPasswords,
        Self::ViewItemHistory,
        Self::ImportItems,
        Self::ExportItems,
        Self::CopyAndShareItems,
        Self::PrintItems,
        Self::ManageVault,
    ];

    /// The token `op` uses for this permission.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ViewItems => "view_items",
            Self::CreateItems => "create_items",
            Self::EditItems => "edit_items",
            Self::ArchiveItems => "archive_items",
            Self::DeleteItems => "delete_items",
            Self::ViewAndCopyPasswords => "view_and_copy_passwords",
            Self::ViewItemHistory => "view_item_history",
            Self::ImportItems => "import_items",
            Self::ExportItems => "export_items",
            Self::CopyAndShareItems => "copy_and_share_items",
            Self::PrintItems => "print_items",
            Self::ManageVault => "manage_vault",
        }
    }
}

impl fmt::Display for Permission {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Permission {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .iter()
            .copied()
            .find(|p| p.as_str() == s)
            .ok_or_else(|| format!("unknown vault permission '{}'", s))
    }
}

/// An ordered set of permissions.
///
/// Rendered comma-joined in canonical order, which is also the format of
/// the `--permissions=` argument of `op vault user grant`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PermissionSet(BTreeSet<Permission>);

impl PermissionSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every permission a vault can grant. Used for operator elevation.
    pub fn full() -> Self {
        Self(Permission::ALL.into_iter().collect())
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn contains(&self, permission: Permission) -> bool {
        self.0.contains(&permission)
    }

    pub fn insert(&mut self, permission: Permission) -> bool {
        self.0.insert(permission)
    }

    pub fn iter(&self) -> impl Iterator<Item = Permission> + '_ {
        self.0.iter().copied()
    }

    /// Build a set from raw `op` tokens. Tokens outside the vocabulary are
    /// returned separately so callers can report them.
    pub fn from_tokens<I, S>(tokens: I) -> (Self, Vec<String>)
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut set = Self::new();
        let mut unknown = Vec::new();
        for token in tokens {
            let token = token.as_ref().trim();
            if token.is_empty() {
                continue;
            }
            match token.parse::<Permission>() {
                Ok(p) => {
                    set.insert(p);
                }
                Err(_) => unknown.push(token.to_string()),
            }
        }
        (set, unknown)
    }
}

impl fmt::Display for PermissionSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut first = true;
        for p in &self.0 {
            if !first {
                f.write_str(",")?;
            }
            f.write_str(p.as_str())?;
            first = false;
        }
        Ok(())
    }
}

impl FromIterator<Permission> for PermissionSet {
    fn from_iter<T: IntoIterator<Item = Permission>>(iter: T) -> Self {
        Self(iter.into_iter().collect())
    }
}

// ---------------------------------------------------------------------------
// Principals & snapshots
// ---------------------------------------------------------------------------

/// Whether a grant belongs to a user or a group.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum PrincipalKind {
    User,
    Group,
}

impl fmt::Display for PrincipalKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::User => write!(f, "user"),
            Self::Group => write!(f, "group"),
        }
    }
}

/// One principal's permissions on one vault.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct PrincipalGrant {
    pub kind: PrincipalKind,
    pub id: String,
    pub display_name: String,
    /// Set for users only.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    pub permissions: PermissionSet,
}

impl PrincipalGrant {
    /// Human-readable label for logs and result records.
    pub fn label(&self) -> String {
        match (&self.kind, &self.email) {
            (PrincipalKind::User, Some(email)) => format!("user {}", email),
            (kind, _) => format!("{} {}", kind, self.display_name),
        }
    }
}

/// The immutable permission picture of one source vault.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct VaultAclSnapshot {
    pub source_vault_id: String,
    pub source_vault_name: String,
    #[serde(default)]
    pub item_count: u64,
    /// Users first, then groups, each in the order `op` listed them.
    pub grants: Vec<PrincipalGrant>,
}

impl VaultAclSnapshot {
    pub fn users(&self) -> impl Iterator<Item = &PrincipalGrant> {
        self.grants.iter().filter(|g| g.kind == PrincipalKind::User)
    }

    pub fn groups(&self) -> impl Iterator<Item = &PrincipalGrant> {
        self.grants.iter().filter(|g| g.kind == PrincipalKind::Group)
    }

    /// The grant of the user with the given account-local id, if any.
    pub fn user_by_id(&self, user_id: &str) -> Option<&PrincipalGrant> {
        self.users().find(|g| g.id == user_id)
    }
}

// ---------------------------------------------------------------------------
// Run modes & results
// ---------------------------------------------------------------------------

/// What a migration run does after enumerating vaults.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum RunMode {
    /// Snapshot and report only; nothing in the destination changes.
    ReportOnly,
    /// Create destination vaults and replay permissions.
    CreateAndReplay,
    /// Replay a previously persisted snapshot onto existing vaults.
    ReplayOnly,
    /// Toggle the operator group's blanket access.
    OperatorAccess,
}

impl fmt::Display for RunMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ReportOnly => write!(f, "report_only"),
            Self::CreateAndReplay => write!(f, "create_and_replay"),
            Self::ReplayOnly => write!(f, "replay_only"),
            Self::OperatorAccess => write!(f, "operator_access"),
        }
    }
}

/// The pipeline step a [`MigrationResult`] refers to.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    Snapshot,
    Create,
    Elevate,
    CopyItems,
    Restore,
    Replay,
    OperatorAccess,
}

impl Phase {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Snapshot => "snapshot",
            Self::Create => "create",
            Self::Elevate => "elevate",
            Self::CopyItems => "copy_items",
            Self::Restore => "restore",
            Self::Replay => "replay",
            Self::OperatorAccess => "operator_access",
        }
    }

    /// Parse a phase string as stored in the ledger.
    pub fn from_str_val(s: &str) -> Option<Self> {
        match s {
            "snapshot" => Some(Self::Snapshot),
            "create" => Some(Self::Create),
            "elevate" => Some(Self::Elevate),
            "copy_items" => Some(Self::CopyItems),
            "restore" => Some(Self::Restore),
            "replay" => Some(Self::Replay),
            "operator_access" => Some(Self::OperatorAccess),
            _ => None,
        }
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Outcome of one step for one vault (and optionally one principal).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct MigrationResult {
    pub vault_name: String,
    pub phase: Phase,
    #[serde(default)]
    pub principal: Option<String>,
    pub succeeded: bool,
    #[serde(default)]
    pub error_detail: Option<String>,
}

impl MigrationResult {
    pub fn success(vault_name: &str, phase: Phase) -> Self {
        Self {
            vault_name: vault_name.to_string(),
            phase,
            principal: None,
            succeeded: true,
            error_detail: None,
        }
    }

    pub fn failure(vault_name: &str, phase: Phase, detail: impl fmt::Display) -> Self {
        Self {
            vault_name: vault_name.to_string(),
            phase,
            principal: None,
            succeeded: false,
            error_detail: Some(detail.to_string()),
        }
    }

    pub fn with_principal(mut self, principal: impl Into<String>) -> Self {
        self.principal = Some(principal.into());
        self
    }
}

// ---------------------------------------------------------------------------
// Audit entry
// ---------------------------------------------------------------------------

/// A run-level audit event.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditEntry {
    pub action: String,
    pub details: String,
    pub success: bool,
    pub timestamp: DateTime<Utc>,
}

impl AuditEntry {
    /// Create a success audit entry.
    pub fn success(action: &str, details: &str) -> Self {
        Self {
            action: action.to_string(),
            details: details.to_string(),
            success: true,
            timestamp: Utc::now(),
        }
    }

    /// Create a failure audit entry.
    pub fn failure(action: &str, details: &str) -> Self {
        Self {
            action: action.to_string(),
            details: details.to_string(),
            success: false,
            timestamp: Utc::now(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_permission_set_renders_in_canonical_order() {
        let (set, unknown) = PermissionSet::from_tokens(["edit_items", "view_items"]);
        assert!(unknown.is_empty());
        assert_eq!(set.to_string(), "view_items,edit_items");
    }

    #[test]
    fn test_permission_set_reports_unknown_tokens() {
        let (set, unknown) = PermissionSet::from_tokens(["view_items", "allow_viewing", ""]);
        assert_eq!(set.len(), 1);
        assert_eq!(unknown, vec!["allow_viewing".to_string()]);
    }

    #[test]
    fn test_full_permission_set() {
        let full = PermissionSet::full();
        assert_eq!(full.len(), 12);
        assert!(full.to_string().starts_with("view_items,create_items"));
        assert!(full.to_string().ends_with("print_items,manage_vault"));
    }

    #[test]
    fn test_permission_set_serializes_as_token_list() {
        let set: PermissionSet = [Permission::ManageVault, Permission::ViewItems]
            .into_iter()
            .collect();
        let json = serde_json::to_string(&set).unwrap();
        assert_eq!(json, r#"["view_items","manage_vault"]"#);
    }

    #[test]
    fn test_snapshot_user_lookup() {
        let snapshot = VaultAclSnapshot {
            source_vault_id: "v1".into(),
            source_vault_name: "Engineering".into(),
            item_count: 0,
            grants: vec![
                PrincipalGrant {
                    kind: PrincipalKind::User,
                    id: "U1".into(),
                    display_name: "Alice".into(),
                    email: Some("alice@old.co".into()),
                    permissions: PermissionSet::new(),
                },
                PrincipalGrant {
                    kind: PrincipalKind::Group,
                    id: "G1".into(),
                    display_name: "Developers".into(),
                    email: None,
                    permissions: PermissionSet::new(),
                },
            ],
        };
        assert_eq!(snapshot.users().count(), 1);
        assert_eq!(snapshot.groups().count(), 1);
        assert!(snapshot.user_by_id("U1").is_some());
        assert!(snapshot.user_by_id("G1").is_none());
        assert_eq!(snapshot.grants[0].label(), "user alice@old.co");
        assert_eq!(snapshot.grants[1].label(), "group Developers");
    }

    #[test]
    fn test_phase_round_trip_through_ledger_string() {
        for phase in [Phase::Snapshot, Phase::Create, Phase::Replay, Phase::CopyItems] {
            assert_eq!(Phase::from_str_val(phase.as_str()), Some(phase));
        }
        assert_eq!(Phase::from_str_val("bogus"), None);
    }
}
