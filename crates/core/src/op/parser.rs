//! Parsers for the JSON (and version string) output of the `op` CLI.

use std::cmp::Ordering;
use std::fmt;

use serde::Deserialize;
use tracing::warn;

use crate::errors::OpError;
use crate::models::{PermissionSet, PrincipalGrant, PrincipalKind, Vault};

/// State value `op` reports for principals that currently hold access.
const ACTIVE: &str = "ACTIVE";

// ---------------------------------------------------------------------------
// Payloads
// ---------------------------------------------------------------------------

/// A vault object from `op vault list` / `op vault create`.
#[derive(Debug, Clone, Deserialize)]
pub struct VaultPayload {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub items: u64,
}

impl From<VaultPayload> for Vault {
    fn from(p: VaultPayload) -> Self {
        Vault {
            id: p.id,
            name: p.name,
            item_count: p.items,
        }
    }
}

/// A user row from `op vault user list`.
#[derive(Debug, Clone, Deserialize)]
pub struct VaultUserPayload {
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub email: String,
    #[serde(default)]
    pub state: String,
    #[serde(default)]
    pub permissions: Vec<String>,
}

/// A group row from `op vault group list`.
#[derive(Debug, Clone, Deserialize)]
pub struct VaultGroupPayload {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub state: String,
    #[serde(default)]
    pub permissions: Vec<String>,
}

/// A group row from `op group list`.
#[derive(Debug, Clone, Deserialize)]
pub struct GroupPayload {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub state: String,
}

/// Output of `op whoami`.
#[derive(Debug, Clone, Deserialize)]
pub struct WhoAmI {
    pub user_uuid: String,
    #[serde(default)]
    pub email: String,
}

// ---------------------------------------------------------------------------
// Parsing
// ---------------------------------------------------------------------------

/// Decode a JSON document produced by `op`.
pub fn parse_json<T: serde::de::DeserializeOwned>(stdout: &[u8]) -> Result<T, OpError> {
    serde_json::from_slice(stdout).map_err(|e| OpError::ParseError(e.to_string()))
}

/// Parse `op vault list` output.
pub fn parse_vault_list(stdout: &[u8]) -> Result<Vec<Vault>, OpError> {
    let payloads: Vec<VaultPayload> = parse_json(stdout)?;
    Ok(payloads.into_iter().map(Vault::from).collect())
}

/// Parse `op vault user list` output into grants, keeping active users only.
pub fn parse_vault_users(stdout: &[u8]) -> Result<Vec<PrincipalGrant>, OpError> {
    let payloads: Vec<VaultUserPayload> = parse_json(stdout)?;
    Ok(payloads
        .into_iter()
        .filter(|u| u.state == ACTIVE)
        .map(|u| PrincipalGrant {
            kind: PrincipalKind::User,
            permissions: permission_set(&u.id, &u.permissions),
            id: u.id,
            display_name: u.name,
            email: Some(u.email),
        })
        .collect())
}

/// Parse `op vault group list` output into grants, keeping active groups only.
pub fn parse_vault_groups(stdout: &[u8]) -> Result<Vec<PrincipalGrant>, OpError> {
    let payloads: Vec<VaultGroupPayload> = parse_json(stdout)?;
    Ok(payloads
        .into_iter()
        .filter(|g| g.state == ACTIVE)
        .map(|g| PrincipalGrant {
            kind: PrincipalKind::Group,
            permissions: permission_set(&g.id, &g.permissions),
            id: g.id,
            display_name: g.name,
            email: None,
        })
        .collect())
}

fn permission_set(principal_id: &str, tokens: &[String]) -> PermissionSet {
    let (set, unknown) = PermissionSet::from_tokens(tokens);
    if !unknown.is_empty() {
        warn!(principal_id, ?unknown, "ignoring permissions outside the vault vocabulary");
    }
    set
}

// ---------------------------------------------------------------------------
// CLI version
// ---------------------------------------------------------------------------

/// A `major.minor[.patch]` version of the `op` CLI. Only `major.minor`
/// takes part in comparisons.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CliVersion {
    pub major: u32,
    pub minor: u32,
    pub patch: Option<u32>,
}

impl CliVersion {
    /// Parse `2.30.3`, `2.25`, or `2.31.0-beta.01`.
    pub fn parse(s: &str) -> Result<Self, OpError> {
        let s = s.trim();
        let mut parts = s.splitn(3, '.');
        let major = parse_component(parts.next(), s)?;
        let minor = parse_component(parts.next(), s)?;
        let patch = parts.next().and_then(|rest| {
            let digits: String = rest.chars().take_while(|c| c.is_ascii_digit()).collect();
            digits.parse().ok()
        });
        Ok(Self { major, minor, patch })
    }

    /// `true` if this version is at least `floor` (major.minor only).
    pub fn satisfies(&self, floor: &CliVersion) -> bool {
        self.cmp_minor(floor) != Ordering::Less
    }

    fn cmp_minor(&self, other: &CliVersion) -> Ordering {
        (self.major, self.minor).cmp(&(other.major, other.minor))
    }
}

fn parse_component(part: Option<&str>, whole: &str) -> Result<u32, OpError> {
    part.and_then(|p| p.parse().ok())
        .ok_or_else(|| OpError::ParseError(format!("invalid version string '{}'", whole)))
}

impl fmt::Display for CliVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.patch {
            Some(patch) => write!(f, "{}.{}.{}", self.major, self.minor, patch),
            None => write!(f, "{}.{}", self.major, self.minor),
        }
    }
}
