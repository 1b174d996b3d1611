//! Vault exclusion policy.
//!
//! Provides [`ExclusionPolicy`], which keeps personal and system vaults out
//! of every pass (snapshot, report, creation, replay, operator access).
//!
//! # Decision model
//!
//! For each vault name the policy returns an [`ExclusionDecision`]:
//!
//! | Condition | Decision |
//! |-----------|----------|
//! | Name equals an exact entry | `ExactName` |
//! | Name contains a substring entry | `Contains` |
//! | None of the above | `Include` |
//!
//! Matching is case-sensitive. The built-in entries always apply;
//! configuration can only add to them.

use tracing::debug;

use crate::config::ExclusionConfig;

/// Vault names excluded on exact match.
pub const BUILTIN_EXACT: [&str; 2] = ["Private", "Employee"];

/// Vault names excluded when they contain one of these.
pub const BUILTIN_CONTAINS: [&str; 3] = [
    "Private Vault",
    "Employee Vault",
    "Imported Shared Folders Metadata",
];

// ---------------------------------------------------------------------------
// Decision enum
// ---------------------------------------------------------------------------

/// The outcome of evaluating a vault name against the policy.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExclusionDecision {
    /// The vault takes part in the migration.
    Include,
    /// The name equals an excluded name.
    ExactName { name: String },
    /// The name contains an excluded substring.
    Contains { pattern: String },
}

impl ExclusionDecision {
    pub fn is_excluded(&self) -> bool {
        !matches!(self, Self::Include)
    }

    /// Short label for logs.
    pub fn label(&self) -> &'static str {
        match self {
            Self::Include => "include",
            Self::ExactName { .. } => "exact-name",
            Self::Contains { .. } => "contains",
        }
    }
}

// ---------------------------------------------------------------------------
// ExclusionPolicy
// ---------------------------------------------------------------------------

/// Decides which vaults are personal/system vaults. Immutable once built.
#[derive(Debug, Clone)]
pub struct ExclusionPolicy {
    exact: Vec<String>,
    contains: Vec<String>,
}

impl Default for ExclusionPolicy {
    fn default() -> Self {
        Self {
            exact: BUILTIN_EXACT.iter().map(|s| s.to_string()).collect(),
            contains: BUILTIN_CONTAINS.iter().map(|s| s.to_string()).collect(),
        }
    }
}

impl ExclusionPolicy {
    /// The built-in list extended with the configured entries.
    pub fn from_config(config: &ExclusionConfig) -> Self {
        let mut policy = Self::default();
        for name in &config.exact {
            if !policy.exact.contains(name) {
                policy.exact.push(name.clone());
            }
        }
        for pattern in &config.contains {
            if !pattern.is_empty() && !policy.contains.contains(pattern) {
                policy.contains.push(pattern.clone());
            }
        }
        policy
    }

    /// Evaluate a vault name.
    pub fn evaluate(&self, vault_name: &str) -> ExclusionDecision {
        if let Some(name) = self.exact.iter().find(|n| n.as_str() == vault_name) {
            debug!(vault = vault_name, "vault excluded by exact name");
            return ExclusionDecision::ExactName { name: name.clone() };
        }

        if let Some(pattern) = self.contains.iter().find(|p| vault_name.contains(p.as_str())) {
            debug!(vault = vault_name, pattern = %pattern, "vault excluded by substring");
            return ExclusionDecision::Contains {
                pattern: pattern.clone(),
            };
        }

        ExclusionDecision::Include
    }

    pub fn is_excluded(&self, vault_name: &str) -> bool {
        self.evaluate(vault_name).is_excluded()
    }
}
