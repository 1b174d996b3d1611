//! The persisted snapshot document.
//!
//! ```json
//! {
//!   "format": "vaultmigrate-acl-snapshot",
//!   "version": 1,
//!   "captured_at": "2026-10-18T09:12:44Z",
//!   "source_account": "oldco.1password.com",
//!   "vaults": [ { "source_vault_id": "...", "source_vault_name": "...", ... } ]
//! }
//! ```
//!
//! The format tag and version are checked before the body is decoded, so
//! a document from another tool or a newer release is rejected with a
//! typed error rather than a generic JSON failure.

use std::path::Path;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::errors::SnapshotStoreError;
use crate::models::VaultAclSnapshot;

/// Format tag of every snapshot document.
pub const SNAPSHOT_FORMAT: &str = "vaultmigrate-acl-snapshot";

/// Schema version written by this build.
pub const SNAPSHOT_VERSION: u32 = 1;

/// A set of vault snapshots as persisted between runs.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SnapshotDocument {
    pub format: String,
    pub version: u32,
    pub captured_at: DateTime<Utc>,
    pub source_account: String,
    pub vaults: Vec<VaultAclSnapshot>,
}

/// Just enough of a document to decide whether it can be read.
#[derive(Deserialize)]
struct Header {
    #[serde(default)]
    format: String,
    #[serde(default)]
    version: u32,
}

impl SnapshotDocument {
    pub fn new(source_account: impl Into<String>, vaults: Vec<VaultAclSnapshot>) -> Self {
        Self {
            format: SNAPSHOT_FORMAT.to_string(),
            version: SNAPSHOT_VERSION,
            captured_at: Utc::now(),
            source_account: source_account.into(),
            vaults,
        }
    }

    /// Decode a document, checking the format tag and version first.
    pub fn from_json(bytes: &[u8]) -> Result<Self, SnapshotStoreError> {
        let header: Header = serde_json::from_slice(bytes)?;
        if header.format != SNAPSHOT_FORMAT {
            return Err(SnapshotStoreError::WrongFormat(header.format));
        }
        if header.version != SNAPSHOT_VERSION {
            return Err(SnapshotStoreError::UnsupportedVersion {
                found: header.version,
                supported: SNAPSHOT_VERSION,
            });
        }
        Ok(serde_json::from_slice(bytes)?)
    }

    /// Write the document as pretty-printed JSON, replacing any old file.
    pub async fn save<P: AsRef<Path>>(&self, path: P) -> Result<(), SnapshotStoreError> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent).await?;
            }
        }

        let json = serde_json::to_vec_pretty(self)?;
        tokio::fs::write(path, json).await?;
        info!(path = %path.display(), vaults = self.vaults.len(), "saved snapshot document");
        Ok(())
    }

    /// Read a document written by [`save`](Self::save).
    pub async fn load<P: AsRef<Path>>(path: P) -> Result<Self, SnapshotStoreError> {
        let path = path.as_ref();
        info!(path = %path.display(), "loading snapshot document");

        let bytes = match tokio::fs::read(path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(SnapshotStoreError::NotFound(path.display().to_string()));
            }
            Err(e) => return Err(e.into()),
        };

        let doc = Self::from_json(&bytes)?;
        debug!(vaults = doc.vaults.len(), captured_at = %doc.captured_at, "snapshot document decoded");
        Ok(doc)
    }
}
