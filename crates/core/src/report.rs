//! Human-readable CSV permissions report.
//!
//! One row per (vault, principal): users of a vault first, then its
//! groups. All rows of one vault are written under a single lock, so the
//! rows of different vaults never interleave.

use std::path::{Path, PathBuf};

use csv_async::{AsyncWriter, AsyncWriterBuilder};
use tokio::fs::File;
use tokio::sync::Mutex;
use tracing::{debug, info};

use crate::errors::ReportError;
use crate::models::{PrincipalKind, VaultAclSnapshot};

/// Column names, in order.
pub const REPORT_HEADER: [&str; 7] = [
    "vaultName",
    "vaultUUID",
    "userName",
    "groupName",
    "email",
    "userOrGroupUUID",
    "permissions",
];

/// The report rows of one vault.
pub fn rows_for(snapshot: &VaultAclSnapshot) -> Vec<[String; 7]> {
    let vault_name = &snapshot.source_vault_name;
    let vault_id = &snapshot.source_vault_id;
    snapshot
        .users()
        .chain(snapshot.groups())
        .map(|grant| {
            let (user_name, group_name) = match grant.kind {
                PrincipalKind::User => (grant.display_name.clone(), String::new()),
                PrincipalKind::Group => (String::new(), grant.display_name.clone()),
            };
            [
                vault_name.clone(),
                vault_id.clone(),
                user_name,
                group_name,
                grant.email.clone().unwrap_or_default(),
                grant.id.clone(),
                grant.permissions.to_string(),
            ]
        })
        .collect()
}

/// Serialized CSV writer shared by the report pass.
pub struct ReportSink {
    path: PathBuf,
    writer: Mutex<AsyncWriter<File>>,
}

impl std::fmt::Debug for ReportSink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReportSink")
            .field("path", &self.path)
            .finish_non_exhaustive()
    }
}

impl ReportSink {
    /// Create (or truncate) the report file and write the header row.
    pub async fn create<P: AsRef<Path>>(path: P) -> Result<Self, ReportError> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent).await?;
            }
        }

        let file = File::create(&path).await?;
        let mut writer = AsyncWriterBuilder::new()
            .has_headers(false)
            .create_writer(file);
        writer.write_record(&REPORT_HEADER).await?;
        info!(path = %path.display(), "opened permissions report");

        Ok(Self {
            path,
            writer: Mutex::new(writer),
        })
    }

    /// Append the rows of one vault. Returns the number of rows written.
    pub async fn write_vault(&self, snapshot: &VaultAclSnapshot) -> Result<usize, ReportError> {
        let rows = rows_for(snapshot);
        let mut writer = self.writer.lock().await;
        for row in &rows {
            writer.write_record(row).await?;
        }
        debug!(vault = %snapshot.source_vault_name, rows = rows.len(), "report rows written");
        Ok(rows.len())
    }

    /// Flush buffered rows to disk.
    pub async fn finish(&self) -> Result<(), ReportError> {
        self.writer.lock().await.flush().await?;
        info!(path = %self.path.display(), "permissions report complete");
        Ok(())
    }
}
