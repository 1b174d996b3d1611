//! Core identity mapping logic.
//!
//! [`IdentityMapper`] translates source-account emails to their
//! destination-account equivalents. Loaded once per run and shared
//! read-only between every vault pipeline.

use std::collections::HashMap;

use tracing::{debug, info};

use super::mapping_file::MappingFile;
use crate::config::IdentityConfig;
use crate::errors::IdentityError;

/// Source email -> destination email. Unmapped emails resolve to
/// themselves.
#[derive(Debug, Clone, Default)]
pub struct IdentityMapper {
    entries: HashMap<String, String>,
}

impl IdentityMapper {
    /// An empty mapper: every email passes through unchanged.
    pub fn passthrough() -> Self {
        Self::default()
    }

    /// Build a mapper from explicit pairs (later pairs win).
    pub fn from_pairs<I, S, D>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (S, D)>,
        S: Into<String>,
        D: Into<String>,
    {
        Self {
            entries: pairs
                .into_iter()
                .map(|(s, d)| (s.into(), d.into()))
                .collect(),
        }
    }

    /// Create a mapper from an [`IdentityConfig`].
    ///
    /// A configured mapping file must exist and parse; with no file
    /// configured the mapper is a pure passthrough.
    pub async fn load(config: &IdentityConfig) -> Result<Self, IdentityError> {
        info!("initializing identity mapper");

        let entries = match &config.mapping_file {
            Some(path) => MappingFile::load(path).await?,
            None => {
                debug!("no mapping file configured, emails pass through unchanged");
                HashMap::new()
            }
        };

        Ok(Self { entries })
    }

    /// Map a source email to the destination email.
    ///
    /// Total: an unmapped email is returned unchanged.
    pub fn resolve(&self, source_email: &str) -> String {
        match self.entries.get(source_email) {
            Some(destination) => {
                debug!(source_email, destination = %destination, "mapped identity");
                destination.clone()
            }
            None => {
                info!(source_email, "no identity mapping, using source email");
                source_email.to_string()
            }
        }
    }

    /// The explicit mapping for `source_email`, if there is one.
    pub fn lookup(&self, source_email: &str) -> Option<&str> {
        self.entries.get(source_email).map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
