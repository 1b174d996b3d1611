//! CSV identity mapping file reader.
//!
//! The mapping file has a header row followed by exactly two columns per
//! row:
//!
//! ```text
//! source email,destination email
//! alice@old.co,alice@new.co
//! bob@old.co , robert@new.co
//! ```
//!
//! Surrounding whitespace is trimmed. A row with any other number of
//! fields, or a source email mapped to two different destinations, fails
//! the whole load.

use std::collections::HashMap;
use std::path::Path;

use futures::StreamExt;
use tokio::io::AsyncRead;
use tracing::{debug, info};

use crate::errors::IdentityError;

/// Utilities for loading the identity mapping file.
pub struct MappingFile;

impl MappingFile {
    /// Load the mapping file from disk and return source -> destination.
    pub async fn load<P: AsRef<Path>>(path: P) -> Result<HashMap<String, String>, IdentityError> {
        let path = path.as_ref();
        info!(path = %path.display(), "loading identity mapping file");

        if !tokio::fs::try_exists(path).await.unwrap_or(false) {
            return Err(IdentityError::MappingFileError {
                path: path.display().to_string(),
                detail: "file not found".into(),
            });
        }

        let file = tokio::fs::File::open(path).await?;
        let mappings = Self::read(file).await?;

        debug!(count = mappings.len(), "loaded identity mappings");
        Ok(mappings)
    }

    /// Read mappings from any async source.
    pub async fn read<R>(reader: R) -> Result<HashMap<String, String>, IdentityError>
    where
        R: AsyncRead + Unpin + Send,
    {
        let mut rdr = csv_async::AsyncReaderBuilder::new()
            .has_headers(true)
            .flexible(true)
            .trim(csv_async::Trim::All)
            .create_reader(reader);

        let mut mappings: HashMap<String, String> = HashMap::new();
        let mut records = rdr.records();
        while let Some(record) = records.next().await {
            let record = record.map_err(|e| IdentityError::ParseError(e.to_string()))?;
            let line = record.position().map(|p| p.line()).unwrap_or(0);

            if record.len() != 2 {
                return Err(IdentityError::MalformedRow {
                    line,
                    fields: record.len(),
                });
            }

            let source = record[0].to_string();
            let destination = record[1].to_string();
            match mappings.get(&source) {
                Some(existing) if *existing != destination => {
                    return Err(IdentityError::DuplicateSource {
                        line,
                        email: source,
                        existing: existing.clone(),
                    });
                }
                Some(_) => {
                    debug!(line, source = %source, "repeated identical mapping");
                }
                None => {
                    mappings.insert(source, destination);
                }
            }
        }

        Ok(mappings)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_load_mapping_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("emailmap.csv");
        std::fs::write(
            &path,
            "source,destination\nalice@old.co,alice@new.co\n  bob@old.co , robert@new.co \n",
        )
        .unwrap();

        let mappings = MappingFile::load(&path).await.unwrap();
        assert_eq!(mappings.len(), 2);
        assert_eq!(mappings["alice@old.co"], "alice@new.co");
        assert_eq!(mappings["bob@old.co"], "robert@new.co");
    }

    #[tokio::test]
    async fn test_header_only() {
        let mappings = MappingFile::read("source,destination\n".as_bytes())
            .await
            .unwrap();
        assert!(mappings.is_empty());
    }

    #[tokio::test]
    async fn test_wrong_arity_names_line() {
        let input = "source,destination\na@old.co,a@new.co\nb@old.co,b@new.co,extra\n";
        let result = MappingFile::read(input.as_bytes()).await;
        assert!(matches!(
            result,
            Err(IdentityError::MalformedRow { line: 3, fields: 3 })
        ));

        let input = "source,destination\nlonely@old.co\n";
        let result = MappingFile::read(input.as_bytes()).await;
        assert!(matches!(
            result,
            Err(IdentityError::MalformedRow { line: 2, fields: 1 })
        ));
    }

    #[tokio::test]
    async fn test_conflicting_duplicate_is_rejected() {
        let input = "s,d\na@old.co,a@new.co\na@old.co,other@new.co\n";
        let result = MappingFile::read(input.as_bytes()).await;
        match result {
            Err(IdentityError::DuplicateSource {
                line,
                email,
                existing,
            }) => {
                assert_eq!(line, 3);
                assert_eq!(email, "a@old.co");
                assert_eq!(existing, "a@new.co");
            }
            other => panic!("unexpected result: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_identical_duplicate_is_accepted() {
        let input = "s,d\na@old.co,a@new.co\na@old.co,a@new.co\n";
        let mappings = MappingFile::read(input.as_bytes()).await.unwrap();
        assert_eq!(mappings.len(), 1);
    }

    #[tokio::test]
    async fn test_load_nonexistent() {
        let result = MappingFile::load("/nonexistent/emailmap.csv").await;
        assert!(matches!(
            result,
            Err(IdentityError::MappingFileError { .. })
        ));
    }
}
