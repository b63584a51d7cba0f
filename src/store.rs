//! Hand-off of finished runs to a document store, and save-as of output bytes.

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::info;

use crate::domain::RedactionReport;
use crate::error::{RedactorError, RedactorResult};

/// Record stored for a redacted document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RedactionRecord {
    pub redacted_url: String,
    pub entities_found: usize,
}

/// Receives the results of successful runs, keyed by document id.
pub trait DocumentStore {
    /// Stores the output document and its report, returning the stored record.
    fn save_redaction(
        &self,
        document_id: &str,
        document: &[u8],
        report: &RedactionReport,
    ) -> RedactorResult<RedactionRecord>;
}

/// Stores every run as files in one directory:
/// `<id>.pdf`, `<id>.json` (the record) and `<id>.report.json`.
#[derive(Debug, Clone)]
pub struct DirectoryDocumentStore {
    root: PathBuf,
}

impl DirectoryDocumentStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn path_for(&self, document_id: &str, suffix: &str) -> PathBuf {
        self.root.join(format!("{}{}", document_id, suffix))
    }
}

fn validate_id(document_id: &str) -> RedactorResult<()> {
    let valid = !document_id.is_empty()
        && document_id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'))
        && !document_id.starts_with('.');

    if valid {
        Ok(())
    } else {
        Err(RedactorError::InvalidInput {
            parameter: "document_id".to_string(),
            reason: format!("'{}' is not a valid document id", document_id),
        })
    }
}

fn write_file(path: &Path, contents: &[u8]) -> RedactorResult<()> {
    fs::write(path, contents).map_err(|source| RedactorError::Io {
        path: path.to_path_buf(),
        source,
    })
}

impl DocumentStore for DirectoryDocumentStore {
    fn save_redaction(
        &self,
        document_id: &str,
        document: &[u8],
        report: &RedactionReport,
    ) -> RedactorResult<RedactionRecord> {
        validate_id(document_id)?;
        fs::create_dir_all(&self.root).map_err(|source| RedactorError::Io {
            path: self.root.clone(),
            source,
        })?;

        let pdf_path = self.path_for(document_id, ".pdf");
        write_file(&pdf_path, document)?;

        let record = RedactionRecord {
            redacted_url: pdf_path.display().to_string(),
            entities_found: report.total_entities,
        };
        write_file(
            &self.path_for(document_id, ".json"),
            serde_json::to_string_pretty(&record)?.as_bytes(),
        )?;
        write_file(
            &self.path_for(document_id, ".report.json"),
            serde_json::to_string_pretty(report)?.as_bytes(),
        )?;

        info!(document = document_id, entities = record.entities_found, "stored redaction");
        Ok(record)
    }
}

/// Writes the redacted output to `path`, creating parent directories.
pub fn download_redacted_pdf(bytes: &[u8], path: &Path) -> RedactorResult<()> {
    if let Some(dir) = path.parent().filter(|d| !d.as_os_str().is_empty()) {
        fs::create_dir_all(dir).map_err(|source| RedactorError::Io {
            path: dir.to_path_buf(),
            source,
        })?;
    }
    write_file(path, bytes)
}
