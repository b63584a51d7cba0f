//! Error types for the redaction pipeline.
//!
//! Errors are grouped by the pipeline step that raised them. Per-page and
//! per-entity failures are normally recovered inside the pipeline; only
//! document-load failures, cancellation and a failed error-stub fallback ever
//! reach the caller.

use std::io;
use std::path::PathBuf;

use crate::redaction::Stage;

/// Result type alias for redaction operations.
pub type RedactorResult<T> = Result<T, RedactorError>;

/// Error type for all redaction operations.
#[derive(Debug, thiserror::Error)]
pub enum RedactorError {
    /// Error occurred while reading or writing files
    #[error("IO error for path '{}': {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// Input bytes could not be parsed as a page-container document
    #[error("failed to load document: {message}")]
    DocumentLoad {
        message: String,
        #[source]
        source: Option<lopdf::Error>,
    },

    /// Text could not be extracted (whole handle or a single page)
    #[error("text extraction failed{}: {reason}", page_suffix(.page))]
    Extraction { page: Option<usize>, reason: String },

    /// Entity detection backend failed for one page
    #[error("entity detection failed on page {}: {reason}", .page + 1)]
    Detection { page: usize, reason: String },

    /// No rectangle could be derived for an entity
    #[error("could not resolve position of '{text}' on page {}", .page + 1)]
    PositionResolution { text: String, page: usize },

    /// Run was cancelled through its cancellation token
    #[error("redaction aborted during {stage}")]
    Aborted { stage: Stage },

    /// Output document could not be serialized
    #[error("failed to save document: {message}")]
    Save {
        message: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// Pattern matching or regex compilation error
    #[error("Pattern error for '{pattern}': {reason}")]
    PatternError { pattern: String, reason: String },

    /// Template failed validation
    #[error("invalid template '{template}': {reason}")]
    InvalidTemplate { template: String, reason: String },

    /// Template id unknown to the store
    #[error("template '{id}' not found")]
    TemplateNotFound { id: String },

    /// Invalid configuration or parameters
    #[error("Invalid input for '{parameter}': {reason}")]
    InvalidInput { parameter: String, reason: String },

    /// Configuration file or environment could not be read
    #[error("configuration error: {reason}")]
    Config { reason: String },

    /// Backend-specific error (lopdf, printpdf, HTTP, ...)
    #[error("{backend} backend error: {message}")]
    BackendError {
        backend: String,
        message: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },
}

fn page_suffix(page: &Option<usize>) -> String {
    page.map(|p| format!(" on page {}", p + 1)).unwrap_or_default()
}

impl RedactorError {
    /// Returns true when the error is the cancellation signal rather than a failure.
    pub fn is_abort(&self) -> bool {
        matches!(self, Self::Aborted { .. })
    }

    /// Returns true for errors the pipeline never recovers from.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Self::DocumentLoad { .. } | Self::Save { .. } | Self::Aborted { .. }
        )
    }

    pub(crate) fn backend(
        backend: &str,
        message: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self::BackendError {
            backend: backend.to_string(),
            message: message.into(),
            source: Some(Box::new(source)),
        }
    }
}

// Conversion implementations for common error types
impl From<io::Error> for RedactorError {
    fn from(source: io::Error) -> Self {
        Self::Io {
            path: PathBuf::from("<unknown>"),
            source,
        }
    }
}

impl From<regex::Error> for RedactorError {
    fn from(err: regex::Error) -> Self {
        Self::PatternError {
            pattern: "<unknown>".to_string(),
            reason: err.to_string(),
        }
    }
}

impl From<serde_json::Error> for RedactorError {
    fn from(err: serde_json::Error) -> Self {
        Self::backend("serde_json", err.to_string(), err)
    }
}
