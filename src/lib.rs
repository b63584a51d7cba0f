//! Template-driven PDF redaction with entity detection and position resolution.
//!
//! This library finds sensitive text in PDF documents (names, emails, phone
//! numbers, study identifiers, addresses, dates, confidentiality markers),
//! maps every finding to a rectangle on its page and burns opaque boxes into
//! a new copy of the document.
//!
//! # Features
//!
//! - **Remote or local detection**: an HTTP classification backend with a
//!   deterministic pattern-rule fallback
//! - **Position resolution**: exact, case-insensitive, token and heuristic
//!   matching of entity text against positioned text fragments
//! - **Templates**: named category sets deciding what a run redacts
//! - **Large documents**: chunked stages, progress events and cooperative
//!   cancellation
//! - **Preview**: entity-count estimate from sampled pages
//!
//! # Architecture
//!
//! - [`domain`]: entities, reports, templates and the fallback pattern rules
//! - [`document`]: lopdf-backed structural model and text extraction
//! - [`detection`]: detection backends and the entity detector
//! - [`redaction`]: pipeline orchestrator, position resolver, preview and service layer
//! - [`config`]: runtime configuration
//! - [`store`]: document store hand-off and save-as
//! - [`error`]: error taxonomy
//!
//! # Quick Start
//!
//! ```no_run
//! use pdf_redactor::{CancellationToken, NoProgress, RedactionService};
//! use std::path::Path;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let service = RedactionService::with_pattern_detection();
//!
//! let outcome = service.redact_file(
//!     Path::new("protocol.pdf"),
//!     Path::new("protocol-redacted.pdf"),
//!     Some("pharma-default"),
//!     &NoProgress,
//!     &CancellationToken::new(),
//! )?;
//! println!("{} entities redacted", outcome.report.total_entities);
//! # Ok(())
//! # }
//! ```
//!
//! # Examples
//!
//! ## Preview Before Redacting
//!
//! ```no_run
//! use pdf_redactor::{CancellationToken, RedactionService};
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let service = RedactionService::with_pattern_detection();
//! let bytes = std::fs::read("protocol.pdf")?;
//!
//! let preview = service.preview(&bytes, None, &CancellationToken::new())?;
//! println!(
//!     "~{} entities across {} pages",
//!     preview.total_entities_estimate, preview.page_count
//! );
//! # Ok(())
//! # }
//! ```
//!
//! ## Pattern Rules
//!
//! ```
//! use pdf_redactor::domain::{BuiltinTemplates, FallbackRules, TemplateStore};
//!
//! let template = BuiltinTemplates::new().get("minimal-pii").unwrap().compile().unwrap();
//! let entities = FallbackRules::new().detect("Mail jane.smith@example.com", 0, &template);
//! assert_eq!(entities.len(), 1);
//! ```

// Public API
pub mod config;
pub mod detection;
pub mod document;
pub mod domain;
pub mod error;
pub mod redaction;
pub mod store;

// Re-exports for convenient access
pub use config::RedactorConfig;
pub use detection::{DetectionBackend, EntityDetector, HttpDetectionBackend};
pub use domain::{EntityType, Rectangle, RedactionEntity, RedactionReport, RedactionTemplate};
pub use error::{RedactorError, RedactorResult};
pub use redaction::{
    CancellationToken, NoProgress, PipelineOptions, PositionResolver, PreviewResult,
    ProcessingProgress, ProgressObserver, RedactionOutcome, RedactionPipeline, RedactionService,
    RunStatus, Stage,
};
pub use store::{download_redacted_pdf, DirectoryDocumentStore, DocumentStore};
