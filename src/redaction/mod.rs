//! Redaction pipeline and the service layer around it.
//!
//! [`RedactionPipeline`] runs one document through extraction, detection,
//! position resolution and drawing. [`RedactionService`] wires a pipeline to
//! a template store and adds file-based entry points.

pub mod pipeline;
pub mod preview;
pub mod progress;
pub mod resolver;

pub use pipeline::{
    PipelineOptions, RedactionOutcome, RedactionPipeline, RunStatus, DEFAULT_CHUNK_SIZE,
    DEFAULT_CHUNK_THRESHOLD,
};
pub use preview::{sample_pages, PreviewResult};
pub use progress::{
    CancellationToken, ChunkInfo, NoProgress, ProcessingProgress, ProgressObserver, Stage,
};
pub use resolver::PositionResolver;

use crate::config::RedactorConfig;
use crate::detection::{EntityDetector, HttpDetectionBackend};
use crate::document::{extract_plain_text, PageText};
use crate::domain::{
    BuiltinTemplates, JsonTemplateStore, RedactionEntity, RedactionTemplate, TemplateStore,
};
use crate::error::{RedactorError, RedactorResult};
use std::fs;
use std::path::Path;
use tracing::info;

/// Redaction service coordinating templates and pipeline runs.
pub struct RedactionService {
    pipeline: RedactionPipeline,
    templates: Box<dyn TemplateStore>,
}

impl RedactionService {
    /// Creates a service running `pipeline` with templates from `templates`.
    pub fn new(pipeline: RedactionPipeline, templates: Box<dyn TemplateStore>) -> Self {
        Self {
            pipeline,
            templates,
        }
    }

    /// Creates a service that detects with pattern rules only and uses the
    /// built-in templates.
    pub fn with_pattern_detection() -> Self {
        Self::new(
            RedactionPipeline::new(EntityDetector::patterns_only()),
            Box::new(BuiltinTemplates::new()),
        )
    }

    /// Builds the service described by `config`.
    ///
    /// A configured endpoint enables remote detection; a configured
    /// templates file replaces the built-in templates.
    pub fn from_config(config: &RedactorConfig) -> RedactorResult<Self> {
        config.validate()?;

        let detector = match &config.detector.endpoint {
            Some(endpoint) => {
                info!(endpoint = %endpoint, "using remote entity detection");
                let backend = HttpDetectionBackend::new(endpoint, config.detector.timeout_secs)?;
                EntityDetector::new(Box::new(backend))
            }
            None => EntityDetector::patterns_only(),
        }
        .with_context(config.detector.context.clone());

        let templates: Box<dyn TemplateStore> = match &config.templates_path {
            Some(path) => Box::new(JsonTemplateStore::from_path(path)?),
            None => Box::new(BuiltinTemplates::new()),
        };

        let pipeline = RedactionPipeline::new(detector).with_options(config.pipeline_options());
        Ok(Self::new(pipeline, templates))
    }

    pub fn pipeline(&self) -> &RedactionPipeline {
        &self.pipeline
    }

    pub fn templates(&self) -> &dyn TemplateStore {
        self.templates.as_ref()
    }

    /// Looks up a template, falling back to the default id when `id` is `None`.
    pub fn template(&self, id: Option<&str>) -> RedactorResult<RedactionTemplate> {
        self.templates.get(id.unwrap_or(BuiltinTemplates::DEFAULT_ID))
    }

    /// Redacts a document held in memory.
    ///
    /// # Arguments
    /// * `bytes` - Input document
    /// * `template_id` - Template to apply, the default template when `None`
    /// * `observer` - Receives progress events
    /// * `cancel` - Checked at every page and chunk
    ///
    /// # Returns
    /// The redacted document with its entities and report
    pub fn redact(
        &self,
        bytes: &[u8],
        template_id: Option<&str>,
        observer: &dyn ProgressObserver,
        cancel: &CancellationToken,
    ) -> RedactorResult<RedactionOutcome> {
        let template = self.template(template_id)?;
        self.pipeline.run(bytes, &template, observer, cancel)
    }

    /// Redacts `input` and writes the result to `output`.
    pub fn redact_file(
        &self,
        input: &Path,
        output: &Path,
        template_id: Option<&str>,
        observer: &dyn ProgressObserver,
        cancel: &CancellationToken,
    ) -> RedactorResult<RedactionOutcome> {
        let bytes = read_input(input)?;
        let outcome = self.redact(&bytes, template_id, observer, cancel)?;
        crate::store::download_redacted_pdf(&outcome.document, output)?;
        Ok(outcome)
    }

    /// Estimates the entity count from sampled pages.
    pub fn preview(
        &self,
        bytes: &[u8],
        template_id: Option<&str>,
        cancel: &CancellationToken,
    ) -> RedactorResult<PreviewResult> {
        let template = self.template(template_id)?;
        preview::preview(
            self.pipeline.extractor(),
            self.pipeline.detector(),
            bytes,
            &template,
            cancel,
        )
    }

    /// Detects entities on one page of text; an empty backend answer also
    /// falls back to the pattern rules.
    pub fn detect_entities(
        &self,
        text: &str,
        page: usize,
        template_id: Option<&str>,
    ) -> RedactorResult<Vec<RedactionEntity>> {
        let template = self.template(template_id)?.compile()?;
        self.pipeline
            .detector()
            .detect_entities(text, page, &template, &CancellationToken::new())
    }

    /// Extracts the whole document as plain text.
    pub fn extract_text(&self, input: &Path) -> RedactorResult<String> {
        extract_plain_text(&read_input(input)?)
    }

    /// Extracts one page in reading order with fragment positions.
    pub fn extract_page(&self, bytes: &[u8], page: usize) -> RedactorResult<PageText> {
        let mut handle = self.pipeline.extractor().open(bytes)?;
        let result = handle.extract_page(page);
        handle.close();
        result
    }
}

fn read_input(input: &Path) -> RedactorResult<Vec<u8>> {
    fs::read(input).map_err(|source| RedactorError::Io {
        path: input.to_path_buf(),
        source,
    })
}
