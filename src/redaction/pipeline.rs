//! End-to-end redaction run: extract, detect, map, redact, save.

use std::ops::Range;

use tracing::{debug, error, info, warn};

use super::progress::{percent, CancellationToken, ProcessingProgress, ProgressObserver, Stage};
use super::resolver::PositionResolver;
use crate::detection::EntityDetector;
use crate::document::{
    error_document, Color, DocumentLoader, LopdfLoader, LopdfTextExtractor, PageDocument,
    PageText, TextExtractor,
};
use crate::domain::{CompiledTemplate, RedactionEntity, RedactionReport, RedactionTemplate};
use crate::error::RedactorResult;

/// Page count above which stages work through pages in chunks.
pub const DEFAULT_CHUNK_THRESHOLD: usize = 20;

/// Pages per chunk for large documents.
pub const DEFAULT_CHUNK_SIZE: usize = 5;

/// Scheduling knobs of a run. They never change the output.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PipelineOptions {
    pub chunk_threshold: usize,
    pub chunk_size: usize,
}

impl Default for PipelineOptions {
    fn default() -> Self {
        Self {
            chunk_threshold: DEFAULT_CHUNK_THRESHOLD,
            chunk_size: DEFAULT_CHUNK_SIZE,
        }
    }
}

impl PipelineOptions {
    /// Splits `page_count` pages into the chunks each stage iterates.
    pub fn chunks(&self, page_count: usize) -> Vec<Range<usize>> {
        if page_count == 0 {
            return Vec::new();
        }
        if page_count <= self.chunk_threshold {
            return vec![0..page_count];
        }

        let size = self.chunk_size.max(1);
        (0..page_count)
            .step_by(size)
            .map(|start| start..(start + size).min(page_count))
            .collect()
    }
}

/// How a run ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunStatus {
    /// Rectangles were drawn for at least one entity.
    Redacted,
    /// Nothing sensitive was found; the document carries analyzed markers.
    NoEntities,
    /// The document has no pages and was only labeled.
    EmptyDocument,
    /// The run failed after loading; the output is an error stub.
    ErrorStub { message: String },
}

/// Output of a finished run.
#[derive(Debug, Clone)]
pub struct RedactionOutcome {
    pub document: Vec<u8>,
    pub entities: Vec<RedactionEntity>,
    pub report: RedactionReport,
    pub status: RunStatus,
}

impl RedactionOutcome {
    fn new(document: Vec<u8>, entities: Vec<RedactionEntity>, status: RunStatus) -> Self {
        let report = RedactionReport::from_entities(&entities);
        Self {
            document,
            entities,
            report,
            status,
        }
    }

    /// Returns true when the output is the error stub.
    pub fn is_error_stub(&self) -> bool {
        matches!(self.status, RunStatus::ErrorStub { .. })
    }
}

/// Drives one document through every stage.
///
/// The structural model and the two extraction handles are separate parses
/// of the input bytes, so boxes drawn while redacting never leak back into
/// the text the resolver sees.
pub struct RedactionPipeline {
    loader: Box<dyn DocumentLoader>,
    extractor: Box<dyn TextExtractor>,
    detector: EntityDetector,
    resolver: PositionResolver,
    options: PipelineOptions,
}

impl RedactionPipeline {
    /// Pipeline with the lopdf loader and extractor.
    pub fn new(detector: EntityDetector) -> Self {
        Self {
            loader: Box::new(LopdfLoader::new()),
            extractor: Box::new(LopdfTextExtractor::new()),
            detector,
            resolver: PositionResolver::new(),
            options: PipelineOptions::default(),
        }
    }

    pub fn with_loader(mut self, loader: Box<dyn DocumentLoader>) -> Self {
        self.loader = loader;
        self
    }

    pub fn with_extractor(mut self, extractor: Box<dyn TextExtractor>) -> Self {
        self.extractor = extractor;
        self
    }

    pub fn with_options(mut self, options: PipelineOptions) -> Self {
        self.options = options;
        self
    }

    pub fn detector(&self) -> &EntityDetector {
        &self.detector
    }

    pub fn extractor(&self) -> &dyn TextExtractor {
        self.extractor.as_ref()
    }

    /// Runs the full pipeline over `bytes`.
    ///
    /// Template validation and document loading fail fast. Cancellation
    /// returns `Aborted` without saving anything. Any other failure after
    /// loading yields an error-stub document; only when the stub itself
    /// cannot be built does the original error reach the caller.
    pub fn run(
        &self,
        bytes: &[u8],
        template: &RedactionTemplate,
        observer: &dyn ProgressObserver,
        cancel: &CancellationToken,
    ) -> RedactorResult<RedactionOutcome> {
        let template = template.compile()?;
        let document = self.loader.load(bytes)?;

        let mut run = Run {
            pipeline: self,
            bytes,
            template: &template,
            observer,
            cancel,
            stage: Stage::Extracting,
        };

        match run.execute(document) {
            Ok(outcome) => Ok(outcome),
            Err(e) if e.is_abort() => {
                info!(stage = %run.stage, "redaction cancelled");
                observer.on_progress(&ProcessingProgress::new(Stage::Aborted, 100));
                Err(e)
            }
            Err(e) => {
                error!(stage = %run.stage, error = %e, "redaction failed, writing error document");
                observer.on_progress(&ProcessingProgress::new(Stage::Error, 100));
                let message = e.to_string();
                match error_document(&message) {
                    Ok(stub) => Ok(RedactionOutcome::new(
                        stub,
                        Vec::new(),
                        RunStatus::ErrorStub { message },
                    )),
                    Err(stub_err) => {
                        error!(error = %stub_err, "error document could not be built");
                        Err(e)
                    }
                }
            }
        }
    }
}

/// State of one run.
struct Run<'a> {
    pipeline: &'a RedactionPipeline,
    bytes: &'a [u8],
    template: &'a CompiledTemplate,
    observer: &'a dyn ProgressObserver,
    cancel: &'a CancellationToken,
    stage: Stage,
}

impl<'a> Run<'a> {
    fn emit(&self, progress: ProcessingProgress) {
        self.observer.on_progress(&progress);
    }

    fn enter(&mut self, stage: Stage) -> RedactorResult<()> {
        debug!(stage = %stage, "entering stage");
        self.stage = stage;
        self.cancel.check(stage)
    }

    fn execute(&mut self, mut document: Box<dyn PageDocument>) -> RedactorResult<RedactionOutcome> {
        let page_count = document.page_count();

        if page_count == 0 {
            info!("document has no pages");
            self.enter(Stage::Redacting)?;
            document.set_info("Subject", "Analyzed document - no pages")?;
            let bytes = document.save()?;
            self.emit(ProcessingProgress::new(Stage::Complete, 100).with_entities(0));
            return Ok(RedactionOutcome::new(bytes, Vec::new(), RunStatus::EmptyDocument));
        }

        let chunks = self.pipeline.options.chunks(page_count);
        debug!(pages = page_count, chunks = chunks.len(), "planned run");

        let texts = self.extract(document.as_ref(), &chunks)?;
        let mut entities = self.detect(&texts, &chunks)?;

        if entities.is_empty() {
            info!(pages = page_count, "no sensitive information found");
            return self.finish_without_entities(document);
        }

        self.map(document.as_ref(), &mut entities, &chunks)?;
        self.redact(document, entities)
    }

    /// Reading-order text of every page from the first handle.
    fn extract(
        &mut self,
        document: &dyn PageDocument,
        chunks: &[Range<usize>],
    ) -> RedactorResult<Vec<String>> {
        self.enter(Stage::Extracting)?;
        let page_count = document.page_count();
        let mut handle = self.pipeline.extractor.open(self.bytes)?;
        let mut texts = Vec::with_capacity(page_count);

        for (index, chunk) in chunks.iter().enumerate() {
            self.cancel.check(Stage::Extracting)?;
            for page in chunk.clone() {
                self.cancel.check(Stage::Extracting)?;
                let progress = |done| {
                    ProcessingProgress::new(Stage::Extracting, percent(done, page_count))
                        .with_page(page + 1, page_count)
                        .with_chunk(index, chunks.len())
                };
                self.emit(progress(page));

                let text = match handle.extract_page(page) {
                    Ok(page_text) => page_text.text,
                    Err(e) => {
                        warn!(page, error = %e, "text extraction failed, treating page as empty");
                        String::new()
                    }
                };
                texts.push(text);

                self.emit(progress(page + 1));
            }
        }

        handle.close();
        Ok(texts)
    }

    fn detect(
        &mut self,
        texts: &[String],
        chunks: &[Range<usize>],
    ) -> RedactorResult<Vec<RedactionEntity>> {
        self.enter(Stage::Detecting)?;
        let page_count = texts.len();
        let mut entities = Vec::new();

        for (index, chunk) in chunks.iter().enumerate() {
            self.cancel.check(Stage::Detecting)?;
            for page in chunk.clone() {
                self.cancel.check(Stage::Detecting)?;
                let progress = |done, found| {
                    ProcessingProgress::new(Stage::Detecting, percent(done, page_count))
                        .with_page(page + 1, page_count)
                        .with_entities(found)
                        .with_chunk(index, chunks.len())
                };
                self.emit(progress(page, entities.len()));

                let text = &texts[page];
                if !text.trim().is_empty() {
                    match self.pipeline.detector.detect(text, page, self.template, self.cancel) {
                        Ok(found) => {
                            debug!(page, entities = found.len(), "detected entities");
                            entities.extend(found);
                        }
                        Err(e) if e.is_abort() => return Err(e),
                        Err(e) => warn!(page, error = %e, "detection failed, page has no entities"),
                    }
                }

                self.emit(progress(page + 1, entities.len()));
            }
        }

        info!(entities = entities.len(), "detection finished");
        Ok(entities)
    }

    /// Attaches rectangles using a second, untouched extraction handle.
    fn map(
        &mut self,
        document: &dyn PageDocument,
        entities: &mut [RedactionEntity],
        chunks: &[Range<usize>],
    ) -> RedactorResult<()> {
        self.enter(Stage::Mapping)?;
        let mut handle = self.pipeline.extractor.open(self.bytes)?;

        for (index, chunk) in chunks.iter().enumerate() {
            self.cancel.check(Stage::Mapping)?;
            self.emit(
                ProcessingProgress::new(Stage::Mapping, percent(index, chunks.len()))
                    .with_chunk(index, chunks.len()),
            );

            for page in chunk.clone() {
                self.cancel.check(Stage::Mapping)?;
                if !entities.iter().any(|e| e.page == page) {
                    continue;
                }

                let page_text = match handle.extract_page(page) {
                    Ok(page_text) => page_text,
                    Err(e) => {
                        warn!(page, error = %e, "text extraction failed, page stays unredacted");
                        PageText::empty(page, document.page_size(page)?)
                    }
                };
                self.pipeline.resolver.resolve(&page_text, entities);
            }

            self.emit(
                ProcessingProgress::new(Stage::Mapping, percent(index + 1, chunks.len()))
                    .with_chunk(index, chunks.len()),
            );
        }

        handle.close();
        Ok(())
    }

    fn redact(
        &mut self,
        mut document: Box<dyn PageDocument>,
        entities: Vec<RedactionEntity>,
    ) -> RedactorResult<RedactionOutcome> {
        self.enter(Stage::Redacting)?;
        let total = entities.len();
        self.emit(ProcessingProgress::new(Stage::Redacting, 0).with_entities(total));

        let page_count = document.page_count();
        let mut drawn_per_page = vec![0usize; page_count];

        for entity in &entities {
            let Some(rects) = &entity.coordinates else {
                continue;
            };
            for rect in rects {
                document.draw_rectangle(entity.page, *rect, Color::BLACK, 1.0)?;
                drawn_per_page[entity.page] += 1;
            }
        }

        for (page, drawn) in drawn_per_page.iter().enumerate() {
            self.cancel.check(Stage::Redacting)?;
            if *drawn == 0 {
                stamp_analyzed(document.as_mut(), page)?;
            } else {
                let label = format!("{} REDACTION(S) APPLIED - PAGE {}", drawn, page + 1);
                document.draw_text(page, 30.0, 20.0, 8.0, Color::RED, &label)?;
            }
            debug!(page, rectangles = drawn, "redacted page");
        }

        document.draw_text(0, 50.0, 50.0, 16.0, Color::RED, "REDACTED DOCUMENT")?;
        document.draw_text(
            0,
            50.0,
            30.0,
            12.0,
            Color::RED,
            &format!("{} sensitive items redacted", total),
        )?;
        document.set_info("Subject", &format!("Redacted document - {} items removed", total))?;
        self.emit(ProcessingProgress::new(Stage::Redacting, 90).with_entities(total));

        self.cancel.check(Stage::Redacting)?;
        let bytes = document.save()?;
        self.emit(ProcessingProgress::new(Stage::Redacting, 95).with_entities(total));

        let outcome = RedactionOutcome::new(bytes, entities, RunStatus::Redacted);
        info!(
            entities = total,
            resolved = outcome.report.resolved_count(),
            "document redacted"
        );
        self.emit(ProcessingProgress::new(Stage::Redacting, 100).with_entities(total));
        self.emit(ProcessingProgress::new(Stage::Complete, 100).with_entities(total));
        Ok(outcome)
    }

    fn finish_without_entities(
        &mut self,
        mut document: Box<dyn PageDocument>,
    ) -> RedactorResult<RedactionOutcome> {
        self.enter(Stage::Redacting)?;
        self.emit(ProcessingProgress::new(Stage::Redacting, 0).with_entities(0));

        document.draw_text(
            0,
            50.0,
            50.0,
            14.0,
            Color::GREEN,
            "DOCUMENT ANALYZED - NO SENSITIVE INFORMATION FOUND",
        )?;
        for page in 0..document.page_count() {
            stamp_analyzed(document.as_mut(), page)?;
        }
        self.emit(ProcessingProgress::new(Stage::Redacting, 90).with_entities(0));

        self.cancel.check(Stage::Redacting)?;
        let bytes = document.save()?;
        self.emit(ProcessingProgress::new(Stage::Redacting, 95).with_entities(0));
        self.emit(ProcessingProgress::new(Stage::Redacting, 100).with_entities(0));
        self.emit(ProcessingProgress::new(Stage::Complete, 100).with_entities(0));

        Ok(RedactionOutcome::new(bytes, Vec::new(), RunStatus::NoEntities))
    }
}

fn stamp_analyzed(document: &mut dyn PageDocument, page: usize) -> RedactorResult<()> {
    document.draw_text(
        page,
        50.0,
        20.0,
        6.0,
        Color::GRAY,
        "ANALYZED - NO REDACTIONS NEEDED",
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_small_documents_use_one_chunk() {
        let options = PipelineOptions::default();
        assert_eq!(options.chunks(1), vec![0..1]);
        assert_eq!(options.chunks(20), vec![0..20]);
        assert!(options.chunks(0).is_empty());
    }

    #[test]
    fn test_large_documents_are_chunked() {
        let options = PipelineOptions::default();
        let chunks = options.chunks(23);
        assert_eq!(chunks, vec![0..5, 5..10, 10..15, 15..20, 20..23]);
        assert_eq!(options.chunks(25).len(), 5);
    }

    #[test]
    fn test_zero_chunk_size_is_treated_as_one() {
        let options = PipelineOptions {
            chunk_threshold: 0,
            chunk_size: 0,
        };
        assert_eq!(options.chunks(3).len(), 3);
    }

    #[test]
    fn test_outcome_builds_report() {
        let outcome = RedactionOutcome::new(Vec::new(), Vec::new(), RunStatus::NoEntities);
        assert_eq!(outcome.report.total_entities, 0);
        assert!(!outcome.is_error_stub());
    }
}
