//! Entity detection: a remote classification backend with a deterministic
//! pattern-rule fallback.

mod http;

pub use http::HttpDetectionBackend;

use std::sync::mpsc::{self, RecvTimeoutError};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::domain::{CompiledTemplate, EntityType, FallbackRules, RedactionEntity};
use crate::error::{RedactorError, RedactorResult};
use crate::redaction::{CancellationToken, Stage};

/// Confidence assigned to remote spans that carry none.
pub const DEFAULT_CONFIDENCE: f64 = 0.9;

/// Default domain hint sent with every request.
pub const DEFAULT_CONTEXT: &str = "pharmaceutical";

/// How often a pending backend call looks at the cancellation token.
const CANCEL_POLL_INTERVAL: Duration = Duration::from_millis(50);

/// Body of one detection call.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DetectionRequest<'a> {
    pub text: &'a str,
    /// One-based page number.
    pub page_number: usize,
    pub context: &'a str,
    pub template_id: &'a str,
}

/// One span returned by a detection backend.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct DetectedSpan {
    pub text: String,
    #[serde(alias = "type")]
    pub category: String,
    pub start: usize,
    pub end: usize,
    #[serde(default)]
    pub confidence: Option<f64>,
}

/// A remote entity classifier.
pub trait DetectionBackend: Send + Sync {
    /// Classifies one page of text. Any failure is reported as an error and
    /// handled by the caller.
    fn detect(&self, request: &DetectionRequest<'_>) -> RedactorResult<Vec<DetectedSpan>>;

    /// Short name used in logs.
    fn name(&self) -> &str;
}

/// Finds sensitive spans in page text.
pub struct EntityDetector {
    backend: Option<Arc<dyn DetectionBackend>>,
    rules: FallbackRules,
    context: String,
}

impl EntityDetector {
    /// Detector that asks `backend` first and falls back to pattern rules.
    pub fn new(backend: Box<dyn DetectionBackend>) -> Self {
        Self {
            backend: Some(Arc::from(backend)),
            rules: FallbackRules::new(),
            context: DEFAULT_CONTEXT.to_string(),
        }
    }

    /// Detector that only runs the pattern rules.
    pub fn patterns_only() -> Self {
        Self {
            backend: None,
            rules: FallbackRules::new(),
            context: DEFAULT_CONTEXT.to_string(),
        }
    }

    pub fn with_context(mut self, context: impl Into<String>) -> Self {
        self.context = context.into();
        self
    }

    pub fn has_backend(&self) -> bool {
        self.backend.is_some()
    }

    /// Detects entities on one page.
    ///
    /// The backend result is used as returned, even when empty; the pattern
    /// rules run only when there is no backend or the call fails. The call
    /// runs on a worker thread; cancelling abandons it and discards its
    /// result.
    pub fn detect(
        &self,
        text: &str,
        page: usize,
        template: &CompiledTemplate,
        cancel: &CancellationToken,
    ) -> RedactorResult<Vec<RedactionEntity>> {
        self.detect_with(text, page, template, cancel, false)
    }

    /// Like [`detect`](Self::detect), but an empty backend answer also
    /// falls back to the pattern rules.
    pub fn detect_entities(
        &self,
        text: &str,
        page: usize,
        template: &CompiledTemplate,
        cancel: &CancellationToken,
    ) -> RedactorResult<Vec<RedactionEntity>> {
        self.detect_with(text, page, template, cancel, true)
    }

    /// Runs the pattern rules only.
    pub fn fallback(&self, text: &str, page: usize, template: &CompiledTemplate) -> Vec<RedactionEntity> {
        self.rules.detect(text, page, template)
    }

    fn detect_with(
        &self,
        text: &str,
        page: usize,
        template: &CompiledTemplate,
        cancel: &CancellationToken,
        fallback_on_empty: bool,
    ) -> RedactorResult<Vec<RedactionEntity>> {
        cancel.check(Stage::Detecting)?;

        let Some(backend) = &self.backend else {
            return Ok(self.fallback(text, page, template));
        };

        let result = self.call_backend(backend, text, page, &template.id, cancel)?;
        cancel.check(Stage::Detecting)?;

        match result {
            Ok(spans) if spans.is_empty() && fallback_on_empty => {
                debug!(page, backend = backend.name(), "backend found nothing, using pattern rules");
                Ok(self.fallback(text, page, template))
            }
            Ok(spans) => {
                debug!(page, backend = backend.name(), spans = spans.len(), "backend detection");
                Ok(spans_to_entities(spans, page))
            }
            Err(e) => {
                warn!(page, backend = backend.name(), error = %e, "detection backend failed, using pattern rules");
                Ok(self.fallback(text, page, template))
            }
        }
    }
}

impl EntityDetector {
    /// Runs one backend call on a worker thread while polling `cancel`.
    ///
    /// The outer result carries an abort; the inner one is the backend's own
    /// answer. An abandoned worker finishes in the background and its result
    /// is dropped.
    fn call_backend(
        &self,
        backend: &Arc<dyn DetectionBackend>,
        text: &str,
        page: usize,
        template_id: &str,
        cancel: &CancellationToken,
    ) -> RedactorResult<RedactorResult<Vec<DetectedSpan>>> {
        let (tx, rx) = mpsc::channel();
        let worker = Arc::clone(backend);
        let text = text.to_string();
        let context = self.context.clone();
        let template_id = template_id.to_string();

        let spawned = thread::Builder::new()
            .name(format!("detect-page-{}", page + 1))
            .spawn(move || {
                let request = DetectionRequest {
                    text: &text,
                    page_number: page + 1,
                    context: &context,
                    template_id: &template_id,
                };
                let _ = tx.send(worker.detect(&request));
            });
        if let Err(e) = spawned {
            return Ok(Err(RedactorError::backend(
                backend.name(),
                "failed to start detection worker",
                e,
            )));
        }

        loop {
            match rx.recv_timeout(CANCEL_POLL_INTERVAL) {
                Ok(result) => return Ok(result),
                Err(RecvTimeoutError::Timeout) => {
                    if cancel.is_cancelled() {
                        debug!(page, backend = backend.name(), "abandoning in-flight detection call");
                        return Err(RedactorError::Aborted {
                            stage: Stage::Detecting,
                        });
                    }
                }
                Err(RecvTimeoutError::Disconnected) => {
                    return Ok(Err(RedactorError::Detection {
                        page,
                        reason: "detection worker stopped without an answer".to_string(),
                    }))
                }
            }
        }
    }
}

fn spans_to_entities(spans: Vec<DetectedSpan>, page: usize) -> Vec<RedactionEntity> {
    spans
        .into_iter()
        .filter(|span| {
            let valid = span.start <= span.end && !span.text.trim().is_empty();
            if !valid {
                warn!(page, start = span.start, end = span.end, "dropping malformed span");
            }
            valid
        })
        .map(|span| {
            let confidence = span
                .confidence
                .filter(|c| *c > 0.0)
                .unwrap_or(DEFAULT_CONFIDENCE)
                .min(1.0);
            RedactionEntity::new(
                format!("api-{}-{}-{}", page, span.start, span.end),
                span.text,
                EntityType::from_category(&span.category),
                page,
                (span.start, span.end),
                confidence,
            )
        })
        .collect()
}
