//! Run stages, progress events and cooperative cancellation.

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use serde::Serialize;

use crate::error::{RedactorError, RedactorResult};

/// Pipeline state. `Complete`, `Aborted` and `Error` are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Stage {
    Extracting,
    Detecting,
    Mapping,
    Redacting,
    Complete,
    Aborted,
    Error,
}

impl Stage {
    pub fn as_str(&self) -> &'static str {
        match self {
            Stage::Extracting => "extracting",
            Stage::Detecting => "detecting",
            Stage::Mapping => "mapping",
            Stage::Redacting => "redacting",
            Stage::Complete => "complete",
            Stage::Aborted => "aborted",
            Stage::Error => "error",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Stage::Complete | Stage::Aborted | Stage::Error)
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(self.as_str())
    }
}

/// Position of a chunk among the chunks of a stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ChunkInfo {
    pub index: usize,
    pub count: usize,
}

/// Status snapshot emitted while a run progresses.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProcessingProgress {
    pub stage: Stage,
    /// Percent complete within the current stage, 0 to 100.
    pub progress: u8,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub page: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub total_pages: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub entities_found: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub chunk: Option<ChunkInfo>,
}

impl ProcessingProgress {
    pub fn new(stage: Stage, progress: u8) -> Self {
        Self {
            stage,
            progress: progress.min(100),
            page: None,
            total_pages: None,
            entities_found: None,
            chunk: None,
        }
    }

    pub fn with_page(mut self, page: usize, total_pages: usize) -> Self {
        self.page = Some(page);
        self.total_pages = Some(total_pages);
        self
    }

    pub fn with_entities(mut self, entities_found: usize) -> Self {
        self.entities_found = Some(entities_found);
        self
    }

    pub fn with_chunk(mut self, index: usize, count: usize) -> Self {
        self.chunk = Some(ChunkInfo { index, count });
        self
    }
}

/// Percentage of `done` out of `total`, 100 for an empty total.
pub(crate) fn percent(done: usize, total: usize) -> u8 {
    if total == 0 {
        return 100;
    }
    ((done.min(total) * 100) / total) as u8
}

/// Receives progress events of one run.
pub trait ProgressObserver {
    fn on_progress(&self, progress: &ProcessingProgress);
}

impl<F> ProgressObserver for F
where
    F: Fn(&ProcessingProgress),
{
    fn on_progress(&self, progress: &ProcessingProgress) {
        self(progress)
    }
}

/// Observer that drops every event.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoProgress;

impl ProgressObserver for NoProgress {
    fn on_progress(&self, _progress: &ProcessingProgress) {}
}

/// Shared cancellation flag checked at the top of every page and chunk.
///
/// Clones share the flag, so one clone can be handed to another thread
/// (or a signal handler) while the run holds the other.
#[derive(Debug, Clone, Default)]
pub struct CancellationToken {
    cancelled: Arc<AtomicBool>,
}

impl CancellationToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }

    /// Returns `Aborted` for `stage` once cancellation was requested.
    pub fn check(&self, stage: Stage) -> RedactorResult<()> {
        if self.is_cancelled() {
            Err(RedactorError::Aborted { stage })
        } else {
            Ok(())
        }
    }
}
