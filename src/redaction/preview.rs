//! Fast entity-count estimate from a few sampled pages.

use serde::Serialize;
use tracing::{debug, warn};

use super::progress::CancellationToken;
use crate::detection::EntityDetector;
use crate::document::TextExtractor;
use crate::domain::{RedactionEntity, RedactionTemplate};
use crate::error::RedactorResult;

/// Result of a preview run.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PreviewResult {
    pub total_entities_estimate: usize,
    pub preview_entities: Vec<RedactionEntity>,
    pub page_count: usize,
    /// Zero-based indices of the sampled pages.
    pub sample_pages: Vec<usize>,
}

/// Pages sampled for a document of `page_count` pages: all of them for
/// three or fewer, otherwise the first, middle and last.
pub fn sample_pages(page_count: usize) -> Vec<usize> {
    if page_count <= 3 {
        (0..page_count).collect()
    } else {
        vec![0, page_count / 2, page_count - 1]
    }
}

/// Scales the sampled density to the whole document.
fn estimate(found: usize, samples: usize, page_count: usize) -> usize {
    if samples == 0 {
        return 0;
    }
    (found as f64 / samples as f64 * page_count as f64).round() as usize
}

/// Runs extraction and detection on the sample pages only.
///
/// Opens and closes its own extraction handle; the source bytes are never
/// modified and nothing is resolved or drawn.
pub fn preview(
    extractor: &dyn TextExtractor,
    detector: &EntityDetector,
    bytes: &[u8],
    template: &RedactionTemplate,
    cancel: &CancellationToken,
) -> RedactorResult<PreviewResult> {
    let template = template.compile()?;
    let mut handle = extractor.open(bytes)?;
    let page_count = handle.page_count();
    let samples = sample_pages(page_count);

    let mut preview_entities = Vec::new();
    for &page in &samples {
        let text = match handle.extract_page(page) {
            Ok(page_text) => page_text.text,
            Err(e) => {
                warn!(page, error = %e, "text extraction failed, sampling page as empty");
                continue;
            }
        };
        if text.trim().is_empty() {
            continue;
        }

        match detector.detect(&text, page, &template, cancel) {
            Ok(found) => preview_entities.extend(found),
            Err(e) if e.is_abort() => {
                handle.close();
                return Err(e);
            }
            Err(e) => warn!(page, error = %e, "detection failed on sampled page"),
        }
    }
    handle.close();

    let total_entities_estimate = estimate(preview_entities.len(), samples.len(), page_count);
    debug!(
        pages = page_count,
        sampled = samples.len(),
        found = preview_entities.len(),
        estimate = total_entities_estimate,
        "preview finished"
    );

    Ok(PreviewResult {
        total_entities_estimate,
        preview_entities,
        page_count,
        sample_pages: samples,
    })
}
