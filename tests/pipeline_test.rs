//! End-to-end pipeline tests against generated documents.

use std::cell::RefCell;
use std::collections::BTreeSet;

use pdf_redactor::detection::{DetectedSpan, DetectionBackend, DetectionRequest};
use pdf_redactor::document::{ExtractionHandle, TextExtractor};
use pdf_redactor::{
    CancellationToken, EntityDetector, EntityType, NoProgress, PipelineOptions,
    ProcessingProgress, RedactionPipeline, RedactorError, RedactorResult, RunStatus, Stage,
};

mod common;
use common::*;

fn pattern_pipeline() -> RedactionPipeline {
    RedactionPipeline::new(EntityDetector::patterns_only())
}

/// Backend that reports `per_page` fixed spans for every call.
struct FixedBackend {
    per_page: usize,
}

impl DetectionBackend for FixedBackend {
    fn detect(&self, request: &DetectionRequest<'_>) -> RedactorResult<Vec<DetectedSpan>> {
        Ok((0..self.per_page)
            .map(|i| DetectedSpan {
                text: request.text.chars().take(5).collect(),
                category: "name".to_string(),
                start: i,
                end: i + 5,
                confidence: Some(0.8),
            })
            .collect())
    }

    fn name(&self) -> &str {
        "fixed"
    }
}

struct FailingExtractor;

impl TextExtractor for FailingExtractor {
    fn open(&self, _bytes: &[u8]) -> RedactorResult<Box<dyn ExtractionHandle>> {
        Err(RedactorError::Extraction {
            page: None,
            reason: "parser unavailable".to_string(),
        })
    }
}

mod scenarios {
    use super::*;

    #[test]
    fn test_contact_line_is_redacted_with_three_boxes() {
        let bytes = contact_pdf();
        let outcome = pattern_pipeline()
            .run(&bytes, &contact_template(), &NoProgress, &CancellationToken::new())
            .unwrap();

        assert_eq!(outcome.status, RunStatus::Redacted);
        let types: Vec<&EntityType> = outcome.entities.iter().map(|e| &e.entity_type).collect();
        assert_eq!(
            types,
            vec![&EntityType::Name, &EntityType::Email, &EntityType::Phone]
        );
        assert_eq!(outcome.entities[0].text, "Dr. Jane Smith");
        assert!(outcome.entities.iter().all(|e| e.is_resolved()));

        assert_eq!(rectangle_count(&outcome.document, 0), 3);
        assert_eq!(page_count(&outcome.document), 1);

        let labels = overlay_labels(&outcome.document, 0);
        assert!(labels.contains(&"3 REDACTION(S) APPLIED - PAGE 1".to_string()));
        assert!(labels.contains(&"REDACTED DOCUMENT".to_string()));
        assert!(labels.contains(&"3 sensitive items redacted".to_string()));
    }

    #[test]
    fn test_report_matches_entities() {
        let outcome = pattern_pipeline()
            .run(&contact_pdf(), &contact_template(), &NoProgress, &CancellationToken::new())
            .unwrap();

        assert_eq!(outcome.report.total_entities, 3);
        assert_eq!(outcome.report.entities_by_page[&0], 3);
        assert_eq!(outcome.report.entities_by_type["email"], 1);
        assert_eq!(outcome.report.resolved_count(), 3);
    }

    #[test]
    fn test_rectangles_stay_on_page() {
        let bytes = TestPdfBuilder::new()
            .with_page(&[CONTACT_LINE, "Backup: john.roe@example.org"])
            .with_page(&["Call (212) 555-0199 after 5pm"])
            .build_bytes()
            .unwrap();
        let outcome = pattern_pipeline()
            .run(&bytes, &contact_template(), &NoProgress, &CancellationToken::new())
            .unwrap();

        assert!(outcome.entities.len() >= 4);
        assert_rectangles_within(&outcome.entities, PAGE_WIDTH, PAGE_HEIGHT);
    }

    #[test]
    fn test_runs_are_deterministic() {
        let bytes = TestPdfBuilder::new()
            .with_page(&[CONTACT_LINE])
            .with_page(&["Protocol NCT01234567 approved March 3, 2021"])
            .build_bytes()
            .unwrap();
        let template = template_for("wide", &["name", "email", "phone", "clinicalTrialId", "date"]);
        let pipeline = pattern_pipeline();

        let first = pipeline
            .run(&bytes, &template, &NoProgress, &CancellationToken::new())
            .unwrap();
        let second = pipeline
            .run(&bytes, &template, &NoProgress, &CancellationToken::new())
            .unwrap();

        assert_same_entities(&first, &second);
        assert_eq!(first.document, second.document);
    }
}

mod document_variants {
    use super::*;

    fn redact(bytes: &[u8]) -> pdf_redactor::RedactionOutcome {
        pattern_pipeline()
            .run(bytes, &contact_template(), &NoProgress, &CancellationToken::new())
            .unwrap()
    }

    #[test]
    fn test_encrypted_flag_is_tolerated() {
        let bytes = TestPdfBuilder::new()
            .with_page(&[CONTACT_LINE])
            .with_encrypt_marker()
            .build_bytes()
            .unwrap();
        assert!(lopdf::Document::load_mem(&bytes).unwrap().is_encrypted());

        let outcome = redact(&bytes);

        assert_eq!(outcome.status, RunStatus::Redacted);
        assert_eq!(outcome.entities.len(), 3);
        assert!(outcome.entities.iter().all(|e| e.is_resolved()));
        assert_eq!(rectangle_count(&outcome.document, 0), 3);
    }

    #[test]
    fn test_form_xobject_text_is_redacted_at_its_drawn_position() {
        let bytes = TestPdfBuilder::new()
            .with_form_page(&[CONTACT_LINE])
            .build_bytes()
            .unwrap();

        let outcome = redact(&bytes);

        assert_eq!(outcome.status, RunStatus::Redacted);
        assert_eq!(outcome.entities.len(), 3);
        assert_eq!(rectangle_count(&outcome.document, 0), 3);

        let baseline = FIRST_BASELINE - FORM_OFFSET;
        for rect in outcome.entities.iter().flat_map(|e| e.coordinates.iter().flatten()) {
            assert!(
                rect.y <= baseline && rect.y + rect.height >= baseline,
                "Rectangle {:?} should straddle the shifted baseline {}",
                rect,
                baseline
            );
        }
    }

    #[test]
    fn test_composite_font_is_decoded_through_to_unicode() {
        let bytes = TestPdfBuilder::new()
            .with_composite_page(&[CONTACT_LINE])
            .build_bytes()
            .unwrap();

        let outcome = redact(&bytes);

        assert_eq!(outcome.status, RunStatus::Redacted);
        let texts: Vec<&str> = outcome.entities.iter().map(|e| e.text.as_str()).collect();
        assert_eq!(texts, vec!["Dr. Jane Smith", "jane.smith@example.com", "(415) 555-0100"]);
        assert!(outcome.entities.iter().all(|e| e.is_resolved()));
        assert_eq!(rectangle_count(&outcome.document, 0), 3);
        assert_rectangles_within(&outcome.entities, PAGE_WIDTH, PAGE_HEIGHT);
    }
}

mod empty_results {
    use super::*;

    #[test]
    fn test_no_entities_stamps_analyzed_markers() {
        let bytes = TestPdfBuilder::new()
            .with_page(&["the quick brown fox jumps over the lazy dog"])
            .with_page(&["nothing to see on this page"])
            .build_bytes()
            .unwrap();
        let outcome = pattern_pipeline()
            .run(&bytes, &contact_template(), &NoProgress, &CancellationToken::new())
            .unwrap();

        assert_eq!(outcome.status, RunStatus::NoEntities);
        assert!(outcome.entities.is_empty());
        assert_eq!(outcome.report.total_entities, 0);

        let first = overlay_labels(&outcome.document, 0);
        assert!(first.contains(&"DOCUMENT ANALYZED - NO SENSITIVE INFORMATION FOUND".to_string()));
        assert!(first.contains(&"ANALYZED - NO REDACTIONS NEEDED".to_string()));
        assert_eq!(
            overlay_labels(&outcome.document, 1),
            vec!["ANALYZED - NO REDACTIONS NEEDED".to_string()]
        );
        assert_eq!(rectangle_count(&outcome.document, 0), 0);
    }

    #[test]
    fn test_zero_page_document() {
        let outcome = pattern_pipeline()
            .run(&zero_page_pdf(), &contact_template(), &NoProgress, &CancellationToken::new())
            .unwrap();

        assert_eq!(outcome.status, RunStatus::EmptyDocument);
        assert!(outcome.entities.is_empty());
        assert_eq!(page_count(&outcome.document), 0);
        assert!(info_entry(&outcome.document, "Subject").is_some());
    }

    #[test]
    fn test_blank_pages_are_not_sent_to_detection() {
        let bytes = TestPdfBuilder::new().with_blank_pages(3).build_bytes().unwrap();
        let pipeline =
            RedactionPipeline::new(EntityDetector::new(Box::new(FixedBackend { per_page: 2 })));
        let outcome = pipeline
            .run(&bytes, &contact_template(), &NoProgress, &CancellationToken::new())
            .unwrap();
        assert_eq!(outcome.status, RunStatus::NoEntities);
    }
}

mod failures {
    use super::*;

    #[test]
    fn test_malformed_input_fails_to_load() {
        let err = pattern_pipeline()
            .run(b"not a pdf", &contact_template(), &NoProgress, &CancellationToken::new())
            .unwrap_err();
        assert!(matches!(err, RedactorError::DocumentLoad { .. }));
    }

    #[test]
    fn test_invalid_template_is_rejected_before_loading() {
        let mut template = contact_template();
        template.categories.clear();
        let err = pattern_pipeline()
            .run(b"not a pdf", &template, &NoProgress, &CancellationToken::new())
            .unwrap_err();
        assert!(matches!(err, RedactorError::InvalidTemplate { .. }));
    }

    #[test]
    fn test_failure_after_loading_yields_error_document() {
        let seen = RefCell::new(Vec::new());
        let observer = |p: &ProcessingProgress| seen.borrow_mut().push(p.stage);
        let pipeline = pattern_pipeline().with_extractor(Box::new(FailingExtractor));

        let outcome = pipeline
            .run(&contact_pdf(), &contact_template(), &observer, &CancellationToken::new())
            .unwrap();

        assert!(outcome.is_error_stub());
        match &outcome.status {
            RunStatus::ErrorStub { message } => assert!(message.contains("parser unavailable")),
            other => panic!("unexpected status {:?}", other),
        }
        assert_eq!(page_count(&outcome.document), 1);
        assert_eq!(seen.borrow().last(), Some(&Stage::Error));
    }
}

mod cancellation {
    use super::*;

    #[test]
    fn test_cancel_during_extraction_aborts_without_saving() {
        let loader = CountingLoader::new();
        let pipeline = pattern_pipeline().with_loader(Box::new(loader.clone()));
        let token = CancellationToken::new();
        let trigger = token.clone();
        let observer = move |p: &ProcessingProgress| {
            if p.stage == Stage::Extracting {
                trigger.cancel();
            }
        };

        let bytes = TestPdfBuilder::new()
            .with_repeated_page(&[CONTACT_LINE], 2)
            .build_bytes()
            .unwrap();
        let err = pipeline
            .run(&bytes, &contact_template(), &observer, &token)
            .unwrap_err();

        assert!(err.is_abort());
        assert!(matches!(err, RedactorError::Aborted { stage: Stage::Extracting }));
        assert_eq!(loader.save_count(), 0);
    }

    #[test]
    fn test_cancel_during_mapping_aborts_without_saving() {
        let loader = CountingLoader::new();
        let pipeline = pattern_pipeline().with_loader(Box::new(loader.clone()));
        let token = CancellationToken::new();
        let trigger = token.clone();
        let observer = move |p: &ProcessingProgress| {
            if p.stage == Stage::Mapping {
                trigger.cancel();
            }
        };

        let err = pipeline
            .run(&contact_pdf(), &contact_template(), &observer, &token)
            .unwrap_err();

        assert!(matches!(err, RedactorError::Aborted { stage: Stage::Mapping }));
        assert_eq!(loader.save_count(), 0);
    }

    #[test]
    fn test_cancel_during_redacting_stops_before_labels() {
        let loader = CountingLoader::new();
        let pipeline = pattern_pipeline().with_loader(Box::new(loader.clone()));
        let token = CancellationToken::new();
        let trigger = token.clone();
        let observer = move |p: &ProcessingProgress| {
            if p.stage == Stage::Redacting {
                trigger.cancel();
            }
        };

        let bytes = TestPdfBuilder::new()
            .with_repeated_page(&[CONTACT_LINE], 3)
            .build_bytes()
            .unwrap();
        let err = pipeline
            .run(&bytes, &contact_template(), &observer, &token)
            .unwrap_err();

        assert!(matches!(err, RedactorError::Aborted { stage: Stage::Redacting }));
        assert_eq!(loader.label_count(), 0);
        assert_eq!(loader.save_count(), 0);
    }

    #[test]
    fn test_uncancelled_run_saves_once() {
        let loader = CountingLoader::new();
        let pipeline = pattern_pipeline().with_loader(Box::new(loader.clone()));
        pipeline
            .run(&contact_pdf(), &contact_template(), &NoProgress, &CancellationToken::new())
            .unwrap();
        assert_eq!(loader.save_count(), 1);
    }
}

mod progress {
    use super::*;

    fn record(bytes: &[u8], pipeline: &RedactionPipeline) -> Vec<ProcessingProgress> {
        let events = RefCell::new(Vec::new());
        let observer = |p: &ProcessingProgress| events.borrow_mut().push(p.clone());
        pipeline
            .run(bytes, &contact_template(), &observer, &CancellationToken::new())
            .unwrap();
        events.into_inner()
    }

    fn chunks_seen(events: &[ProcessingProgress], stage: Stage) -> BTreeSet<usize> {
        events
            .iter()
            .filter(|p| p.stage == stage)
            .filter_map(|p| p.chunk.map(|c| c.index))
            .collect()
    }

    #[test]
    fn test_large_document_is_chunked() {
        let bytes = TestPdfBuilder::new()
            .with_repeated_page(&[CONTACT_LINE], 25)
            .build_bytes()
            .unwrap();
        let events = record(&bytes, &pattern_pipeline());

        assert_eq!(chunks_seen(&events, Stage::Extracting).len(), 5);
        assert_eq!(chunks_seen(&events, Stage::Detecting).len(), 5);
        assert_eq!(chunks_seen(&events, Stage::Mapping).len(), 5);
        assert_eq!(events.last().map(|p| p.stage), Some(Stage::Complete));
    }

    #[test]
    fn test_small_document_uses_one_chunk() {
        let bytes = TestPdfBuilder::new()
            .with_repeated_page(&[CONTACT_LINE], 3)
            .build_bytes()
            .unwrap();
        let events = record(&bytes, &pattern_pipeline());
        assert_eq!(chunks_seen(&events, Stage::Extracting).len(), 1);
    }

    #[test]
    fn test_chunking_does_not_change_output() {
        let bytes = TestPdfBuilder::new()
            .with_repeated_page(&[CONTACT_LINE], 6)
            .build_bytes()
            .unwrap();
        let chunked = pattern_pipeline().with_options(PipelineOptions {
            chunk_threshold: 2,
            chunk_size: 4,
        });

        let a = pattern_pipeline()
            .run(&bytes, &contact_template(), &NoProgress, &CancellationToken::new())
            .unwrap();
        let b = chunked
            .run(&bytes, &contact_template(), &NoProgress, &CancellationToken::new())
            .unwrap();

        assert_same_entities(&a, &b);
        assert_eq!(a.document, b.document);
    }

    #[test]
    fn test_progress_is_monotonic_per_stage() {
        let bytes = TestPdfBuilder::new()
            .with_repeated_page(&[CONTACT_LINE], 7)
            .build_bytes()
            .unwrap();
        let events = record(&bytes, &pattern_pipeline());

        for stage in [Stage::Extracting, Stage::Detecting, Stage::Mapping, Stage::Redacting] {
            let values: Vec<u8> = events
                .iter()
                .filter(|p| p.stage == stage)
                .map(|p| p.progress)
                .collect();
            assert!(!values.is_empty(), "{} should report progress", stage);
            assert!(
                values.windows(2).all(|w| w[0] <= w[1]),
                "{} progress should not decrease: {:?}",
                stage,
                values
            );
        }

        let redacting: Vec<u8> = events
            .iter()
            .filter(|p| p.stage == Stage::Redacting)
            .map(|p| p.progress)
            .collect();
        assert_eq!(redacting, vec![0, 90, 95, 100]);
    }
}
