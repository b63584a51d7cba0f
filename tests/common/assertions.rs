//! Custom assertions for redaction testing.

use pdf_redactor::{RedactionEntity, RedactionOutcome};

/// Asserts that every resolved rectangle lies inside its page.
///
/// # Panics
/// Panics with the offending entity when a rectangle leaves the page.
pub fn assert_rectangles_within(entities: &[RedactionEntity], width: f64, height: f64) {
    for entity in entities {
        for rect in entity.coordinates.iter().flatten() {
            assert!(
                rect.within(width, height),
                "Rectangle {:?} of entity '{}' should lie within {}x{}",
                rect,
                entity.text,
                width,
                height
            );
        }
    }
}

/// Asserts that two runs found the same entities, ignoring generated ids.
///
/// # Panics
/// Panics on the first differing entity.
pub fn assert_same_entities(first: &RedactionOutcome, second: &RedactionOutcome) {
    assert_eq!(
        first.entities.len(),
        second.entities.len(),
        "Runs should find the same number of entities"
    );
    for (a, b) in first.entities.iter().zip(&second.entities) {
        assert!(
            a.same_detection(b),
            "Entity '{}' differs between runs: {:?} vs {:?}",
            a.text,
            a,
            b
        );
    }
}
