//! Deterministic pattern rules used when the remote detector is unavailable.
//!
//! Three rule classes exist, each with a fixed confidence:
//! - generic category rules (names, emails, phones, identifiers, ...), 0.95
//! - labeled fields such as `PI:` or `Sponsor:`, capturing the value after
//!   the label up to the next comma or newline, 0.97
//! - critical marker words matched case-insensitively as whole words, 0.98
//!
//! Generic rules only run for entity types the template enables; labeled
//! fields and critical markers always run. A match that overlaps an earlier
//! one is dropped.

use once_cell::sync::Lazy;
use regex::Regex;

use super::entity::{EntityType, RedactionEntity};
use super::template::CompiledTemplate;

pub const GENERIC_CONFIDENCE: f64 = 0.95;
pub const LABELED_FIELD_CONFIDENCE: f64 = 0.97;
pub const CRITICAL_CONFIDENCE: f64 = 0.98;

/// Marker words that always mark a span as critical.
pub const CRITICAL_MARKERS: &[&str] = &[
    "confidential",
    "proprietary",
    "not for distribution",
    "internal use only",
    "trade secret",
    "investigational",
    "GDPR",
    "personal data",
    "sensitive",
    "restricted",
];

/// A compiled rule: the regex, the capture group holding the value (0 for
/// the whole match) and the entity type it yields.
#[derive(Debug)]
pub struct PatternRule {
    pub entity_type: EntityType,
    pub regex: Regex,
    pub group: usize,
}

impl PatternRule {
    fn new(entity_type: EntityType, pattern: &str, group: usize) -> Self {
        Self {
            entity_type,
            regex: Regex::new(pattern).expect("Valid fallback rule regex"),
            group,
        }
    }
}

fn generic_rules() -> &'static [PatternRule] {
    static RULES: Lazy<Vec<PatternRule>> = Lazy::new(|| {
        use EntityType::*;
        vec![
            // Person names, titled forms first
            PatternRule::new(Name, r"\b(?:Dr|Prof|Mr|Mrs|Ms)\.\s+[A-Z][a-z]+(?:\s+[A-Z][a-z]+)+", 0),
            PatternRule::new(Name, r"\b[A-Z][a-z]+\s+[A-Z][a-z]+\s+(?:MD|PhD|PharmD|DO|RN)\b", 0),
            PatternRule::new(Name, r"\b[A-Z][a-z]+\s+[A-Z]\.\s+[A-Z][a-z]+\b", 0),
            PatternRule::new(Name, r"\b[A-Z][a-z]+\s+[A-Z][a-z]+\b", 0),
            // Email addresses
            PatternRule::new(Email, r"\b[A-Za-z0-9._%+-]+@[A-Za-z0-9.-]+\.[A-Za-z]{2,}\b", 0),
            // Phone numbers, most specific punctuation style first
            PatternRule::new(Phone, r"\+\d{1,3}\s?\(\d{3}\)\s?\d{3}[-.\s]?\d{4}\b", 0),
            PatternRule::new(Phone, r"\(\d{3}\)\s?\d{3}[-.\s]?\d{4}\b", 0),
            PatternRule::new(Phone, r"\b\d{3}[-.\s]?\d{3}[-.\s]?\d{4}\b", 0),
            // Clinical trial, protocol and study identifiers
            PatternRule::new(ClinicalTrialId, r"\b[A-Z]{2,}\d{3,8}\b", 0),
            PatternRule::new(
                ClinicalTrialId,
                r"(?i)\bProtocol\s+(?:Number|ID|No)?\.?\s*:?\s*([A-Z0-9-]*\d[A-Z0-9-]*)",
                1,
            ),
            PatternRule::new(
                ClinicalTrialId,
                r"(?i)\bStudy\s+(?:Number|ID|No)?\.?\s*:?\s*([A-Z0-9-]*\d[A-Z0-9-]*)",
                1,
            ),
            // Organizations
            PatternRule::new(
                Organization,
                r"\b[A-Z][a-z]+(?:\s+[A-Z][a-z]+)*\s+(?:Inc|LLC|Corp|Corporation|Labs|Laboratories|Pharma|Pharmaceuticals)\b",
                0,
            ),
            PatternRule::new(Organization, r"\b[A-Z][a-z]+[A-Z][a-z]+(?:\s+[A-Z][a-z]+)*\b", 0),
            PatternRule::new(Organization, r"\bUniversity\s+of\s+[A-Z][a-z]+(?:\s+[A-Z][a-z]+)*", 0),
            // Addresses
            PatternRule::new(
                Address,
                r"\b\d+\s+[A-Z][a-z]+(?:\s+[A-Z][a-z]+)*\s+(?:St|Street|Ave|Avenue|Blvd|Boulevard|Rd|Road|Drive|Dr|Lane|Ln)\b",
                0,
            ),
            PatternRule::new(Address, r"\b[A-Z][a-z]+(?:\s+[A-Z][a-z]+)*,\s+[A-Z]{2}\s+\d{5}(?:-\d{4})?\b", 0),
            // Dates: MM/DD/YYYY, YYYY-MM-DD, Month DD, YYYY
            PatternRule::new(
                Date,
                r"\b(?:0?[1-9]|1[0-2])[/\-.](?:0?[1-9]|[12][0-9]|3[01])[/\-.](?:19|20)\d{2}\b",
                0,
            ),
            PatternRule::new(
                Date,
                r"\b(?:19|20)\d{2}[/\-.](?:0?[1-9]|1[0-2])[/\-.](?:0?[1-9]|[12][0-9]|3[01])\b",
                0,
            ),
            PatternRule::new(
                Date,
                r"\b(?:Jan|Feb|Mar|Apr|May|Jun|Jul|Aug|Sep|Oct|Nov|Dec)[a-z]*\.?\s+(?:0?[1-9]|[12][0-9]|3[01]),?\s+(?:19|20)\d{2}\b",
                0,
            ),
            // Patient and record identifiers
            PatternRule::new(PatientId, r"(?i)\bPatient\s+ID\s*:?\s*([A-Z0-9-]*\d[A-Z0-9-]*)", 1),
            PatternRule::new(PatientId, r"\bMRN\s*:?\s*([A-Z0-9-]*\d[A-Z0-9-]*)", 1),
            PatternRule::new(PatientId, r"\b[A-Z]{2,3}-\d{6,8}\b", 0),
            // Drug and compound codes
            PatternRule::new(DrugId, r"(?i)\bCompound\s+ID\s*:?\s*([A-Z0-9-]*\d[A-Z0-9-]*)", 1),
            PatternRule::new(DrugId, r"(?i)\bDrug\s+Code\s*:?\s*([A-Z0-9-]*\d[A-Z0-9-]*)", 1),
            // Social security numbers
            PatternRule::new(Ssn, r"\b\d{3}-\d{2}-\d{4}\b", 0),
        ]
    });
    &RULES
}

fn labeled_field_rules() -> &'static [PatternRule] {
    static RULES: Lazy<Vec<PatternRule>> = Lazy::new(|| {
        vec![
            PatternRule::new(EntityType::Name, r"(?i)\bPI\s*:\s*([^,\n\r]+)", 1),
            PatternRule::new(EntityType::Organization, r"(?i)\bSponsor\s*:\s*([^,\n\r]+)", 1),
            PatternRule::new(
                EntityType::ClinicalTrialId,
                r"(?i)\bIRB\s+Approval\s+Number\s*:\s*([A-Z0-9-]+)",
                1,
            ),
            PatternRule::new(EntityType::Name, r"(?i)\bInvestigator\s*:\s*([^,\n\r]+)", 1),
        ]
    });
    &RULES
}

fn critical_marker_rule() -> &'static Regex {
    static PATTERN: Lazy<Regex> = Lazy::new(|| {
        let alternatives: Vec<String> = CRITICAL_MARKERS
            .iter()
            .map(|marker| {
                marker
                    .split_whitespace()
                    .map(regex::escape)
                    .collect::<Vec<_>>()
                    .join(r"\s+")
            })
            .collect();
        Regex::new(&format!(r"(?i)\b(?:{})\b", alternatives.join("|")))
            .expect("Valid critical marker regex")
    });
    &PATTERN
}

/// Finds candidate spans with the fallback rule library.
#[derive(Debug, Clone, Copy, Default)]
pub struct FallbackRules;

impl FallbackRules {
    pub fn new() -> Self {
        Self
    }

    /// Runs every applicable rule over one page of text.
    ///
    /// Offsets are byte offsets into `text`. Entity ids are
    /// `entity_{page}_{n}` in discovery order.
    pub fn detect(
        &self,
        text: &str,
        page: usize,
        template: &CompiledTemplate,
    ) -> Vec<RedactionEntity> {
        let mut collector = SpanCollector::new(text, page);

        for m in critical_marker_rule().find_iter(text) {
            collector.push(EntityType::Critical, m.start(), m.end(), CRITICAL_CONFIDENCE);
        }

        // Labeled fields take the first occurrence only
        for rule in labeled_field_rules() {
            if let Some(value) = rule.regex.captures(text).and_then(|c| c.get(rule.group)) {
                collector.push(
                    rule.entity_type.clone(),
                    value.start(),
                    value.end(),
                    LABELED_FIELD_CONFIDENCE,
                );
            }
        }

        for rule in generic_rules() {
            if !template.enables(&rule.entity_type) {
                continue;
            }
            collector.push_all(rule, GENERIC_CONFIDENCE);
        }

        for (entity_type, regex) in template.patterns() {
            for m in regex.find_iter(text) {
                collector.push(entity_type.clone(), m.start(), m.end(), GENERIC_CONFIDENCE);
            }
        }

        collector.finish()
    }
}

/// Accumulates non-overlapping spans for one page.
struct SpanCollector<'a> {
    text: &'a str,
    page: usize,
    entities: Vec<RedactionEntity>,
}

impl<'a> SpanCollector<'a> {
    fn new(text: &'a str, page: usize) -> Self {
        Self {
            text,
            page,
            entities: Vec::new(),
        }
    }

    fn push_all(&mut self, rule: &PatternRule, confidence: f64) {
        for caps in rule.regex.captures_iter(self.text) {
            if let Some(value) = caps.get(rule.group) {
                self.push(rule.entity_type.clone(), value.start(), value.end(), confidence);
            }
        }
    }

    fn push(&mut self, entity_type: EntityType, start: usize, end: usize, confidence: f64) {
        // Trim surrounding whitespace while keeping offsets aligned
        let raw = &self.text[start..end];
        let leading = raw.len() - raw.trim_start().len();
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            return;
        }
        let start = start + leading;
        let end = start + trimmed.len();

        let overlaps = self
            .entities
            .iter()
            .any(|e| start < e.end_offset && e.start_offset < end);
        if overlaps {
            return;
        }

        let id = format!("entity_{}_{}", self.page, self.entities.len());
        self.entities.push(RedactionEntity::new(
            id,
            trimmed,
            entity_type,
            self.page,
            (start, end),
            confidence,
        ));
    }

    fn finish(mut self) -> Vec<RedactionEntity> {
        self.entities.sort_by_key(|e| e.start_offset);
        self.entities
    }
}
