//! Redaction entities and their categories.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Category of a detected sensitive span.
///
/// Category names arrive from templates and from the remote detector in
/// several spellings (`PERSON`, `name`, `pi_name`, ...); [`EntityType::from_category`]
/// folds them onto one variant. Unknown names are kept verbatim in `Other`.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum EntityType {
    Name,
    Email,
    Phone,
    ClinicalTrialId,
    Organization,
    Address,
    Date,
    PatientId,
    DrugId,
    Ssn,
    Critical,
    Other(String),
}

impl EntityType {
    /// Maps a template or detector category name onto an entity type.
    pub fn from_category(category: &str) -> Self {
        let key: String = category
            .chars()
            .filter(|c| c.is_ascii_alphanumeric())
            .collect::<String>()
            .to_ascii_lowercase();

        match key.as_str() {
            "name" | "names" | "person" | "persons" | "piname" | "investigator" => Self::Name,
            "email" | "emails" => Self::Email,
            "phone" | "phones" | "fax" => Self::Phone,
            "clinicaltrialid" | "clinicaltrials" | "identifier" | "irbnumber" | "protocolid" => {
                Self::ClinicalTrialId
            }
            "organization" | "organizations" | "company" | "companies" | "sponsor" => {
                Self::Organization
            }
            "address" | "addresses" | "location" => Self::Address,
            "date" | "dates" | "dateofbirth" => Self::Date,
            "patientid" | "patientids" | "mrn" | "id" => Self::PatientId,
            "drugid" | "drugids" => Self::DrugId,
            "ssn" | "ssns" => Self::Ssn,
            "critical" => Self::Critical,
            _ => Self::Other(category.to_string()),
        }
    }

    /// Canonical name used in reports and serialized output.
    pub fn as_str(&self) -> &str {
        match self {
            Self::Name => "name",
            Self::Email => "email",
            Self::Phone => "phone",
            Self::ClinicalTrialId => "clinicalTrialId",
            Self::Organization => "organization",
            Self::Address => "address",
            Self::Date => "date",
            Self::PatientId => "patientId",
            Self::DrugId => "drugId",
            Self::Ssn => "ssn",
            Self::Critical => "critical",
            Self::Other(name) => name,
        }
    }
}

impl From<String> for EntityType {
    fn from(value: String) -> Self {
        Self::from_category(&value)
    }
}

impl From<EntityType> for String {
    fn from(value: EntityType) -> Self {
        value.as_str().to_string()
    }
}

impl fmt::Display for EntityType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(self.as_str())
    }
}

/// Axis-aligned rectangle in output page space (origin bottom-left, y up).
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Rectangle {
    pub x: f64,
    pub y: f64,
    pub width: f64,
    pub height: f64,
}

impl Rectangle {
    pub fn new(x: f64, y: f64, width: f64, height: f64) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }

    /// Clamps the rectangle into `[0, page_width] x [0, page_height]`.
    ///
    /// Returns `None` when nothing of the rectangle remains on the page.
    pub fn clamped(self, page_width: f64, page_height: f64) -> Option<Self> {
        let x0 = self.x.max(0.0);
        let y0 = self.y.max(0.0);
        let x1 = (self.x + self.width).min(page_width);
        let y1 = (self.y + self.height).min(page_height);

        if x1 <= x0 || y1 <= y0 {
            return None;
        }

        Some(Self::new(x0, y0, x1 - x0, y1 - y0))
    }

    /// Returns true when the rectangle lies fully inside the page.
    pub fn within(&self, page_width: f64, page_height: f64) -> bool {
        self.x >= 0.0
            && self.y >= 0.0
            && self.x + self.width <= page_width + f64::EPSILON
            && self.y + self.height <= page_height + f64::EPSILON
    }
}

/// A detected span of sensitive text.
///
/// Created by the detector with `coordinates = None`; the position resolver
/// attaches rectangles once. Entities that stay unresolved are still reported.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RedactionEntity {
    pub id: String,
    pub text: String,
    #[serde(rename = "type")]
    pub entity_type: EntityType,
    pub page: usize,
    pub start_offset: usize,
    pub end_offset: usize,
    pub confidence: f64,
    pub coordinates: Option<Vec<Rectangle>>,
}

impl RedactionEntity {
    pub fn new(
        id: impl Into<String>,
        text: impl Into<String>,
        entity_type: EntityType,
        page: usize,
        span: (usize, usize),
        confidence: f64,
    ) -> Self {
        Self {
            id: id.into(),
            text: text.into(),
            entity_type,
            page,
            start_offset: span.0,
            end_offset: span.1,
            confidence,
            coordinates: None,
        }
    }

    /// Returns true once rectangles have been attached.
    pub fn is_resolved(&self) -> bool {
        self.coordinates.as_ref().is_some_and(|rects| !rects.is_empty())
    }

    /// Attaches resolved rectangles. Empty input leaves the entity unresolved.
    pub(crate) fn attach_coordinates(&mut self, rects: Vec<Rectangle>) {
        debug_assert!(self.coordinates.is_none(), "coordinates attached twice");
        if !rects.is_empty() {
            self.coordinates = Some(rects);
        }
    }

    /// Entity equality that ignores the generated id.
    pub fn same_detection(&self, other: &Self) -> bool {
        self.text == other.text
            && self.entity_type == other.entity_type
            && self.page == other.page
            && self.start_offset == other.start_offset
            && self.end_offset == other.end_offset
            && self.confidence == other.confidence
            && self.coordinates == other.coordinates
    }
}
