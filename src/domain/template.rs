//! Redaction templates and the read-only template store.

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::path::Path;

use super::entity::EntityType;
use crate::error::{RedactorError, RedactorResult};

/// One category of a template: an entity type plus the patterns that find it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RedactionCategory {
    #[serde(rename = "type")]
    pub category_type: String,
    #[serde(default)]
    pub patterns: Vec<String>,
    #[serde(default)]
    pub contexts: Vec<String>,
}

/// A named set of categories defining what a run redacts.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RedactionTemplate {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub categories: Vec<RedactionCategory>,
}

impl RedactionTemplate {
    /// Checks that the template can drive a run.
    ///
    /// A template needs at least one category and every category needs at
    /// least one pattern; every pattern must compile.
    pub fn validate(&self) -> RedactorResult<()> {
        self.compile().map(|_| ())
    }

    /// Validates the template and compiles its patterns.
    pub fn compile(&self) -> RedactorResult<CompiledTemplate> {
        if self.categories.is_empty() {
            return Err(RedactorError::InvalidTemplate {
                template: self.id.clone(),
                reason: "template has no categories".to_string(),
            });
        }

        let mut enabled = BTreeSet::new();
        let mut patterns = Vec::new();

        for category in &self.categories {
            if category.patterns.is_empty() {
                return Err(RedactorError::InvalidTemplate {
                    template: self.id.clone(),
                    reason: format!("category '{}' has no patterns", category.category_type),
                });
            }

            let entity_type = EntityType::from_category(&category.category_type);
            for pattern in &category.patterns {
                let regex = Regex::new(pattern).map_err(|e| RedactorError::PatternError {
                    pattern: pattern.clone(),
                    reason: e.to_string(),
                })?;
                patterns.push((entity_type.clone(), regex));
            }
            enabled.insert(entity_type);
        }

        Ok(CompiledTemplate {
            id: self.id.clone(),
            name: self.name.clone(),
            enabled,
            patterns,
        })
    }
}

/// A validated template with compiled patterns, built once per run.
#[derive(Debug, Clone)]
pub struct CompiledTemplate {
    pub id: String,
    pub name: String,
    enabled: BTreeSet<EntityType>,
    patterns: Vec<(EntityType, Regex)>,
}

impl CompiledTemplate {
    /// Returns true when the template asks for this entity type.
    pub fn enables(&self, entity_type: &EntityType) -> bool {
        self.enabled.contains(entity_type)
    }

    pub fn enabled_types(&self) -> impl Iterator<Item = &EntityType> {
        self.enabled.iter()
    }

    /// Template-supplied patterns in declaration order.
    pub fn patterns(&self) -> &[(EntityType, Regex)] {
        &self.patterns
    }
}

/// Read-only source of templates.
pub trait TemplateStore: Send + Sync {
    /// Looks up a template by id.
    fn get(&self, id: &str) -> RedactorResult<RedactionTemplate>;

    /// Lists every template in the store.
    fn list(&self) -> Vec<RedactionTemplate>;
}

/// Templates shipped with the library.
#[derive(Debug, Clone, Default)]
pub struct BuiltinTemplates;

impl BuiltinTemplates {
    pub fn new() -> Self {
        Self
    }

    /// Id of the template used when none is specified.
    pub const DEFAULT_ID: &'static str = "default";
}

impl TemplateStore for BuiltinTemplates {
    fn get(&self, id: &str) -> RedactorResult<RedactionTemplate> {
        BUILTIN
            .iter()
            .find(|t| t.id == id)
            .cloned()
            .ok_or_else(|| RedactorError::TemplateNotFound { id: id.to_string() })
    }

    fn list(&self) -> Vec<RedactionTemplate> {
        BUILTIN.clone()
    }
}

/// Templates read from a JSON array on disk.
#[derive(Debug, Clone)]
pub struct JsonTemplateStore {
    templates: Vec<RedactionTemplate>,
}

impl JsonTemplateStore {
    /// Loads templates from a JSON file holding an array of templates.
    pub fn from_path(path: &Path) -> RedactorResult<Self> {
        let raw = std::fs::read_to_string(path).map_err(|e| RedactorError::Io {
            path: path.to_path_buf(),
            source: e,
        })?;
        Self::from_json(&raw)
    }

    pub fn from_json(raw: &str) -> RedactorResult<Self> {
        let templates: Vec<RedactionTemplate> =
            serde_json::from_str(raw).map_err(|e| RedactorError::Config {
                reason: format!("invalid template file: {}", e),
            })?;
        Ok(Self { templates })
    }
}

impl TemplateStore for JsonTemplateStore {
    fn get(&self, id: &str) -> RedactorResult<RedactionTemplate> {
        self.templates
            .iter()
            .find(|t| t.id == id)
            .cloned()
            .ok_or_else(|| RedactorError::TemplateNotFound { id: id.to_string() })
    }

    fn list(&self) -> Vec<RedactionTemplate> {
        self.templates.clone()
    }
}

const PERSON: &str = r"\b[A-Z][a-z]+(?:\s+[A-Z][a-z]+){1,2}\b";
const EMAIL: &str = r"\b[A-Za-z0-9._%+-]+@[A-Za-z0-9.-]+\.[A-Za-z]{2,}\b";
const PHONE: &str = r"\b(\+\d{1,2}\s?)?\(?(\d{3})\)?[-.\s]?\d{3}[-.\s]?\d{4}\b";
const DATE_OF_BIRTH: &str = r"\b(0?[1-9]|1[0-2])[/\-.](0?[1-9]|[12][0-9]|3[01])[/\-.](19|20)?\d{2}\b";
const ADDRESS: &str = r"\b\d+\s+[A-Z][a-z]+\s+(?:Street|St|Avenue|Ave|Road|Rd|Boulevard|Blvd|Drive|Dr|Lane|Ln|Court|Ct|Place|Pl|Terrace|Ter|Way)\b";
const SSN: &str = r"\b\d{3}-\d{2}-\d{4}\b";

fn category(category_type: &str, patterns: &[&str], contexts: &[&str]) -> RedactionCategory {
    RedactionCategory {
        category_type: category_type.to_string(),
        patterns: patterns.iter().map(|p| p.to_string()).collect(),
        contexts: contexts.iter().map(|c| c.to_string()).collect(),
    }
}

static BUILTIN: Lazy<Vec<RedactionTemplate>> = Lazy::new(|| {
    let doc_form = ["document", "form"];
    let with_header = ["document", "form", "header"];

    vec![
        RedactionTemplate {
            id: "pharma-default".to_string(),
            name: "Pharmaceutical Default".to_string(),
            description: "Standard template for pharmaceutical submissions with all PII redacted"
                .to_string(),
            categories: vec![
                category("PERSON", &[PERSON], &doc_form),
                category("EMAIL", &[EMAIL], &with_header),
                category("PHONE", &[PHONE], &with_header),
                category("DATE_OF_BIRTH", &[DATE_OF_BIRTH], &doc_form),
                category("ADDRESS", &[ADDRESS], &with_header),
            ],
        },
        RedactionTemplate {
            id: "minimal-pii".to_string(),
            name: "Minimal PII".to_string(),
            description: "Only redact basic personally identifiable information".to_string(),
            categories: vec![
                category("PERSON", &[PERSON], &doc_form),
                category("EMAIL", &[EMAIL], &with_header),
                category("PHONE", &[PHONE], &with_header),
                category("SSN", &[SSN], &doc_form),
            ],
        },
        RedactionTemplate {
            id: "comprehensive".to_string(),
            name: "Comprehensive".to_string(),
            description: "Redact all possible sensitive information".to_string(),
            categories: vec![
                category("PERSON", &[PERSON], &doc_form),
                category("EMAIL", &[EMAIL], &with_header),
                category("PHONE", &[PHONE], &with_header),
                category("ADDRESS", &[ADDRESS], &with_header),
                category("SSN", &[SSN], &doc_form),
                category("COMPANY", &[r"\b[A-Z][a-z]+\s+[A-Z][a-z]+\b"], &doc_form),
                category("IDENTIFIER", &[r"\b[A-Z]{2,}-?\d{3,8}\b"], &doc_form),
                category("DATE", &[r"\b\d{4}-\d{2}-\d{2}\b"], &doc_form),
                category("DRUG_ID", &[r"\b[A-Z]{2,4}-\d{3,6}\b"], &doc_form),
                category("CRITICAL", &[r"(?i)\bconfidential\b"], &doc_form),
            ],
        },
        RedactionTemplate {
            id: BuiltinTemplates::DEFAULT_ID.to_string(),
            name: "Standard Redaction".to_string(),
            description: "Default template for pharmaceutical document redaction".to_string(),
            categories: vec![
                category("PERSON", &[PERSON], &doc_form),
                category("EMAIL", &[EMAIL], &with_header),
                category("PHONE", &[PHONE], &with_header),
                category("DATE_OF_BIRTH", &[DATE_OF_BIRTH], &doc_form),
                category("ADDRESS", &[ADDRESS], &with_header),
            ],
        },
    ]
});
