//! Domain models for redaction runs.
//!
//! This module contains the entity and report types shared by every pipeline
//! stage, the redaction templates, and the deterministic pattern rules used
//! when no remote detector is available.

pub mod entity;
pub mod report;
pub mod rules;
pub mod template;

pub use entity::{EntityType, Rectangle, RedactionEntity};
pub use report::RedactionReport;
pub use rules::{FallbackRules, CRITICAL_MARKERS};
pub use template::{
    BuiltinTemplates, CompiledTemplate, JsonTemplateStore, RedactionCategory, RedactionTemplate,
    TemplateStore,
};
