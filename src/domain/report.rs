//! Aggregate report over all entities of one run.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use super::entity::RedactionEntity;

/// Summary of a redaction run, handed to the document store.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RedactionReport {
    pub total_entities: usize,
    pub entities_by_type: BTreeMap<String, usize>,
    /// Keyed by zero-based page index.
    pub entities_by_page: BTreeMap<usize, usize>,
    pub entity_list: Vec<RedactionEntity>,
}

impl RedactionReport {
    /// Builds the report from the final entity list.
    pub fn from_entities(entities: &[RedactionEntity]) -> Self {
        let mut entities_by_type = BTreeMap::new();
        let mut entities_by_page = BTreeMap::new();

        for entity in entities {
            *entities_by_type
                .entry(entity.entity_type.as_str().to_string())
                .or_insert(0) += 1;
            *entities_by_page.entry(entity.page).or_insert(0) += 1;
        }

        Self {
            total_entities: entities.len(),
            entities_by_type,
            entities_by_page,
            entity_list: entities.to_vec(),
        }
    }

    /// Number of entities that received at least one rectangle.
    pub fn resolved_count(&self) -> usize {
        self.entity_list.iter().filter(|e| e.is_resolved()).count()
    }
}
