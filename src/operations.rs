use std::collections::BTreeMap;

use crate::domain::curie_prefix;
use crate::kgx::EdgeRecord;
use crate::qualifiers::{local_name, reverse_lookup};

pub const UNKNOWN_OPERATION: &str = "no_predicate";

/// Operation name for an emitted edge: the internal predicate recovered from
/// the qualifier table, the bare predicate when it carries no qualifiers, or
/// `no_predicate` for qualifier combinations the table does not produce.
pub fn operation_predicate(edge: &EdgeRecord) -> String {
    let q = &edge.qualified;
    if let Some(internal) = reverse_lookup(
        &q.predicate,
        &q.qualified_predicate,
        &q.subject_form_or_variant_qualifier,
        &q.object_aspect_qualifier,
        &q.object_direction_qualifier,
    ) {
        return internal.to_string();
    }
    if !q.predicate.is_empty() && q.qualifier_columns().iter().all(|slot| slot.is_empty()) {
        return local_name(&q.predicate).to_string();
    }
    UNKNOWN_OPERATION.to_string()
}

pub fn operation_key(edge: &EdgeRecord) -> String {
    format!(
        "{}_{}_{}",
        curie_prefix(&edge.subject),
        operation_predicate(edge),
        curie_prefix(&edge.object)
    )
}

/// Edge counts keyed by `<subject prefix>_<operation>_<object prefix>`.
#[derive(Debug, Default)]
pub struct OperationsSummary {
    counts: BTreeMap<String, u64>,
}

impl OperationsSummary {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn observe(&mut self, edge: &EdgeRecord) {
        *self.counts.entry(operation_key(edge)).or_default() += 1;
    }

    pub fn counts(&self) -> &BTreeMap<String, u64> {
        &self.counts
    }
}
