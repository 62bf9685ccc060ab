//! Maps the fine-grained predicates produced by the extraction models onto a
//! canonical Biolink predicate plus qualifier slots.
//!
//! The mapping is a single static table. Predicates missing from it pass
//! through unchanged with every qualifier slot empty.

use serde::Serialize;

const BIOLINK_PREFIX: &str = "biolink:";

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct QualifiedPredicate {
    pub predicate: String,
    pub qualified_predicate: String,
    pub subject_aspect_qualifier: String,
    pub subject_direction_qualifier: String,
    pub subject_part_qualifier: String,
    pub subject_form_or_variant_qualifier: String,
    pub object_aspect_qualifier: String,
    pub object_direction_qualifier: String,
    pub object_part_qualifier: String,
    pub object_form_or_variant_qualifier: String,
    pub anatomical_context_qualifier: String,
}

impl QualifiedPredicate {
    /// Qualifier columns in edge-row order, starting at `qualified_predicate`.
    pub fn qualifier_columns(&self) -> [&str; 10] {
        [
            &self.qualified_predicate,
            &self.subject_aspect_qualifier,
            &self.subject_direction_qualifier,
            &self.subject_part_qualifier,
            &self.subject_form_or_variant_qualifier,
            &self.object_aspect_qualifier,
            &self.object_direction_qualifier,
            &self.object_part_qualifier,
            &self.object_form_or_variant_qualifier,
            &self.anatomical_context_qualifier,
        ]
    }
}

/// One row of the mapping table. Empty strings mean "slot not set".
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QualifierRule {
    pub internal: &'static str,
    pub predicate: &'static str,
    pub qualified_predicate: &'static str,
    pub subject_form_or_variant: &'static str,
    pub object_aspect: &'static str,
    pub object_direction: &'static str,
}

pub const QUALIFIER_TABLE: &[QualifierRule] = &[
    QualifierRule {
        internal: "entity_positively_regulates_entity",
        predicate: "biolink:affects",
        qualified_predicate: "biolink:causes",
        subject_form_or_variant: "",
        object_aspect: "activity_or_abundance",
        object_direction: "increased",
    },
    QualifierRule {
        internal: "entity_negatively_regulates_entity",
        predicate: "biolink:affects",
        qualified_predicate: "biolink:causes",
        subject_form_or_variant: "",
        object_aspect: "activity_or_abundance",
        object_direction: "decreased",
    },
    QualifierRule {
        internal: "gain_of_function_contributes_to",
        predicate: "biolink:affects",
        qualified_predicate: "biolink:contributes_to",
        subject_form_or_variant: "gain_of_function_variant_form",
        object_aspect: "",
        object_direction: "",
    },
    QualifierRule {
        internal: "loss_of_function_contributes_to",
        predicate: "biolink:affects",
        qualified_predicate: "biolink:contributes_to",
        subject_form_or_variant: "loss_of_function_variant_form",
        object_aspect: "",
        object_direction: "",
    },
];

pub fn local_name(predicate: &str) -> &str {
    predicate.strip_prefix(BIOLINK_PREFIX).unwrap_or(predicate)
}

pub fn lookup(predicate: &str) -> Option<&'static QualifierRule> {
    let name = local_name(predicate);
    QUALIFIER_TABLE.iter().find(|rule| rule.internal == name)
}

/// Maps an internal predicate, with or without the `biolink:` prefix.
pub fn map_predicate(predicate: &str) -> QualifiedPredicate {
    match lookup(predicate) {
        Some(rule) => QualifiedPredicate {
            predicate: rule.predicate.to_string(),
            qualified_predicate: rule.qualified_predicate.to_string(),
            subject_form_or_variant_qualifier: rule.subject_form_or_variant.to_string(),
            object_aspect_qualifier: rule.object_aspect.to_string(),
            object_direction_qualifier: rule.object_direction.to_string(),
            ..QualifiedPredicate::default()
        },
        None => QualifiedPredicate {
            predicate: predicate.to_string(),
            ..QualifiedPredicate::default()
        },
    }
}

/// Recovers the internal predicate name from an emitted predicate and its
/// qualifier columns.
pub fn reverse_lookup(
    predicate: &str,
    qualified_predicate: &str,
    subject_form_or_variant: &str,
    object_aspect: &str,
    object_direction: &str,
) -> Option<&'static str> {
    if let Some(rule) = QUALIFIER_TABLE.iter().find(|rule| {
        rule.predicate == predicate
            && rule.qualified_predicate == qualified_predicate
            && rule.subject_form_or_variant == subject_form_or_variant
            && rule.object_aspect == object_aspect
            && rule.object_direction == object_direction
    }) {
        return Some(rule.internal);
    }
    None
}
