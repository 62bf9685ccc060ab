//! Evidence aggregation: turns one assertion and its evidence into one
//! scored edge per dominant predicate.

use std::collections::{BTreeSet, HashMap, HashSet};

use serde::Serialize;
use tracing::debug;

use crate::domain::{Assertion, AssertionChunk, Evidence};
use crate::error::ExportError;

/// An edge candidate for one (assertion, top predicate) pair.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AggregateEdge {
    pub assertion: Assertion,
    /// Internal predicate, before qualifier mapping.
    pub predicate: String,
    pub score: f64,
    /// Number of supporting items before `limit` truncation.
    pub evidence_count: usize,
    /// Supporting items, highest score first, truncated to `limit`.
    pub evidence: Vec<ScoredEvidence>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ScoredEvidence {
    pub evidence: Evidence,
    pub raw_score: f64,
    pub adjusted_score: f64,
}

/// Scales a raw score by the informativeness of both concepts. Returns the
/// raw score when either weight is missing or unusable.
pub fn adjusted_score(raw: f64, subject_idf: Option<f64>, object_idf: Option<f64>) -> f64 {
    match (usable(subject_idf), usable(object_idf)) {
        (Some(subject), Some(object)) => (subject.log10() * object.log10() * raw).abs(),
        _ => raw,
    }
}

fn usable(idf: Option<f64>) -> Option<f64> {
    idf.filter(|value| value.is_finite() && *value > 0.0)
}

/// Arithmetic mean of `scores`. Empty input and non-finite results are
/// defects and are reported instead of returned.
pub fn mean_score(assertion_id: &str, predicate: &str, scores: &[f64]) -> Result<f64, ExportError> {
    if scores.is_empty() {
        return Err(ExportError::EmptyAggregation {
            assertion_id: assertion_id.to_string(),
            predicate: predicate.to_string(),
        });
    }
    let mean = scores.iter().sum::<f64>() / scores.len() as f64;
    if !mean.is_finite() {
        return Err(ExportError::NonFiniteScore {
            assertion_id: assertion_id.to_string(),
            predicate: predicate.to_string(),
        });
    }
    Ok(mean)
}

#[derive(Debug, Clone)]
pub struct EvidenceAggregator {
    limit: usize,
    negative_predicates: HashSet<String>,
}

impl EvidenceAggregator {
    /// `limit` caps the supporting items attached to an edge; 0 keeps all.
    pub fn new(limit: usize, negative_predicates: &[String]) -> Self {
        Self {
            limit,
            negative_predicates: negative_predicates.iter().cloned().collect(),
        }
    }

    pub fn aggregate_chunk(
        &self,
        chunk: &AssertionChunk,
        idf: &HashMap<String, f64>,
    ) -> Result<Vec<AggregateEdge>, ExportError> {
        let mut edges = Vec::new();
        for assertion in &chunk.assertions {
            let evidence = chunk.evidence_for(assertion).collect::<Vec<_>>();
            edges.extend(self.aggregate_assertion(assertion, &evidence, idf)?);
        }
        debug!(
            assertions = chunk.assertions.len(),
            edges = edges.len(),
            "chunk aggregated"
        );
        Ok(edges)
    }

    /// Aggregates one assertion. Edges come back ordered by predicate.
    pub fn aggregate_assertion(
        &self,
        assertion: &Assertion,
        evidence: &[&Evidence],
        idf: &HashMap<String, f64>,
    ) -> Result<Vec<AggregateEdge>, ExportError> {
        let retained = retain_evidence(evidence);
        let predicates = retained
            .iter()
            .filter_map(|item| item.top_predicate())
            .filter(|predicate| !self.negative_predicates.contains(*predicate))
            .collect::<BTreeSet<_>>();

        let subject_idf = idf.get(&assertion.subject_curie).copied();
        let object_idf = idf.get(&assertion.object_curie).copied();

        let mut edges = Vec::with_capacity(predicates.len());
        for predicate in predicates {
            let mut supporting = retained
                .iter()
                .filter(|item| item.top_predicate() == Some(predicate))
                .filter_map(|item| {
                    let raw = item.top_score()?.score;
                    Some(ScoredEvidence {
                        evidence: (*item).clone(),
                        raw_score: raw,
                        adjusted_score: adjusted_score(raw, subject_idf, object_idf),
                    })
                })
                .collect::<Vec<_>>();
            // stable: equal scores keep retrieval order
            supporting.sort_by(|a, b| b.raw_score.total_cmp(&a.raw_score));

            let scores = supporting
                .iter()
                .map(|item| item.adjusted_score)
                .collect::<Vec<_>>();
            let score = mean_score(&assertion.assertion_id, predicate, &scores)?;
            let evidence_count = supporting.len();
            if self.limit > 0 {
                supporting.truncate(self.limit);
            }
            edges.push(AggregateEdge {
                assertion: assertion.clone(),
                predicate: predicate.to_string(),
                score,
                evidence_count,
                evidence: supporting,
            });
        }
        Ok(edges)
    }
}

/// Drops superseded and unscored items, then collapses items sharing a
/// `(document_id, sentence)` key to the highest scoring one.
fn retain_evidence<'a>(evidence: &[&'a Evidence]) -> Vec<&'a Evidence> {
    let mut retained: Vec<&Evidence> = Vec::with_capacity(evidence.len());
    let mut seen: HashMap<(&str, &str), usize> = HashMap::new();
    for item in evidence {
        if item.superseded_by.is_some() {
            continue;
        }
        let Some(top) = item.top_score() else {
            continue;
        };
        let key = (item.document_id.as_str(), item.sentence.as_str());
        match seen.get(&key) {
            Some(&index) => {
                let current = retained[index].top_score().map_or(f64::MIN, |s| s.score);
                if top.score > current {
                    retained[index] = item;
                }
            }
            None => {
                seen.insert(key, retained.len());
                retained.push(item);
            }
        }
    }
    retained
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;

    use super::*;

    const POSITIVE: &str = "biolink:entity_positively_regulates_entity";
    const NEGATIVE: &str = "biolink:entity_negatively_regulates_entity";

    fn assertion(evidence_ids: &[&str]) -> Assertion {
        Assertion {
            assertion_id: "abcde".to_string(),
            subject_curie: "CHEBI:24433".to_string(),
            object_curie: "PR:000000015".to_string(),
            association_curie: "biolink:ChemicalToGeneAssociation".to_string(),
            evidence_ids: evidence_ids.iter().map(|id| id.to_string()).collect(),
        }
    }

    fn evidence(id: &str, document: &str, sentence: &str, scores: &[(&str, f64)]) -> Evidence {
        let mut evidence = Evidence {
            evidence_id: id.to_string(),
            assertion_id: "abcde".to_string(),
            document_id: document.to_string(),
            sentence: sentence.to_string(),
            subject_span: "start 0, end 5".to_string(),
            object_span: "start 10, end 14".to_string(),
            document_zone: "abstract".to_string(),
            document_publication_type: "Journal Article".to_string(),
            document_year: Some(2020),
            superseded_by: None,
            corroborated: false,
            scores: Vec::new(),
        };
        for (predicate, score) in scores {
            evidence.push_score(predicate.to_string(), *score);
        }
        evidence
    }

    fn aggregator() -> EvidenceAggregator {
        EvidenceAggregator::new(0, &["false".to_string()])
    }

    #[test]
    fn single_evidence_scenario() {
        let item = evidence("xyz", "PMID:1", "s1", &[(POSITIVE, 0.9992), (NEGATIVE, 0.16)]);
        let edges = aggregator()
            .aggregate_assertion(&assertion(&["xyz"]), &[&item], &HashMap::new())
            .unwrap();
        assert_eq!(edges.len(), 1);
        assert_eq!(edges[0].predicate, POSITIVE);
        assert_eq!(edges[0].score, 0.9992);
        assert_eq!(edges[0].evidence_count, 1);
    }

    #[test]
    fn one_edge_per_top_predicate() {
        let a = evidence("a", "PMID:1", "s1", &[(POSITIVE, 0.8), (NEGATIVE, 0.1)]);
        let b = evidence("b", "PMID:2", "s2", &[(POSITIVE, 0.2), (NEGATIVE, 0.7)]);
        let c = evidence("c", "PMID:3", "s3", &[(POSITIVE, 0.6)]);
        let edges = aggregator()
            .aggregate_assertion(&assertion(&["a", "b", "c"]), &[&a, &b, &c], &HashMap::new())
            .unwrap();
        assert_eq!(edges.len(), 2);
        assert_eq!(edges[0].predicate, NEGATIVE);
        assert_eq!(edges[0].score, 0.7);
        assert_eq!(edges[1].predicate, POSITIVE);
        assert!((edges[1].score - 0.7).abs() < 1e-12);
        assert_eq!(edges[1].evidence[0].evidence.evidence_id, "a");
    }

    #[test]
    fn duplicate_sentences_keep_highest_score() {
        let a = evidence("a", "PMID:1", "same", &[(POSITIVE, 0.5)]);
        let b = evidence("b", "PMID:1", "same", &[(POSITIVE, 0.9)]);
        let c = evidence("c", "PMID:2", "same", &[(POSITIVE, 0.3)]);
        let edges = aggregator()
            .aggregate_assertion(&assertion(&["a", "b", "c"]), &[&a, &b, &c], &HashMap::new())
            .unwrap();
        let ids = edges[0]
            .evidence
            .iter()
            .map(|item| item.evidence.evidence_id.as_str())
            .collect::<Vec<_>>();
        assert_eq!(ids, vec!["b", "c"]);
        assert!((edges[0].score - 0.6).abs() < 1e-12);
    }

    #[test]
    fn superseded_and_negative_evidence_produce_no_edge() {
        let mut a = evidence("a", "PMID:1", "s1", &[(POSITIVE, 0.9)]);
        a.superseded_by = Some("a2".to_string());
        let b = evidence("b", "PMID:2", "s2", &[("false", 0.95), (POSITIVE, 0.05)]);
        let edges = aggregator()
            .aggregate_assertion(&assertion(&["a", "b"]), &[&a, &b], &HashMap::new())
            .unwrap();
        assert!(edges.is_empty());
    }

    #[test]
    fn evidence_count_precedes_truncation() {
        let items = (0..4)
            .map(|i| evidence(&format!("e{i}"), &format!("PMID:{i}"), "s", &[(POSITIVE, 0.1 * (i + 1) as f64)]))
            .collect::<Vec<_>>();
        let refs = items.iter().collect::<Vec<_>>();
        let edges = EvidenceAggregator::new(2, &[])
            .aggregate_assertion(&assertion(&["e0", "e1", "e2", "e3"]), &refs, &HashMap::new())
            .unwrap();
        assert_eq!(edges[0].evidence_count, 4);
        assert_eq!(edges[0].evidence.len(), 2);
        assert_eq!(edges[0].evidence[0].evidence.evidence_id, "e3");
        assert!((edges[0].score - 0.25).abs() < 1e-12);
    }

    #[test]
    fn idf_adjusts_score_when_both_weights_present() {
        assert_eq!(adjusted_score(0.5, Some(100.0), None), 0.5);
        assert!((adjusted_score(0.5, Some(100.0), Some(10.0)) - 1.0).abs() < 1e-12);
        assert_eq!(adjusted_score(0.5, Some(0.0), Some(10.0)), 0.5);

        let item = evidence("xyz", "PMID:1", "s1", &[(POSITIVE, 0.5)]);
        let idf = HashMap::from([
            ("CHEBI:24433".to_string(), 100.0),
            ("PR:000000015".to_string(), 1000.0),
        ]);
        let edges = aggregator()
            .aggregate_assertion(&assertion(&["xyz"]), &[&item], &idf)
            .unwrap();
        assert!((edges[0].score - 3.0).abs() < 1e-9);
        assert_eq!(edges[0].evidence[0].raw_score, 0.5);
    }

    #[test]
    fn empty_and_non_finite_aggregation_raise() {
        assert_matches!(
            mean_score("abcde", POSITIVE, &[]),
            Err(ExportError::EmptyAggregation { .. })
        );
        assert_matches!(
            mean_score("abcde", POSITIVE, &[f64::NAN]),
            Err(ExportError::NonFiniteScore { .. })
        );
    }
}
