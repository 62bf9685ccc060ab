use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use std::sync::LazyLock;

use clap::ValueEnum;
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::error::ExportError;

static CURIE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[A-Za-z][A-Za-z0-9_.\-]*:[^\s|]+$").unwrap());

pub const PROTEIN_FAMILY_PREFIX: &str = "PR";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum ExportTarget {
    Nodes,
    Edges,
    Metadata,
    Compose,
}

impl fmt::Display for ExportTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExportTarget::Nodes => write!(f, "nodes"),
            ExportTarget::Edges => write!(f, "edges"),
            ExportTarget::Metadata => write!(f, "metadata"),
            ExportTarget::Compose => write!(f, "compose"),
        }
    }
}

/// Whether protein-family identifiers are written as-is or translated to
/// their preferred external (UniProt) identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IdentifierMode {
    Internal,
    Uniprot,
}

impl fmt::Display for IdentifierMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            IdentifierMode::Internal => write!(f, "PR"),
            IdentifierMode::Uniprot => write!(f, "UniProt"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Curie(String);

impl Curie {
    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn prefix(&self) -> &str {
        curie_prefix(&self.0)
    }
}

impl fmt::Display for Curie {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for Curie {
    type Err = ExportError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let trimmed = value.trim();
        if !CURIE_RE.is_match(trimmed) {
            return Err(ExportError::InvalidCurie(value.to_string()));
        }
        Ok(Self(trimmed.to_string()))
    }
}

pub fn curie_prefix(curie: &str) -> &str {
    curie.split_once(':').map(|(prefix, _)| prefix).unwrap_or(curie)
}

/// A worker partition: `[offset, offset + limit)` over the ordered set of
/// eligible assertion ids.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct AssertionRange {
    pub offset: u64,
    pub limit: u64,
}

impl AssertionRange {
    pub fn new(offset: u64, limit: u64) -> Result<Self, ExportError> {
        if limit == 0 {
            return Err(ExportError::InvalidRange(format!(
                "limit must be positive (offset {offset})"
            )));
        }
        offset
            .checked_add(limit)
            .ok_or_else(|| ExportError::InvalidRange(format!("{offset}+{limit} overflows")))?;
        Ok(Self { offset, limit })
    }

    pub fn end(&self) -> u64 {
        self.offset + self.limit
    }

    /// Splits the range into consecutive sub-ranges of at most `chunk_size`.
    pub fn chunks(&self, chunk_size: u64) -> Vec<AssertionRange> {
        let step = chunk_size.max(1);
        let mut chunks = Vec::new();
        let mut start = self.offset;
        while start < self.end() {
            let limit = step.min(self.end() - start);
            chunks.push(AssertionRange {
                offset: start,
                limit,
            });
            start += limit;
        }
        chunks
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Assertion {
    pub assertion_id: String,
    pub subject_curie: String,
    pub object_curie: String,
    pub association_curie: String,
    /// Evidence ids in retrieval order; the records live in the chunk arena.
    pub evidence_ids: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PredicateScore {
    pub evidence_id: String,
    pub predicate: String,
    pub score: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Evidence {
    pub evidence_id: String,
    pub assertion_id: String,
    pub document_id: String,
    pub sentence: String,
    pub subject_span: String,
    pub object_span: String,
    pub document_zone: String,
    pub document_publication_type: String,
    pub document_year: Option<i64>,
    pub superseded_by: Option<String>,
    /// Set when an independent extractor produced the same claim for this
    /// sentence.
    pub corroborated: bool,
    /// Scores in row order; at most one per predicate.
    pub scores: Vec<PredicateScore>,
}

impl Evidence {
    /// Highest scoring predicate; the first row wins a tie.
    pub fn top_score(&self) -> Option<&PredicateScore> {
        let mut best: Option<&PredicateScore> = None;
        for score in &self.scores {
            match best {
                Some(current) if score.score <= current.score => {}
                _ => best = Some(score),
            }
        }
        best
    }

    pub fn top_predicate(&self) -> Option<&str> {
        self.top_score().map(|score| score.predicate.as_str())
    }

    pub fn score_for(&self, predicate: &str) -> Option<f64> {
        self.scores
            .iter()
            .find(|score| score.predicate == predicate)
            .map(|score| score.score)
    }

    /// Adds a score, keeping the first value seen for a predicate.
    pub fn push_score(&mut self, predicate: String, score: f64) -> bool {
        if self.scores.iter().any(|existing| existing.predicate == predicate) {
            return false;
        }
        self.scores.push(PredicateScore {
            evidence_id: self.evidence_id.clone(),
            predicate,
            score,
        });
        true
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IdentifierMapping {
    pub internal_id: String,
    pub external_id: String,
    pub taxon: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConceptIdf {
    pub concept_curie: String,
    pub level: String,
    pub idf: f64,
}

/// Arena for one retrieval chunk: assertions in ascending id order with
/// their evidence keyed by evidence id.
#[derive(Debug, Clone, Default)]
pub struct AssertionChunk {
    pub assertions: Vec<Assertion>,
    pub evidence: HashMap<String, Evidence>,
}

impl AssertionChunk {
    pub fn evidence_for<'a>(&'a self, assertion: &'a Assertion) -> impl Iterator<Item = &'a Evidence> {
        assertion
            .evidence_ids
            .iter()
            .filter_map(|id| self.evidence.get(id))
    }

    pub fn curies(&self) -> Vec<String> {
        let mut curies = self
            .assertions
            .iter()
            .flat_map(|assertion| {
                [
                    assertion.subject_curie.clone(),
                    assertion.object_curie.clone(),
                ]
            })
            .collect::<Vec<_>>();
        curies.sort();
        curies.dedup();
        curies
    }
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;

    use super::*;

    fn evidence_with(scores: &[(&str, f64)]) -> Evidence {
        let mut evidence = Evidence {
            evidence_id: "xyz".to_string(),
            assertion_id: "abcde".to_string(),
            document_id: "PMID:32807176".to_string(),
            sentence: "something".to_string(),
            subject_span: "1|2".to_string(),
            object_span: "2|4".to_string(),
            document_zone: "title".to_string(),
            document_publication_type: "article".to_string(),
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

    #[test]
    fn parse_curie_valid() {
        let curie: Curie = " CHEBI:24433 ".parse().unwrap();
        assert_eq!(curie.as_str(), "CHEBI:24433");
        assert_eq!(curie.prefix(), "CHEBI");
    }

    #[test]
    fn parse_curie_invalid() {
        let err = "no-colon".parse::<Curie>().unwrap_err();
        assert_matches!(err, ExportError::InvalidCurie(_));
        let err = "PMID:1|PMID:2".parse::<Curie>().unwrap_err();
        assert_matches!(err, ExportError::InvalidCurie(_));
    }

    #[test]
    fn top_predicate_prefers_first_row_on_tie() {
        let evidence = evidence_with(&[
            ("biolink:entity_negatively_regulates_entity", 0.5),
            ("biolink:entity_positively_regulates_entity", 0.5),
        ]);
        assert_eq!(
            evidence.top_predicate(),
            Some("biolink:entity_negatively_regulates_entity")
        );
    }

    #[test]
    fn push_score_rejects_duplicate_predicate() {
        let mut evidence = evidence_with(&[("false", 0.1)]);
        assert!(!evidence.push_score("false".to_string(), 0.9));
        assert_eq!(evidence.score_for("false"), Some(0.1));
    }

    #[test]
    fn range_chunks_cover_range() {
        let range = AssertionRange::new(10, 25).unwrap();
        let chunks = range.chunks(10);
        assert_eq!(chunks.len(), 3);
        assert_eq!(chunks[0], AssertionRange { offset: 10, limit: 10 });
        assert_eq!(chunks[2], AssertionRange { offset: 30, limit: 5 });
    }

    #[test]
    fn range_rejects_zero_limit() {
        assert_matches!(
            AssertionRange::new(0, 0),
            Err(ExportError::InvalidRange(_))
        );
    }
}
