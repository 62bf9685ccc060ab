//! Read-only access to the assertion datastore.

use std::collections::HashMap;

use camino::Utf8Path;
use rusqlite::{Connection, OpenFlags, Row, params, params_from_iter};
use tracing::{debug, info};

use crate::domain::{
    Assertion, AssertionChunk, AssertionRange, ConceptIdf, Evidence, IdentifierMapping,
};
use crate::error::ExportError;

pub trait AssertionSource {
    /// Number of assertions not flagged incorrect by curation.
    fn eligible_assertion_count(&self) -> Result<u64, ExportError>;
    /// Eligible assertion ids in ascending order, restricted to `range`.
    fn assertion_ids(&self, range: AssertionRange) -> Result<Vec<String>, ExportError>;
    fn load_chunk(&self, assertion_ids: &[String]) -> Result<AssertionChunk, ExportError>;
    /// Distinct subject and object curies of eligible assertions, sorted.
    fn node_curies(&self) -> Result<Vec<String>, ExportError>;
    fn identifier_mappings(&self) -> Result<Vec<IdentifierMapping>, ExportError>;
    fn concept_idf(&self, curies: &[String], level: &str) -> Result<Vec<ConceptIdf>, ExportError>;
}

const ELIGIBLE: &str = "assertion_id NOT IN \
     (SELECT DISTINCT assertion_id FROM evaluation WHERE overall_correct = 0)";

pub struct SqliteAssertionSource {
    conn: Connection,
}

impl SqliteAssertionSource {
    pub fn open(path: &Utf8Path) -> Result<Self, ExportError> {
        info!(path = %path, "opening assertion datastore");
        let conn = Connection::open_with_flags(
            path.as_std_path(),
            OpenFlags::SQLITE_OPEN_READ_ONLY | OpenFlags::SQLITE_OPEN_NO_MUTEX,
        )?;
        Ok(Self { conn })
    }

    pub fn from_connection(conn: Connection) -> Self {
        Self { conn }
    }

    fn load_assertions(&self, ids: &[String]) -> Result<Vec<Assertion>, ExportError> {
        let sql = format!(
            "SELECT assertion_id, subject_curie, object_curie, association_curie \
             FROM assertion WHERE assertion_id IN ({}) ORDER BY assertion_id",
            placeholders(ids.len())
        );
        let mut stmt = self.conn.prepare(&sql)?;
        let rows = stmt.query_map(params_from_iter(ids), |row| {
            Ok(Assertion {
                assertion_id: row.get(0)?,
                subject_curie: row.get(1)?,
                object_curie: row.get(2)?,
                association_curie: row.get(3)?,
                evidence_ids: Vec::new(),
            })
        })?;
        Ok(rows.collect::<Result<Vec<_>, _>>()?)
    }

    fn load_evidence(&self, ids: &[String]) -> Result<Vec<Evidence>, ExportError> {
        let sql = format!(
            "SELECT e.evidence_id, e.assertion_id, e.document_id, e.sentence, \
                    COALESCE(se.span, ''), COALESCE(oe.span, ''), \
                    COALESCE(e.document_zone, ''), COALESCE(e.document_publication_type, ''), \
                    e.document_year_published, e.superseded_by, \
                    EXISTS (SELECT 1 FROM secondary_extraction x WHERE x.evidence_id = e.evidence_id) \
             FROM evidence e \
             LEFT JOIN entity se ON se.entity_id = e.subject_entity_id \
             LEFT JOIN entity oe ON oe.entity_id = e.object_entity_id \
             WHERE e.assertion_id IN ({}) \
             ORDER BY e.assertion_id, e.evidence_id",
            placeholders(ids.len())
        );
        let mut stmt = self.conn.prepare(&sql)?;
        let rows = stmt.query_map(params_from_iter(ids), row_to_evidence)?;
        Ok(rows.collect::<Result<Vec<_>, _>>()?)
    }

    fn load_scores(&self, ids: &[String]) -> Result<Vec<(String, String, f64)>, ExportError> {
        let sql = format!(
            "SELECT s.evidence_id, s.predicate_curie, s.score \
             FROM evidence_score s JOIN evidence e ON e.evidence_id = s.evidence_id \
             WHERE e.assertion_id IN ({}) \
             ORDER BY s.evidence_id, s.score DESC, s.predicate_curie",
            placeholders(ids.len())
        );
        let mut stmt = self.conn.prepare(&sql)?;
        let rows = stmt.query_map(params_from_iter(ids), |row| {
            Ok((row.get(0)?, row.get(1)?, row.get(2)?))
        })?;
        Ok(rows.collect::<Result<Vec<_>, _>>()?)
    }
}

impl AssertionSource for SqliteAssertionSource {
    fn eligible_assertion_count(&self) -> Result<u64, ExportError> {
        let sql = format!("SELECT COUNT(*) FROM assertion WHERE {ELIGIBLE}");
        let count: i64 = self.conn.query_row(&sql, [], |row| row.get(0))?;
        Ok(count.max(0) as u64)
    }

    fn assertion_ids(&self, range: AssertionRange) -> Result<Vec<String>, ExportError> {
        let limit = to_sql_int(range.limit)?;
        let offset = to_sql_int(range.offset)?;
        let sql = format!(
            "SELECT assertion_id FROM assertion WHERE {ELIGIBLE} \
             ORDER BY assertion_id LIMIT ?1 OFFSET ?2"
        );
        let mut stmt = self.conn.prepare(&sql)?;
        let rows = stmt.query_map(params![limit, offset], |row| row.get(0))?;
        Ok(rows.collect::<Result<Vec<String>, _>>()?)
    }

    fn load_chunk(&self, assertion_ids: &[String]) -> Result<AssertionChunk, ExportError> {
        if assertion_ids.is_empty() {
            return Ok(AssertionChunk::default());
        }
        let mut assertions = self.load_assertions(assertion_ids)?;
        let index = assertions
            .iter()
            .enumerate()
            .map(|(i, assertion)| (assertion.assertion_id.clone(), i))
            .collect::<HashMap<_, _>>();

        let mut evidence = HashMap::new();
        for item in self.load_evidence(assertion_ids)? {
            if let Some(&i) = index.get(&item.assertion_id) {
                assertions[i].evidence_ids.push(item.evidence_id.clone());
            }
            evidence.insert(item.evidence_id.clone(), item);
        }

        let mut score_rows = 0usize;
        for (evidence_id, predicate, score) in self.load_scores(assertion_ids)? {
            if let Some(item) = evidence.get_mut(&evidence_id) {
                item.push_score(predicate, score);
                score_rows += 1;
            }
        }
        debug!(
            assertions = assertions.len(),
            evidence = evidence.len(),
            scores = score_rows,
            "chunk loaded"
        );
        Ok(AssertionChunk {
            assertions,
            evidence,
        })
    }

    fn node_curies(&self) -> Result<Vec<String>, ExportError> {
        let sql = format!(
            "SELECT subject_curie FROM assertion WHERE {ELIGIBLE} \
             UNION SELECT object_curie FROM assertion WHERE {ELIGIBLE} \
             ORDER BY 1"
        );
        let mut stmt = self.conn.prepare(&sql)?;
        let rows = stmt.query_map([], |row| row.get(0))?;
        Ok(rows.collect::<Result<Vec<String>, _>>()?)
    }

    fn identifier_mappings(&self) -> Result<Vec<IdentifierMapping>, ExportError> {
        let mut stmt = self
            .conn
            .prepare("SELECT pr, uniprot, taxon FROM pr_to_uniprot ORDER BY pr, uniprot")?;
        let rows = stmt.query_map([], |row| {
            Ok(IdentifierMapping {
                internal_id: row.get(0)?,
                external_id: row.get(1)?,
                taxon: row.get(2)?,
            })
        })?;
        Ok(rows.collect::<Result<Vec<_>, _>>()?)
    }

    fn concept_idf(&self, curies: &[String], level: &str) -> Result<Vec<ConceptIdf>, ExportError> {
        if curies.is_empty() {
            return Ok(Vec::new());
        }
        let sql = format!(
            "SELECT concept_curie, level, idf FROM concept_idf \
             WHERE level = ? AND concept_curie IN ({}) ORDER BY concept_curie",
            placeholders(curies.len())
        );
        let mut stmt = self.conn.prepare(&sql)?;
        let args = std::iter::once(level).chain(curies.iter().map(String::as_str));
        let rows = stmt.query_map(params_from_iter(args), |row| {
            Ok(ConceptIdf {
                concept_curie: row.get(0)?,
                level: row.get(1)?,
                idf: row.get(2)?,
            })
        })?;
        Ok(rows.collect::<Result<Vec<_>, _>>()?)
    }
}

fn row_to_evidence(row: &Row<'_>) -> rusqlite::Result<Evidence> {
    Ok(Evidence {
        evidence_id: row.get(0)?,
        assertion_id: row.get(1)?,
        document_id: row.get(2)?,
        sentence: row.get(3)?,
        subject_span: row.get(4)?,
        object_span: row.get(5)?,
        document_zone: row.get(6)?,
        document_publication_type: row.get(7)?,
        document_year: row.get(8)?,
        superseded_by: row.get(9)?,
        corroborated: row.get(10)?,
        scores: Vec::new(),
    })
}

fn placeholders(count: usize) -> String {
    vec!["?"; count].join(", ")
}

fn to_sql_int(value: u64) -> Result<i64, ExportError> {
    i64::try_from(value).map_err(|_| ExportError::InvalidRange(format!("{value} exceeds i64")))
}
