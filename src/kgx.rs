//! KGX record encoding and decoding.
//!
//! Rows are tab separated. Field values never contain tabs or line breaks;
//! the encoder replaces them with spaces.

use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

use crate::aggregate::{AggregateEdge, ScoredEvidence};
use crate::error::ExportError;
use crate::qualifiers::{QualifiedPredicate, map_predicate};

pub const NODE_COLUMNS: usize = 3;
pub const EDGE_COLUMNS: usize = 19;

const PUBMED_SOURCE: &str = "infores:pubmed";
const CORROBORATING_SOURCE: &str = "infores:semmeddb";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeRecord {
    pub id: String,
    pub name: String,
    pub category: String,
}

impl NodeRecord {
    pub fn to_row(&self) -> String {
        join_row(&[&self.id, &self.name, &self.category])
    }

    pub fn parse_row(line: &str) -> Result<Self, ExportError> {
        let fields = split_row(line, NODE_COLUMNS)?;
        Ok(Self {
            id: fields[0].to_string(),
            name: fields[1].to_string(),
            category: fields[2].to_string(),
        })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EdgeRecord {
    pub subject: String,
    pub object: String,
    pub qualified: QualifiedPredicate,
    pub assertion_id: String,
    pub association_curie: String,
    pub confidence_score: f64,
    pub supporting_study_results: String,
    pub supporting_publications: String,
    pub attributes_json: String,
}

impl EdgeRecord {
    pub fn predicate(&self) -> &str {
        &self.qualified.predicate
    }

    pub fn to_row(&self) -> String {
        let score = self.confidence_score.to_string();
        let mut fields: Vec<&str> = Vec::with_capacity(EDGE_COLUMNS);
        fields.push(&self.subject);
        fields.push(&self.qualified.predicate);
        fields.push(&self.object);
        fields.extend(self.qualified.qualifier_columns());
        fields.push(&self.assertion_id);
        fields.push(&self.association_curie);
        fields.push(&score);
        fields.push(&self.supporting_study_results);
        fields.push(&self.supporting_publications);
        fields.push(&self.attributes_json);
        join_row(&fields)
    }

    pub fn parse_row(line: &str) -> Result<Self, ExportError> {
        let f = split_row(line, EDGE_COLUMNS)?;
        let confidence_score = f[15]
            .parse::<f64>()
            .map_err(|err| ExportError::Encoding(format!("confidence score {:?}: {err}", f[15])))?;
        Ok(Self {
            subject: f[0].to_string(),
            object: f[2].to_string(),
            qualified: QualifiedPredicate {
                predicate: f[1].to_string(),
                qualified_predicate: f[3].to_string(),
                subject_aspect_qualifier: f[4].to_string(),
                subject_direction_qualifier: f[5].to_string(),
                subject_part_qualifier: f[6].to_string(),
                subject_form_or_variant_qualifier: f[7].to_string(),
                object_aspect_qualifier: f[8].to_string(),
                object_direction_qualifier: f[9].to_string(),
                object_part_qualifier: f[10].to_string(),
                object_form_or_variant_qualifier: f[11].to_string(),
                anatomical_context_qualifier: f[12].to_string(),
            },
            assertion_id: f[13].to_string(),
            association_curie: f[14].to_string(),
            confidence_score,
            supporting_study_results: f[16].to_string(),
            supporting_publications: f[17].to_string(),
            attributes_json: f[18].to_string(),
        })
    }
}

/// One entry of the nested provenance blob.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Attribute {
    pub attribute_type_id: String,
    pub value: Value,
    pub value_type_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub attribute_source: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub attributes: Vec<Attribute>,
}

impl Attribute {
    fn new(type_id: &str, value: Value, value_type_id: &str, source: &str) -> Self {
        Self {
            attribute_type_id: type_id.to_string(),
            value,
            value_type_id: value_type_id.to_string(),
            value_url: None,
            description: None,
            attribute_source: source.to_string(),
            attributes: Vec::new(),
        }
    }

    fn describe(mut self, description: &str) -> Self {
        self.description = Some(description.to_string());
        self
    }
}

pub struct KgxEncoder {
    knowledge_source: String,
}

impl KgxEncoder {
    pub fn new(knowledge_source: impl Into<String>) -> Self {
        Self {
            knowledge_source: knowledge_source.into(),
        }
    }

    /// Renders an aggregated edge under the exported subject/object ids.
    pub fn encode_edge(
        &self,
        edge: &AggregateEdge,
        subject: &str,
        object: &str,
    ) -> Result<EdgeRecord, ExportError> {
        let supporting_study_results = edge
            .evidence
            .iter()
            .map(|item| format!("tmkp:{}", item.evidence.evidence_id))
            .collect::<Vec<_>>()
            .join("|");
        let supporting_publications = edge
            .evidence
            .iter()
            .map(|item| item.evidence.document_id.as_str())
            .collect::<Vec<_>>()
            .join("|");
        let attributes = self.edge_attributes(edge, &supporting_publications);
        let attributes_json = serde_json::to_string(&attributes)
            .map_err(|err| ExportError::Encoding(err.to_string()))?;

        Ok(EdgeRecord {
            subject: subject.to_string(),
            object: object.to_string(),
            qualified: map_predicate(&edge.predicate),
            assertion_id: edge.assertion.assertion_id.clone(),
            association_curie: edge.assertion.association_curie.clone(),
            confidence_score: edge.score,
            supporting_study_results,
            supporting_publications,
            attributes_json,
        })
    }

    pub fn edge_attributes(&self, edge: &AggregateEdge, publications: &str) -> Vec<Attribute> {
        let source = self.knowledge_source.as_str();
        let mut attributes = vec![
            Attribute::new(
                "biolink:primary_knowledge_source",
                json!(source),
                "biolink:InformationResource",
                source,
            ),
            Attribute::new(
                "biolink:supporting_data_source",
                json!(PUBMED_SOURCE),
                "biolink:InformationResource",
                source,
            ),
            Attribute::new(
                "biolink:has_evidence_count",
                json!(edge.evidence_count),
                "biolink:EvidenceCount",
                source,
            )
            .describe("Number of sentences asserting this edge"),
            Attribute::new(
                "biolink:extraction_confidence_score",
                json!(edge.score),
                "biolink:ConfidenceLevel",
                source,
            )
            .describe("Mean confidence over every sentence asserting this edge"),
            Attribute::new(
                "biolink:supporting_document",
                json!(publications),
                "biolink:Publication",
                PUBMED_SOURCE,
            )
            .describe("Pipe-delimited documents containing the supporting sentences"),
        ];
        attributes.extend(edge.evidence.iter().map(|item| self.study_result(item)));
        attributes
    }

    fn study_result(&self, item: &ScoredEvidence) -> Attribute {
        let source = self.knowledge_source.as_str();
        let evidence = &item.evidence;
        let mut document = Attribute::new(
            "biolink:supporting_document",
            json!(evidence.document_id),
            "biolink:Publication",
            PUBMED_SOURCE,
        );
        document.value_url = document_url(&evidence.document_id);

        let mut nested = vec![
            Attribute::new(
                "biolink:supporting_text",
                json!(evidence.sentence),
                "EDAM:data_3671",
                source,
            ),
            document,
            Attribute::new(
                "biolink:supporting_document_type",
                json!(evidence.document_publication_type),
                "MESH:U000020",
                PUBMED_SOURCE,
            ),
            Attribute::new(
                "biolink:supporting_document_year",
                json!(evidence.document_year),
                "UO:0000036",
                PUBMED_SOURCE,
            ),
            Attribute::new(
                "biolink:supporting_text_located_in",
                json!(evidence.document_zone),
                "IAO_0000314",
                PUBMED_SOURCE,
            ),
            Attribute::new(
                "biolink:extraction_confidence_score",
                json!(item.raw_score),
                "EDAM:data_1772",
                source,
            ),
            Attribute::new(
                "biolink:subject_location_in_text",
                json!(evidence.subject_span),
                "xsd:string",
                source,
            ),
            Attribute::new(
                "biolink:object_location_in_text",
                json!(evidence.object_span),
                "xsd:string",
                source,
            ),
        ];
        if evidence.corroborated {
            nested.push(Attribute::new(
                "biolink:agrees_with_data_source",
                json!(CORROBORATING_SOURCE),
                "biolink:InformationResource",
                source,
            ));
        }

        let mut result = Attribute::new(
            "biolink:supporting_study_result",
            json!(format!("tmkp:{}", evidence.evidence_id)),
            "biolink:TextMiningResult",
            source,
        )
        .describe("A single result from running an NLP tool over a piece of text");
        result.attributes = nested;
        result
    }
}

/// Resolvable URL for a PubMed or PubMed Central document id.
pub fn document_url(document_id: &str) -> Option<String> {
    if let Some(pmid) = document_id.strip_prefix("PMID:") {
        return Some(format!("https://pubmed.ncbi.nlm.nih.gov/{pmid}/"));
    }
    let pmc = document_id
        .strip_prefix("PMCID:")
        .or_else(|| document_id.strip_prefix("PMC:"))
        .unwrap_or(document_id);
    let digits = pmc.strip_prefix("PMC")?;
    if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    Some(format!("https://www.ncbi.nlm.nih.gov/pmc/articles/PMC{digits}/"))
}

fn sanitize(field: &str) -> String {
    field.replace(['\t', '\n', '\r'], " ")
}

fn join_row(fields: &[&str]) -> String {
    fields
        .iter()
        .map(|field| sanitize(field))
        .collect::<Vec<_>>()
        .join("\t")
}

fn split_row(line: &str, expected: usize) -> Result<Vec<&str>, ExportError> {
    let line = line.trim_end_matches(['\n', '\r']);
    let fields = line.split('\t').collect::<Vec<_>>();
    if fields.len() != expected {
        return Err(ExportError::MalformedRow {
            expected,
            found: fields.len(),
        });
    }
    Ok(fields)
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;

    use super::*;
    use crate::domain::{Assertion, Evidence};

    fn scored(id: &str, document: &str, raw_score: f64, corroborated: bool) -> ScoredEvidence {
        ScoredEvidence {
            evidence: Evidence {
                evidence_id: id.to_string(),
                assertion_id: "abcde".to_string(),
                document_id: document.to_string(),
                sentence: "Group compounds\tincrease TP53.\n".to_string(),
                subject_span: "start 0, end 5".to_string(),
                object_span: "start 25, end 29".to_string(),
                document_zone: "abstract".to_string(),
                document_publication_type: "Journal Article".to_string(),
                document_year: Some(2020),
                superseded_by: None,
                corroborated,
                scores: Vec::new(),
            },
            raw_score,
            adjusted_score: raw_score,
        }
    }

    fn edge(evidence: Vec<ScoredEvidence>) -> AggregateEdge {
        AggregateEdge {
            assertion: Assertion {
                assertion_id: "abcde".to_string(),
                subject_curie: "CHEBI:24433".to_string(),
                object_curie: "PR:000000015".to_string(),
                association_curie: "biolink:ChemicalToGeneAssociation".to_string(),
                evidence_ids: Vec::new(),
            },
            predicate: "biolink:entity_positively_regulates_entity".to_string(),
            score: 0.9,
            evidence_count: 3,
            evidence,
        }
    }

    #[test]
    fn encode_edge_joins_evidence_and_maps_predicate() {
        let encoder = KgxEncoder::new("infores:text-mining-provider-targeted");
        let record = encoder
            .encode_edge(
                &edge(vec![
                    scored("xyz", "PMID:1", 0.95, true),
                    scored("abc", "PMC123", 0.85, false),
                ]),
                "CHEBI:24433",
                "UniProtKB:P04637",
            )
            .unwrap();

        assert_eq!(record.predicate(), "biolink:affects");
        assert_eq!(record.qualified.qualified_predicate, "biolink:causes");
        assert_eq!(record.object, "UniProtKB:P04637");
        assert_eq!(record.supporting_study_results, "tmkp:xyz|tmkp:abc");
        assert_eq!(record.supporting_publications, "PMID:1|PMC123");

        let attributes: Vec<Attribute> = serde_json::from_str(&record.attributes_json).unwrap();
        assert_eq!(attributes.len(), 7);
        assert_eq!(attributes[2].value, json!(3));
        let first = &attributes[5];
        assert_eq!(first.attribute_type_id, "biolink:supporting_study_result");
        assert_eq!(first.attributes.len(), 9);
        assert_eq!(
            first.attributes[1].value_url.as_deref(),
            Some("https://pubmed.ncbi.nlm.nih.gov/1/")
        );
        assert_eq!(attributes[6].attributes.len(), 8);
    }

    #[test]
    fn edge_row_has_fixed_columns_without_control_characters() {
        let encoder = KgxEncoder::new("infores:text-mining-provider-targeted");
        let record = encoder
            .encode_edge(
                &edge(vec![scored("xyz", "PMID:1", 0.95, false)]),
                "CHEBI:24433",
                "PR:000000015",
            )
            .unwrap();
        let row = record.to_row();
        assert!(!row.contains('\n'));
        assert_eq!(row.split('\t').count(), EDGE_COLUMNS);
        assert_eq!(EdgeRecord::parse_row(&row).unwrap(), record);
    }

    #[test]
    fn node_row_sanitizes_name() {
        let node = NodeRecord {
            id: "CHEBI:24433".to_string(),
            name: "group\tname".to_string(),
            category: "biolink:SmallMolecule".to_string(),
        };
        let row = node.to_row();
        assert_eq!(row, "CHEBI:24433\tgroup name\tbiolink:SmallMolecule");
    }

    #[test]
    fn malformed_rows_are_rejected() {
        assert_matches!(
            NodeRecord::parse_row("CHEBI:1\tname"),
            Err(ExportError::MalformedRow {
                expected: 3,
                found: 2
            })
        );
        let mut fields = vec![""; EDGE_COLUMNS];
        fields[15] = "high";
        assert_matches!(
            EdgeRecord::parse_row(&fields.join("\t")),
            Err(ExportError::Encoding(_))
        );
    }

    #[test]
    fn document_urls() {
        assert_eq!(
            document_url("PMID:32807176").as_deref(),
            Some("https://pubmed.ncbi.nlm.nih.gov/32807176/")
        );
        assert_eq!(
            document_url("PMC7654321").as_deref(),
            Some("https://www.ncbi.nlm.nih.gov/pmc/articles/PMC7654321/")
        );
        assert_eq!(
            document_url("PMCID:PMC42").as_deref(),
            Some("https://www.ncbi.nlm.nih.gov/pmc/articles/PMC42/")
        );
        assert_eq!(document_url("DOI:10.1000/1"), None);
        assert_eq!(document_url("PMC"), None);
    }
}
