use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};

use crate::domain::curie_prefix;
use crate::kgx::{EdgeRecord, NodeRecord};

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CountBySource {
    pub original_knowledge_source: BTreeMap<String, u64>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeSummary {
    pub id_prefixes: Vec<String>,
    pub count: u64,
    pub count_by_source: CountBySource,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EdgeSummary {
    pub subject: String,
    pub predicate: String,
    pub object: String,
    pub relations: Vec<String>,
    pub count: u64,
    pub count_by_source: CountBySource,
}

/// The `content_metadata.json` document.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MetadataDocument {
    pub nodes: BTreeMap<String, NodeSummary>,
    pub edges: Vec<EdgeSummary>,
}

#[derive(Debug, Default)]
struct NodeBucket {
    id_prefixes: BTreeSet<String>,
    count: u64,
    by_source: BTreeMap<String, u64>,
}

#[derive(Debug, Default)]
struct EdgeBucket {
    relations: BTreeSet<String>,
    count: u64,
    by_source: BTreeMap<String, u64>,
}

/// Running counts per node category and per
/// (subject category, predicate, object category) triple.
#[derive(Debug)]
pub struct MetadataAccumulator {
    knowledge_source: String,
    nodes: BTreeMap<String, NodeBucket>,
    edges: BTreeMap<(String, String, String), EdgeBucket>,
}

impl MetadataAccumulator {
    pub fn new(knowledge_source: impl Into<String>) -> Self {
        Self {
            knowledge_source: knowledge_source.into(),
            nodes: BTreeMap::new(),
            edges: BTreeMap::new(),
        }
    }

    pub fn observe_node(&mut self, node: &NodeRecord) {
        let bucket = self.nodes.entry(node.category.clone()).or_default();
        bucket.id_prefixes.insert(curie_prefix(&node.id).to_string());
        bucket.count += 1;
        *bucket
            .by_source
            .entry(self.knowledge_source.clone())
            .or_default() += 1;
    }

    pub fn observe_edge(&mut self, edge: &EdgeRecord, subject_category: &str, object_category: &str) {
        let key = (
            subject_category.to_string(),
            edge.predicate().to_string(),
            object_category.to_string(),
        );
        let bucket = self.edges.entry(key).or_default();
        bucket.relations.insert(edge.association_curie.clone());
        bucket.count += 1;
        *bucket
            .by_source
            .entry(self.knowledge_source.clone())
            .or_default() += 1;
    }

    pub fn node_count(&self) -> u64 {
        self.nodes.values().map(|bucket| bucket.count).sum()
    }

    pub fn edge_count(&self) -> u64 {
        self.edges.values().map(|bucket| bucket.count).sum()
    }

    pub fn document(&self) -> MetadataDocument {
        let nodes = self
            .nodes
            .iter()
            .map(|(category, bucket)| {
                (
                    category.clone(),
                    NodeSummary {
                        id_prefixes: bucket.id_prefixes.iter().cloned().collect(),
                        count: bucket.count,
                        count_by_source: CountBySource {
                            original_knowledge_source: bucket.by_source.clone(),
                        },
                    },
                )
            })
            .collect();
        let edges = self
            .edges
            .iter()
            .map(|((subject, predicate, object), bucket)| EdgeSummary {
                subject: subject.clone(),
                predicate: predicate.clone(),
                object: object.clone(),
                relations: bucket.relations.iter().cloned().collect(),
                count: bucket.count,
                count_by_source: CountBySource {
                    original_knowledge_source: bucket.by_source.clone(),
                },
            })
            .collect();
        MetadataDocument { nodes, edges }
    }
}
