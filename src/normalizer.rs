use std::collections::{HashMap, HashSet};
use std::time::Duration;

use reqwest::blocking::Client;
use reqwest::header::{HeaderMap, HeaderValue, USER_AGENT};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::config::NormalizerSettings;
use crate::domain::curie_prefix;
use crate::error::ExportError;
use crate::kgx::NodeRecord;

const FALLBACK_CATEGORY: &str = "biolink:NamedThing";
const DRUGBANK_CATEGORY: &str = "biolink:SmallMolecule";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NormalizedNode {
    pub identifier: String,
    pub label: Option<String>,
    pub categories: Vec<String>,
}

/// Lookup contract of the node-normalization service. A curie mapped to
/// `None` is one the service answered for without a confident entry.
pub trait NormalizerClient: Send + Sync {
    fn get_normalized_nodes(
        &self,
        curies: &[String],
    ) -> Result<HashMap<String, Option<NormalizedNode>>, ExportError>;
}

#[derive(Debug, Serialize)]
struct NormalizeRequest<'a> {
    curies: &'a [String],
    conflate: bool,
}

#[derive(Debug, Deserialize)]
struct NormalizeResponseEntry {
    id: Option<NormalizeResponseId>,
    #[serde(default, rename = "type")]
    types: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct NormalizeResponseId {
    identifier: String,
    #[serde(default)]
    label: Option<String>,
}

#[derive(Clone)]
pub struct NodeNormHttpClient {
    client: Client,
    url: String,
    conflate: bool,
}

impl NodeNormHttpClient {
    pub fn new(settings: &NormalizerSettings) -> Result<Self, ExportError> {
        let mut headers = HeaderMap::new();
        headers.insert(
            USER_AGENT,
            HeaderValue::from_str(&format!("tmkp-kgx-export/{}", env!("CARGO_PKG_VERSION")))
                .map_err(|err| ExportError::NormalizerHttp(err.to_string()))?,
        );
        let client = Client::builder()
            .default_headers(headers)
            .timeout(Duration::from_secs(settings.timeout_secs))
            .build()
            .map_err(|err| ExportError::NormalizerHttp(err.to_string()))?;
        Ok(Self {
            client,
            url: settings.url.clone(),
            conflate: settings.conflate,
        })
    }

    fn send_with_retries<F>(&self, mut make_req: F) -> Result<reqwest::blocking::Response, ExportError>
    where
        F: FnMut() -> reqwest::blocking::RequestBuilder,
    {
        const MAX_RETRIES: usize = 3;
        const BASE_DELAY_MS: u64 = 500;
        let mut attempt = 0usize;
        loop {
            match make_req().send() {
                Ok(resp) => {
                    let status = resp.status().as_u16();
                    if attempt < MAX_RETRIES && is_retryable_status(status) {
                        backoff(BASE_DELAY_MS, attempt);
                        attempt += 1;
                        continue;
                    }
                    return Ok(resp);
                }
                Err(err) => {
                    if attempt < MAX_RETRIES && is_retryable_error(&err) {
                        backoff(BASE_DELAY_MS, attempt);
                        attempt += 1;
                        continue;
                    }
                    return Err(ExportError::NormalizerHttp(err.to_string()));
                }
            }
        }
    }

    fn handle_status(
        response: reqwest::blocking::Response,
    ) -> Result<reqwest::blocking::Response, ExportError> {
        if response.status().is_success() {
            return Ok(response);
        }
        let status = response.status().as_u16();
        let message = response
            .text()
            .unwrap_or_else(|_| "normalizer request failed".to_string());
        Err(ExportError::NormalizerStatus { status, message })
    }
}

impl NormalizerClient for NodeNormHttpClient {
    fn get_normalized_nodes(
        &self,
        curies: &[String],
    ) -> Result<HashMap<String, Option<NormalizedNode>>, ExportError> {
        let body = NormalizeRequest {
            curies,
            conflate: self.conflate,
        };
        let response = self.send_with_retries(|| self.client.post(&self.url).json(&body))?;
        let response = Self::handle_status(response)?;
        let raw: HashMap<String, Option<NormalizeResponseEntry>> = response
            .json()
            .map_err(|err| ExportError::NormalizerHttp(err.to_string()))?;
        Ok(raw
            .into_iter()
            .map(|(curie, entry)| (curie, entry.and_then(into_normalized)))
            .collect())
    }
}

fn into_normalized(entry: NormalizeResponseEntry) -> Option<NormalizedNode> {
    let id = entry.id?;
    Some(NormalizedNode {
        identifier: id.identifier,
        label: id.label.filter(|label| !label.is_empty()),
        categories: entry.types,
    })
}

fn backoff(base_ms: u64, attempt: usize) {
    std::thread::sleep(Duration::from_millis(base_ms * (attempt as u64 + 1)));
}

fn is_retryable_status(status: u16) -> bool {
    status == 429 || (500..=599).contains(&status)
}

fn is_retryable_error(err: &reqwest::Error) -> bool {
    err.is_timeout() || err.is_connect()
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct EnsureStats {
    pub requested: usize,
    pub fetched: usize,
    pub failed_batches: usize,
    pub unresolved: usize,
}

/// Per-run cache of normalization answers.
///
/// Every curie that has been asked about has an entry; `None` means
/// "unresolved", whether the service said so or the call for its batch failed.
/// A sealed cache never calls the service: curies it does not hold are
/// unresolved.
pub struct NodeNormalizerCache<C: NormalizerClient> {
    client: C,
    sealed: bool,
    batch_size: usize,
    chemical_prefixes: HashSet<String>,
    chemical_categories: HashSet<String>,
    entries: HashMap<String, Option<NormalizedNode>>,
}

impl<C: NormalizerClient> NodeNormalizerCache<C> {
    pub fn new(
        client: C,
        batch_size: usize,
        chemical_prefixes: &[String],
        chemical_categories: &[String],
    ) -> Self {
        Self {
            client,
            sealed: false,
            batch_size: batch_size.max(1),
            chemical_prefixes: chemical_prefixes.iter().cloned().collect(),
            chemical_categories: chemical_categories.iter().cloned().collect(),
            entries: HashMap::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn contains(&self, curie: &str) -> bool {
        self.entries.contains_key(curie)
    }

    /// Freezes the current entries as the complete node set.
    pub fn seal(&mut self) {
        self.sealed = true;
    }

    pub fn is_sealed(&self) -> bool {
        self.sealed
    }

    /// Looks up every curie not already cached, in sub-batches of at most
    /// `batch_size`. A failing sub-batch is recorded as unresolved.
    pub fn ensure<I, S>(&mut self, curies: I) -> EnsureStats
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut missing = curies
            .into_iter()
            .map(|curie| curie.as_ref().to_string())
            .filter(|curie| !self.entries.contains_key(curie))
            .collect::<Vec<_>>();
        missing.sort();
        missing.dedup();

        if self.sealed {
            let unresolved = missing.len();
            for curie in missing {
                self.entries.insert(curie, None);
            }
            return EnsureStats {
                unresolved,
                ..EnsureStats::default()
            };
        }

        let mut stats = EnsureStats {
            requested: missing.len(),
            ..EnsureStats::default()
        };
        for batch in missing.chunks(self.batch_size) {
            match self.client.get_normalized_nodes(batch) {
                Ok(mut answers) => {
                    for curie in batch {
                        let entry = answers.remove(curie).flatten();
                        if entry.is_some() {
                            stats.fetched += 1;
                        } else {
                            stats.unresolved += 1;
                        }
                        self.entries.insert(curie.clone(), entry);
                    }
                }
                Err(err) => {
                    warn!(
                        batch_len = batch.len(),
                        first = batch.first().map(String::as_str).unwrap_or_default(),
                        error = %err,
                        "normalizer batch failed, treating as unresolved"
                    );
                    stats.failed_batches += 1;
                    stats.unresolved += batch.len();
                    for curie in batch {
                        self.entries.insert(curie.clone(), None);
                    }
                }
            }
        }
        debug!(
            requested = stats.requested,
            fetched = stats.fetched,
            failed_batches = stats.failed_batches,
            "normalizer cache updated"
        );
        stats
    }

    /// Loads entries from a previously written node file. Only normal nodes
    /// are ever written, so each row becomes a resolved entry.
    pub fn seed_from_nodes<'a, I>(&mut self, nodes: I) -> usize
    where
        I: IntoIterator<Item = &'a NodeRecord>,
    {
        let mut seeded = 0usize;
        for node in nodes {
            let entry = NormalizedNode {
                identifier: node.id.clone(),
                label: Some(node.name.clone()),
                categories: vec![node.category.clone()],
            };
            self.entries.insert(node.id.clone(), Some(entry));
            seeded += 1;
        }
        seeded
    }

    pub fn get(&self, curie: &str) -> Option<&NormalizedNode> {
        self.entries.get(curie).and_then(Option::as_ref)
    }

    pub fn is_normal(&self, curie: &str) -> bool {
        let Some(node) = self.get(curie) else {
            return false;
        };
        if node.label.is_none() {
            return false;
        }
        if self.chemical_prefixes.contains(curie_prefix(curie)) {
            return self.chemical_categories.contains(&self.category(curie));
        }
        true
    }

    pub fn label(&self, curie: &str) -> String {
        self.get(curie)
            .and_then(|node| node.label.clone())
            .unwrap_or_else(|| curie.to_string())
    }

    pub fn category(&self, curie: &str) -> String {
        if let Some(category) = self.get(curie).and_then(|node| node.categories.first()) {
            return category.clone();
        }
        if curie_prefix(curie) == "DRUGBANK" {
            return DRUGBANK_CATEGORY.to_string();
        }
        FALLBACK_CATEGORY.to_string()
    }

    /// Builds the node row for a normal curie.
    pub fn node_record(&self, curie: &str) -> Option<NodeRecord> {
        if !self.is_normal(curie) {
            return None;
        }
        Some(NodeRecord {
            id: curie.to_string(),
            name: self.label(curie),
            category: self.category(curie),
        })
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use super::*;
    use crate::config::{default_chemical_categories, default_chemical_prefixes};

    struct StubClient {
        calls: Mutex<Vec<usize>>,
        fail_containing: Option<&'static str>,
    }

    impl StubClient {
        fn new(fail_containing: Option<&'static str>) -> Self {
            Self {
                calls: Mutex::new(Vec::new()),
                fail_containing,
            }
        }
    }

    impl NormalizerClient for StubClient {
        fn get_normalized_nodes(
            &self,
            curies: &[String],
        ) -> Result<HashMap<String, Option<NormalizedNode>>, ExportError> {
            self.calls.lock().unwrap().push(curies.len());
            if let Some(marker) = self.fail_containing {
                if curies.iter().any(|curie| curie == marker) {
                    return Err(ExportError::NormalizerHttp("timed out".to_string()));
                }
            }
            Ok(curies
                .iter()
                .filter(|curie| !curie.starts_with("MESH:"))
                .map(|curie| {
                    let category = if curie.starts_with("CHEBI:1") {
                        "biolink:Protein"
                    } else {
                        "biolink:SmallMolecule"
                    };
                    (
                        curie.clone(),
                        Some(NormalizedNode {
                            identifier: curie.clone(),
                            label: Some(format!("label {curie}")),
                            categories: vec![category.to_string()],
                        }),
                    )
                })
                .collect())
        }
    }

    fn cache(client: StubClient, batch_size: usize) -> NodeNormalizerCache<StubClient> {
        NodeNormalizerCache::new(
            client,
            batch_size,
            &default_chemical_prefixes(),
            &default_chemical_categories(),
        )
    }

    #[test]
    fn ensure_splits_into_batches() {
        let mut cache = cache(StubClient::new(None), 2);
        let stats = cache.ensure(["CHEBI:24433", "PR:000000015", "PR:1", "PR:1", "MESH:D1"]);
        assert_eq!(stats.requested, 4);
        assert_eq!(stats.fetched, 3);
        assert_eq!(stats.unresolved, 1);
        assert_eq!(*cache.client.calls.lock().unwrap(), vec![2, 2]);

        // already cached curies are not requested again
        let stats = cache.ensure(["CHEBI:24433"]);
        assert_eq!(stats.requested, 0);
    }

    #[test]
    fn failed_batch_degrades_to_unresolved() {
        let mut cache = cache(StubClient::new(Some("PR:2")), 1);
        let stats = cache.ensure(["PR:1", "PR:2"]);
        assert_eq!(stats.failed_batches, 1);
        assert!(cache.is_normal("PR:1"));
        assert!(!cache.is_normal("PR:2"));
        assert!(cache.contains("PR:2"));
    }

    #[test]
    fn chemical_curies_require_whitelisted_category() {
        let mut cache = cache(StubClient::new(None), 10);
        cache.ensure(["CHEBI:24433", "CHEBI:15377"]);
        assert!(cache.is_normal("CHEBI:24433"));
        assert!(!cache.is_normal("CHEBI:15377"));
    }

    #[test]
    fn absent_curie_is_not_normal() {
        let cache = cache(StubClient::new(None), 10);
        assert!(!cache.is_normal("PR:000000015"));
        assert_eq!(cache.category("DRUGBANK:DB00001"), "biolink:SmallMolecule");
        assert_eq!(cache.category("PR:000000015"), "biolink:NamedThing");
        assert_eq!(cache.label("PR:000000015"), "PR:000000015");
    }

    #[test]
    fn seeded_nodes_are_normal() {
        let mut cache = cache(StubClient::new(None), 10);
        let nodes = [NodeRecord {
            id: "PR:000000015".to_string(),
            name: "protein".to_string(),
            category: "biolink:Protein".to_string(),
        }];
        assert_eq!(cache.seed_from_nodes(&nodes), 1);
        assert!(cache.is_normal("PR:000000015"));
        assert_eq!(cache.node_record("PR:000000015"), Some(nodes[0].clone()));
        assert!(cache.client.calls.lock().unwrap().is_empty());
    }

    #[test]
    fn sealed_cache_never_calls_service() {
        let mut cache = cache(StubClient::new(None), 10);
        cache.seed_from_nodes(&[NodeRecord {
            id: "CHEBI:24433".to_string(),
            name: "group".to_string(),
            category: "biolink:SmallMolecule".to_string(),
        }]);
        cache.seal();

        let stats = cache.ensure(["CHEBI:24433", "PR:000000015"]);
        assert_eq!(stats.requested, 0);
        assert_eq!(stats.unresolved, 1);
        assert!(cache.is_normal("CHEBI:24433"));
        assert!(!cache.is_normal("PR:000000015"));
        assert!(cache.client.calls.lock().unwrap().is_empty());
    }
}
