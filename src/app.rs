use std::collections::{BTreeSet, HashMap};
use std::time::{Duration, Instant};

use camino::{Utf8Path, Utf8PathBuf};
use serde::Serialize;
use tempfile::TempDir;
use tracing::{debug, info, warn};

use crate::aggregate::EvidenceAggregator;
use crate::config::ResolvedConfig;
use crate::domain::{AssertionRange, IdentifierMode};
use crate::error::ExportError;
use crate::kgx::{EdgeRecord, KgxEncoder, NodeRecord};
use crate::metadata::{MetadataAccumulator, MetadataDocument};
use crate::normalizer::{NodeNormalizerCache, NormalizerClient};
use crate::operations::OperationsSummary;
use crate::resolver::{IdentifierResolver, Resolution};
use crate::shard::{ShardWriter, for_each_row};
use crate::source::AssertionSource;
use crate::store::ObjectStore;

#[derive(Debug, Clone)]
pub struct EdgeExportOptions {
    pub mode: IdentifierMode,
    pub range: AssertionRange,
    /// Assertions loaded per datastore round trip.
    pub chunk_size: u64,
    /// Supporting results attached per edge; 0 keeps all.
    pub limit: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct NodeExportResult {
    pub blob: String,
    pub mode: String,
    pub candidates: usize,
    pub excluded: usize,
    pub unresolved: usize,
    pub written: u64,
    pub failed_batches: usize,
    pub finished_at: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct EdgeExportResult {
    pub blob: String,
    pub mode: String,
    pub range: AssertionRange,
    /// Eligible assertions in the whole datastore.
    pub eligible: u64,
    pub assertions: usize,
    pub seeded_nodes: usize,
    pub candidate_edges: usize,
    pub excluded_edges: usize,
    pub unnormalized_edges: usize,
    pub written: u64,
    pub partitions: u64,
    pub finished_at: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct ComposeResult {
    pub blob: String,
    pub shards: Vec<String>,
    pub finished_at: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct MetadataResult {
    pub metadata_blob: String,
    pub operations_blob: String,
    pub nodes: u64,
    pub edges: u64,
    pub skipped_rows: usize,
    pub finished_at: String,
}

#[derive(Debug, Clone)]
pub struct ProgressEvent {
    pub message: String,
    pub elapsed: Option<Duration>,
}

pub trait ProgressSink {
    fn event(&self, event: ProgressEvent);
}

fn emit(sink: &dyn ProgressSink, message: String, started: Option<Instant>) {
    sink.event(ProgressEvent {
        message,
        elapsed: started.map(|start| start.elapsed()),
    });
}

/// Blob names under one export prefix.
#[derive(Debug, Clone)]
pub struct BlobLayout {
    prefix: String,
}

impl BlobLayout {
    pub fn new(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
        }
    }

    pub fn nodes(&self) -> String {
        format!("{}nodes.tsv.gz", self.prefix)
    }

    pub fn edges(&self) -> String {
        format!("{}edges.tsv.gz", self.prefix)
    }

    pub fn edge_shard_prefix(&self) -> String {
        format!("{}edges_", self.prefix)
    }

    pub fn edge_shard(&self, range: AssertionRange) -> String {
        format!("{}edges_{}_{}.tsv.gz", self.prefix, range.offset, range.end())
    }

    pub fn metadata(&self) -> String {
        format!("{}content_metadata.json", self.prefix)
    }

    pub fn operations(&self) -> String {
        format!("{}operations.json", self.prefix)
    }

    /// Start offset of a shard blob name, if `name` is one.
    pub fn shard_offset(&self, name: &str) -> Option<u64> {
        let rest = name
            .strip_prefix(&self.edge_shard_prefix())?
            .strip_suffix(".tsv.gz")?;
        let (start, end) = rest.split_once('_')?;
        end.parse::<u64>().ok()?;
        start.parse().ok()
    }
}

/// Node and edge export for one worker. Owns the per-run normalizer cache.
pub struct Exporter<S: AssertionSource, N: NormalizerClient, O: ObjectStore> {
    source: S,
    store: O,
    cache: NodeNormalizerCache<N>,
    config: ResolvedConfig,
    layout: BlobLayout,
}

impl<S: AssertionSource, N: NormalizerClient, O: ObjectStore> Exporter<S, N, O> {
    pub fn new(source: S, normalizer: N, store: O, config: ResolvedConfig, prefix: &str) -> Self {
        let cache = NodeNormalizerCache::new(
            normalizer,
            config.normalizer.batch_size,
            &config.chemical_prefixes,
            &config.chemical_categories,
        );
        Self {
            source,
            store,
            cache,
            config,
            layout: BlobLayout::new(prefix),
        }
    }

    pub fn store(&self) -> &O {
        &self.store
    }

    pub fn cache(&self) -> &NodeNormalizerCache<N> {
        &self.cache
    }

    fn resolver(&self, mode: IdentifierMode) -> Result<IdentifierResolver, ExportError> {
        let mappings = match mode {
            IdentifierMode::Uniprot => self.source.identifier_mappings()?,
            IdentifierMode::Internal => Vec::new(),
        };
        let resolver = IdentifierResolver::new(
            self.config.denylist.iter().cloned(),
            &mappings,
            &self.config.human_taxon,
        );
        debug!(
            mode = %mode,
            translations = resolver.translation_count(),
            "identifier resolver ready"
        );
        Ok(resolver)
    }

    pub fn export_nodes(
        &mut self,
        mode: IdentifierMode,
        sink: &dyn ProgressSink,
    ) -> Result<NodeExportResult, ExportError> {
        let started = Instant::now();
        emit(sink, format!("phase=Resolve; mode={mode}"), None);
        let resolver = self.resolver(mode)?;
        let raw = self.source.node_curies()?;
        let mut excluded = 0usize;
        let mut curies = BTreeSet::new();
        for curie in &raw {
            match resolver.resolve(curie, mode).into_curie() {
                Some(resolved) => {
                    curies.insert(resolved);
                }
                None => excluded += 1,
            }
        }
        info!(
            candidates = raw.len(),
            excluded,
            resolved = curies.len(),
            "node identifiers resolved"
        );

        emit(
            sink,
            format!("phase=Normalize; {} identifiers", curies.len()),
            Some(started),
        );
        let stats = self.cache.ensure(&curies);

        emit(sink, "phase=Write; nodes".to_string(), Some(started));
        let scratch = Scratch::new()?;
        let local = scratch.path("nodes.tsv.gz");
        let mut writer = ShardWriter::create(&local, self.config.partition_size)?;
        let mut unresolved = 0usize;
        for curie in &curies {
            match self.cache.node_record(curie) {
                Some(node) => writer.write_row(&node.to_row())?,
                None => unresolved += 1,
            }
        }
        let (_, shard) = writer.finish()?;
        let blob = self.layout.nodes();
        self.store.put_file(&blob, &local)?;
        info!(
            blob = %blob,
            written = shard.rows,
            unresolved,
            failed_batches = stats.failed_batches,
            "node export complete"
        );
        emit(sink, format!("phase=Done; {blob}"), Some(started));

        Ok(NodeExportResult {
            blob,
            mode: mode.to_string(),
            candidates: raw.len(),
            excluded,
            unresolved,
            written: shard.rows,
            failed_batches: stats.failed_batches,
            finished_at: timestamp(),
        })
    }

    /// Loads the node file written by the node stage, if present, into the
    /// normalizer cache and seals it, so edges only reference written nodes.
    /// Without a node file curies are looked up per chunk.
    fn seed_cache(&mut self, scratch: &Scratch) -> Result<usize, ExportError> {
        let blob = self.layout.nodes();
        if !self.store.exists(&blob)? {
            debug!(blob = %blob, "no node file to seed from");
            return Ok(0);
        }
        let local = scratch.path("seed_nodes.tsv.gz");
        self.store.get_file(&blob, &local)?;
        let mut seeded = 0usize;
        let cache = &mut self.cache;
        for_each_row(&local, |line, row| {
            if let Some(node) = parse_row(line, row, NodeRecord::parse_row) {
                seeded += cache.seed_from_nodes([&node]);
            }
            Ok(())
        })?;
        self.cache.seal();
        info!(blob = %blob, seeded, "normalizer cache seeded from node file");
        Ok(seeded)
    }

    pub fn export_edges(
        &mut self,
        options: &EdgeExportOptions,
        sink: &dyn ProgressSink,
    ) -> Result<EdgeExportResult, ExportError> {
        let started = Instant::now();
        let range = options.range;
        let mode = options.mode;
        emit(
            sink,
            format!("phase=Resolve; range={}..{} mode={mode}", range.offset, range.end()),
            None,
        );
        let eligible = self.source.eligible_assertion_count()?;
        if range.offset >= eligible {
            warn!(
                offset = range.offset,
                eligible, "range starts past the last eligible assertion"
            );
        }
        let scratch = Scratch::new()?;
        let seeded_nodes = self.seed_cache(&scratch)?;
        let resolver = self.resolver(mode)?;
        let aggregator = EvidenceAggregator::new(options.limit, &self.config.negative_predicates);
        let encoder = KgxEncoder::new(self.config.knowledge_source.clone());

        let blob = self.layout.edge_shard(range);
        let local = scratch.path("edges.tsv.gz");
        let mut writer = ShardWriter::create(&local, self.config.partition_size)?;
        let mut result = EdgeExportResult {
            blob: blob.clone(),
            mode: mode.to_string(),
            range,
            assertions: 0,
            eligible,
            seeded_nodes,
            candidate_edges: 0,
            excluded_edges: 0,
            unnormalized_edges: 0,
            written: 0,
            partitions: 0,
            finished_at: String::new(),
        };

        for chunk_range in range.chunks(options.chunk_size) {
            let ids = self.source.assertion_ids(chunk_range)?;
            if ids.is_empty() {
                break;
            }
            let chunk = self.source.load_chunk(&ids)?;
            let idf = self
                .source
                .concept_idf(&chunk.curies(), &self.config.idf_level)?
                .into_iter()
                .map(|weight| (weight.concept_curie, weight.idf))
                .collect::<HashMap<_, _>>();
            let edges = aggregator.aggregate_chunk(&chunk, &idf)?;
            result.assertions += chunk.assertions.len();
            result.candidate_edges += edges.len();

            let resolved = edges
                .iter()
                .map(|edge| {
                    (
                        resolver.resolve(&edge.assertion.subject_curie, mode),
                        resolver.resolve(&edge.assertion.object_curie, mode),
                    )
                })
                .collect::<Vec<_>>();
            let lookups = resolved
                .iter()
                .flat_map(|(subject, object)| [subject.curie(), object.curie()])
                .flatten()
                .collect::<BTreeSet<_>>();
            self.cache.ensure(lookups);

            for (edge, pair) in edges.iter().zip(resolved) {
                let (Resolution::Unchanged(subject) | Resolution::Translated(subject)) = pair.0
                else {
                    result.excluded_edges += 1;
                    continue;
                };
                let (Resolution::Unchanged(object) | Resolution::Translated(object)) = pair.1
                else {
                    result.excluded_edges += 1;
                    continue;
                };
                if !(self.cache.is_normal(&subject) && self.cache.is_normal(&object)) {
                    result.unnormalized_edges += 1;
                    continue;
                }
                let record = encoder.encode_edge(edge, &subject, &object)?;
                writer.write_row(&record.to_row())?;
            }
            debug!(
                offset = chunk_range.offset,
                assertions = chunk.assertions.len(),
                edges = edges.len(),
                written = writer.rows(),
                "chunk exported"
            );
            emit(
                sink,
                format!("phase=Export; offset={} written={}", chunk_range.offset, writer.rows()),
                Some(started),
            );
        }

        let (_, shard) = writer.finish()?;
        self.store.put_file(&blob, &local)?;
        result.written = shard.rows;
        result.partitions = shard.partitions;
        result.finished_at = timestamp();
        info!(
            blob = %blob,
            assertions = result.assertions,
            candidates = result.candidate_edges,
            excluded = result.excluded_edges,
            unnormalized = result.unnormalized_edges,
            written = result.written,
            "edge export complete"
        );
        emit(sink, format!("phase=Done; {blob}"), Some(started));
        Ok(result)
    }
}

/// Concatenates every edge shard under `prefix`, ordered by start offset,
/// into the final edge file and removes the shards.
pub fn compose_edges(
    store: &dyn ObjectStore,
    prefix: &str,
    sink: &dyn ProgressSink,
) -> Result<ComposeResult, ExportError> {
    let layout = BlobLayout::new(prefix);
    let mut shards = store
        .list(&layout.edge_shard_prefix())?
        .into_iter()
        .filter_map(|name| layout.shard_offset(&name).map(|offset| (offset, name)))
        .collect::<Vec<_>>();
    if shards.is_empty() {
        return Err(ExportError::BlobNotFound(format!(
            "{}*.tsv.gz",
            layout.edge_shard_prefix()
        )));
    }
    shards.sort();
    let shards = shards.into_iter().map(|(_, name)| name).collect::<Vec<_>>();

    let blob = layout.edges();
    emit(
        sink,
        format!("phase=Compose; {} shards into {blob}", shards.len()),
        None,
    );
    store.compose(&shards, &blob)?;
    store.delete(&shards)?;
    info!(blob = %blob, shards = shards.len(), "edge shards composed");
    Ok(ComposeResult {
        blob,
        shards,
        finished_at: timestamp(),
    })
}

/// Rebuilds release metadata and the operations summary from the composed
/// node and edge files.
pub fn export_metadata(
    store: &dyn ObjectStore,
    prefix: &str,
    config: &ResolvedConfig,
    sink: &dyn ProgressSink,
) -> Result<MetadataResult, ExportError> {
    let started = Instant::now();
    let layout = BlobLayout::new(prefix);
    let scratch = Scratch::new()?;

    emit(sink, "phase=Fetch; node and edge files".to_string(), None);
    let nodes_local = scratch.path("nodes.tsv.gz");
    let edges_local = scratch.path("edges.tsv.gz");
    store.get_file(&layout.nodes(), &nodes_local)?;
    store.get_file(&layout.edges(), &edges_local)?;

    let mut accumulator = MetadataAccumulator::new(config.knowledge_source.clone());
    let mut operations = OperationsSummary::new();
    let mut skipped_rows = 0usize;

    let mut categories: HashMap<String, String> = HashMap::new();
    for_each_row(&nodes_local, |line, row| {
        match parse_row(line, row, NodeRecord::parse_row) {
            Some(node) => {
                accumulator.observe_node(&node);
                categories.insert(node.id, node.category);
            }
            None => skipped_rows += 1,
        }
        Ok(())
    })?;

    emit(
        sink,
        format!("phase=Scan; edges against {} nodes", categories.len()),
        Some(started),
    );
    for_each_row(&edges_local, |line, row| {
        let Some(edge) = parse_row(line, row, EdgeRecord::parse_row) else {
            skipped_rows += 1;
            return Ok(());
        };
        let (Some(subject), Some(object)) = (
            categories.get(&edge.subject),
            categories.get(&edge.object),
        ) else {
            warn!(
                line,
                assertion_id = %edge.assertion_id,
                "edge references a node missing from the node file, skipping"
            );
            skipped_rows += 1;
            return Ok(());
        };
        accumulator.observe_edge(&edge, subject, object);
        operations.observe(&edge);
        Ok(())
    })?;

    emit(sink, "phase=Write; metadata".to_string(), Some(started));
    let document: MetadataDocument = accumulator.document();
    let metadata_blob = layout.metadata();
    let operations_blob = layout.operations();
    store.put_bytes(&metadata_blob, &to_json(&document)?)?;
    store.put_bytes(&operations_blob, &to_json(operations.counts())?)?;

    info!(
        nodes = accumulator.node_count(),
        edges = accumulator.edge_count(),
        skipped_rows,
        "metadata written"
    );
    Ok(MetadataResult {
        metadata_blob,
        operations_blob,
        nodes: accumulator.node_count(),
        edges: accumulator.edge_count(),
        skipped_rows,
        finished_at: timestamp(),
    })
}

/// Parses one row, logging and dropping it if it does not fit the record
/// shape.
fn parse_row<T, F>(line: u64, row: &str, parse: F) -> Option<T>
where
    F: Fn(&str) -> Result<T, ExportError>,
{
    match parse(row) {
        Ok(record) => Some(record),
        Err(err) => {
            warn!(line, error = %err, "skipping malformed row");
            None
        }
    }
}

fn timestamp() -> String {
    chrono::Utc::now().to_rfc3339()
}

fn to_json<T: Serialize + ?Sized>(value: &T) -> Result<Vec<u8>, ExportError> {
    let mut bytes =
        serde_json::to_vec_pretty(value).map_err(|err| ExportError::Encoding(err.to_string()))?;
    bytes.push(b'\n');
    Ok(bytes)
}

/// Local working directory for files staged before upload.
struct Scratch {
    dir: TempDir,
}

impl Scratch {
    fn new() -> Result<Self, ExportError> {
        let dir = tempfile::Builder::new()
            .prefix("kgx-export")
            .tempdir()
            .map_err(|err| ExportError::Storage(err.to_string()))?;
        Ok(Self { dir })
    }

    fn path(&self, name: &str) -> Utf8PathBuf {
        let base = Utf8Path::from_path(self.dir.path())
            .map(Utf8Path::to_path_buf)
            .unwrap_or_else(|| Utf8PathBuf::from(self.dir.path().to_string_lossy().into_owned()));
        base.join(name)
    }
}
