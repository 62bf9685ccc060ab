use std::fs;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::domain::Curie;
use crate::error::ExportError;

pub const DEFAULT_CONFIG_FILE: &str = "kgx-export.json";
pub const DEFAULT_NORMALIZER_URL: &str =
    "https://nodenormalization-sri.renci.org/1.4/get_normalized_nodes";
pub const HUMAN_TAXON: &str = "NCBITaxon:9606";
pub const KNOWLEDGE_SOURCE: &str = "infores:text-mining-provider-targeted";

#[derive(Debug, Default, Deserialize, Serialize)]
pub struct Config {
    #[serde(default)]
    pub schema_version: Option<u32>,
    #[serde(default)]
    pub normalizer: Option<NormalizerEntry>,
    #[serde(default)]
    pub denylist: Option<Vec<String>>,
    #[serde(default)]
    pub chemical_prefixes: Option<Vec<String>>,
    #[serde(default)]
    pub chemical_categories: Option<Vec<String>>,
    #[serde(default)]
    pub human_taxon: Option<String>,
    #[serde(default)]
    pub idf_level: Option<String>,
    #[serde(default)]
    pub knowledge_source: Option<String>,
    #[serde(default)]
    pub partition_size: Option<usize>,
    #[serde(default)]
    pub negative_predicates: Option<Vec<String>>,
}

#[derive(Debug, Default, Deserialize, Serialize)]
pub struct NormalizerEntry {
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub batch_size: Option<usize>,
    #[serde(default)]
    pub timeout_secs: Option<u64>,
    #[serde(default)]
    pub conflate: Option<bool>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct NormalizerSettings {
    pub url: String,
    pub batch_size: usize,
    pub timeout_secs: u64,
    pub conflate: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedConfig {
    pub schema_version: u32,
    pub normalizer: NormalizerSettings,
    pub denylist: Vec<String>,
    pub chemical_prefixes: Vec<String>,
    pub chemical_categories: Vec<String>,
    pub human_taxon: String,
    pub idf_level: String,
    pub knowledge_source: String,
    pub partition_size: usize,
    pub negative_predicates: Vec<String>,
}

impl Default for ResolvedConfig {
    fn default() -> Self {
        Self {
            schema_version: 1,
            normalizer: NormalizerSettings {
                url: DEFAULT_NORMALIZER_URL.to_string(),
                batch_size: 5000,
                timeout_secs: 60,
                conflate: true,
            },
            denylist: default_denylist(),
            chemical_prefixes: default_chemical_prefixes(),
            chemical_categories: default_chemical_categories(),
            human_taxon: HUMAN_TAXON.to_string(),
            idf_level: "document".to_string(),
            knowledge_source: KNOWLEDGE_SOURCE.to_string(),
            partition_size: 40_000,
            negative_predicates: vec!["false".to_string()],
        }
    }
}

pub struct ConfigLoader;

impl ConfigLoader {
    /// Loads `path`, or `kgx-export.json` from the working directory when no
    /// path is given. A missing default file resolves to built-in defaults.
    pub fn resolve(path: Option<&str>) -> Result<ResolvedConfig, ExportError> {
        let config_path = match path {
            Some(path) => PathBuf::from(path),
            None => PathBuf::from(DEFAULT_CONFIG_FILE),
        };

        if path.is_none() && !config_path.exists() {
            return Self::resolve_config(Config::default());
        }

        let content = fs::read_to_string(&config_path)
            .map_err(|_| ExportError::ConfigRead(config_path.clone()))?;
        let config: Config = serde_json::from_str(&content)
            .map_err(|err| ExportError::ConfigParse(err.to_string()))?;

        Self::resolve_config(config)
    }

    pub fn resolve_config(config: Config) -> Result<ResolvedConfig, ExportError> {
        let defaults = ResolvedConfig::default();
        let schema_version = config.schema_version.unwrap_or(defaults.schema_version);

        let normalizer = config.normalizer.unwrap_or_default();
        let normalizer = NormalizerSettings {
            url: normalizer.url.unwrap_or(defaults.normalizer.url),
            batch_size: normalizer
                .batch_size
                .unwrap_or(defaults.normalizer.batch_size),
            timeout_secs: normalizer
                .timeout_secs
                .unwrap_or(defaults.normalizer.timeout_secs),
            conflate: normalizer.conflate.unwrap_or(defaults.normalizer.conflate),
        };
        if normalizer.batch_size == 0 {
            return Err(ExportError::ConfigParse(
                "normalizer.batch_size must be greater than zero".to_string(),
            ));
        }

        let partition_size = config.partition_size.unwrap_or(defaults.partition_size);
        if partition_size == 0 {
            return Err(ExportError::ConfigParse(
                "partition_size must be greater than zero".to_string(),
            ));
        }

        let denylist = config
            .denylist
            .unwrap_or(defaults.denylist)
            .iter()
            .map(|curie| curie.parse::<Curie>().map(|curie| curie.to_string()))
            .collect::<Result<Vec<_>, _>>()?;

        Ok(ResolvedConfig {
            schema_version,
            normalizer,
            denylist,
            chemical_prefixes: config
                .chemical_prefixes
                .unwrap_or(defaults.chemical_prefixes),
            chemical_categories: config
                .chemical_categories
                .unwrap_or(defaults.chemical_categories),
            human_taxon: config.human_taxon.unwrap_or(defaults.human_taxon),
            idf_level: config.idf_level.unwrap_or(defaults.idf_level),
            knowledge_source: config
                .knowledge_source
                .unwrap_or(defaults.knowledge_source),
            partition_size,
            negative_predicates: config
                .negative_predicates
                .unwrap_or(defaults.negative_predicates),
        })
    }
}

/// Administrative artifacts and ontology terms too generic to be useful as
/// graph nodes.
pub fn default_denylist() -> Vec<String> {
    [
        "CHEBI:16541",
        "CHEBI:23888",
        "CHEBI:24431",
        "CHEBI:25367",
        "CHEBI:33250",
        "CHEBI:33695",
        "CHEBI:35222",
        "CHEBI:36080",
        "CHEBI:52217",
        "PR:000000001",
        "PR:000003944",
    ]
    .iter()
    .map(|curie| curie.to_string())
    .collect()
}

pub fn default_chemical_prefixes() -> Vec<String> {
    vec!["CHEBI".to_string(), "DRUGBANK".to_string()]
}

pub fn default_chemical_categories() -> Vec<String> {
    [
        "biolink:ChemicalEntity",
        "biolink:ChemicalMixture",
        "biolink:ComplexMolecularMixture",
        "biolink:Drug",
        "biolink:MolecularEntity",
        "biolink:MolecularMixture",
        "biolink:SmallMolecule",
    ]
    .iter()
    .map(|category| category.to_string())
    .collect()
}
