use std::collections::{HashMap, HashSet};

use serde::Serialize;

use crate::domain::{IdentifierMapping, IdentifierMode, PROTEIN_FAMILY_PREFIX, curie_prefix};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", content = "curie", rename_all = "lowercase")]
pub enum Resolution {
    Unchanged(String),
    Translated(String),
    Excluded,
}

impl Resolution {
    pub fn curie(&self) -> Option<&str> {
        match self {
            Resolution::Unchanged(curie) | Resolution::Translated(curie) => Some(curie),
            Resolution::Excluded => None,
        }
    }

    pub fn into_curie(self) -> Option<String> {
        match self {
            Resolution::Unchanged(curie) | Resolution::Translated(curie) => Some(curie),
            Resolution::Excluded => None,
        }
    }
}

/// Decides the identifier an internal concept is exported under.
///
/// Denylisted curies are always excluded. In UniProt mode a protein-family
/// curie is replaced by its mapping for the configured taxon; without one the
/// concept is excluded so that no untranslated `PR:` ids leak into the graph.
#[derive(Debug, Clone, Default)]
pub struct IdentifierResolver {
    denylist: HashSet<String>,
    translations: HashMap<String, String>,
}

impl IdentifierResolver {
    pub fn new<I, S>(denylist: I, mappings: &[IdentifierMapping], taxon: &str) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let denylist = denylist.into_iter().map(Into::into).collect();
        let mut translations = HashMap::new();
        for mapping in mappings.iter().filter(|mapping| mapping.taxon == taxon) {
            // first mapping for a curie wins
            translations
                .entry(mapping.internal_id.clone())
                .or_insert_with(|| mapping.external_id.clone());
        }
        Self {
            denylist,
            translations,
        }
    }

    pub fn is_denied(&self, curie: &str) -> bool {
        self.denylist.contains(curie)
    }

    pub fn translation_count(&self) -> usize {
        self.translations.len()
    }

    pub fn resolve(&self, curie: &str, mode: IdentifierMode) -> Resolution {
        if self.is_denied(curie) {
            return Resolution::Excluded;
        }
        match mode {
            IdentifierMode::Internal => Resolution::Unchanged(curie.to_string()),
            IdentifierMode::Uniprot if curie_prefix(curie) == PROTEIN_FAMILY_PREFIX => {
                match self.translations.get(curie) {
                    Some(external) => Resolution::Translated(external.clone()),
                    None => Resolution::Excluded,
                }
            }
            IdentifierMode::Uniprot => Resolution::Unchanged(curie.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn resolver() -> IdentifierResolver {
        IdentifierResolver::new(
            ["CHEBI:36080", "PR:000000001"],
            &[
                IdentifierMapping {
                    internal_id: "PR:000000015".to_string(),
                    external_id: "UniProtKB:P12345".to_string(),
                    taxon: "NCBITaxon:9606".to_string(),
                },
                IdentifierMapping {
                    internal_id: "PR:000000016".to_string(),
                    external_id: "UniProtKB:Q99999".to_string(),
                    taxon: "NCBITaxon:10090".to_string(),
                },
            ],
            "NCBITaxon:9606",
        )
    }

    #[test]
    fn denylist_wins_in_every_mode() {
        let resolver = resolver();
        for mode in [IdentifierMode::Internal, IdentifierMode::Uniprot] {
            assert_eq!(resolver.resolve("CHEBI:36080", mode), Resolution::Excluded);
            assert_eq!(resolver.resolve("PR:000000001", mode), Resolution::Excluded);
        }
    }

    #[test]
    fn uniprot_mode_translates_human_mapping() {
        let resolution = resolver().resolve("PR:000000015", IdentifierMode::Uniprot);
        assert_eq!(
            resolution,
            Resolution::Translated("UniProtKB:P12345".to_string())
        );
    }

    #[test]
    fn uniprot_mode_excludes_unmapped_protein() {
        let resolver = resolver();
        assert_eq!(
            resolver.resolve("PR:000000016", IdentifierMode::Uniprot),
            Resolution::Excluded
        );
        assert_eq!(
            resolver.resolve("PR:000000016", IdentifierMode::Internal),
            Resolution::Unchanged("PR:000000016".to_string())
        );
    }

    #[test]
    fn non_protein_curies_are_unchanged() {
        assert_eq!(
            resolver()
                .resolve("CHEBI:24433", IdentifierMode::Uniprot)
                .into_curie(),
            Some("CHEBI:24433".to_string())
        );
    }
}
