use assert_matches::assert_matches;
use tmkp_kgx_export::config::{
    Config, ConfigLoader, NormalizerEntry, ResolvedConfig, default_denylist,
};
use tmkp_kgx_export::error::ExportError;

#[test]
fn resolve_config_overrides_selected_fields() {
    let config = Config {
        normalizer: Some(NormalizerEntry {
            url: Some("http://localhost:8080/get_normalized_nodes".to_string()),
            batch_size: Some(250),
            ..NormalizerEntry::default()
        }),
        idf_level: Some("sentence".to_string()),
        ..Config::default()
    };

    let resolved = ConfigLoader::resolve_config(config).unwrap();
    let defaults = ResolvedConfig::default();
    assert_eq!(resolved.normalizer.batch_size, 250);
    assert_eq!(
        resolved.normalizer.url,
        "http://localhost:8080/get_normalized_nodes"
    );
    assert_eq!(resolved.normalizer.timeout_secs, defaults.normalizer.timeout_secs);
    assert_eq!(resolved.idf_level, "sentence");
    assert_eq!(resolved.denylist, default_denylist());
    assert_eq!(resolved.partition_size, 40_000);
}

#[test]
fn resolve_reads_json_file() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("kgx-export.json");
    std::fs::write(
        &path,
        r#"{
            "schema_version": 1,
            "denylist": ["CHEBI:36080"],
            "partition_size": 10,
            "normalizer": {"conflate": false}
        }"#,
    )
    .unwrap();

    let resolved = ConfigLoader::resolve(path.to_str()).unwrap();
    assert_eq!(resolved.denylist, vec!["CHEBI:36080".to_string()]);
    assert_eq!(resolved.partition_size, 10);
    assert!(!resolved.normalizer.conflate);
    assert_eq!(resolved.normalizer.batch_size, 5000);
}

#[test]
fn explicit_missing_file_is_read_error() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("absent.json");
    assert_matches!(
        ConfigLoader::resolve(path.to_str()),
        Err(ExportError::ConfigRead(_))
    );
}

#[test]
fn invalid_json_is_parse_error() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("broken.json");
    std::fs::write(&path, "{\"partition_size\": \"many\"}").unwrap();
    assert_matches!(
        ConfigLoader::resolve(path.to_str()),
        Err(ExportError::ConfigParse(_))
    );
}

#[test]
fn zero_partition_size_is_rejected() {
    let config = Config {
        partition_size: Some(0),
        ..Config::default()
    };
    assert_matches!(
        ConfigLoader::resolve_config(config),
        Err(ExportError::ConfigParse(_))
    );
}

#[test]
fn denylist_entries_must_be_curies() {
    let config = Config {
        denylist: Some(vec![" CHEBI:36080 ".to_string(), "generic".to_string()]),
        ..Config::default()
    };
    assert_matches!(
        ConfigLoader::resolve_config(config),
        Err(ExportError::InvalidCurie(value)) if value == "generic"
    );

    let config = Config {
        denylist: Some(vec![" CHEBI:36080 ".to_string()]),
        ..Config::default()
    };
    let resolved = ConfigLoader::resolve_config(config).unwrap();
    assert_eq!(resolved.denylist, vec!["CHEBI:36080".to_string()]);
}
