use std::path::PathBuf;

use miette::Diagnostic;
use thiserror::Error;

#[derive(Debug, Error, Diagnostic)]
pub enum ExportError {
    #[error("invalid curie: {0}")]
    InvalidCurie(String),

    #[error("invalid assertion range: {0}")]
    InvalidRange(String),

    #[error("invalid option: {0}")]
    InvalidOption(String),

    #[error("failed to read config file at {0}")]
    ConfigRead(PathBuf),

    #[error("failed to parse JSON config: {0}")]
    ConfigParse(String),

    #[error("datastore query failed: {0}")]
    Datastore(String),

    #[error("node normalizer request failed: {0}")]
    NormalizerHttp(String),

    #[error("node normalizer returned status {status}: {message}")]
    NormalizerStatus { status: u16, message: String },

    #[error("object storage error: {0}")]
    Storage(String),

    #[error("blob not found in object storage: {0}")]
    BlobNotFound(String),

    #[error("malformed row: expected {expected} columns, found {found}")]
    MalformedRow { expected: usize, found: usize },

    #[error("no retained evidence for assertion {assertion_id} under predicate {predicate}")]
    #[diagnostic(help("aggregation was requested for a predicate no evidence item supports"))]
    EmptyAggregation {
        assertion_id: String,
        predicate: String,
    },

    #[error("non-finite aggregate score for assertion {assertion_id} under predicate {predicate}")]
    NonFiniteScore {
        assertion_id: String,
        predicate: String,
    },

    #[error("failed to encode record: {0}")]
    Encoding(String),
}

impl From<rusqlite::Error> for ExportError {
    fn from(err: rusqlite::Error) -> Self {
        ExportError::Datastore(err.to_string())
    }
}
