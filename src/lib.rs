pub mod aggregate;
pub mod app;
pub mod config;
pub mod domain;
pub mod error;
pub mod kgx;
pub mod metadata;
pub mod normalizer;
pub mod operations;
pub mod output;
pub mod qualifiers;
pub mod resolver;
pub mod shard;
pub mod source;
pub mod store;
