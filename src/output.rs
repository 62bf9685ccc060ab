use std::io::{self, Write};

use serde::Serialize;
use tracing::info;

use crate::app::{
    ComposeResult, EdgeExportResult, MetadataResult, NodeExportResult, ProgressEvent, ProgressSink,
};

pub struct JsonOutput;

impl JsonOutput {
    pub fn print_nodes(result: &NodeExportResult) -> io::Result<()> {
        Self::print_json(result)
    }

    pub fn print_edges(result: &EdgeExportResult) -> io::Result<()> {
        Self::print_json(result)
    }

    pub fn print_compose(result: &ComposeResult) -> io::Result<()> {
        Self::print_json(result)
    }

    pub fn print_metadata(result: &MetadataResult) -> io::Result<()> {
        Self::print_json(result)
    }

    fn print_json<T: Serialize>(value: &T) -> io::Result<()> {
        let json = serde_json::to_string_pretty(value).map_err(io::Error::other)?;
        let mut stdout = io::stdout();
        stdout.write_all(json.as_bytes())?;
        stdout.write_all(b"\n")?;
        Ok(())
    }
}

/// Forwards stage progress to the log.
pub struct LogSink;

impl ProgressSink for LogSink {
    fn event(&self, event: ProgressEvent) {
        match event.elapsed {
            Some(elapsed) => info!(elapsed_ms = elapsed.as_millis() as u64, "{}", event.message),
            None => info!("{}", event.message),
        }
    }
}

/// Discards progress events.
pub struct SilentSink;

impl ProgressSink for SilentSink {
    fn event(&self, _event: ProgressEvent) {}
}
