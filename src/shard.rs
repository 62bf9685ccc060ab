use std::fs::File;
use std::io::{BufRead, BufReader, BufWriter, Write};

use camino::Utf8Path;
use flate2::Compression;
use flate2::read::MultiGzDecoder;
use flate2::write::GzEncoder;
use serde::Serialize;
use tracing::debug;

use crate::error::ExportError;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ShardStats {
    pub rows: u64,
    pub partitions: u64,
}

/// Gzip-compressed row writer that flushes every `partition_size` rows.
///
/// The gzip header carries no timestamp or file name, so identical rows
/// always produce identical bytes.
pub struct ShardWriter<W: Write> {
    encoder: GzEncoder<W>,
    partition_size: u64,
    rows: u64,
    pending: u64,
    partitions: u64,
}

impl ShardWriter<BufWriter<File>> {
    pub fn create(path: &Utf8Path, partition_size: usize) -> Result<Self, ExportError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent.as_std_path())
                .map_err(|err| ExportError::Storage(err.to_string()))?;
        }
        let file = File::create(path.as_std_path())
            .map_err(|err| ExportError::Storage(format!("{path}: {err}")))?;
        Ok(Self::new(BufWriter::new(file), partition_size))
    }
}

impl<W: Write> ShardWriter<W> {
    pub fn new(inner: W, partition_size: usize) -> Self {
        Self {
            encoder: GzEncoder::new(inner, Compression::default()),
            partition_size: partition_size.max(1) as u64,
            rows: 0,
            pending: 0,
            partitions: 0,
        }
    }

    pub fn write_row(&mut self, row: &str) -> Result<(), ExportError> {
        self.encoder
            .write_all(row.as_bytes())
            .and_then(|_| self.encoder.write_all(b"\n"))
            .map_err(|err| ExportError::Storage(err.to_string()))?;
        self.rows += 1;
        self.pending += 1;
        if self.pending >= self.partition_size {
            self.flush_partition()?;
        }
        Ok(())
    }

    pub fn rows(&self) -> u64 {
        self.rows
    }

    fn flush_partition(&mut self) -> Result<(), ExportError> {
        self.encoder
            .flush()
            .map_err(|err| ExportError::Storage(err.to_string()))?;
        self.partitions += 1;
        debug!(
            partition = self.partitions,
            rows = self.rows,
            "shard partition flushed"
        );
        self.pending = 0;
        Ok(())
    }

    /// Writes the gzip trailer and returns the inner writer.
    pub fn finish(mut self) -> Result<(W, ShardStats), ExportError> {
        if self.pending > 0 {
            self.flush_partition()?;
        }
        let stats = ShardStats {
            rows: self.rows,
            partitions: self.partitions,
        };
        let mut inner = self
            .encoder
            .finish()
            .map_err(|err| ExportError::Storage(err.to_string()))?;
        inner
            .flush()
            .map_err(|err| ExportError::Storage(err.to_string()))?;
        Ok((inner, stats))
    }
}

/// Streams the rows of a gzip file, including concatenated multi-member
/// files produced by compose, to `visit` one at a time. Blank lines are
/// skipped. `visit` receives the 1-based line number. Returns the number of
/// rows visited.
pub fn for_each_row<F>(path: &Utf8Path, mut visit: F) -> Result<u64, ExportError>
where
    F: FnMut(u64, &str) -> Result<(), ExportError>,
{
    let file = File::open(path.as_std_path())
        .map_err(|err| ExportError::Storage(format!("{path}: {err}")))?;
    let mut reader = BufReader::new(MultiGzDecoder::new(file));
    let mut buffer = String::new();
    let mut line = 0u64;
    let mut visited = 0u64;
    loop {
        buffer.clear();
        let read = reader
            .read_line(&mut buffer)
            .map_err(|err| ExportError::Storage(format!("{path}: {err}")))?;
        if read == 0 {
            break;
        }
        line += 1;
        let row = buffer.trim_end_matches(['\n', '\r']);
        if row.is_empty() {
            continue;
        }
        visit(line, row)?;
        visited += 1;
    }
    Ok(visited)
}

/// Reads every non-blank row of a gzip file into memory. Only for files
/// known to be small.
pub fn read_rows(path: &Utf8Path) -> Result<Vec<String>, ExportError> {
    let mut rows = Vec::new();
    for_each_row(path, |_, row| {
        rows.push(row.to_string());
        Ok(())
    })?;
    Ok(rows)
}

#[cfg(test)]
mod tests {
    use std::io::Read;

    use camino::Utf8PathBuf;

    use super::*;

    fn decode(bytes: &[u8]) -> String {
        let mut text = String::new();
        MultiGzDecoder::new(bytes).read_to_string(&mut text).unwrap();
        text
    }

    #[test]
    fn partitions_follow_partition_size() {
        let mut writer = ShardWriter::new(Vec::new(), 2);
        for row in ["a", "b", "c", "d", "e"] {
            writer.write_row(row).unwrap();
        }
        let (bytes, stats) = writer.finish().unwrap();
        assert_eq!(stats, ShardStats { rows: 5, partitions: 3 });
        assert_eq!(decode(&bytes), "a\nb\nc\nd\ne\n");
    }

    #[test]
    fn empty_shard_is_valid_gzip() {
        let (bytes, stats) = ShardWriter::new(Vec::new(), 10).finish().unwrap();
        assert_eq!(stats.partitions, 0);
        assert_eq!(decode(&bytes), "");
    }

    #[test]
    fn identical_rows_give_identical_bytes() {
        let write = || {
            let mut writer = ShardWriter::new(Vec::new(), 1);
            writer.write_row("CHEBI:24433\tgroup\tbiolink:SmallMolecule").unwrap();
            writer.finish().unwrap().0
        };
        assert_eq!(write(), write());
    }

    #[test]
    fn read_rows_spans_concatenated_members() {
        let dir = tempfile::tempdir().unwrap();
        let path = Utf8PathBuf::from_path_buf(dir.path().join("joined.tsv.gz")).unwrap();
        let mut joined = Vec::new();
        for rows in [["x", "y"], ["z", "w"]] {
            let mut writer = ShardWriter::new(Vec::new(), 100);
            for row in rows {
                writer.write_row(row).unwrap();
            }
            joined.extend(writer.finish().unwrap().0);
        }
        std::fs::write(&path, joined).unwrap();
        assert_eq!(read_rows(&path).unwrap(), vec!["x", "y", "z", "w"]);
    }

    #[test]
    fn for_each_row_streams_with_line_numbers() {
        let dir = tempfile::tempdir().unwrap();
        let path = Utf8PathBuf::from_path_buf(dir.path().join("edges.tsv.gz")).unwrap();
        let mut writer = ShardWriter::create(&path, 2).unwrap();
        for row in ["first", "", "third"] {
            writer.write_row(row).unwrap();
        }
        writer.finish().unwrap();

        let mut seen = Vec::new();
        let visited = for_each_row(&path, |line, row| {
            seen.push((line, row.to_string()));
            Ok(())
        })
        .unwrap();
        assert_eq!(visited, 2);
        assert_eq!(
            seen,
            vec![(1, "first".to_string()), (3, "third".to_string())]
        );
    }

    #[test]
    fn for_each_row_stops_on_visitor_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = Utf8PathBuf::from_path_buf(dir.path().join("edges.tsv.gz")).unwrap();
        let mut writer = ShardWriter::create(&path, 10).unwrap();
        for row in ["a", "b", "c"] {
            writer.write_row(row).unwrap();
        }
        writer.finish().unwrap();

        let mut calls = 0;
        let result = for_each_row(&path, |_, _| {
            calls += 1;
            Err(ExportError::Storage("stop".to_string()))
        });
        assert!(result.is_err());
        assert_eq!(calls, 1);
    }

    #[test]
    fn create_writes_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = Utf8PathBuf::from_path_buf(dir.path().join("nested/nodes.tsv.gz")).unwrap();
        let mut writer = ShardWriter::create(&path, 40_000).unwrap();
        writer.write_row("row").unwrap();
        writer.finish().unwrap();
        assert_eq!(read_rows(&path).unwrap(), vec!["row"]);
    }
}
