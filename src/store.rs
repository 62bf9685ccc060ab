use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use camino::{Utf8Path, Utf8PathBuf};
use tempfile::Builder;

use crate::error::ExportError;

/// Named-blob storage. Blobs are written whole and never modified in place.
pub trait ObjectStore {
    fn put_file(&self, name: &str, source: &Utf8Path) -> Result<(), ExportError>;
    fn put_bytes(&self, name: &str, content: &[u8]) -> Result<(), ExportError>;
    /// Copies a blob to a local path; fails with `BlobNotFound` if absent.
    fn get_file(&self, name: &str, dest: &Utf8Path) -> Result<(), ExportError>;
    fn exists(&self, name: &str) -> Result<bool, ExportError>;
    /// Blob names starting with `prefix`, sorted.
    fn list(&self, prefix: &str) -> Result<Vec<String>, ExportError>;
    /// Concatenates `sources` in order into `dest`.
    fn compose(&self, sources: &[String], dest: &str) -> Result<(), ExportError>;
    fn delete(&self, names: &[String]) -> Result<(), ExportError>;
}

/// Object store backed by a local directory; a blob name maps to a relative
/// path, with `/` as separator.
#[derive(Debug, Clone)]
pub struct LocalObjectStore {
    root: Utf8PathBuf,
}

impl LocalObjectStore {
    pub fn new(root: impl Into<Utf8PathBuf>) -> Result<Self, ExportError> {
        let root = root.into();
        fs::create_dir_all(root.as_std_path()).map_err(storage_err)?;
        Ok(Self { root })
    }

    pub fn root(&self) -> &Utf8Path {
        &self.root
    }

    pub fn blob_path(&self, name: &str) -> Utf8PathBuf {
        self.root.join(name)
    }

    /// Writes `dest` through a sibling temp file that is renamed into place,
    /// so readers never see a partial blob.
    fn write_atomic<F>(&self, name: &str, fill: F) -> Result<(), ExportError>
    where
        F: FnOnce(&mut fs::File) -> io::Result<()>,
    {
        let dest = self.blob_path(name);
        let parent = dest
            .parent()
            .ok_or_else(|| ExportError::Storage(format!("invalid blob name: {name}")))?;
        fs::create_dir_all(parent.as_std_path()).map_err(storage_err)?;
        let mut temp = Builder::new()
            .prefix(".blob")
            .tempfile_in(parent.as_std_path())
            .map_err(storage_err)?;
        fill(temp.as_file_mut()).map_err(storage_err)?;
        temp.as_file_mut().sync_all().map_err(storage_err)?;
        temp.persist(dest.as_std_path())
            .map_err(|err| ExportError::Storage(err.to_string()))?;
        Ok(())
    }
}

impl ObjectStore for LocalObjectStore {
    fn put_file(&self, name: &str, source: &Utf8Path) -> Result<(), ExportError> {
        self.write_atomic(name, |file| {
            let mut input = fs::File::open(source.as_std_path())?;
            io::copy(&mut input, file).map(|_| ())
        })
    }

    fn put_bytes(&self, name: &str, content: &[u8]) -> Result<(), ExportError> {
        self.write_atomic(name, |file| io::Write::write_all(file, content))
    }

    fn get_file(&self, name: &str, dest: &Utf8Path) -> Result<(), ExportError> {
        let source = self.blob_path(name);
        if !source.as_std_path().is_file() {
            return Err(ExportError::BlobNotFound(name.to_string()));
        }
        if let Some(parent) = dest.parent() {
            fs::create_dir_all(parent.as_std_path()).map_err(storage_err)?;
        }
        fs::copy(source.as_std_path(), dest.as_std_path()).map_err(storage_err)?;
        Ok(())
    }

    fn exists(&self, name: &str) -> Result<bool, ExportError> {
        Ok(self.blob_path(name).as_std_path().is_file())
    }

    fn list(&self, prefix: &str) -> Result<Vec<String>, ExportError> {
        if !self.root.as_std_path().exists() {
            return Ok(Vec::new());
        }
        let mut names = Vec::new();
        for path in walk_files(self.root.as_std_path())? {
            let relative = path
                .strip_prefix(self.root.as_std_path())
                .map_err(|err| ExportError::Storage(err.to_string()))?;
            let name = relative
                .components()
                .map(|part| part.as_os_str().to_string_lossy())
                .collect::<Vec<_>>()
                .join("/");
            let file_name = relative
                .file_name()
                .map(|name| name.to_string_lossy())
                .unwrap_or_default();
            if file_name.starts_with(".blob") {
                continue;
            }
            if name.starts_with(prefix) {
                names.push(name);
            }
        }
        names.sort();
        Ok(names)
    }

    fn compose(&self, sources: &[String], dest: &str) -> Result<(), ExportError> {
        for source in sources {
            if !self.exists(source)? {
                return Err(ExportError::BlobNotFound(source.clone()));
            }
        }
        self.write_atomic(dest, |file| {
            for source in sources {
                let mut input = fs::File::open(self.blob_path(source).as_std_path())?;
                io::copy(&mut input, file)?;
            }
            Ok(())
        })
    }

    fn delete(&self, names: &[String]) -> Result<(), ExportError> {
        for name in names {
            match fs::remove_file(self.blob_path(name).as_std_path()) {
                Ok(()) => {}
                Err(err) if err.kind() == io::ErrorKind::NotFound => {}
                Err(err) => return Err(storage_err(err)),
            }
        }
        Ok(())
    }
}

fn storage_err(err: io::Error) -> ExportError {
    ExportError::Storage(err.to_string())
}

fn walk_files(root: &Path) -> Result<Vec<PathBuf>, ExportError> {
    let mut items = Vec::new();
    let mut stack = vec![root.to_path_buf()];
    while let Some(path) = stack.pop() {
        for entry in fs::read_dir(&path).map_err(storage_err)? {
            let path = entry.map_err(storage_err)?.path();
            if path.is_dir() {
                stack.push(path);
            } else {
                items.push(path);
            }
        }
    }
    Ok(items)
}
