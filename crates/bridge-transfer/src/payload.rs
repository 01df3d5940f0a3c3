//! Payload sources: where the manifest comes from.
//!
//! A source is asked for its whole manifest before the session writes any
//! byte, so an unreadable file never leaves a half-sent manifest behind.

use std::fs;
use std::path::{Path, PathBuf};

use bytes::Bytes;
use tracing::debug;

use crate::error::PayloadError;
use crate::manifest::{Manifest, PayloadEntry};

/// Default extension for directory discovery.
pub const DEFAULT_EXTENSION: &str = "dylib";

/// Supplies an ordered list of named blobs.
pub trait PayloadSource: Send + Sync {
    fn load(&self) -> Result<Manifest, PayloadError>;
}

/// Every file in a directory with a given extension, sorted by name.
#[derive(Debug, Clone)]
pub struct DirectorySource {
    dir: PathBuf,
    extension: String,
}

impl DirectorySource {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self::with_extension(dir, DEFAULT_EXTENSION)
    }

    pub fn with_extension(dir: impl Into<PathBuf>, extension: &str) -> Self {
        Self {
            dir: dir.into(),
            extension: extension.trim_start_matches('.').to_string(),
        }
    }

    fn matches(&self, path: &Path) -> bool {
        path.extension().and_then(|e| e.to_str()) == Some(self.extension.as_str())
    }
}

impl PayloadSource for DirectorySource {
    fn load(&self) -> Result<Manifest, PayloadError> {
        let list_err = |source| PayloadError::ListDir {
            path: self.dir.clone(),
            source,
        };

        let mut paths = Vec::new();
        for dirent in fs::read_dir(&self.dir).map_err(list_err)? {
            let dirent = dirent.map_err(list_err)?;
            let path = dirent.path();
            if path.is_file() && self.matches(&path) {
                paths.push(path);
            }
        }
        paths.sort();

        debug!(dir = %self.dir.display(), files = paths.len(), "payload directory scanned");
        paths.iter().map(|p| read_entry(p)).collect()
    }
}

/// An explicit list of files, sent in the given order.
#[derive(Debug, Clone)]
pub struct FileSource {
    paths: Vec<PathBuf>,
}

impl FileSource {
    pub fn new(paths: Vec<PathBuf>) -> Self {
        Self { paths }
    }

    pub fn single(path: impl Into<PathBuf>) -> Self {
        Self::new(vec![path.into()])
    }
}

impl PayloadSource for FileSource {
    fn load(&self) -> Result<Manifest, PayloadError> {
        self.paths.iter().map(|p| read_entry(p)).collect()
    }
}

/// In-memory entries.
#[derive(Debug, Clone, Default)]
pub struct StaticSource {
    manifest: Manifest,
}

impl StaticSource {
    pub fn new(entries: Vec<PayloadEntry>) -> Self {
        Self {
            manifest: Manifest::new(entries),
        }
    }
}

impl PayloadSource for StaticSource {
    fn load(&self) -> Result<Manifest, PayloadError> {
        Ok(self.manifest.clone())
    }
}

/// Read one file; its base name (extension included) becomes the entry name.
fn read_entry(path: &Path) -> Result<PayloadEntry, PayloadError> {
    let name = path
        .file_name()
        .and_then(|n| n.to_str())
        .ok_or_else(|| PayloadError::InvalidName(path.to_path_buf()))?
        .to_string();
    let content = fs::read(path).map_err(|source| PayloadError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    Ok(PayloadEntry {
        name,
        content: Bytes::from(content),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn directory_source_filters_and_sorts() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("b.dylib"), b"bbb").unwrap();
        fs::write(dir.path().join("a.dylib"), b"a").unwrap();
        fs::write(dir.path().join("notes.txt"), b"skip me").unwrap();
        fs::create_dir(dir.path().join("nested.dylib")).unwrap();

        let manifest = DirectorySource::new(dir.path()).load().unwrap();
        let names: Vec<_> = manifest.iter().map(|e| e.name.as_str()).collect();
        assert_eq!(names, vec!["a.dylib", "b.dylib"]);
        assert_eq!(&manifest.entries()[1].content[..], b"bbb");
    }

    #[test]
    fn custom_extension_with_leading_dot() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("x.bin"), b"").unwrap();
        fs::write(dir.path().join("y.dylib"), b"").unwrap();

        let manifest = DirectorySource::with_extension(dir.path(), ".bin").load().unwrap();
        assert_eq!(manifest.len(), 1);
        assert_eq!(manifest.entries()[0].name, "x.bin");
        assert!(manifest.entries()[0].is_empty());
    }

    #[test]
    fn empty_directory_is_empty_manifest() {
        let dir = tempfile::tempdir().unwrap();
        assert!(DirectorySource::new(dir.path()).load().unwrap().is_empty());
    }

    #[test]
    fn missing_directory_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let err = DirectorySource::new(dir.path().join("gone")).load().unwrap_err();
        assert!(matches!(err, PayloadError::ListDir { .. }));
    }

    #[test]
    fn unreadable_file_aborts_load() {
        let dir = tempfile::tempdir().unwrap();
        let present = dir.path().join("present.dylib");
        fs::write(&present, b"ok").unwrap();

        let source = FileSource::new(vec![present, dir.path().join("absent.dylib")]);
        match source.load() {
            Err(PayloadError::Read { path, .. }) => assert!(path.ends_with("absent.dylib")),
            other => panic!("expected read error, got {:?}", other),
        }
    }

    #[test]
    fn file_source_keeps_given_order() {
        let dir = tempfile::tempdir().unwrap();
        let z = dir.path().join("z.dylib");
        let a = dir.path().join("a.dylib");
        fs::write(&z, b"z").unwrap();
        fs::write(&a, b"a").unwrap();

        let manifest = FileSource::new(vec![z, a]).load().unwrap();
        let names: Vec<_> = manifest.iter().map(|e| e.name.clone()).collect();
        assert_eq!(names, vec!["z.dylib", "a.dylib"]);
    }
}
