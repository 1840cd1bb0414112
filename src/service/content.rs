//! Static content lookup.
//!
//! A provider turns a normalized request path into the bytes to serve. The
//! returned `Bytes` is reference counted, so the connection can hold it as
//! the body range of a vectored write for as long as the flush takes.

use bytes::Bytes;
use std::collections::HashMap;
use std::fs;
use std::io;
use std::os::unix::fs::PermissionsExt;
use std::path::{Component, Path, PathBuf};
use tracing::debug;

/// Result of a content lookup.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Content {
    Found(Bytes),
    NotFound,
    Forbidden,
}

/// Source of response bodies, keyed by request path.
pub trait ContentProvider: Send + Sync {
    fn lookup(&self, path: &str) -> Content;
}

/// Serves files from a directory on disk.
///
/// - missing file or a directory: `NotFound`
/// - not world-readable, or a path escaping the root via `..`: `Forbidden`
#[derive(Debug, Clone)]
pub struct FileContentProvider {
    root: PathBuf,
}

impl FileContentProvider {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn resolve(&self, path: &str) -> Option<PathBuf> {
        let relative = Path::new(path.trim_start_matches('/'));
        let mut resolved = self.root.clone();
        for component in relative.components() {
            match component {
                Component::Normal(part) => resolved.push(part),
                Component::CurDir => {}
                Component::ParentDir | Component::RootDir | Component::Prefix(_) => return None,
            }
        }
        Some(resolved)
    }
}

impl ContentProvider for FileContentProvider {
    fn lookup(&self, path: &str) -> Content {
        let Some(file) = self.resolve(path) else {
            return Content::Forbidden;
        };

        let metadata = match fs::metadata(&file) {
            Ok(metadata) => metadata,
            Err(_) => return Content::NotFound,
        };
        if metadata.is_dir() {
            return Content::NotFound;
        }
        if metadata.permissions().mode() & 0o004 == 0 {
            return Content::Forbidden;
        }

        match fs::read(&file) {
            Ok(data) => Content::Found(Bytes::from(data)),
            Err(e) if e.kind() == io::ErrorKind::PermissionDenied => Content::Forbidden,
            Err(e) => {
                debug!(path = %file.display(), error = %e, "Failed to read resource");
                Content::NotFound
            }
        }
    }
}

/// Serves a fixed set of in-memory documents.
#[derive(Debug, Clone, Default)]
pub struct MemoryContentProvider {
    documents: HashMap<String, Bytes>,
    forbidden: Vec<String>,
}

impl MemoryContentProvider {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_document(mut self, path: impl Into<String>, body: impl Into<Bytes>) -> Self {
        self.documents.insert(path.into(), body.into());
        self
    }

    pub fn with_forbidden(mut self, path: impl Into<String>) -> Self {
        self.forbidden.push(path.into());
        self
    }
}

impl ContentProvider for MemoryContentProvider {
    fn lookup(&self, path: &str) -> Content {
        if self.forbidden.iter().any(|p| p == path) {
            return Content::Forbidden;
        }
        match self.documents.get(path) {
            Some(body) => Content::Found(body.clone()),
            None => Content::NotFound,
        }
    }
}
