//! Lazily fetched file content.

use async_trait::async_trait;
use std::fmt;
use std::io;
use std::path::{Path, PathBuf};

use crate::error::{FsError, FsResult};

/// Where backed files get their content from.
///
/// `back_file` records a file without content; the first read fetches it
/// from the source and stores it.
#[async_trait]
pub trait BackingSource: Send + Sync + fmt::Debug {
    /// Size of the content at `key`.
    async fn size(&self, key: &str) -> FsResult<u64>;

    /// The full content at `key`.
    async fn fetch(&self, key: &str) -> FsResult<Vec<u8>>;
}

/// Backing source rooted at a host directory. Filesystem paths map to the
/// same relative path under the root.
#[derive(Debug, Clone)]
pub struct DirectorySource {
    root: PathBuf,
}

impl DirectorySource {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn host_path(&self, key: &str) -> PathBuf {
        // Keys are normalized filesystem paths, so there is no `..` to
        // escape the root with.
        self.root.join(key.trim_start_matches('/'))
    }
}

fn map_io(key: &str, e: io::Error) -> FsError {
    match e.kind() {
        io::ErrorKind::NotFound => FsError::not_found(key),
        io::ErrorKind::PermissionDenied => FsError::permission_denied(key),
        _ => FsError::Io(e),
    }
}

#[async_trait]
impl BackingSource for DirectorySource {
    async fn size(&self, key: &str) -> FsResult<u64> {
        let meta = tokio::fs::metadata(self.host_path(key))
            .await
            .map_err(|e| map_io(key, e))?;
        if meta.is_dir() {
            return Err(FsError::is_a_directory(key));
        }
        Ok(meta.len())
    }

    async fn fetch(&self, key: &str) -> FsResult<Vec<u8>> {
        tokio::fs::read(self.host_path(key))
            .await
            .map_err(|e| map_io(key, e))
    }
}
