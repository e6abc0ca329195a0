//! In-memory store.
//!
//! Used for testing and scratch filesystems. All data is ephemeral.

use async_trait::async_trait;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;

use crate::error::{StoreError, StoreResult};
use crate::store::{FileId, KvStore};

#[derive(Debug, Default)]
struct Inner {
    superblock: Option<Vec<u8>>,
    files: HashMap<FileId, Vec<u8>>,
}

/// In-memory store.
///
/// Clones share the same data, so a test can hand one clone to a backend
/// and inspect the other.
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    inner: Arc<RwLock<Inner>>,
}

impl MemoryStore {
    /// Create a new empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of content records.
    pub fn len(&self) -> usize {
        self.inner.read().files.len()
    }

    /// Returns true if no content records are stored.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Returns true if a superblock has been saved.
    pub fn has_superblock(&self) -> bool {
        self.inner.read().superblock.is_some()
    }
}

#[async_trait]
impl KvStore for MemoryStore {
    async fn save_superblock(&self, superblock: &[u8]) -> StoreResult<()> {
        self.inner.write().superblock = Some(superblock.to_vec());
        Ok(())
    }

    async fn load_superblock(&self) -> StoreResult<Option<Vec<u8>>> {
        Ok(self.inner.read().superblock.clone())
    }

    async fn read_file(&self, id: FileId) -> StoreResult<Vec<u8>> {
        self.inner
            .read()
            .files
            .get(&id)
            .cloned()
            .ok_or(StoreError::NotFound(id))
    }

    async fn read_files(&self, ids: &[FileId]) -> StoreResult<Vec<Option<Vec<u8>>>> {
        let inner = self.inner.read();
        Ok(ids.iter().map(|id| inner.files.get(id).cloned()).collect())
    }

    async fn write_file(&self, id: FileId, data: &[u8]) -> StoreResult<()> {
        self.inner.write().files.insert(id, data.to_vec());
        Ok(())
    }

    async fn write_files(&self, entries: &[(FileId, Vec<u8>)]) -> StoreResult<()> {
        let mut inner = self.inner.write();
        for (id, data) in entries {
            inner.files.insert(*id, data.clone());
        }
        Ok(())
    }

    async fn unlink(&self, id: FileId) -> StoreResult<()> {
        self.inner.write().files.remove(&id);
        Ok(())
    }

    async fn unlink_many(&self, ids: &[FileId]) -> StoreResult<()> {
        let mut inner = self.inner.write();
        for id in ids {
            inner.files.remove(id);
        }
        Ok(())
    }

    async fn wipe(&self) -> StoreResult<()> {
        let mut inner = self.inner.write();
        inner.files.clear();
        inner.superblock = None;
        Ok(())
    }

    async fn close(&self) -> StoreResult<()> {
        Ok(())
    }
}
