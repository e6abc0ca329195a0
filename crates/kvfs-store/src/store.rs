//! Storage contract.

use async_trait::async_trait;
use std::fmt;

use crate::error::StoreResult;

/// Identifier of a content record.
pub type FileId = u64;

/// Name of the reserved superblock record.
///
/// Stores persist the superblock apart from content records; this key is
/// never a valid content identifier.
pub const SUPERBLOCK_KEY: &str = "!root";

/// Key-value storage contract.
///
/// Every operation may suspend. Operations on one store may run
/// concurrently with each other; the filesystem layer serializes
/// initialization itself.
///
/// The lifecycle hooks have no-op defaults. `destroy` is only called after
/// all in-flight work has drained and the store has been deactivated; the
/// store must not be used afterwards.
#[async_trait]
pub trait KvStore: Send + Sync + fmt::Debug {
    // ========================================================================
    // Lifecycle hooks
    // ========================================================================

    /// Prepare the store for the named database.
    async fn init(&self, name: &str) -> StoreResult<()> {
        let _ = name;
        Ok(())
    }

    /// Acquire runtime resources (connections, caches).
    async fn activate(&self) -> StoreResult<()> {
        Ok(())
    }

    /// Release runtime resources. The store may be activated again later.
    async fn deactivate(&self) -> StoreResult<()> {
        Ok(())
    }

    /// Tear the store down for good.
    async fn destroy(&self) -> StoreResult<()> {
        Ok(())
    }

    // ========================================================================
    // Superblock
    // ========================================================================

    /// Persist the superblock.
    async fn save_superblock(&self, superblock: &[u8]) -> StoreResult<()>;

    /// Load the superblock, `None` if none has been saved.
    async fn load_superblock(&self) -> StoreResult<Option<Vec<u8>>>;

    // ========================================================================
    // Content
    // ========================================================================

    /// Read one record. Fails with `NotFound` if absent.
    async fn read_file(&self, id: FileId) -> StoreResult<Vec<u8>>;

    /// Read many records. The result is aligned with `ids`; missing
    /// records are `None`.
    async fn read_files(&self, ids: &[FileId]) -> StoreResult<Vec<Option<Vec<u8>>>>;

    /// Write one record, replacing any previous content.
    async fn write_file(&self, id: FileId, data: &[u8]) -> StoreResult<()>;

    /// Write many records.
    async fn write_files(&self, entries: &[(FileId, Vec<u8>)]) -> StoreResult<()>;

    /// Delete one record. Deleting an absent record is not an error.
    async fn unlink(&self, id: FileId) -> StoreResult<()>;

    /// Delete many records.
    async fn unlink_many(&self, ids: &[FileId]) -> StoreResult<()>;

    /// Erase all content and the superblock.
    async fn wipe(&self) -> StoreResult<()>;

    /// Close the store.
    async fn close(&self) -> StoreResult<()>;
}
