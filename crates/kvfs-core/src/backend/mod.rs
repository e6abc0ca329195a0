//! Filesystem backends.
//!
//! A [`Backend`] is what the lifecycle manager owns, activates, drains and
//! swaps. Its file operations are path-based and receive arguments that
//! the dispatcher has already normalized.
//!
//! [`DefaultBackend`] builds a directory tree on any
//! [`KvStore`](kvfs_store::KvStore); callers can supply their own backend
//! through `InitOptions::backend`.

mod default;
mod source;
mod tree;

use async_trait::async_trait;
use std::fmt;

use crate::config::InitOptions;
use crate::error::FsResult;
use crate::types::{FileData, OpOptions, Stat};

pub use default::DefaultBackend;
pub use source::{BackingSource, DirectorySource};

/// Filesystem backend contract.
///
/// The lifecycle hooks default to no-ops. The core guarantees:
///
/// - `activate` and `deactivate` never run at the same time;
/// - no file operation runs before `activate` has completed;
/// - `destroy` runs only after every in-flight operation has finished and
///   the backend has been deactivated. The backend is not used afterwards.
#[async_trait]
pub trait Backend: Send + Sync + fmt::Debug {
    // ========================================================================
    // Lifecycle
    // ========================================================================

    /// Called once after construction, under the initialization lock.
    async fn init(&self, name: &str, options: &InitOptions) -> FsResult<()> {
        let _ = (name, options);
        Ok(())
    }

    /// Acquire runtime resources.
    async fn activate(&self) -> FsResult<()> {
        Ok(())
    }

    /// Release runtime resources. May be followed by another `activate`.
    async fn deactivate(&self) -> FsResult<()> {
        Ok(())
    }

    /// Final teardown before the backend is replaced.
    async fn destroy(&self) -> FsResult<()> {
        Ok(())
    }

    // ========================================================================
    // Superblock
    // ========================================================================

    /// Ask for the superblock to be persisted soon.
    ///
    /// Called once after every mutating operation, whether it succeeded or
    /// not, from a cleanup path that cannot wait. Must not block and must
    /// tolerate being called any number of times; requests may be
    /// coalesced.
    fn request_checkpoint(&self);

    /// Persist the superblock now.
    async fn save_superblock(&self) -> FsResult<()>;

    // ========================================================================
    // Reading
    // ========================================================================

    /// Read a whole file.
    async fn read_file(&self, path: &str, opts: &OpOptions) -> FsResult<FileData>;

    /// Read many files. The result is aligned with `paths`; files that
    /// cannot be read are `None`.
    async fn read_files(
        &self,
        paths: &[String],
        opts: &OpOptions,
    ) -> FsResult<Vec<Option<FileData>>>;

    /// List the names in a directory.
    async fn readdir(&self, path: &str, opts: &OpOptions) -> FsResult<Vec<String>>;

    /// Metadata, following symlinks.
    async fn stat(&self, path: &str, opts: &OpOptions) -> FsResult<Stat>;

    /// Metadata of the path itself, not following a final symlink.
    async fn lstat(&self, path: &str, opts: &OpOptions) -> FsResult<Stat>;

    /// Target of a symlink.
    async fn readlink(&self, path: &str, opts: &OpOptions) -> FsResult<String>;

    /// Total size of the regular files at or below `path`.
    async fn du(&self, path: &str) -> FsResult<u64>;

    // ========================================================================
    // Writing
    // ========================================================================

    /// Create or replace a file.
    async fn write_file(&self, path: &str, data: &FileData, opts: &OpOptions) -> FsResult<()>;

    /// Create or replace many files.
    async fn write_files(&self, entries: &[(String, FileData)], opts: &OpOptions)
    -> FsResult<()>;

    /// Remove a file or symlink.
    async fn unlink(&self, path: &str, opts: &OpOptions) -> FsResult<()>;

    /// Remove many files or symlinks.
    async fn unlink_many(&self, paths: &[String], opts: &OpOptions) -> FsResult<()>;

    /// Create a directory. The parent must exist.
    async fn mkdir(&self, path: &str, opts: &OpOptions) -> FsResult<()>;

    /// Remove an empty directory.
    async fn rmdir(&self, path: &str, opts: &OpOptions) -> FsResult<()>;

    /// Move a file, symlink or directory.
    async fn rename(&self, from: &str, to: &str) -> FsResult<()>;

    /// Create a symlink at `path` pointing to `target`.
    async fn symlink(&self, target: &str, path: &str) -> FsResult<()>;

    /// Record a file whose content is supplied by a backing source.
    async fn back_file(&self, path: &str, opts: &OpOptions) -> FsResult<()>;

    /// Persist everything pending.
    async fn flush(&self) -> FsResult<()>;
}
