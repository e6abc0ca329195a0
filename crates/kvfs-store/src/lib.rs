//! # kvfs-store
//!
//! Key-value storage for kvfs.
//!
//! A store maps a numeric file identifier to opaque content and keeps one
//! reserved record, the superblock, for root metadata. Stores know nothing
//! about paths or directories; the filesystem layer in `kvfs-core` owns
//! that.
//!
//! - [`KvStore`] - the storage contract
//! - [`MemoryStore`] - ephemeral, for tests and scratch filesystems
//! - [`SqliteStore`] - durable, one SQLite file per database name

mod error;
mod memory;
mod sqlite;
mod store;

pub use error::{StoreError, StoreResult};
pub use memory::MemoryStore;
pub use sqlite::SqliteStore;
pub use store::{FileId, KvStore, SUPERBLOCK_KEY};
