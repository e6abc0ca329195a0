//! # kvfs-core
//!
//! A POSIX-like file API (read/write/stat/rename/symlink/readdir) over a
//! pluggable, possibly slow, possibly shared key-value store.
//!
//! The interesting part is not the file operations themselves but the
//! coordination around them:
//!
//! - Every call passes through one dispatcher that normalizes arguments,
//!   waits for initialization, activates the backend, tracks the call as
//!   in flight, and on the way out requests a superblock checkpoint (for
//!   mutating calls) and arms an idle timer that deactivates the backend.
//! - Initialization and re-initialization (swapping the backend) run under
//!   a [`DistributedMutex`] keyed by database name, so two instances that
//!   open the same database never tear down and rebuild it at once.
//! - Before a backend is destroyed, every in-flight call drains.
//!
//! ```ignore
//! let fs = KvFs::open("repo", FsConfig::default(), InitOptions::default()).await?;
//! fs.write_file("/x", "hello", OpOptions::default()).await?;
//! let text = fs.read_file("/x", "utf8").await?;
//! ```

pub mod backend;
mod config;
mod error;
mod fs;
mod lifecycle;
mod logger;
pub mod mutex;
mod ops;
pub mod path;
mod tracker;
mod types;

pub use backend::{Backend, BackingSource, DefaultBackend, DirectorySource};
pub use config::{FsConfig, InitOptions, StoreKind};
pub use error::{FsError, FsResult};
pub use fs::KvFs;
pub use logger::{FsLogger, TracingLogger};
pub use mutex::{DistributedMutex, LocalMutex, MutexError, MutexKind, MutexResult, WaitPhase};
pub use ops::{Normalizer, OpArgs, OpDescriptor, OpKind, OpOutput};
pub use tracker::OpRecord;
pub use types::{Encoding, FileData, FileType, OpOptions, Stat};

#[cfg(unix)]
pub use mutex::FileMutex;
