//! Store error types.

use std::io;
use thiserror::Error;

use crate::store::FileId;

/// Store error type.
#[derive(Debug, Error)]
pub enum StoreError {
    /// No content is stored under this identifier.
    #[error("no content for file id {0}")]
    NotFound(FileId),

    /// The store has no database yet; `init` was never called.
    #[error("store is not initialized")]
    Uninitialized,

    /// The store was closed and can no longer be used.
    #[error("store is closed")]
    Closed,

    /// SQLite error.
    #[error("sqlite: {0}")]
    Sqlite(#[from] rusqlite::Error),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// A blocking store task panicked or was cancelled.
    #[error("store task failed: {0}")]
    Task(String),
}

impl StoreError {
    /// Returns true if this is a `NotFound` error.
    pub fn is_not_found(&self) -> bool {
        matches!(self, StoreError::NotFound(_))
    }
}

impl From<tokio::task::JoinError> for StoreError {
    fn from(e: tokio::task::JoinError) -> Self {
        StoreError::Task(e.to_string())
    }
}

/// Store result type.
pub type StoreResult<T> = Result<T, StoreError>;
