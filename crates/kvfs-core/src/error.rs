//! Filesystem error types.

use std::io;
use std::string::FromUtf8Error;
use thiserror::Error;

use kvfs_store::StoreError;

use crate::mutex::MutexError;

/// Filesystem error type.
///
/// Errors raised by a backend reach the caller unchanged; the dispatcher
/// never rewraps them.
#[derive(Debug, Error)]
pub enum FsError {
    /// File or directory not found.
    #[error("not found: {0}")]
    NotFound(String),

    /// Path already exists.
    #[error("already exists: {0}")]
    AlreadyExists(String),

    /// Permission denied.
    #[error("permission denied: {0}")]
    PermissionDenied(String),

    /// Expected a directory.
    #[error("not a directory: {0}")]
    NotADirectory(String),

    /// Expected a file.
    #[error("is a directory: {0}")]
    IsADirectory(String),

    /// Directory not empty.
    #[error("directory not empty: {0}")]
    DirectoryNotEmpty(String),

    /// Not a symbolic link.
    #[error("not a symbolic link: {0}")]
    NotASymlink(String),

    /// Too many symbolic links while resolving a path.
    #[error("too many symbolic links: {0}")]
    TooManySymlinks(String),

    /// Malformed path.
    #[error("invalid path: {0}")]
    InvalidPath(String),

    /// Malformed argument other than a path.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// The filesystem was used before any initialization started.
    #[error("filesystem used before it was initialized")]
    NotInitialized,

    /// The most recent initialization failed; no backend is available.
    #[error("initialization failed: {0}")]
    InitFailed(String),

    /// Initialization lock error (including timeouts).
    #[error(transparent)]
    Mutex(#[from] MutexError),

    /// Error from the underlying key-value store.
    #[error(transparent)]
    Store(#[from] StoreError),

    /// Content could not be decoded with the requested encoding.
    #[error("invalid utf-8 content: {0}")]
    Encoding(#[from] FromUtf8Error),

    /// Superblock could not be encoded or decoded.
    #[error("superblock: {0}")]
    Superblock(#[from] postcard::Error),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Other error.
    #[error("{0}")]
    Other(String),
}

impl FsError {
    /// Create a NotFound error.
    pub fn not_found(path: impl Into<String>) -> Self {
        Self::NotFound(path.into())
    }

    /// Create an AlreadyExists error.
    pub fn already_exists(path: impl Into<String>) -> Self {
        Self::AlreadyExists(path.into())
    }

    /// Create a PermissionDenied error.
    pub fn permission_denied(path: impl Into<String>) -> Self {
        Self::PermissionDenied(path.into())
    }

    /// Create a NotADirectory error.
    pub fn not_a_directory(path: impl Into<String>) -> Self {
        Self::NotADirectory(path.into())
    }

    /// Create an IsADirectory error.
    pub fn is_a_directory(path: impl Into<String>) -> Self {
        Self::IsADirectory(path.into())
    }

    /// Create a DirectoryNotEmpty error.
    pub fn directory_not_empty(path: impl Into<String>) -> Self {
        Self::DirectoryNotEmpty(path.into())
    }

    /// Create an InvalidPath error.
    pub fn invalid_path(path: impl Into<String>) -> Self {
        Self::InvalidPath(path.into())
    }

    /// Create an InvalidArgument error.
    pub fn invalid_argument(msg: impl Into<String>) -> Self {
        Self::InvalidArgument(msg.into())
    }

    /// Create an Other error.
    pub fn other(msg: impl Into<String>) -> Self {
        Self::Other(msg.into())
    }

    /// Returns true for a missing file, directory or store record.
    pub fn is_not_found(&self) -> bool {
        match self {
            FsError::NotFound(_) => true,
            FsError::Store(e) => e.is_not_found(),
            _ => false,
        }
    }

    /// Returns true if the initialization lock could not be taken in time.
    pub fn is_timeout(&self) -> bool {
        matches!(self, FsError::Mutex(MutexError::Timeout { .. }))
    }
}

/// Convert FsError to std::io::Error for compatibility.
impl From<FsError> for io::Error {
    fn from(e: FsError) -> Self {
        match e {
            FsError::NotFound(msg) => io::Error::new(io::ErrorKind::NotFound, msg),
            FsError::AlreadyExists(msg) => io::Error::new(io::ErrorKind::AlreadyExists, msg),
            FsError::PermissionDenied(msg) => {
                io::Error::new(io::ErrorKind::PermissionDenied, msg)
            }
            FsError::NotADirectory(msg) => io::Error::new(io::ErrorKind::NotADirectory, msg),
            FsError::IsADirectory(msg) => io::Error::new(io::ErrorKind::IsADirectory, msg),
            FsError::DirectoryNotEmpty(msg) => {
                io::Error::new(io::ErrorKind::DirectoryNotEmpty, msg)
            }
            FsError::NotASymlink(msg) => io::Error::new(io::ErrorKind::InvalidInput, msg),
            FsError::InvalidPath(msg) | FsError::InvalidArgument(msg) => {
                io::Error::new(io::ErrorKind::InvalidInput, msg)
            }
            FsError::Mutex(MutexError::Timeout { name, waited }) => io::Error::new(
                io::ErrorKind::TimedOut,
                format!("lock {name} not acquired after {waited:?}"),
            ),
            FsError::Io(e) => e,
            other => io::Error::other(other.to_string()),
        }
    }
}

/// Filesystem result type.
pub type FsResult<T> = Result<T, FsError>;

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_io_error_kinds() {
        let cases = [
            (FsError::not_found("/a"), io::ErrorKind::NotFound),
            (FsError::already_exists("/a"), io::ErrorKind::AlreadyExists),
            (FsError::not_a_directory("/a"), io::ErrorKind::NotADirectory),
            (FsError::is_a_directory("/a"), io::ErrorKind::IsADirectory),
            (FsError::directory_not_empty("/a"), io::ErrorKind::DirectoryNotEmpty),
            (FsError::invalid_path(""), io::ErrorKind::InvalidInput),
            (FsError::NotASymlink("/a".into()), io::ErrorKind::InvalidInput),
            (FsError::InitFailed("boom".into()), io::ErrorKind::Other),
        ];
        for (err, kind) in cases {
            let described = err.to_string();
            let io_err: io::Error = err.into();
            assert_eq!(io_err.kind(), kind, "{described}");
        }
    }

    #[test]
    fn test_io_error_keeps_message_and_source() {
        let io_err: io::Error = FsError::not_found("/missing").into();
        assert!(io_err.to_string().contains("/missing"), "{io_err}");

        let inner = io::Error::new(io::ErrorKind::WouldBlock, "busy");
        let io_err: io::Error = FsError::Io(inner).into();
        assert_eq!(io_err.kind(), io::ErrorKind::WouldBlock);

        let timeout = FsError::Mutex(MutexError::Timeout {
            name: "db-initialization".into(),
            waited: Duration::from_millis(100),
        });
        assert!(timeout.is_timeout());
        let io_err: io::Error = timeout.into();
        assert_eq!(io_err.kind(), io::ErrorKind::TimedOut);
        assert!(io_err.to_string().contains("db-initialization"));
    }
}
