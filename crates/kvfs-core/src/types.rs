//! Core filesystem types.

use serde::{Deserialize, Serialize};
use std::time::{SystemTime, UNIX_EPOCH};

/// Type bits of `Stat::mode`, as in `st_mode`.
const S_IFREG: u32 = 0o100000;
const S_IFDIR: u32 = 0o040000;
const S_IFLNK: u32 = 0o120000;

/// File type enumeration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FileType {
    /// Regular file.
    File,
    /// Directory.
    Directory,
    /// Symbolic link.
    Symlink,
}

impl FileType {
    /// Returns true if this is a regular file.
    pub fn is_file(&self) -> bool {
        matches!(self, FileType::File)
    }

    /// Returns true if this is a directory.
    pub fn is_dir(&self) -> bool {
        matches!(self, FileType::Directory)
    }

    /// Returns true if this is a symbolic link.
    pub fn is_symlink(&self) -> bool {
        matches!(self, FileType::Symlink)
    }

    fn type_bits(&self) -> u32 {
        match self {
            FileType::File => S_IFREG,
            FileType::Directory => S_IFDIR,
            FileType::Symlink => S_IFLNK,
        }
    }
}

/// File metadata.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Stat {
    /// File type.
    pub kind: FileType,
    /// Full mode including type bits (e.g. `0o100644`).
    pub mode: u32,
    /// Size in bytes. For symlinks, the length of the target.
    pub size: u64,
    /// Inode number; also the content key in the store.
    pub ino: u64,
    /// Last modification, milliseconds since the Unix epoch.
    pub mtime_ms: u64,
    /// Last status change, milliseconds since the Unix epoch.
    pub ctime_ms: u64,
}

impl Stat {
    /// Create metadata stamped with the current time.
    pub fn new(kind: FileType, ino: u64, size: u64, perm: u32) -> Self {
        let now = now_ms();
        Self {
            kind,
            mode: kind.type_bits() | (perm & 0o7777),
            size,
            ino,
            mtime_ms: now,
            ctime_ms: now,
        }
    }

    /// Permission bits without the type.
    pub fn perm(&self) -> u32 {
        self.mode & 0o7777
    }

    /// Update size and modification time.
    pub fn touch(&mut self, size: u64) {
        self.size = size;
        self.mtime_ms = now_ms();
        self.ctime_ms = self.mtime_ms;
    }

    /// Returns true if this is a regular file.
    pub fn is_file(&self) -> bool {
        self.kind.is_file()
    }

    /// Returns true if this is a directory.
    pub fn is_dir(&self) -> bool {
        self.kind.is_dir()
    }

    /// Returns true if this is a symbolic link.
    pub fn is_symlink(&self) -> bool {
        self.kind.is_symlink()
    }
}

pub(crate) fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

/// Content encoding requested for reads.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Encoding {
    /// Decode content as UTF-8 text.
    Utf8,
    /// An encoding this filesystem does not support; rejected during
    /// argument normalization.
    Unsupported(String),
}

impl From<&str> for Encoding {
    fn from(s: &str) -> Self {
        match s.to_ascii_lowercase().as_str() {
            "utf8" | "utf-8" => Encoding::Utf8,
            _ => Encoding::Unsupported(s.to_string()),
        }
    }
}

/// Per-call options.
///
/// A bare string converts to `{ encoding }`, so `fs.read_file(p, "utf8")`
/// works.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct OpOptions {
    /// Encoding for reads; `None` returns raw bytes.
    pub encoding: Option<Encoding>,
    /// Permission bits for created files and directories.
    pub mode: Option<u32>,
}

impl OpOptions {
    /// Create empty options.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the encoding.
    pub fn with_encoding(mut self, encoding: impl Into<Encoding>) -> Self {
        self.encoding = Some(encoding.into());
        self
    }

    /// Set the permission bits.
    pub fn with_mode(mut self, mode: u32) -> Self {
        self.mode = Some(mode);
        self
    }
}

impl From<&str> for OpOptions {
    fn from(encoding: &str) -> Self {
        OpOptions::new().with_encoding(encoding)
    }
}

impl From<Encoding> for OpOptions {
    fn from(encoding: Encoding) -> Self {
        OpOptions::new().with_encoding(encoding)
    }
}

impl From<Option<OpOptions>> for OpOptions {
    fn from(opts: Option<OpOptions>) -> Self {
        opts.unwrap_or_default()
    }
}

/// File content as passed to writes and returned from reads.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FileData {
    /// Raw bytes.
    Bytes(Vec<u8>),
    /// UTF-8 text.
    Text(String),
}

impl FileData {
    /// Borrow the content as bytes.
    pub fn as_bytes(&self) -> &[u8] {
        match self {
            FileData::Bytes(b) => b,
            FileData::Text(s) => s.as_bytes(),
        }
    }

    /// Take the content as bytes.
    pub fn into_bytes(self) -> Vec<u8> {
        match self {
            FileData::Bytes(b) => b,
            FileData::Text(s) => s.into_bytes(),
        }
    }

    /// Borrow the content as text, if it is text.
    pub fn as_text(&self) -> Option<&str> {
        match self {
            FileData::Text(s) => Some(s),
            FileData::Bytes(_) => None,
        }
    }

    /// Length in bytes.
    pub fn len(&self) -> usize {
        self.as_bytes().len()
    }

    /// Returns true if there is no content.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Decode raw bytes according to `encoding`.
    pub(crate) fn decode(
        bytes: Vec<u8>,
        encoding: Option<&Encoding>,
    ) -> Result<Self, std::string::FromUtf8Error> {
        match encoding {
            Some(Encoding::Utf8) => String::from_utf8(bytes).map(FileData::Text),
            _ => Ok(FileData::Bytes(bytes)),
        }
    }
}

impl From<Vec<u8>> for FileData {
    fn from(b: Vec<u8>) -> Self {
        FileData::Bytes(b)
    }
}

impl From<&[u8]> for FileData {
    fn from(b: &[u8]) -> Self {
        FileData::Bytes(b.to_vec())
    }
}

impl<const N: usize> From<&[u8; N]> for FileData {
    fn from(b: &[u8; N]) -> Self {
        FileData::Bytes(b.to_vec())
    }
}

impl From<String> for FileData {
    fn from(s: String) -> Self {
        FileData::Text(s)
    }
}

impl From<&str> for FileData {
    fn from(s: &str) -> Self {
        FileData::Text(s.to_string())
    }
}
