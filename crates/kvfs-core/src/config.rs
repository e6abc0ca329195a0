//! Filesystem configuration.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use kvfs_store::{KvStore, MemoryStore, SqliteStore};

use crate::backend::Backend;
use crate::error::{FsError, FsResult};
use crate::logger::FsLogger;
use crate::mutex::MutexKind;

/// Which store the default backend is built on.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum StoreKind {
    /// Ephemeral in-memory store.
    #[default]
    Memory,
    /// SQLite database `<dir>/<name>.sqlite`.
    Sqlite { dir: PathBuf },
}

impl StoreKind {
    /// Build a fresh store.
    pub fn build(&self) -> Arc<dyn KvStore> {
        match self {
            StoreKind::Memory => Arc::new(MemoryStore::new()),
            StoreKind::Sqlite { dir } => Arc::new(SqliteStore::in_dir(dir)),
        }
    }
}

/// Tunables for one filesystem instance.
///
/// Durations are written in milliseconds in TOML:
///
/// ```toml
/// mutex_timeout_ms = 60000
/// idle_timeout_ms = 500
///
/// [mutex]
/// kind = "file"
/// dir = "/var/lib/kvfs/locks"
///
/// [store]
/// kind = "sqlite"
/// dir = "/var/lib/kvfs"
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct FsConfig {
    /// How long `init` waits for the initialization lock.
    #[serde(rename = "mutex_timeout_ms", with = "millis")]
    pub mutex_timeout: Duration,
    /// How often a lock wait reports that it is still waiting.
    #[serde(rename = "mutex_log_interval_ms", with = "millis")]
    pub mutex_log_interval: Duration,
    /// Poll interval for lock variants that cannot park on a wake-up.
    #[serde(rename = "mutex_poll_interval_ms", with = "millis")]
    pub mutex_poll_interval: Duration,
    /// Quiet time after the last operation before the backend deactivates.
    #[serde(rename = "idle_timeout_ms", with = "millis")]
    pub idle_timeout: Duration,
    /// Age at which a pending operation is reported as stalled.
    #[serde(rename = "stall_timeout_ms", with = "millis")]
    pub stall_timeout: Duration,
    /// How often a draining shutdown reports the operations it waits on.
    #[serde(rename = "drain_log_interval_ms", with = "millis")]
    pub drain_log_interval: Duration,
    /// Initialization lock variant.
    pub mutex: MutexKind,
    /// Store for the default backend.
    pub store: StoreKind,
}

impl Default for FsConfig {
    fn default() -> Self {
        Self {
            mutex_timeout: Duration::from_secs(60),
            mutex_log_interval: Duration::from_secs(5),
            mutex_poll_interval: Duration::from_millis(50),
            idle_timeout: Duration::from_millis(500),
            stall_timeout: Duration::from_secs(5 * 60),
            drain_log_interval: Duration::from_secs(1),
            mutex: MutexKind::default(),
            store: StoreKind::default(),
        }
    }
}

impl FsConfig {
    /// Parse a TOML document. Missing keys take their defaults.
    pub fn from_toml(text: &str) -> FsResult<Self> {
        toml::from_str(text).map_err(|e| FsError::invalid_argument(format!("config: {e}")))
    }

    /// Load a TOML config file.
    pub fn load(path: impl AsRef<Path>) -> FsResult<Self> {
        let text = std::fs::read_to_string(path.as_ref())?;
        Self::from_toml(&text)
    }
}

/// Options for one `init` call.
#[derive(Debug, Clone, Default)]
pub struct InitOptions {
    /// Pre-built backend. When absent, a [`DefaultBackend`] over the
    /// configured store is constructed.
    ///
    /// [`DefaultBackend`]: crate::DefaultBackend
    pub backend: Option<Arc<dyn Backend>>,
    /// Skip the root `stat` that forces activation after init.
    pub defer: bool,
    /// Erase existing data when the backend initializes.
    pub wipe: bool,
    /// Replace the instance's logger.
    pub logger: Option<Arc<dyn FsLogger>>,
}

impl InitOptions {
    /// Use the given backend.
    pub fn with_backend(mut self, backend: Arc<dyn Backend>) -> Self {
        self.backend = Some(backend);
        self
    }

    /// Skip the root `stat` that activates the backend at the end of init.
    pub fn deferred(mut self) -> Self {
        self.defer = true;
        self
    }

    /// Wipe existing data.
    pub fn wiped(mut self) -> Self {
        self.wipe = true;
        self
    }
}

mod millis {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(d.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        u64::deserialize(d).map(Duration::from_millis)
    }
}
