//! SQLite store.
//!
//! One database file per filesystem name. Content lives in `files`, the
//! superblock in `meta` under [`SUPERBLOCK_KEY`], so the two never share a
//! key space. The connection is opened on demand and dropped on
//! `deactivate`; all SQLite work runs on `spawn_blocking`.

use async_trait::async_trait;
use parking_lot::Mutex;
use rusqlite::{params, Connection, OptionalExtension};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

use crate::error::{StoreError, StoreResult};
use crate::store::{FileId, KvStore, SUPERBLOCK_KEY};

const SCHEMA: &str = r#"
-- File content, keyed by inode number
CREATE TABLE IF NOT EXISTS files (
    id INTEGER PRIMARY KEY,
    data BLOB NOT NULL
);

-- Reserved records (superblock)
CREATE TABLE IF NOT EXISTS meta (
    key TEXT PRIMARY KEY,
    value BLOB NOT NULL
);
"#;

/// How long a connection waits on another process's write lock.
const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, Clone)]
enum Location {
    /// A fixed database file.
    File(PathBuf),
    /// A directory; the file is `<dir>/<name>.sqlite`, chosen at `init`.
    Dir(PathBuf),
}

#[derive(Debug, Default)]
struct State {
    path: Option<PathBuf>,
    conn: Option<Connection>,
    closed: bool,
}

impl State {
    fn connect(&mut self) -> StoreResult<&mut Connection> {
        if self.closed {
            return Err(StoreError::Closed);
        }
        if self.conn.is_none() {
            let path = self.path.as_ref().ok_or(StoreError::Uninitialized)?;
            debug!(path = %path.display(), "opening sqlite store");
            let conn = Connection::open(path)?;
            conn.busy_timeout(BUSY_TIMEOUT)?;
            conn.execute_batch(SCHEMA)?;
            self.conn = Some(conn);
        }
        self.conn.as_mut().ok_or(StoreError::Closed)
    }
}

/// SQLite-backed store.
#[derive(Debug, Clone)]
pub struct SqliteStore {
    location: Location,
    state: Arc<Mutex<State>>,
}

impl SqliteStore {
    /// Store backed by the given database file.
    pub fn open(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        Self {
            location: Location::File(path.clone()),
            state: Arc::new(Mutex::new(State {
                path: Some(path),
                ..State::default()
            })),
        }
    }

    /// Store whose database file is chosen by name at `init`.
    pub fn in_dir(dir: impl Into<PathBuf>) -> Self {
        Self {
            location: Location::Dir(dir.into()),
            state: Arc::new(Mutex::new(State::default())),
        }
    }

    /// Path of the database file, once known.
    pub fn path(&self) -> Option<PathBuf> {
        self.state.lock().path.clone()
    }

    /// Returns true while a connection is open.
    pub fn is_connected(&self) -> bool {
        self.state.lock().conn.is_some()
    }

    fn db_path(dir: &Path, name: &str) -> PathBuf {
        let file: String = name
            .chars()
            .map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '_' { c } else { '_' })
            .collect();
        dir.join(format!("{file}.sqlite"))
    }

    /// Run `f` against the connection on the blocking pool.
    async fn with_conn<T, F>(&self, f: F) -> StoreResult<T>
    where
        T: Send + 'static,
        F: FnOnce(&mut Connection) -> rusqlite::Result<T> + Send + 'static,
    {
        let state = Arc::clone(&self.state);
        tokio::task::spawn_blocking(move || {
            let mut state = state.lock();
            let conn = state.connect()?;
            Ok(f(conn)?)
        })
        .await?
    }
}

#[async_trait]
impl KvStore for SqliteStore {
    async fn init(&self, name: &str) -> StoreResult<()> {
        if let Location::Dir(dir) = &self.location {
            std::fs::create_dir_all(dir)?;
            let path = Self::db_path(dir, name);
            let mut state = self.state.lock();
            if state.path.as_ref() != Some(&path) {
                state.conn = None;
                state.path = Some(path);
            }
        }
        // Create the schema now so a bad path fails at init, not first use.
        self.with_conn(|_| Ok(())).await
    }

    async fn deactivate(&self) -> StoreResult<()> {
        if let Some(conn) = self.state.lock().conn.take() {
            debug!("closing sqlite connection on deactivate");
            drop(conn);
        }
        Ok(())
    }

    async fn save_superblock(&self, superblock: &[u8]) -> StoreResult<()> {
        let superblock = superblock.to_vec();
        self.with_conn(move |conn| {
            conn.execute(
                "INSERT OR REPLACE INTO meta (key, value) VALUES (?1, ?2)",
                params![SUPERBLOCK_KEY, superblock],
            )
            .map(|_| ())
        })
        .await
    }

    async fn load_superblock(&self) -> StoreResult<Option<Vec<u8>>> {
        self.with_conn(|conn| {
            conn.query_row(
                "SELECT value FROM meta WHERE key = ?1",
                params![SUPERBLOCK_KEY],
                |row| row.get(0),
            )
            .optional()
        })
        .await
    }

    async fn read_file(&self, id: FileId) -> StoreResult<Vec<u8>> {
        let data: Option<Vec<u8>> = self
            .with_conn(move |conn| {
                conn.query_row(
                    "SELECT data FROM files WHERE id = ?1",
                    params![id as i64],
                    |row| row.get(0),
                )
                .optional()
            })
            .await?;
        data.ok_or(StoreError::NotFound(id))
    }

    async fn read_files(&self, ids: &[FileId]) -> StoreResult<Vec<Option<Vec<u8>>>> {
        let ids = ids.to_vec();
        self.with_conn(move |conn| {
            let mut stmt = conn.prepare_cached("SELECT data FROM files WHERE id = ?1")?;
            let mut out = Vec::with_capacity(ids.len());
            for id in ids {
                let data: Option<Vec<u8>> = stmt
                    .query_row(params![id as i64], |row| row.get(0))
                    .optional()?;
                out.push(data);
            }
            Ok(out)
        })
        .await
    }

    async fn write_file(&self, id: FileId, data: &[u8]) -> StoreResult<()> {
        let data = data.to_vec();
        self.with_conn(move |conn| {
            conn.execute(
                "INSERT OR REPLACE INTO files (id, data) VALUES (?1, ?2)",
                params![id as i64, data],
            )
            .map(|_| ())
        })
        .await
    }

    async fn write_files(&self, entries: &[(FileId, Vec<u8>)]) -> StoreResult<()> {
        let entries = entries.to_vec();
        self.with_conn(move |conn| {
            let tx = conn.transaction()?;
            {
                let mut stmt =
                    tx.prepare_cached("INSERT OR REPLACE INTO files (id, data) VALUES (?1, ?2)")?;
                for (id, data) in &entries {
                    stmt.execute(params![*id as i64, data])?;
                }
            }
            tx.commit()
        })
        .await
    }

    async fn unlink(&self, id: FileId) -> StoreResult<()> {
        self.with_conn(move |conn| {
            conn.execute("DELETE FROM files WHERE id = ?1", params![id as i64])
                .map(|_| ())
        })
        .await
    }

    async fn unlink_many(&self, ids: &[FileId]) -> StoreResult<()> {
        let ids = ids.to_vec();
        self.with_conn(move |conn| {
            let tx = conn.transaction()?;
            {
                let mut stmt = tx.prepare_cached("DELETE FROM files WHERE id = ?1")?;
                for id in &ids {
                    stmt.execute(params![*id as i64])?;
                }
            }
            tx.commit()
        })
        .await
    }

    async fn wipe(&self) -> StoreResult<()> {
        self.with_conn(|conn| conn.execute_batch("DELETE FROM files; DELETE FROM meta;"))
            .await
    }

    async fn close(&self) -> StoreResult<()> {
        let mut state = self.state.lock();
        state.conn = None;
        state.closed = true;
        Ok(())
    }
}
