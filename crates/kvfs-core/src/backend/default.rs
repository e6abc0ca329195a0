//! Directory tree over a key-value store.

use async_trait::async_trait;
use parking_lot::{Mutex, RwLock};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use tokio::sync::{Notify, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use kvfs_store::{FileId, KvStore};

use super::Backend;
use super::source::BackingSource;
use super::tree::{FileSlot, Node, Tree};
use crate::config::InitOptions;
use crate::error::{FsError, FsResult};
use crate::types::{FileData, OpOptions, Stat};

const DEFAULT_FILE_PERM: u32 = 0o666;
const DEFAULT_DIR_PERM: u32 = 0o777;

/// State shared with the checkpoint task.
#[derive(Debug)]
struct Inner {
    store: Arc<dyn KvStore>,
    tree: RwLock<Tree>,
    /// The tree changed since the last superblock save.
    dirty: AtomicBool,
    /// Serializes superblock saves so an older snapshot never lands last.
    save_lock: tokio::sync::Mutex<()>,
    /// Checkpoint requests. A request made while the task is busy or not
    /// running is kept as a permit and coalesced with later ones.
    wake: Notify,
    saves: AtomicU64,
}

impl Inner {
    async fn save(&self) -> FsResult<()> {
        let _serial = self.save_lock.lock().await;
        self.dirty.store(false, Ordering::SeqCst);
        let bytes = self.tree.read().to_bytes()?;
        if let Err(e) = self.store.save_superblock(&bytes).await {
            self.dirty.store(true, Ordering::SeqCst);
            return Err(e.into());
        }
        let saves = self.saves.fetch_add(1, Ordering::Relaxed) + 1;
        debug!(bytes = bytes.len(), saves, "superblock saved");
        Ok(())
    }

    async fn save_if_dirty(&self) -> FsResult<()> {
        if self.dirty.load(Ordering::SeqCst) {
            self.save().await
        } else {
            Ok(())
        }
    }

    fn touched(&self) {
        self.dirty.store(true, Ordering::SeqCst);
    }
}

/// Running checkpoint task.
#[derive(Debug)]
struct Checkpointer {
    shutdown_tx: oneshot::Sender<()>,
    handle: JoinHandle<()>,
}

impl Checkpointer {
    fn spawn(inner: Arc<Inner>) -> Self {
        let (shutdown_tx, mut shutdown_rx) = oneshot::channel();
        let handle = tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = &mut shutdown_rx => break,
                    _ = inner.wake.notified() => {
                        if let Err(e) = inner.save_if_dirty().await {
                            warn!(error = %e, "checkpoint failed; will retry on next request");
                        }
                    }
                }
            }
        });
        Self {
            shutdown_tx,
            handle,
        }
    }

    async fn stop(self) {
        let _ = self.shutdown_tx.send(());
        if let Err(e) = self.handle.await {
            warn!(error = %e, "checkpoint task ended abnormally");
        }
    }
}

/// The default backend: a directory tree persisted as the superblock of a
/// [`KvStore`], with file content stored under inode numbers.
///
/// While active, a background task saves the superblock whenever a
/// checkpoint is requested and the tree has changed. Deactivation stops the
/// task and saves whatever is still pending.
#[derive(Debug)]
pub struct DefaultBackend {
    inner: Arc<Inner>,
    source: Option<Arc<dyn BackingSource>>,
    checkpointer: Mutex<Option<Checkpointer>>,
}

impl DefaultBackend {
    pub fn new(store: Arc<dyn KvStore>) -> Self {
        Self {
            inner: Arc::new(Inner {
                store,
                tree: RwLock::new(Tree::default()),
                dirty: AtomicBool::new(false),
                save_lock: tokio::sync::Mutex::new(()),
                wake: Notify::new(),
                saves: AtomicU64::new(0),
            }),
            source: None,
            checkpointer: Mutex::new(None),
        }
    }

    /// Supply content for `back_file`.
    pub fn with_source(mut self, source: Arc<dyn BackingSource>) -> Self {
        self.source = Some(source);
        self
    }

    /// The underlying store.
    pub fn store(&self) -> &Arc<dyn KvStore> {
        &self.inner.store
    }

    /// Number of superblocks written so far.
    pub fn saves(&self) -> u64 {
        self.inner.saves.load(Ordering::Relaxed)
    }

    /// Whether tree changes are waiting for a checkpoint.
    pub fn is_dirty(&self) -> bool {
        self.inner.dirty.load(Ordering::SeqCst)
    }

    fn source(&self) -> FsResult<&Arc<dyn BackingSource>> {
        self.source
            .as_ref()
            .ok_or_else(|| FsError::other("no backing source configured"))
    }

    /// Content of a regular file, fetching backed content on first read.
    async fn load(&self, path: &str) -> FsResult<Vec<u8>> {
        let file = self.inner.tree.read().file(path)?;
        let Some(key) = file.backing else {
            return Ok(self.inner.store.read_file(file.ino).await?);
        };

        let bytes = self.source()?.fetch(&key).await?;
        self.inner.store.write_file(file.ino, &bytes).await?;
        self.inner
            .tree
            .write()
            .clear_backing(&file.path, bytes.len() as u64)?;
        self.inner.touched();
        debug!(path, key = %key, bytes = bytes.len(), "fetched backed file");
        Ok(bytes)
    }

    /// Link content already stored under `slot` into the tree at `path`.
    /// If the tree refuses, content under a fresh slot is unreachable and
    /// is removed again.
    async fn commit(
        &self,
        path: &str,
        slot: FileSlot,
        size: u64,
        perm: u32,
        backing: Option<String>,
    ) -> FsResult<()> {
        let committed = self
            .inner
            .tree
            .write()
            .commit_file(path, slot.ino, size, perm, backing);
        match committed {
            Ok(replaced) => {
                self.inner.touched();
                if let Some(ino) = replaced {
                    self.inner.store.unlink(ino).await?;
                }
                Ok(())
            }
            Err(e) => {
                if slot.fresh {
                    if let Err(cleanup) = self.inner.store.unlink(slot.ino).await {
                        warn!(
                            path,
                            ino = slot.ino,
                            error = %cleanup,
                            "orphaned content left in store"
                        );
                    }
                }
                Err(e)
            }
        }
    }

    /// Delete the content of every file in `nodes`.
    async fn drop_content(&self, nodes: &[Node]) -> FsResult<()> {
        let mut inos: Vec<FileId> = Vec::new();
        for node in nodes {
            node.file_inos(&mut inos);
        }
        match inos.as_slice() {
            [] => Ok(()),
            [ino] => Ok(self.inner.store.unlink(*ino).await?),
            many => Ok(self.inner.store.unlink_many(many).await?),
        }
    }
}

#[async_trait]
impl Backend for DefaultBackend {
    async fn init(&self, name: &str, options: &InitOptions) -> FsResult<()> {
        let store = &self.inner.store;
        store.init(name).await?;
        if options.wipe {
            store.wipe().await?;
            debug!(name, "store wiped");
        }

        let tree = match store.load_superblock().await? {
            Some(bytes) => Tree::from_bytes(&bytes)?,
            None => {
                self.inner.touched();
                Tree::default()
            }
        };
        *self.inner.tree.write() = tree;
        debug!(name, "default backend initialized");
        Ok(())
    }

    async fn activate(&self) -> FsResult<()> {
        self.inner.store.activate().await?;
        let mut slot = self.checkpointer.lock();
        if slot.is_none() {
            *slot = Some(Checkpointer::spawn(Arc::clone(&self.inner)));
        }
        Ok(())
    }

    async fn deactivate(&self) -> FsResult<()> {
        let running = self.checkpointer.lock().take();
        if let Some(task) = running {
            task.stop().await;
        }
        self.inner.save_if_dirty().await?;
        self.inner.store.deactivate().await?;
        Ok(())
    }

    async fn destroy(&self) -> FsResult<()> {
        let running = self.checkpointer.lock().take();
        if let Some(task) = running {
            task.stop().await;
        }
        self.inner.save_if_dirty().await?;
        self.inner.store.destroy().await?;
        self.inner.store.close().await?;
        Ok(())
    }

    fn request_checkpoint(&self) {
        self.inner.wake.notify_one();
    }

    async fn save_superblock(&self) -> FsResult<()> {
        self.inner.save().await
    }

    async fn read_file(&self, path: &str, opts: &OpOptions) -> FsResult<FileData> {
        let bytes = self.load(path).await?;
        Ok(FileData::decode(bytes, opts.encoding.as_ref())?)
    }

    async fn read_files(
        &self,
        paths: &[String],
        opts: &OpOptions,
    ) -> FsResult<Vec<Option<FileData>>> {
        let files: Vec<_> = {
            let tree = self.inner.tree.read();
            paths.iter().map(|p| tree.file(p).ok()).collect()
        };

        // Stored content in one batch; backed files one at a time.
        let ids: Vec<FileId> = files
            .iter()
            .flatten()
            .filter(|f| f.backing.is_none())
            .map(|f| f.ino)
            .collect();
        let mut stored = self.inner.store.read_files(&ids).await?.into_iter();

        let mut out = Vec::with_capacity(paths.len());
        for (path, file) in paths.iter().zip(files) {
            let bytes = match file {
                None => None,
                Some(f) if f.backing.is_none() => stored.next().flatten(),
                Some(_) => match self.load(path).await {
                    Ok(bytes) => Some(bytes),
                    Err(e) => {
                        warn!(path = %path, error = %e, "backed file unreadable");
                        None
                    }
                },
            };
            let data = match bytes.map(|b| FileData::decode(b, opts.encoding.as_ref())) {
                Some(Ok(data)) => Some(data),
                Some(Err(e)) => {
                    warn!(path = %path, error = %e, "file content does not decode");
                    None
                }
                None => None,
            };
            out.push(data);
        }
        Ok(out)
    }

    async fn readdir(&self, path: &str, _opts: &OpOptions) -> FsResult<Vec<String>> {
        self.inner.tree.read().readdir(path)
    }

    async fn stat(&self, path: &str, _opts: &OpOptions) -> FsResult<Stat> {
        self.inner.tree.read().stat(path, true)
    }

    async fn lstat(&self, path: &str, _opts: &OpOptions) -> FsResult<Stat> {
        self.inner.tree.read().stat(path, false)
    }

    async fn readlink(&self, path: &str, _opts: &OpOptions) -> FsResult<String> {
        self.inner.tree.read().readlink(path)
    }

    async fn du(&self, path: &str) -> FsResult<u64> {
        self.inner.tree.read().du(path)
    }

    async fn write_file(&self, path: &str, data: &FileData, opts: &OpOptions) -> FsResult<()> {
        let perm = opts.mode.unwrap_or(DEFAULT_FILE_PERM);
        let slot = self.inner.tree.write().file_slot(path)?;
        self.inner.store.write_file(slot.ino, data.as_bytes()).await?;
        self.commit(path, slot, data.len() as u64, perm, None).await
    }

    async fn write_files(
        &self,
        entries: &[(String, FileData)],
        opts: &OpOptions,
    ) -> FsResult<()> {
        let perm = opts.mode.unwrap_or(DEFAULT_FILE_PERM);
        let mut slots = Vec::with_capacity(entries.len());
        let mut failed = None;
        {
            let mut tree = self.inner.tree.write();
            for (path, data) in entries {
                match tree.file_slot(path) {
                    Ok(slot) => slots.push((path, data, slot)),
                    Err(e) => {
                        failed = Some(e);
                        break;
                    }
                }
            }
        }
        if slots.is_empty() {
            return failed.map_or(Ok(()), Err);
        }

        let records: Vec<(FileId, Vec<u8>)> = slots
            .iter()
            .map(|(_, data, slot)| (slot.ino, data.as_bytes().to_vec()))
            .collect();
        self.inner.store.write_files(&records).await?;
        for (path, data, slot) in slots {
            match self.commit(path, slot, data.len() as u64, perm, None).await {
                Ok(()) => {}
                Err(e) if failed.is_none() => failed = Some(e),
                Err(_) => {}
            }
        }
        failed.map_or(Ok(()), Err)
    }

    async fn unlink(&self, path: &str, _opts: &OpOptions) -> FsResult<()> {
        let node = self.inner.tree.write().unlink(path)?;
        self.inner.touched();
        self.drop_content(&[node]).await
    }

    async fn unlink_many(&self, paths: &[String], _opts: &OpOptions) -> FsResult<()> {
        let mut removed = Vec::with_capacity(paths.len());
        let mut failed = None;
        {
            let mut tree = self.inner.tree.write();
            for path in paths {
                match tree.unlink(path) {
                    Ok(node) => removed.push(node),
                    Err(e) if failed.is_none() => failed = Some(e),
                    Err(_) => {}
                }
            }
        }
        if !removed.is_empty() {
            self.inner.touched();
            self.drop_content(&removed).await?;
        }
        failed.map_or(Ok(()), Err)
    }

    async fn mkdir(&self, path: &str, opts: &OpOptions) -> FsResult<()> {
        let perm = opts.mode.unwrap_or(DEFAULT_DIR_PERM);
        self.inner.tree.write().mkdir(path, perm)?;
        self.inner.touched();
        Ok(())
    }

    async fn rmdir(&self, path: &str, _opts: &OpOptions) -> FsResult<()> {
        self.inner.tree.write().rmdir(path)?;
        self.inner.touched();
        Ok(())
    }

    async fn rename(&self, from: &str, to: &str) -> FsResult<()> {
        let replaced = self.inner.tree.write().rename(from, to)?;
        self.inner.touched();
        match replaced {
            Some(node) => self.drop_content(&[node]).await,
            None => Ok(()),
        }
    }

    async fn symlink(&self, target: &str, path: &str) -> FsResult<()> {
        self.inner.tree.write().symlink(target, path)?;
        self.inner.touched();
        Ok(())
    }

    async fn back_file(&self, path: &str, opts: &OpOptions) -> FsResult<()> {
        let size = self.source()?.size(path).await?;
        let perm = opts.mode.unwrap_or(DEFAULT_FILE_PERM);
        // A fresh inode has no stored content, so reads go to the source;
        // whatever the path held before is dropped on commit.
        let slot = self.inner.tree.write().reserve_slot();
        self.commit(path, slot, size, perm, Some(path.to_string())).await
    }

    async fn flush(&self) -> FsResult<()> {
        self.inner.save_if_dirty().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::DirectorySource;
    use kvfs_store::MemoryStore;
    use std::time::Duration;
    use tempfile::TempDir;

    async fn backend_on(store: &MemoryStore) -> DefaultBackend {
        let backend = DefaultBackend::new(Arc::new(store.clone()));
        backend.init("test", &InitOptions::default()).await.unwrap();
        backend
    }

    fn opts() -> OpOptions {
        OpOptions::default()
    }

    #[tokio::test]
    async fn test_write_read_text_and_bytes() {
        let store = MemoryStore::new();
        let backend = backend_on(&store).await;

        backend
            .write_file("/x", &FileData::from("hello"), &opts())
            .await
            .unwrap();
        let text = backend.read_file("/x", &"utf8".into()).await.unwrap();
        assert_eq!(text, FileData::Text("hello".into()));
        let bytes = backend.read_file("/x", &opts()).await.unwrap();
        assert_eq!(bytes, FileData::Bytes(b"hello".to_vec()));

        let stat = backend.stat("/x", &opts()).await.unwrap();
        assert_eq!(stat.size, 5);
        assert_eq!(stat.perm(), DEFAULT_FILE_PERM);
        assert_eq!(store.len(), 1);
    }

    #[tokio::test]
    async fn test_read_invalid_utf8_fails() {
        let store = MemoryStore::new();
        let backend = backend_on(&store).await;
        backend
            .write_file("/bin", &FileData::from(vec![0xff, 0xfe]), &opts())
            .await
            .unwrap();
        let err = backend.read_file("/bin", &"utf8".into()).await.unwrap_err();
        assert!(matches!(err, FsError::Encoding(_)));
    }

    #[tokio::test]
    async fn test_superblock_survives_new_backend() {
        let store = MemoryStore::new();
        let backend = backend_on(&store).await;
        backend.mkdir("/d", &opts()).await.unwrap();
        backend
            .write_file("/d/f", &FileData::from("kept"), &opts())
            .await
            .unwrap();
        assert!(backend.is_dirty());
        backend.flush().await.unwrap();
        assert!(!backend.is_dirty());
        assert!(store.has_superblock());

        let reopened = backend_on(&store).await;
        let data = reopened.read_file("/d/f", &"utf8".into()).await.unwrap();
        assert_eq!(data.as_text(), Some("kept"));
    }

    #[tokio::test]
    async fn test_wipe_on_init() {
        let store = MemoryStore::new();
        let backend = backend_on(&store).await;
        backend
            .write_file("/f", &FileData::from("x"), &opts())
            .await
            .unwrap();
        backend.flush().await.unwrap();

        let fresh = DefaultBackend::new(Arc::new(store.clone()));
        fresh
            .init("test", &InitOptions::default().wiped())
            .await
            .unwrap();
        assert!(fresh.stat("/f", &opts()).await.unwrap_err().is_not_found());
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn test_checkpoint_task_saves_on_request() {
        let store = MemoryStore::new();
        let backend = backend_on(&store).await;
        backend.activate().await.unwrap();

        backend.mkdir("/d", &opts()).await.unwrap();
        backend.request_checkpoint();
        backend.request_checkpoint();

        for _ in 0..100 {
            if !backend.is_dirty() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        assert!(!backend.is_dirty());
        assert!(store.has_superblock());
        backend.deactivate().await.unwrap();
    }

    #[tokio::test]
    async fn test_deactivate_saves_pending_changes() {
        let store = MemoryStore::new();
        let backend = backend_on(&store).await;
        backend.flush().await.unwrap();
        let before = backend.saves();

        backend.activate().await.unwrap();
        backend.mkdir("/late", &opts()).await.unwrap();
        backend.deactivate().await.unwrap();

        assert_eq!(backend.saves(), before + 1);
        let reopened = backend_on(&store).await;
        assert!(reopened.stat("/late", &opts()).await.unwrap().is_dir());
    }

    #[tokio::test]
    async fn test_checkpoint_skips_clean_tree() {
        let store = MemoryStore::new();
        let backend = backend_on(&store).await;
        backend.flush().await.unwrap();
        let saves = backend.saves();
        backend.flush().await.unwrap();
        assert_eq!(backend.saves(), saves);
    }

    #[tokio::test]
    async fn test_unlink_and_rename_drop_content() {
        let store = MemoryStore::new();
        let backend = backend_on(&store).await;
        for name in ["/a", "/b", "/c"] {
            backend
                .write_file(name, &FileData::from(name), &opts())
                .await
                .unwrap();
        }
        assert_eq!(store.len(), 3);

        backend.unlink("/a", &opts()).await.unwrap();
        assert_eq!(store.len(), 2);

        backend.rename("/b", "/c").await.unwrap();
        assert_eq!(store.len(), 1);
        let moved = backend.read_file("/c", &"utf8".into()).await.unwrap();
        assert_eq!(moved.as_text(), Some("/b"));
    }

    #[tokio::test]
    async fn test_unlink_many_reports_first_failure() {
        let store = MemoryStore::new();
        let backend = backend_on(&store).await;
        backend
            .write_file("/a", &FileData::from("1"), &opts())
            .await
            .unwrap();
        let err = backend
            .unlink_many(&["/missing".into(), "/a".into()], &opts())
            .await
            .unwrap_err();
        assert!(err.is_not_found());
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn test_write_and_read_many() {
        let store = MemoryStore::new();
        let backend = backend_on(&store).await;
        backend
            .write_files(
                &[
                    ("/one".into(), FileData::from("1")),
                    ("/two".into(), FileData::from("22")),
                ],
                &opts(),
            )
            .await
            .unwrap();

        let read = backend
            .read_files(
                &["/two".into(), "/nope".into(), "/one".into()],
                &"utf8".into(),
            )
            .await
            .unwrap();
        assert_eq!(
            read,
            vec![
                Some(FileData::Text("22".into())),
                None,
                Some(FileData::Text("1".into())),
            ]
        );
    }

    #[tokio::test]
    async fn test_failed_store_write_leaves_tree_unchanged() {
        let dir = TempDir::new().unwrap();
        let backend = DefaultBackend::new(Arc::new(kvfs_store::SqliteStore::in_dir(dir.path())));
        backend.init("test", &InitOptions::default()).await.unwrap();
        backend
            .write_file("/a", &FileData::from("1"), &opts())
            .await
            .unwrap();
        backend.store().close().await.unwrap();

        assert!(
            backend
                .write_file("/new", &FileData::from("x"), &opts())
                .await
                .is_err()
        );
        assert!(backend.stat("/new", &opts()).await.unwrap_err().is_not_found());

        assert!(
            backend
                .write_file("/a", &FileData::from("longer"), &opts())
                .await
                .is_err()
        );
        assert_eq!(backend.stat("/a", &opts()).await.unwrap().size, 1);

        assert!(
            backend
                .write_files(&[("/m".into(), FileData::from("m"))], &opts())
                .await
                .is_err()
        );
        assert!(backend.stat("/m", &opts()).await.unwrap_err().is_not_found());
        assert_eq!(backend.readdir("/", &opts()).await.unwrap(), vec!["a"]);
    }

    #[tokio::test]
    async fn test_overwrite_replaces_stored_content() {
        let store = MemoryStore::new();
        let backend = backend_on(&store).await;
        for content in ["first", "second"] {
            backend
                .write_file("/f", &FileData::from(content), &opts())
                .await
                .unwrap();
        }
        assert_eq!(store.len(), 1);
        let data = backend.read_file("/f", &"utf8".into()).await.unwrap();
        assert_eq!(data.as_text(), Some("second"));
    }

    #[tokio::test]
    async fn test_symlinks() {
        let store = MemoryStore::new();
        let backend = backend_on(&store).await;
        backend
            .write_file("/target", &FileData::from("t"), &opts())
            .await
            .unwrap();
        backend.symlink("/target", "/link").await.unwrap();

        assert_eq!(backend.readlink("/link", &opts()).await.unwrap(), "/target");
        assert!(backend.lstat("/link", &opts()).await.unwrap().is_symlink());
        assert!(backend.stat("/link", &opts()).await.unwrap().is_file());
        let data = backend.read_file("/link", &"utf8".into()).await.unwrap();
        assert_eq!(data.as_text(), Some("t"));
    }

    #[tokio::test]
    async fn test_back_file_fetches_lazily() {
        let host = TempDir::new().unwrap();
        std::fs::write(host.path().join("big.bin"), b"from the host").unwrap();

        let store = MemoryStore::new();
        let backend = DefaultBackend::new(Arc::new(store.clone()))
            .with_source(Arc::new(DirectorySource::new(host.path())));
        backend.init("test", &InitOptions::default()).await.unwrap();

        backend.back_file("/big.bin", &opts()).await.unwrap();
        assert_eq!(backend.stat("/big.bin", &opts()).await.unwrap().size, 13);
        assert!(store.is_empty());

        let data = backend.read_file("/big.bin", &opts()).await.unwrap();
        assert_eq!(data.as_bytes(), b"from the host");
        assert_eq!(store.len(), 1);

        // Later reads come from the store.
        std::fs::remove_file(host.path().join("big.bin")).unwrap();
        let again = backend.read_file("/big.bin", &opts()).await.unwrap();
        assert_eq!(again.as_bytes(), b"from the host");
    }

    #[tokio::test]
    async fn test_read_many_skips_unreadable_entries() {
        let host = TempDir::new().unwrap();
        std::fs::write(host.path().join("gone.txt"), b"soon deleted").unwrap();

        let store = MemoryStore::new();
        let backend = DefaultBackend::new(Arc::new(store.clone()))
            .with_source(Arc::new(DirectorySource::new(host.path())));
        backend.init("test", &InitOptions::default()).await.unwrap();
        backend.back_file("/gone.txt", &opts()).await.unwrap();
        std::fs::remove_file(host.path().join("gone.txt")).unwrap();
        backend
            .write_file("/bin", &FileData::from(vec![0xff, 0xfe]), &opts())
            .await
            .unwrap();
        backend
            .write_file("/ok", &FileData::from("fine"), &opts())
            .await
            .unwrap();

        let read = backend
            .read_files(
                &["/gone.txt".into(), "/bin".into(), "/ok".into()],
                &"utf8".into(),
            )
            .await
            .unwrap();
        assert_eq!(read, vec![None, None, Some(FileData::Text("fine".into()))]);
    }

    #[tokio::test]
    async fn test_back_file_without_source() {
        let store = MemoryStore::new();
        let backend = backend_on(&store).await;
        assert!(matches!(
            backend.back_file("/x", &opts()).await,
            Err(FsError::Other(_))
        ));
    }

    #[tokio::test]
    async fn test_du() {
        let store = MemoryStore::new();
        let backend = backend_on(&store).await;
        backend.mkdir("/d", &opts()).await.unwrap();
        backend
            .write_file("/d/a", &FileData::from("abc"), &opts())
            .await
            .unwrap();
        backend
            .write_file("/d/b", &FileData::from("de"), &opts())
            .await
            .unwrap();
        assert_eq!(backend.du("/d").await.unwrap(), 5);
    }
}
