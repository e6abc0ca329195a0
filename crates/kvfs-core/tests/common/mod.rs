//! Shared fixtures: a scriptable backend and a logger that remembers.

#![allow(dead_code)]

use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::{BTreeSet, HashMap};
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use tokio::sync::Semaphore;

use kvfs_core::{
    Backend, FileData, FileType, FsConfig, FsError, FsLogger, FsResult, InitOptions, OpOptions,
    Stat,
};

/// Ordered record of backend events across several backends.
pub type Events = Arc<Mutex<Vec<String>>>;

pub fn events() -> Events {
    Arc::new(Mutex::new(Vec::new()))
}

pub fn position(events: &Events, event: &str) -> usize {
    events
        .lock()
        .iter()
        .position(|e| e == event)
        .unwrap_or_else(|| panic!("event {event} never happened: {:?}", events.lock()))
}

/// Tracks how many callers are inside a section at once.
#[derive(Debug, Default)]
pub struct Section {
    inside: AtomicUsize,
    max: AtomicUsize,
    entries: AtomicUsize,
}

impl Section {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    fn enter(&self) {
        let now = self.inside.fetch_add(1, Ordering::SeqCst) + 1;
        self.max.fetch_max(now, Ordering::SeqCst);
        self.entries.fetch_add(1, Ordering::SeqCst);
    }

    fn exit(&self) {
        self.inside.fetch_sub(1, Ordering::SeqCst);
    }

    pub fn max(&self) -> usize {
        self.max.load(Ordering::SeqCst)
    }

    pub fn entries(&self) -> usize {
        self.entries.load(Ordering::SeqCst)
    }
}

/// Path-level backend with counters and knobs for the lifecycle tests.
#[derive(Debug, Default)]
pub struct MockBackend {
    label: &'static str,
    files: Mutex<HashMap<String, Vec<u8>>>,
    dirs: Mutex<BTreeSet<String>>,
    events: Option<Events>,
    section: Option<Arc<Section>>,
    read_gate: Option<Semaphore>,
    init_delay: Duration,
    fail_init: bool,
    fail_deactivate: bool,
    pub inits: AtomicUsize,
    pub activations: AtomicUsize,
    pub deactivations: AtomicUsize,
    pub destroys: AtomicUsize,
    pub checkpoints: AtomicUsize,
}

impl MockBackend {
    pub fn new(label: &'static str) -> Self {
        Self {
            label,
            ..Self::default()
        }
    }

    pub fn with_events(mut self, events: &Events) -> Self {
        self.events = Some(Arc::clone(events));
        self
    }

    pub fn with_section(mut self, section: &Arc<Section>) -> Self {
        self.section = Some(Arc::clone(section));
        self
    }

    pub fn with_init_delay(mut self, delay: Duration) -> Self {
        self.init_delay = delay;
        self
    }

    /// Reads and unlinks block until [`open_gate`](Self::open_gate) is
    /// called.
    pub fn gated(mut self) -> Self {
        self.read_gate = Some(Semaphore::new(0));
        self
    }

    pub fn failing_init(mut self) -> Self {
        self.fail_init = true;
        self
    }

    pub fn failing_deactivate(mut self) -> Self {
        self.fail_deactivate = true;
        self
    }

    pub fn open_gate(&self, reads: usize) {
        if let Some(gate) = &self.read_gate {
            gate.add_permits(reads);
        }
    }

    pub fn count(counter: &AtomicUsize) -> usize {
        counter.load(Ordering::SeqCst)
    }

    fn record(&self, event: &str) {
        if let Some(events) = &self.events {
            events.lock().push(format!("{}:{event}", self.label));
        }
    }

    async fn pass_gate(&self) -> FsResult<()> {
        if let Some(gate) = &self.read_gate {
            let _permit = gate
                .acquire()
                .await
                .map_err(|e| FsError::other(e.to_string()))?;
        }
        Ok(())
    }

    fn file_stat(&self, path: &str) -> FsResult<Stat> {
        if path == "/" || self.dirs.lock().contains(path) {
            return Ok(Stat::new(FileType::Directory, 1, 0, 0o777));
        }
        match self.files.lock().get(path) {
            Some(data) => Ok(Stat::new(FileType::File, 2, data.len() as u64, 0o666)),
            None => Err(FsError::not_found(path)),
        }
    }
}

#[async_trait]
impl Backend for MockBackend {
    async fn init(&self, _name: &str, _options: &InitOptions) -> FsResult<()> {
        if let Some(section) = &self.section {
            section.enter();
        }
        self.record("init");
        if !self.init_delay.is_zero() {
            tokio::time::sleep(self.init_delay).await;
        }
        if let Some(section) = &self.section {
            section.exit();
        }
        self.inits.fetch_add(1, Ordering::SeqCst);
        if self.fail_init {
            return Err(FsError::other(format!("{} refuses to start", self.label)));
        }
        Ok(())
    }

    async fn activate(&self) -> FsResult<()> {
        self.activations.fetch_add(1, Ordering::SeqCst);
        self.record("activate");
        Ok(())
    }

    async fn deactivate(&self) -> FsResult<()> {
        self.deactivations.fetch_add(1, Ordering::SeqCst);
        self.record("deactivate");
        if self.fail_deactivate {
            return Err(FsError::other(format!("{} cannot flush", self.label)));
        }
        Ok(())
    }

    async fn destroy(&self) -> FsResult<()> {
        if let Some(section) = &self.section {
            section.enter();
            tokio::time::sleep(Duration::from_millis(2)).await;
            section.exit();
        }
        self.destroys.fetch_add(1, Ordering::SeqCst);
        self.record("destroy");
        Ok(())
    }

    fn request_checkpoint(&self) {
        self.checkpoints.fetch_add(1, Ordering::SeqCst);
    }

    async fn save_superblock(&self) -> FsResult<()> {
        Ok(())
    }

    async fn read_file(&self, path: &str, _opts: &OpOptions) -> FsResult<FileData> {
        self.pass_gate().await?;
        let data = self.files.lock().get(path).cloned();
        self.record(&format!("read {path}"));
        data.map(FileData::Bytes)
            .ok_or_else(|| FsError::not_found(path))
    }

    async fn read_files(
        &self,
        paths: &[String],
        _opts: &OpOptions,
    ) -> FsResult<Vec<Option<FileData>>> {
        let files = self.files.lock();
        Ok(paths
            .iter()
            .map(|p| files.get(p).cloned().map(FileData::Bytes))
            .collect())
    }

    async fn readdir(&self, _path: &str, _opts: &OpOptions) -> FsResult<Vec<String>> {
        Ok(self.files.lock().keys().cloned().collect())
    }

    async fn stat(&self, path: &str, _opts: &OpOptions) -> FsResult<Stat> {
        self.file_stat(path)
    }

    async fn lstat(&self, path: &str, _opts: &OpOptions) -> FsResult<Stat> {
        self.file_stat(path)
    }

    async fn readlink(&self, path: &str, _opts: &OpOptions) -> FsResult<String> {
        Err(FsError::NotASymlink(path.to_string()))
    }

    async fn du(&self, _path: &str) -> FsResult<u64> {
        Ok(self.files.lock().values().map(|d| d.len() as u64).sum())
    }

    async fn write_file(&self, path: &str, data: &FileData, _opts: &OpOptions) -> FsResult<()> {
        self.files
            .lock()
            .insert(path.to_string(), data.as_bytes().to_vec());
        Ok(())
    }

    async fn write_files(
        &self,
        entries: &[(String, FileData)],
        _opts: &OpOptions,
    ) -> FsResult<()> {
        let mut files = self.files.lock();
        for (path, data) in entries {
            files.insert(path.clone(), data.as_bytes().to_vec());
        }
        Ok(())
    }

    async fn unlink(&self, path: &str, _opts: &OpOptions) -> FsResult<()> {
        self.pass_gate().await?;
        self.files
            .lock()
            .remove(path)
            .map(|_| ())
            .ok_or_else(|| FsError::not_found(path))
    }

    async fn unlink_many(&self, paths: &[String], _opts: &OpOptions) -> FsResult<()> {
        let mut files = self.files.lock();
        for path in paths {
            files.remove(path);
        }
        Ok(())
    }

    async fn mkdir(&self, path: &str, _opts: &OpOptions) -> FsResult<()> {
        if !self.dirs.lock().insert(path.to_string()) {
            return Err(FsError::already_exists(path));
        }
        Ok(())
    }

    async fn rmdir(&self, path: &str, _opts: &OpOptions) -> FsResult<()> {
        if !self.dirs.lock().remove(path) {
            return Err(FsError::not_found(path));
        }
        Ok(())
    }

    async fn rename(&self, from: &str, to: &str) -> FsResult<()> {
        let mut files = self.files.lock();
        let data = files.remove(from).ok_or_else(|| FsError::not_found(from))?;
        files.insert(to.to_string(), data);
        Ok(())
    }

    async fn symlink(&self, _target: &str, path: &str) -> FsResult<()> {
        Err(FsError::invalid_argument(format!("no symlinks here: {path}")))
    }

    async fn back_file(&self, path: &str, _opts: &OpOptions) -> FsResult<()> {
        Err(FsError::not_found(path))
    }

    async fn flush(&self) -> FsResult<()> {
        Ok(())
    }
}

/// Logger that keeps every line.
#[derive(Default)]
pub struct RecordingLogger {
    debug: Mutex<Vec<String>>,
    alert: Mutex<Vec<String>>,
}

impl fmt::Debug for RecordingLogger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RecordingLogger")
            .field("alerts", &self.alert.lock().len())
            .finish()
    }
}

impl RecordingLogger {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn alerts(&self) -> Vec<String> {
        self.alert.lock().clone()
    }

    pub fn debugs(&self) -> Vec<String> {
        self.debug.lock().clone()
    }
}

impl FsLogger for RecordingLogger {
    fn debug(&self, args: fmt::Arguments<'_>) {
        self.debug.lock().push(args.to_string());
    }

    fn alert(&self, args: fmt::Arguments<'_>) {
        self.alert.lock().push(args.to_string());
    }
}

/// Short timeouts so lifecycle tests finish quickly.
pub fn quick_config() -> FsConfig {
    FsConfig {
        mutex_timeout: Duration::from_secs(5),
        mutex_log_interval: Duration::from_millis(50),
        idle_timeout: Duration::from_millis(50),
        drain_log_interval: Duration::from_millis(20),
        ..FsConfig::default()
    }
}

/// Poll `check` until it holds or a second passes.
pub async fn eventually(mut check: impl FnMut() -> bool) -> bool {
    for _ in 0..200 {
        if check() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    check()
}
