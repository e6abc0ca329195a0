//! Cross-process lock files.
//!
//! The lock is an exclusive `flock` on `<dir>/<name>.lock`. The kernel drops
//! the lock when the holder's descriptor closes, so a crashed process never
//! leaves the name locked. A hung holder is a different story; see
//! [`DistributedMutex::release`] with `force`.

use async_trait::async_trait;
use parking_lot::Mutex;
use rustix::fs::{flock, FlockOperation};
use std::fs::{self, File, OpenOptions};
use std::io::{self, Write};
use std::os::unix::fs::MetadataExt;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, warn};

use super::DistributedMutex;

/// Lock file shared between processes.
#[derive(Debug)]
pub struct FileMutex {
    name: String,
    path: PathBuf,
    /// Open, locked descriptor while held.
    file: Mutex<Option<File>>,
    poll_interval: Duration,
    log_interval: Duration,
}

impl FileMutex {
    /// Create a handle for `name` with its lock file in `dir`.
    pub fn new(dir: impl AsRef<Path>, name: impl Into<String>) -> Self {
        let name = name.into();
        let file: String = name
            .chars()
            .map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '_' { c } else { '_' })
            .collect();
        Self {
            path: dir.as_ref().join(format!("{file}.lock")),
            name,
            file: Mutex::new(None),
            poll_interval: Duration::from_millis(50),
            log_interval: Duration::from_secs(5),
        }
    }

    /// Set how often a waiting handle retries.
    pub fn with_poll_interval(mut self, every: Duration) -> Self {
        self.poll_interval = every;
        self
    }

    /// Set how often a wait reports progress.
    pub fn with_log_interval(mut self, every: Duration) -> Self {
        self.log_interval = every;
        self
    }

    /// Path of the lock file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Whether `file` is still the inode at `self.path`. A steal unlinks the
    /// path, after which a lock on the old inode excludes nobody.
    fn still_linked(&self, file: &File) -> io::Result<bool> {
        match fs::metadata(&self.path) {
            Ok(on_disk) => {
                let ours = file.metadata()?;
                Ok(on_disk.ino() == ours.ino() && on_disk.dev() == ours.dev())
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e),
        }
    }
}

#[async_trait]
impl DistributedMutex for FileMutex {
    fn name(&self) -> &str {
        &self.name
    }

    fn claim(&self) -> io::Result<bool> {
        let mut slot = self.file.lock();
        if slot.is_some() {
            return Ok(false);
        }
        if let Some(dir) = self.path.parent() {
            fs::create_dir_all(dir)?;
        }

        let mut file = OpenOptions::new()
            .create(true)
            .read(true)
            .write(true)
            .truncate(false)
            .open(&self.path)?;
        match flock(&file, FlockOperation::NonBlockingLockExclusive) {
            Ok(()) => {}
            Err(e) if e == rustix::io::Errno::WOULDBLOCK => return Ok(false),
            Err(e) => return Err(e.into()),
        }
        if !self.still_linked(&file)? {
            // Raced with a steal: we locked an orphan.
            return Ok(false);
        }

        // Holder pid, for humans inspecting a stuck lock.
        file.set_len(0)?;
        writeln!(file, "{}", std::process::id())?;

        debug!(lock = %self.name, path = %self.path.display(), "acquired lock file");
        *slot = Some(file);
        Ok(true)
    }

    async fn contended(&self) {
        tokio::time::sleep(self.poll_interval).await;
    }

    fn release(&self, force: bool) {
        let mut slot = self.file.lock();
        if let Some(file) = slot.take() {
            if let Err(e) = flock(&file, FlockOperation::Unlock) {
                warn!(lock = %self.name, error = %e, "unlock failed; closing descriptor");
            }
            debug!(lock = %self.name, "released lock file");
        } else if force {
            warn!(lock = %self.name, path = %self.path.display(), "stealing lock file");
            match fs::remove_file(&self.path) {
                Ok(()) => {}
                Err(e) if e.kind() == io::ErrorKind::NotFound => {}
                Err(e) => warn!(lock = %self.name, error = %e, "could not remove lock file"),
            }
        }
    }

    fn has(&self) -> bool {
        self.file.lock().is_some()
    }

    fn log_interval(&self) -> Duration {
        self.log_interval
    }
}
