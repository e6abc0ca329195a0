//! In-process named locks.

use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::io;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, LazyLock, Weak};
use std::time::Duration;
use tokio::sync::Notify;
use tracing::{debug, warn};

use super::DistributedMutex;

/// Process-wide lock table. Entries disappear once no handle refers to them.
static SLOTS: LazyLock<Mutex<HashMap<String, Weak<Slot>>>> =
    LazyLock::new(|| Mutex::new(HashMap::new()));

static NEXT_HANDLE: AtomicU64 = AtomicU64::new(1);

#[derive(Debug, Default)]
struct Slot {
    /// Handle id of the current holder.
    holder: Mutex<Option<u64>>,
    /// Released-lock wake-ups. `notify_one` stores a permit when nobody is
    /// parked, so a release between a failed claim and parking is not lost.
    released: Notify,
}

impl Slot {
    fn for_name(name: &str) -> Arc<Slot> {
        let mut slots = SLOTS.lock();
        if let Some(slot) = slots.get(name).and_then(Weak::upgrade) {
            return slot;
        }
        slots.retain(|_, weak| weak.strong_count() > 0);
        let slot = Arc::new(Slot::default());
        slots.insert(name.to_string(), Arc::downgrade(&slot));
        slot
    }
}

/// Named lock shared by every handle with the same name in this process.
#[derive(Debug)]
pub struct LocalMutex {
    name: String,
    id: u64,
    slot: Arc<Slot>,
    held: AtomicBool,
    log_interval: Duration,
}

impl LocalMutex {
    /// Create a handle for `name`.
    pub fn new(name: impl Into<String>) -> Self {
        let name = name.into();
        Self {
            slot: Slot::for_name(&name),
            id: NEXT_HANDLE.fetch_add(1, Ordering::Relaxed),
            name,
            held: AtomicBool::new(false),
            log_interval: Duration::from_secs(5),
        }
    }

    /// Set how often a wait reports progress.
    pub fn with_log_interval(mut self, every: Duration) -> Self {
        self.log_interval = every;
        self
    }
}

#[async_trait]
impl DistributedMutex for LocalMutex {
    fn name(&self) -> &str {
        &self.name
    }

    fn claim(&self) -> io::Result<bool> {
        let mut holder = self.slot.holder.lock();
        if holder.is_some() {
            return Ok(false);
        }
        *holder = Some(self.id);
        self.held.store(true, Ordering::SeqCst);
        Ok(true)
    }

    async fn contended(&self) {
        self.slot.released.notified().await;
    }

    fn release(&self, force: bool) {
        let mut holder = self.slot.holder.lock();
        match *holder {
            Some(id) if id == self.id => {
                *holder = None;
                self.slot.released.notify_one();
                debug!(lock = %self.name, "released");
            }
            Some(id) if force => {
                warn!(lock = %self.name, victim = id, "stealing lock from another holder");
                *holder = None;
                self.slot.released.notify_one();
            }
            _ => {}
        }
        self.held.store(false, Ordering::SeqCst);
    }

    fn has(&self) -> bool {
        self.held.load(Ordering::SeqCst)
    }

    fn log_interval(&self) -> Duration {
        self.log_interval
    }
}

impl Drop for LocalMutex {
    fn drop(&mut self) {
        self.release(false);
    }
}
