//! Named mutual exclusion across execution contexts.
//!
//! Two filesystem instances that open the same database name, in one
//! process or in several, must not run their initialization sequences
//! (drain, destroy old backend, build new one) at the same time. A
//! [`DistributedMutex`] is the lock they share.
//!
//! - [`LocalMutex`] - a process-wide table of named locks, for instances
//!   sharing one process
//! - [`FileMutex`] - an `flock` on `<dir>/<name>.lock`, for separate
//!   processes
//!
//! Waiting is implemented once, in [`DistributedMutex::wait`], on top of a
//! non-blocking `claim` and a `contended` future that resolves when the
//! lock may have become free.

#[cfg(unix)]
mod file;
mod local;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::io;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;
use tracing::warn;

#[cfg(unix)]
pub use file::FileMutex;
pub use local::LocalMutex;

/// Lock errors.
#[derive(Debug, Error)]
pub enum MutexError {
    /// The wait budget ran out while another holder kept the lock.
    #[error("timed out after {waited:?} waiting for lock {name}")]
    Timeout { name: String, waited: Duration },

    /// The lock could not be attempted at all.
    #[error("lock {name} unavailable: {source}")]
    Unavailable {
        name: String,
        #[source]
        source: io::Error,
    },
}

/// Mutex result type.
pub type MutexResult<T> = Result<T, MutexError>;

/// Outcome of a single `wait` call.
///
/// Starts `Pending` and moves exactly once, to `Acquired` or `TimedOut`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitPhase {
    Pending,
    Acquired,
    TimedOut,
}

/// Single-assignment cell for a [`WaitPhase`].
#[derive(Debug)]
pub(crate) struct WaitState(Mutex<WaitPhase>);

impl WaitState {
    pub(crate) fn new() -> Self {
        Self(Mutex::new(WaitPhase::Pending))
    }

    /// Move out of `Pending`. Returns false if the phase was already set.
    pub(crate) fn resolve(&self, to: WaitPhase) -> bool {
        let mut phase = self.0.lock();
        if *phase != WaitPhase::Pending {
            return false;
        }
        *phase = to;
        true
    }

    pub(crate) fn phase(&self) -> WaitPhase {
        *self.0.lock()
    }
}

/// A named lock shared by independent execution contexts.
///
/// Handles are not reentrant: a handle that holds the lock and claims it
/// again gets `false`.
#[async_trait]
pub trait DistributedMutex: Send + Sync + fmt::Debug {
    /// Lock name.
    fn name(&self) -> &str;

    /// One non-blocking attempt. `Ok(true)` means this handle now holds
    /// the lock.
    fn claim(&self) -> io::Result<bool>;

    /// Resolves when the lock may have been released. Spurious wake-ups are
    /// allowed; a release must never be missed.
    async fn contended(&self);

    /// Release the lock if this handle holds it.
    ///
    /// With `force`, a lock held by someone else is stolen and released.
    /// This is an escape hatch for a holder that crashed or hung, and it is
    /// unsafe: the victim's critical section keeps running without the
    /// lock. Releasing a lock that nobody holds is a no-op.
    fn release(&self, force: bool);

    /// Whether this handle believes it holds the lock. Diagnostics only;
    /// a steal by another handle is not reflected here.
    fn has(&self) -> bool;

    /// How often `wait` logs that it is still waiting.
    fn log_interval(&self) -> Duration {
        Duration::from_secs(5)
    }

    /// Try to take the lock without waiting. Never fails; errors count as
    /// "not acquired".
    fn try_acquire(&self) -> bool {
        match self.claim() {
            Ok(acquired) => acquired,
            Err(e) => {
                warn!(lock = self.name(), error = %e, "lock attempt failed");
                false
            }
        }
    }

    /// Wait up to `timeout` for the lock, logging progress through
    /// `tracing` with `context` as a label.
    async fn wait(&self, timeout: Duration, context: &str) -> MutexResult<()> {
        self.wait_reporting(timeout, &|waited| {
            warn!(
                lock = self.name(),
                context,
                waited_ms = waited.as_millis() as u64,
                "still waiting for lock"
            );
        })
        .await
    }

    /// Wait up to `timeout` for the lock, calling `on_tick` with the time
    /// waited so far every [`log_interval`](Self::log_interval).
    ///
    /// The attempt races a deadline. If the deadline wins, the pending
    /// attempt is dropped (deregistering it from whatever it was parked on)
    /// and the call fails with [`MutexError::Timeout`].
    async fn wait_reporting(
        &self,
        timeout: Duration,
        on_tick: &(dyn Fn(Duration) + Send + Sync),
    ) -> MutexResult<()> {
        let state = WaitState::new();
        let started = Instant::now();
        let deadline = tokio::time::sleep(timeout);
        tokio::pin!(deadline);
        let every = self.log_interval();
        let mut progress =
            tokio::time::interval_at(tokio::time::Instant::now() + every, every);

        loop {
            let claimed = self.claim().map_err(|source| MutexError::Unavailable {
                name: self.name().to_string(),
                source,
            })?;
            if claimed {
                if state.resolve(WaitPhase::Acquired) {
                    return Ok(());
                }
                // The deadline already settled this wait; do not keep a
                // lock nobody is going to release.
                self.release(false);
                break;
            }

            tokio::select! {
                _ = &mut deadline => {
                    state.resolve(WaitPhase::TimedOut);
                    break;
                }
                _ = self.contended() => {}
                _ = progress.tick() => on_tick(started.elapsed()),
            }
        }

        debug_assert_eq!(state.phase(), WaitPhase::TimedOut);
        Err(MutexError::Timeout {
            name: self.name().to_string(),
            waited: started.elapsed(),
        })
    }
}

/// Which [`DistributedMutex`] an instance uses for initialization.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum MutexKind {
    /// In-process named lock.
    #[default]
    Local,
    /// Cross-process lock file in `dir`.
    File { dir: PathBuf },
}

impl MutexKind {
    /// Build a handle for `name`.
    pub fn build(
        &self,
        name: &str,
        log_interval: Duration,
        poll_interval: Duration,
    ) -> Arc<dyn DistributedMutex> {
        match self {
            MutexKind::Local => Arc::new(LocalMutex::new(name).with_log_interval(log_interval)),
            #[cfg(unix)]
            MutexKind::File { dir } => Arc::new(
                FileMutex::new(dir, name)
                    .with_poll_interval(poll_interval)
                    .with_log_interval(log_interval),
            ),
            #[cfg(not(unix))]
            MutexKind::File { .. } => {
                let _ = poll_interval;
                warn!(lock = name, "lock files need unix; using an in-process lock");
                Arc::new(LocalMutex::new(name).with_log_interval(log_interval))
            }
        }
    }
}
