//! Lifecycle manager and dispatcher.
//!
//! State machine:
//!
//! ```text
//! Never --init--> Running --ok--> Ready --(ops)--> activate/deactivate ...
//!                    |
//!                    +--error--> Failed
//! ```
//!
//! `Running` can be re-entered from any state by another `init`. While an
//! init runs, new calls wait for it; calls already past the check drain
//! before the old backend is torn down.
//!
//! Orthogonally, the current backend is `Dormant` or `Active`. Both
//! transitions run under one async lock, so activation and deactivation of
//! a backend never overlap.

use parking_lot::{Mutex, RwLock};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::time::{Duration, Instant};
use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::backend::{Backend, DefaultBackend};
use crate::config::{FsConfig, InitOptions};
use crate::error::{FsError, FsResult};
use crate::logger::FsLogger;
use crate::mutex::DistributedMutex;
use crate::ops::{self, OpArgs, OpKind, OpOutput};
use crate::tracker::{ActivationTicket, OpRecord, OpTracker};
use crate::types::OpOptions;

/// Where initialization stands.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum InitState {
    /// No init was ever started, or the instance was closed.
    Never,
    Running,
    Ready,
    /// The last init failed; there is no usable backend.
    Failed(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Power {
    Dormant,
    Active,
}

#[derive(Debug, Default)]
struct IdleTimer {
    /// Bumped on every arm or cancel. A timer only acts if its epoch is
    /// still current when it fires.
    epoch: u64,
    pending: Option<JoinHandle<()>>,
}

pub(crate) struct FsInner {
    pub(crate) config: FsConfig,
    logger: RwLock<Arc<dyn FsLogger>>,
    name: RwLock<Option<String>>,
    /// Initialization lock, created on first use of a name.
    mutex: Mutex<Option<Arc<dyn DistributedMutex>>>,
    /// Serializes `init` and `close` calls on this instance.
    init_gate: tokio::sync::Mutex<()>,
    init_state: watch::Sender<InitState>,
    backend: RwLock<Option<Arc<dyn Backend>>>,
    tracker: OpTracker,
    power: tokio::sync::Mutex<Power>,
    /// Mirror of `power` readable without the async lock.
    active: AtomicBool,
    idle: Mutex<IdleTimer>,
    shutting_down: AtomicBool,
}

impl std::fmt::Debug for FsInner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FsInner")
            .field("name", &*self.name.read())
            .field("state", &*self.init_state.borrow())
            .field("active", &self.active.load(Ordering::SeqCst))
            .field("in_flight", &self.tracker.len())
            .finish_non_exhaustive()
    }
}

/// Releases the initialization lock when the init sequence ends, however
/// it ends.
struct HeldMutex {
    mutex: Arc<dyn DistributedMutex>,
    logger: Arc<dyn FsLogger>,
}

impl Drop for HeldMutex {
    fn drop(&mut self) {
        self.mutex.release(false);
        self.logger
            .debug(format_args!("released lock {}", self.mutex.name()));
    }
}

/// Publishes `Running` for the duration of an init. If the init future is
/// dropped before settling, waiting calls see `Failed` instead of hanging.
struct InitAttempt<'a> {
    state: &'a watch::Sender<InitState>,
    settled: bool,
}

impl<'a> InitAttempt<'a> {
    fn begin(state: &'a watch::Sender<InitState>) -> Self {
        state.send_replace(InitState::Running);
        Self {
            state,
            settled: false,
        }
    }

    fn settle(mut self, to: InitState) {
        self.settled = true;
        self.state.send_replace(to);
    }
}

impl Drop for InitAttempt<'_> {
    fn drop(&mut self) {
        if !self.settled {
            self.state
                .send_replace(InitState::Failed("initialization was interrupted".into()));
        }
    }
}

/// Cleanup for one dispatched call. Runs on completion, on error and when
/// the caller drops the call mid-flight.
struct OpGuard {
    inner: Arc<FsInner>,
    id: u64,
    backend: Arc<dyn Backend>,
    mutating: bool,
}

impl Drop for OpGuard {
    fn drop(&mut self) {
        let idle = self.inner.tracker.deregister(self.id);
        if self.mutating {
            self.backend.request_checkpoint();
        }
        if idle && !self.inner.shutting_down.load(Ordering::SeqCst) {
            self.inner.arm_idle_timer();
        }
    }
}

fn list(ops: &[OpRecord]) -> String {
    if ops.is_empty() {
        return "none".to_string();
    }
    ops.iter()
        .map(OpRecord::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

impl FsInner {
    pub(crate) fn new(config: FsConfig, logger: Arc<dyn FsLogger>) -> Self {
        let (init_state, _) = watch::channel(InitState::Never);
        Self {
            config,
            logger: RwLock::new(logger),
            name: RwLock::new(None),
            mutex: Mutex::new(None),
            init_gate: tokio::sync::Mutex::new(()),
            init_state,
            backend: RwLock::new(None),
            tracker: OpTracker::new(),
            power: tokio::sync::Mutex::new(Power::Dormant),
            active: AtomicBool::new(false),
            idle: Mutex::new(IdleTimer::default()),
            shutting_down: AtomicBool::new(false),
        }
    }

    pub(crate) fn logger(&self) -> Arc<dyn FsLogger> {
        Arc::clone(&self.logger.read())
    }

    pub(crate) fn name(&self) -> Option<String> {
        self.name.read().clone()
    }

    pub(crate) fn state(&self) -> InitState {
        self.init_state.borrow().clone()
    }

    pub(crate) fn is_active(&self) -> bool {
        self.active.load(Ordering::SeqCst)
    }

    pub(crate) fn in_flight(&self) -> Vec<OpRecord> {
        self.tracker.in_flight()
    }

    pub(crate) fn idle_timer_pending(&self) -> bool {
        self.idle.lock().pending.is_some()
    }

    fn mutex_for(&self, name: &str) -> Arc<dyn DistributedMutex> {
        let lock_name = format!("{name}-initialization");
        let mut slot = self.mutex.lock();
        if let Some(mutex) = slot.as_ref().filter(|m| m.name() == lock_name) {
            return Arc::clone(mutex);
        }
        let mutex = self.config.mutex.build(
            &lock_name,
            self.config.mutex_log_interval,
            self.config.mutex_poll_interval,
        );
        *slot = Some(Arc::clone(&mutex));
        mutex
    }

    async fn lock_for(&self, name: &str, context: &str) -> FsResult<HeldMutex> {
        let mutex = self.mutex_for(name);
        let logger = self.logger();
        let on_tick = |waited: Duration| {
            logger.debug(format_args!(
                "{context}: still waiting for lock {} after {waited:?}",
                mutex.name()
            ));
        };
        mutex
            .wait_reporting(self.config.mutex_timeout, &on_tick)
            .await?;
        logger.debug(format_args!("holding lock {} for {context}", mutex.name()));
        Ok(HeldMutex { mutex, logger })
    }

    // ========================================================================
    // Initialization
    // ========================================================================

    /// Run one initialization sequence. Concurrent calls on this instance
    /// run one after the other; calls on other instances sharing `name`
    /// are excluded by the initialization lock.
    pub(crate) async fn initialize(
        self: &Arc<Self>,
        name: &str,
        options: InitOptions,
    ) -> FsResult<()> {
        if let Some(logger) = &options.logger {
            *self.logger.write() = Arc::clone(logger);
        }
        let _gate = self.init_gate.lock().await;
        let started = Instant::now();
        let previous = self.state();
        let attempt = InitAttempt::begin(&self.init_state);

        let held = match self.lock_for(name, "init").await {
            Ok(held) => held,
            Err(e) => {
                // Nothing was torn down; the old backend stays usable.
                attempt.settle(previous);
                self.logger()
                    .alert(format_args!("init of {name} could not take its lock: {e}"));
                return Err(e);
            }
        };

        match self.swap(name, &options).await {
            Ok(()) => attempt.settle(InitState::Ready),
            Err(e) => {
                attempt.settle(InitState::Failed(e.to_string()));
                self.logger()
                    .alert(format_args!("init of {name} failed: {e}"));
                return Err(e);
            }
        }

        if !options.defer {
            // Activate now so startup failures surface here rather than on
            // first use.
            self.dispatch(
                OpKind::Stat,
                OpArgs::Path {
                    path: crate::path::ROOT.into(),
                    opts: OpOptions::default(),
                },
            )
            .await?;
        }
        drop(held);
        self.logger().debug(format_args!(
            "init of {name} finished in {:?}",
            started.elapsed()
        ));
        Ok(())
    }

    /// Drain, tear down the current backend and install a new one. Runs
    /// with the initialization lock held.
    async fn swap(&self, name: &str, options: &InitOptions) -> FsResult<()> {
        self.graceful_shutdown().await;
        self.teardown().await?;

        let backend: Arc<dyn Backend> = match &options.backend {
            Some(backend) => Arc::clone(backend),
            None => Arc::new(DefaultBackend::new(self.config.store.build())),
        };
        self.logger()
            .debug(format_args!("initializing new backend for {name}"));
        backend.init(name, options).await?;
        *self.backend.write() = Some(backend);
        *self.name.write() = Some(name.to_string());
        Ok(())
    }

    /// Deactivate and destroy the current backend, if any. Callers drain
    /// first.
    async fn teardown(&self) -> FsResult<()> {
        self.cancel_idle();
        let mut power = self.power.lock().await;
        let old = self.backend.write().take();
        let Some(old) = old else {
            return Ok(());
        };
        let logger = self.logger();
        let mut deactivated = Ok(());
        if *power == Power::Active {
            logger.debug(format_args!("deactivating previous backend"));
            *power = Power::Dormant;
            self.active.store(false, Ordering::SeqCst);
            deactivated = old.deactivate().await;
            if let Err(e) = &deactivated {
                logger.alert(format_args!("deactivating previous backend failed: {e}"));
            }
        }
        drop(power);
        // The backend is already detached, so it is destroyed either way.
        logger.debug(format_args!("destroying previous backend"));
        let destroyed = old.destroy().await;
        deactivated.and(destroyed)
    }

    /// Wait until no call is in flight.
    async fn graceful_shutdown(&self) {
        if self.tracker.is_idle() {
            return;
        }
        self.shutting_down.store(true, Ordering::SeqCst);
        let logger = self.logger();
        logger.debug(format_args!(
            "waiting for {} operations before shutdown",
            self.tracker.len()
        ));
        self.tracker
            .wait_drained(self.config.drain_log_interval, |ops| {
                logger.debug(format_args!("waiting for graceful shutdown: {}", list(ops)));
            })
            .await;
        self.shutting_down.store(false, Ordering::SeqCst);
    }

    /// Drain and destroy the current backend, leaving the instance
    /// uninitialized.
    pub(crate) async fn close(&self) -> FsResult<()> {
        let _gate = self.init_gate.lock().await;
        let Some(name) = self.name() else {
            return Ok(());
        };
        let _held = self.lock_for(&name, "close").await?;
        let attempt = InitAttempt::begin(&self.init_state);
        self.graceful_shutdown().await;
        let result = self.teardown().await;
        *self.name.write() = None;
        attempt.settle(InitState::Never);
        self.logger().debug(format_args!("closed {name}"));
        result
    }

    // ========================================================================
    // Activation
    // ========================================================================

    /// Wait for initialization to settle.
    async fn await_init(&self, kind: OpKind) -> FsResult<()> {
        let mut rx = self.init_state.subscribe();
        loop {
            let state = rx.borrow_and_update().clone();
            match state {
                InitState::Ready => return Ok(()),
                InitState::Failed(reason) => return Err(FsError::InitFailed(reason)),
                InitState::Never => {
                    self.logger().alert(format_args!(
                        "{kind} called before the filesystem was initialized"
                    ));
                    return Err(FsError::NotInitialized);
                }
                InitState::Running => {
                    if rx.changed().await.is_err() {
                        return Err(FsError::NotInitialized);
                    }
                }
            }
        }
    }

    /// Get the call past initialization and activation. The ticket keeps it
    /// in the in-flight count until it registers.
    async fn ensure_active(
        &self,
        kind: OpKind,
    ) -> FsResult<(ActivationTicket<'_>, Arc<dyn Backend>)> {
        loop {
            self.await_init(kind).await?;
            let ticket = self.tracker.ticket();
            // An init that started after the wait above will drain before
            // swapping, but only calls it can see; back off and wait for it.
            if self.state() != InitState::Ready {
                drop(ticket);
                continue;
            }
            let backend = self.backend.read().clone();
            let Some(backend) = backend else {
                return Err(FsError::NotInitialized);
            };
            self.activate(&backend).await?;
            return Ok((ticket, backend));
        }
    }

    async fn activate(&self, backend: &Arc<dyn Backend>) -> FsResult<()> {
        self.cancel_idle();
        let mut power = self.power.lock().await;
        if *power == Power::Active {
            return Ok(());
        }
        backend.activate().await?;
        *power = Power::Active;
        self.active.store(true, Ordering::SeqCst);
        self.logger().debug(format_args!("backend activated"));
        Ok(())
    }

    /// Deactivate if nothing arrived since the idle timer was armed.
    async fn deactivate_if_idle(&self) {
        let mut power = self.power.lock().await;
        if *power != Power::Active || !self.tracker.is_idle() {
            return;
        }
        let backend = self.backend.read().clone();
        let Some(backend) = backend else {
            return;
        };
        // Dormant even on failure; the next call activates again.
        *power = Power::Dormant;
        self.active.store(false, Ordering::SeqCst);
        match backend.deactivate().await {
            Ok(()) => self.logger().debug(format_args!("backend deactivated after idle")),
            Err(e) => self
                .logger()
                .alert(format_args!("idle deactivation failed: {e}")),
        }
    }

    /// (Re)arm the idle timer, replacing any pending one.
    fn arm_idle_timer(self: &Arc<Self>) {
        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            return;
        };
        let mut idle = self.idle.lock();
        idle.epoch += 1;
        let epoch = idle.epoch;
        if let Some(previous) = idle.pending.take() {
            previous.abort();
        }
        let weak: Weak<FsInner> = Arc::downgrade(self);
        let after = self.config.idle_timeout;
        idle.pending = Some(runtime.spawn(async move {
            tokio::time::sleep(after).await;
            let Some(inner) = weak.upgrade() else {
                return;
            };
            // Claim the timer so a later cancel cannot abort a deactivation
            // halfway through.
            {
                let mut idle = inner.idle.lock();
                if idle.epoch != epoch {
                    return;
                }
                idle.pending = None;
            }
            inner.deactivate_if_idle().await;
        }));
    }

    fn cancel_idle(&self) {
        let mut idle = self.idle.lock();
        idle.epoch += 1;
        if let Some(pending) = idle.pending.take() {
            pending.abort();
        }
    }

    // ========================================================================
    // Dispatch
    // ========================================================================

    /// Run one public operation.
    pub(crate) async fn dispatch(
        self: &Arc<Self>,
        kind: OpKind,
        args: OpArgs,
    ) -> FsResult<OpOutput> {
        let descriptor = kind.descriptor();
        let args = Arc::new(descriptor.normalizer.apply(args)?);

        let body = async {
            let (ticket, backend) = self.ensure_active(kind).await?;
            let id = self.tracker.register(ticket, kind, Arc::clone(&args));
            let _guard = OpGuard {
                inner: Arc::clone(self),
                id,
                backend: Arc::clone(&backend),
                mutating: descriptor.mutating,
            };
            ops::invoke(backend.as_ref(), kind, &args).await
        };
        tokio::pin!(body);

        let stall = tokio::time::sleep(self.config.stall_timeout);
        tokio::pin!(stall);
        tokio::select! {
            out = &mut body => out,
            _ = &mut stall => {
                self.logger().alert(format_args!(
                    "{kind}({args}) has not finished after {:?}; in flight: {}",
                    self.config.stall_timeout,
                    list(&self.tracker.in_flight()),
                ));
                body.await
            }
        }
    }
}

impl Drop for FsInner {
    fn drop(&mut self) {
        if let Some(pending) = self.idle.get_mut().pending.take() {
            pending.abort();
        }
    }
}
