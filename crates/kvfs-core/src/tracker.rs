//! In-flight operation bookkeeping.

use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Notify;

use crate::ops::{OpArgs, OpKind};

/// One call that is currently running.
#[derive(Debug, Clone)]
pub struct OpRecord {
    /// Distinguishes identical concurrent calls.
    pub id: u64,
    pub kind: OpKind,
    /// Normalized arguments.
    pub args: Arc<OpArgs>,
    pub started: Instant,
}

impl fmt::Display for OpRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "#{} {}({}) running {:?}",
            self.id,
            self.kind,
            self.args,
            self.started.elapsed()
        )
    }
}

#[derive(Debug, Default)]
struct State {
    next_id: u64,
    ops: BTreeMap<u64, OpRecord>,
    /// Calls past the initialization check that are still activating.
    activating: usize,
}

impl State {
    fn is_idle(&self) -> bool {
        self.ops.is_empty() && self.activating == 0
    }
}

/// The in-flight set.
///
/// A call counts as in flight from the moment it gets past the
/// initialization check, before it activates the backend, so a drain can
/// never miss a call that is about to run against the old backend.
#[derive(Debug, Default)]
pub(crate) struct OpTracker {
    state: Mutex<State>,
    drained: Notify,
}

/// A call that is activating the backend. Dropping it without registering
/// takes the call out of the in-flight count.
#[derive(Debug)]
pub(crate) struct ActivationTicket<'a> {
    tracker: &'a OpTracker,
    live: bool,
}

impl Drop for ActivationTicket<'_> {
    fn drop(&mut self) {
        if !self.live {
            return;
        }
        let idle = {
            let mut state = self.tracker.state.lock();
            state.activating -= 1;
            state.is_idle()
        };
        if idle {
            self.tracker.drained.notify_waiters();
        }
    }
}

impl OpTracker {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn ticket(&self) -> ActivationTicket<'_> {
        self.state.lock().activating += 1;
        ActivationTicket {
            tracker: self,
            live: true,
        }
    }

    /// Turn an activation ticket into a registered operation.
    pub(crate) fn register(
        &self,
        mut ticket: ActivationTicket<'_>,
        kind: OpKind,
        args: Arc<OpArgs>,
    ) -> u64 {
        let mut state = self.state.lock();
        ticket.live = false;
        state.activating -= 1;
        let id = state.next_id;
        state.next_id += 1;
        state.ops.insert(
            id,
            OpRecord {
                id,
                kind,
                args,
                started: Instant::now(),
            },
        );
        id
    }

    /// Remove a finished operation. Returns true if nothing is in flight
    /// any more.
    pub(crate) fn deregister(&self, id: u64) -> bool {
        let idle = {
            let mut state = self.state.lock();
            state.ops.remove(&id);
            state.is_idle()
        };
        if idle {
            self.drained.notify_waiters();
        }
        idle
    }

    pub(crate) fn is_idle(&self) -> bool {
        self.state.lock().is_idle()
    }

    /// Registered plus activating calls.
    pub(crate) fn len(&self) -> usize {
        let state = self.state.lock();
        state.ops.len() + state.activating
    }

    pub(crate) fn in_flight(&self) -> Vec<OpRecord> {
        self.state.lock().ops.values().cloned().collect()
    }

    /// Wait until nothing is in flight, calling `on_tick` with the
    /// remaining operations every `every`.
    pub(crate) async fn wait_drained(
        &self,
        every: Duration,
        mut on_tick: impl FnMut(&[OpRecord]) + Send,
    ) {
        let mut ticker = tokio::time::interval_at(tokio::time::Instant::now() + every, every);
        loop {
            let notified = self.drained.notified();
            tokio::pin!(notified);
            // Register before checking so a drain between the check and the
            // await is not missed.
            notified.as_mut().enable();
            if self.is_idle() {
                return;
            }
            tokio::select! {
                _ = &mut notified => {}
                _ = ticker.tick() => on_tick(&self.in_flight()),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::OpOptions;

    fn args(path: &str) -> Arc<OpArgs> {
        Arc::new(OpArgs::Path {
            path: path.into(),
            opts: OpOptions::default(),
        })
    }

    #[test]
    fn test_register_and_deregister() {
        let tracker = OpTracker::new();
        assert!(tracker.is_idle());

        let a = tracker.register(tracker.ticket(), OpKind::Stat, args("/a"));
        let b = tracker.register(tracker.ticket(), OpKind::Stat, args("/a"));
        assert_ne!(a, b);
        assert_eq!(tracker.len(), 2);
        assert_eq!(tracker.in_flight().len(), 2);

        assert!(!tracker.deregister(a));
        assert!(tracker.deregister(b));
        assert!(tracker.is_idle());
    }

    #[test]
    fn test_ticket_counts_until_dropped() {
        let tracker = OpTracker::new();
        let ticket = tracker.ticket();
        assert!(!tracker.is_idle());
        assert!(tracker.in_flight().is_empty());
        drop(ticket);
        assert!(tracker.is_idle());
    }

    #[test]
    fn test_record_display() {
        let tracker = OpTracker::new();
        tracker.register(tracker.ticket(), OpKind::ReadFile, args("/x"));
        let line = tracker.in_flight()[0].to_string();
        assert!(line.starts_with("#0 readFile(/x)"), "{line}");
    }

    #[tokio::test]
    async fn test_wait_drained_returns_immediately_when_idle() {
        let tracker = OpTracker::new();
        tracker
            .wait_drained(Duration::from_secs(1), |_| panic!("no ticks expected"))
            .await;
    }

    #[tokio::test]
    async fn test_wait_drained_waits_for_last_op() {
        let tracker = Arc::new(OpTracker::new());
        let id = tracker.register(tracker.ticket(), OpKind::ReadFile, args("/x"));

        let finisher = {
            let tracker = Arc::clone(&tracker);
            tokio::spawn(async move {
                tokio::time::sleep(Duration::from_millis(30)).await;
                tracker.deregister(id);
            })
        };

        let mut ticks = 0;
        tracker
            .wait_drained(Duration::from_millis(5), |ops| {
                assert!(ops.len() <= 1);
                ticks += 1;
            })
            .await;
        assert!(tracker.is_idle());
        assert!(ticks >= 1);
        finisher.await.unwrap();
    }
}
