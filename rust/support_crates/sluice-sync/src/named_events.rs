//! Level-triggered named events.
//!
//! A [`NamedEventSet`] maps event names to an "occurred" flag. Signalling an
//! event sets its flag permanently and releases every thread waiting for it;
//! a thread that starts waiting after the signal returns immediately.
//!
//! All events of a set share one condition variable, and every signal is a
//! broadcast. A thread waiting for event `A` is therefore also woken by a
//! signal for `B`, and must re-check its own flag before returning. This
//! keeps the set a single mutex and a single condition regardless of the
//! number of event names.

use std::{
    sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError},
    time::{Duration, Instant},
};

use ahash::AHashSet;

use crate::cancellation::{CancelReason, CancellationToken};

/// A shared set of level-triggered named events.
///
/// Cloning produces another handle to the same set.
#[derive(Clone, Default)]
pub struct NamedEventSet {
    inner: Arc<Inner>,
}

#[derive(Default)]
struct Inner {
    /// Names of the events that have occurred. Never shrinks.
    occurred: Mutex<AHashSet<String>>,
    /// Broadcast on every signal, for all event names.
    changed: Condvar,
}

impl NamedEventSet {
    pub fn new() -> NamedEventSet {
        NamedEventSet::default()
    }

    /// Marks `event` as occurred and wakes all waiters.
    ///
    /// Returns `true` if the event was not set before.
    pub fn signal(&self, event: &str) -> bool {
        let mut occurred = self.inner.lock();
        let newly_set = occurred.insert(event.to_string());
        drop(occurred);
        if newly_set {
            log::trace!("event '{event}' signalled");
        }
        self.inner.changed.notify_all();
        newly_set
    }

    /// Returns `true` if `event` has occurred.
    pub fn is_signaled(&self, event: &str) -> bool {
        self.inner.lock().contains(event)
    }

    /// Blocks until `event` has occurred.
    pub fn wait_for(&self, event: &str) {
        let mut occurred = self.inner.lock();
        while !occurred.contains(event) {
            occurred = self.inner.wait(occurred);
        }
    }

    /// Blocks until `event` has occurred or `timeout` elapses.
    ///
    /// Returns `true` if the event occurred.
    pub fn wait_for_timeout(&self, event: &str, timeout: Duration) -> bool {
        let Some(deadline) = Instant::now().checked_add(timeout) else {
            self.wait_for(event);
            return true;
        };
        let mut occurred = self.inner.lock();
        loop {
            if occurred.contains(event) {
                return true;
            }
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return false;
            }
            occurred = self
                .inner
                .changed
                .wait_timeout(occurred, remaining)
                .unwrap_or_else(PoisonError::into_inner)
                .0;
        }
    }

    /// Blocks until `event` has occurred or `token` is cancelled.
    ///
    /// An event that has already occurred wins over a cancelled token.
    pub fn wait_for_until(
        &self,
        event: &str,
        token: &CancellationToken,
    ) -> Result<(), CancelReason> {
        let inner = self.inner.clone();
        let _listener = token.on_cancel(move || {
            let _occurred = inner.lock();
            inner.changed.notify_all();
        });

        let mut occurred = self.inner.lock();
        loop {
            if occurred.contains(event) {
                return Ok(());
            }
            if let Some(reason) = token.reason() {
                return Err(reason);
            }
            occurred = self.inner.wait(occurred);
        }
    }

    /// Names of all events that have occurred, in no particular order.
    pub fn signaled(&self) -> Vec<String> {
        self.inner.lock().iter().cloned().collect()
    }
}

impl Inner {
    fn lock(&self) -> MutexGuard<'_, AHashSet<String>> {
        self.occurred.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn wait<'a>(
        &self,
        guard: MutexGuard<'a, AHashSet<String>>,
    ) -> MutexGuard<'a, AHashSet<String>> {
        self.changed
            .wait(guard)
            .unwrap_or_else(PoisonError::into_inner)
    }
}

impl std::fmt::Debug for NamedEventSet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NamedEventSet")
            .field("signaled", &self.signaled())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::{
        sync::atomic::{AtomicUsize, Ordering},
        thread,
    };

    #[test]
    fn test_signal_before_wait_returns_immediately() {
        let events = NamedEventSet::new();
        assert!(events.signal("ready"));
        assert!(!events.signal("ready"));

        let start = Instant::now();
        events.wait_for("ready");
        assert!(start.elapsed() < Duration::from_millis(100));
        assert!(events.is_signaled("ready"));
    }

    #[test]
    fn test_all_waiters_released_together() {
        let events = NamedEventSet::new();
        let released = AtomicUsize::new(0);

        thread::scope(|s| {
            for _ in 0..4 {
                s.spawn(|| {
                    events.wait_for("EventA");
                    released.fetch_add(1, Ordering::SeqCst);
                });
            }

            thread::sleep(Duration::from_millis(50));
            assert_eq!(released.load(Ordering::SeqCst), 0);
            events.signal("EventA");
        });

        assert_eq!(released.load(Ordering::SeqCst), 4);
    }

    #[test]
    fn test_signal_for_other_event_does_not_release() {
        let events = NamedEventSet::new();

        thread::scope(|s| {
            let waiter_b =
                s.spawn(|| events.wait_for_timeout("EventB", Duration::from_millis(150)));
            let waiter_a = s.spawn(|| events.wait_for("EventA"));

            thread::sleep(Duration::from_millis(30));
            // Wakes the B waiter as well; it must go back to sleep.
            events.signal("EventA");
            waiter_a.join().unwrap();

            assert!(!waiter_b.join().unwrap());
        });
        assert!(!events.is_signaled("EventB"));
    }

    #[test]
    fn test_wait_for_timeout_sees_late_signal() {
        let events = NamedEventSet::new();
        thread::scope(|s| {
            let waiter = s.spawn(|| events.wait_for_timeout("go", Duration::from_secs(5)));
            thread::sleep(Duration::from_millis(20));
            events.signal("go");
            assert!(waiter.join().unwrap());
        });
    }

    #[test]
    fn test_wait_for_until_cancelled() {
        let events = NamedEventSet::new();
        let token = CancellationToken::new();

        thread::scope(|s| {
            let waiter = s.spawn(|| events.wait_for_until("never", &token));
            thread::sleep(Duration::from_millis(30));
            token.cancel();
            assert_eq!(waiter.join().unwrap(), Err(CancelReason::Cancelled));
        });

        events.signal("done");
        assert_eq!(events.wait_for_until("done", &token), Ok(()));
    }

    #[test]
    fn test_clones_share_events() {
        let events = NamedEventSet::new();
        let other = events.clone();
        other.signal("x");
        assert!(events.is_signaled("x"));
        assert_eq!(events.signaled(), vec!["x".to_string()]);
    }
}
