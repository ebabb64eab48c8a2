//! A counting barrier.
//!
//! [`WaitGroup`] counts outstanding participants. [`wait`](WaitGroup::wait)
//! blocks until the count drops to zero. The pipeline uses it to close the
//! result buffer exactly once, after the last worker has exited.

use std::{
    sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError},
    time::Duration,
};

/// A counter that threads can wait on until it reaches zero.
///
/// Cloning produces another handle to the same counter.
#[derive(Clone, Default)]
pub struct WaitGroup {
    inner: Arc<Inner>,
}

#[derive(Default)]
struct Inner {
    count: Mutex<usize>,
    zero: Condvar,
}

impl WaitGroup {
    pub fn new() -> WaitGroup {
        WaitGroup::default()
    }

    /// Adds `n` outstanding participants.
    pub fn add(&self, n: usize) {
        let mut count = self.inner.lock();
        *count = count
            .checked_add(n)
            .expect("WaitGroup counter overflow");
    }

    /// Marks one participant as finished.
    ///
    /// # Panics
    ///
    /// Panics if the counter is already zero.
    pub fn done(&self) {
        let mut count = self.inner.lock();
        assert!(*count > 0, "WaitGroup::done called more times than add");
        *count -= 1;
        if *count == 0 {
            drop(count);
            self.inner.zero.notify_all();
        }
    }

    /// Adds one participant and returns a guard that marks it finished when
    /// dropped, including during unwinding.
    pub fn enter(&self) -> WaitGroupGuard {
        self.add(1);
        WaitGroupGuard { group: self.clone() }
    }

    /// Blocks until the counter reaches zero.
    pub fn wait(&self) {
        let mut count = self.inner.lock();
        while *count != 0 {
            count = self
                .inner
                .zero
                .wait(count)
                .unwrap_or_else(PoisonError::into_inner);
        }
    }

    /// Blocks until the counter reaches zero or `timeout` elapses.
    ///
    /// Returns `true` if the counter reached zero.
    pub fn wait_timeout(&self, timeout: Duration) -> bool {
        let count = self.inner.lock();
        let (count, _) = self
            .inner
            .zero
            .wait_timeout_while(count, timeout, |count| *count != 0)
            .unwrap_or_else(PoisonError::into_inner);
        *count == 0
    }

    /// Current number of outstanding participants.
    ///
    /// **Note**: This method is primarily intended for diagnostic purposes.
    pub fn count(&self) -> usize {
        *self.inner.lock()
    }
}

impl Inner {
    fn lock(&self) -> MutexGuard<'_, usize> {
        self.count.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl std::fmt::Debug for WaitGroup {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WaitGroup")
            .field("count", &self.count())
            .finish()
    }
}

/// Marks one [`WaitGroup`] participant as finished on drop.
#[must_use = "dropping the guard immediately marks the participant as finished"]
pub struct WaitGroupGuard {
    group: WaitGroup,
}

impl Drop for WaitGroupGuard {
    fn drop(&mut self) {
        self.group.done();
    }
}
