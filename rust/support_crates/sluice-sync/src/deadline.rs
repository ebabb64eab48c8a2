//! Background timer enforcing cancellation token deadlines.
//!
//! A single lazily started thread (`sluice-deadline`) owns a min-heap of
//! pending deadlines. Each entry refers to its token node weakly, so a token
//! that is dropped before its deadline costs nothing but a heap slot until the
//! deadline passes.

use std::{
    cmp::{Ordering, Reverse},
    collections::BinaryHeap,
    sync::{Arc, Condvar, Mutex, MutexGuard, OnceLock, PoisonError, Weak},
    thread,
    time::Instant,
};

use crate::cancellation::{CancelReason, TokenNode};

/// Dead entries are swept from the heap once it grows past this size.
const SWEEP_THRESHOLD: usize = 1024;

/// The process-wide deadline timer.
pub(crate) struct DeadlineTimer(Arc<TimerInner>);

impl DeadlineTimer {
    /// Returns the global timer, starting its thread on first use.
    pub(crate) fn global() -> &'static DeadlineTimer {
        static TIMER: OnceLock<DeadlineTimer> = OnceLock::new();
        TIMER.get_or_init(DeadlineTimer::start)
    }

    fn start() -> DeadlineTimer {
        let inner = Arc::new(TimerInner {
            state: Mutex::new(TimerState {
                entries: BinaryHeap::new(),
                next_seq: 0,
            }),
            wakeup: Condvar::new(),
        });
        let thread_inner = inner.clone();
        thread::Builder::new()
            .name("sluice-deadline".to_string())
            .spawn(move || thread_inner.run())
            .expect("spawn deadline timer thread");
        DeadlineTimer(inner)
    }

    /// Arranges for `node` to be cancelled with
    /// [`CancelReason::DeadlineExceeded`] at `deadline`.
    pub(crate) fn schedule(&self, deadline: Instant, node: Weak<TokenNode>) {
        let mut state = self.0.lock_state();
        if state.entries.len() >= SWEEP_THRESHOLD {
            state
                .entries
                .retain(|Reverse(entry)| entry.node.strong_count() != 0);
        }
        let seq = state.next_seq;
        state.next_seq += 1;
        state.entries.push(Reverse(Entry {
            deadline,
            seq,
            node,
        }));
        drop(state);
        self.0.wakeup.notify_one();
    }
}

struct TimerInner {
    state: Mutex<TimerState>,
    /// Signalled whenever a new deadline is scheduled.
    wakeup: Condvar,
}

struct TimerState {
    entries: BinaryHeap<Reverse<Entry>>,
    next_seq: u64,
}

impl TimerInner {
    fn run(&self) {
        let mut expired = Vec::new();
        let mut state = self.lock_state();
        loop {
            let now = Instant::now();
            while state
                .entries
                .peek()
                .is_some_and(|Reverse(entry)| entry.deadline <= now)
            {
                if let Some(Reverse(entry)) = state.entries.pop() {
                    expired.push(entry.node);
                }
            }

            if !expired.is_empty() {
                drop(state);
                for node in expired.drain(..) {
                    if let Some(node) = node.upgrade() {
                        log::trace!("token deadline expired");
                        node.cancel(CancelReason::DeadlineExceeded);
                    }
                }
                state = self.lock_state();
                continue;
            }

            state = match state.entries.peek() {
                Some(Reverse(next)) => {
                    let timeout = next.deadline.saturating_duration_since(now);
                    self.wakeup
                        .wait_timeout(state, timeout)
                        .unwrap_or_else(PoisonError::into_inner)
                        .0
                }
                None => self
                    .wakeup
                    .wait(state)
                    .unwrap_or_else(PoisonError::into_inner),
            };
        }
    }

    fn lock_state(&self) -> MutexGuard<'_, TimerState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// A scheduled deadline. Ordered by `(deadline, seq)`.
struct Entry {
    deadline: Instant,
    seq: u64,
    node: Weak<TokenNode>,
}

impl PartialEq for Entry {
    fn eq(&self, other: &Self) -> bool {
        self.deadline == other.deadline && self.seq == other.seq
    }
}

impl Eq for Entry {}

impl PartialOrd for Entry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Entry {
    fn cmp(&self, other: &Self) -> Ordering {
        self.deadline
            .cmp(&other.deadline)
            .then(self.seq.cmp(&other.seq))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::CancellationToken;
    use std::time::Duration;

    #[test]
    fn test_deadlines_fire_in_order() {
        let root = CancellationToken::new();
        let late = root.child_with_timeout(Duration::from_millis(200));
        let early = root.child_with_timeout(Duration::from_millis(20));

        assert_eq!(
            early.wait_timeout(Duration::from_secs(5)),
            Some(CancelReason::DeadlineExceeded)
        );
        assert!(!late.is_cancelled());
        assert_eq!(
            late.wait_timeout(Duration::from_secs(5)),
            Some(CancelReason::DeadlineExceeded)
        );
    }

    #[test]
    fn test_zero_timeout_fires_promptly() {
        let token = CancellationToken::new().child_with_timeout(Duration::ZERO);
        assert_eq!(
            token.wait_timeout(Duration::from_secs(5)),
            Some(CancelReason::DeadlineExceeded)
        );
    }

    #[test]
    fn test_dropped_token_entry_is_harmless() {
        let root = CancellationToken::new();
        drop(root.child_with_timeout(Duration::from_millis(10)));
        let survivor = root.child_with_timeout(Duration::from_millis(40));
        assert_eq!(
            survivor.wait_timeout(Duration::from_secs(5)),
            Some(CancelReason::DeadlineExceeded)
        );
        assert!(!root.is_cancelled());
    }

    #[test]
    fn test_timer_is_global() {
        let a = DeadlineTimer::global() as *const DeadlineTimer;
        let b = DeadlineTimer::global() as *const DeadlineTimer;
        assert_eq!(a, b);
    }
}
