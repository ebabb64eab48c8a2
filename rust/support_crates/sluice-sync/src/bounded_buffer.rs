//! A fixed-capacity, blocking FIFO buffer.
//!
//! [`BoundedBuffer`] is the channel primitive of the pipeline: producers
//! [`put`](BoundedBuffer::put) items and block while the buffer is full,
//! consumers [`get`](BoundedBuffer::get) items and block while it is empty.
//!
//! ## Closing
//!
//! [`close`](BoundedBuffer::close) is the exhaustion signal. After closing,
//! every pending and future `put` fails and hands the item back, while `get`
//! keeps returning the remaining items and reports [`Closed`] only once the
//! buffer is drained.
//!
//! ## Cancellation
//!
//! [`put_until`](BoundedBuffer::put_until) and
//! [`get_until`](BoundedBuffer::get_until) additionally watch a
//! [`CancellationToken`]. A thread blocked in either of them is woken when the
//! token fires.
//!
//! ## Wakeup Policy
//!
//! A successful `put` wakes at most one blocked consumer and a successful `get`
//! wakes at most one blocked producer. Only `close` and cancellation broadcast.

use std::{
    collections::VecDeque,
    sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError},
};

use crate::cancellation::{CancelListener, CancelReason, CancellationToken};

/// Returned when an operation hits a closed buffer.
///
/// For `put`, the rejected item is handed back.
#[derive(Debug, PartialEq, Eq, Clone, Copy)]
pub struct Closed<T = ()>(pub T);

impl<T> Closed<T> {
    pub fn into_inner(self) -> T {
        self.0
    }
}

impl<T> std::fmt::Display for Closed<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("buffer is closed")
    }
}

impl<T: std::fmt::Debug> std::error::Error for Closed<T> {}

/// An error returned from [`BoundedBuffer::put_until`].
#[derive(Debug, PartialEq, Eq, Clone, Copy)]
pub enum PutError<T> {
    /// The buffer is closed.
    Closed(T),
    /// The buffer was full and the token fired before room became available.
    Cancelled(T, CancelReason),
}

impl<T> PutError<T> {
    /// Returns the item that could not be enqueued.
    pub fn into_inner(self) -> T {
        match self {
            PutError::Closed(item) | PutError::Cancelled(item, _) => item,
        }
    }
}

impl<T> std::fmt::Display for PutError<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PutError::Closed(_) => f.write_str("buffer is closed"),
            PutError::Cancelled(_, reason) => write!(f, "put interrupted: {reason}"),
        }
    }
}

impl<T: std::fmt::Debug> std::error::Error for PutError<T> {}

/// An error returned from [`BoundedBuffer::get_until`].
#[derive(Debug, PartialEq, Eq, Clone, Copy)]
pub enum GetError {
    /// The buffer is closed and drained.
    Closed,
    /// The token was cancelled.
    Cancelled(CancelReason),
}

impl std::fmt::Display for GetError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            GetError::Closed => f.write_str("buffer is closed and drained"),
            GetError::Cancelled(reason) => write!(f, "get interrupted: {reason}"),
        }
    }
}

impl std::error::Error for GetError {}

/// An error returned from [`BoundedBuffer::try_put`].
#[derive(Debug, PartialEq, Eq, Clone, Copy)]
pub enum TryPutError<T> {
    /// The buffer is at capacity.
    Full(T),
    /// The buffer is closed.
    Closed(T),
}

/// An error returned from [`BoundedBuffer::try_get`].
#[derive(Debug, PartialEq, Eq, Clone, Copy)]
pub enum TryGetError {
    /// The buffer is empty but still open.
    Empty,
    /// The buffer is closed and drained.
    Closed,
}

/// A blocking FIFO buffer with a fixed capacity.
///
/// Cloning produces another handle to the same buffer.
pub struct BoundedBuffer<T> {
    inner: Arc<Inner<T>>,
}

impl<T> Clone for BoundedBuffer<T> {
    fn clone(&self) -> Self {
        BoundedBuffer {
            inner: self.inner.clone(),
        }
    }
}

impl<T> BoundedBuffer<T> {
    /// Creates an empty, open buffer holding at most `capacity` items.
    ///
    /// # Panics
    ///
    /// Panics if `capacity` is zero.
    pub fn new(capacity: usize) -> Self {
        assert_ne!(capacity, 0, "BoundedBuffer does not support zero capacity");

        let inner = Inner {
            state: Mutex::new(State {
                items: VecDeque::with_capacity(capacity),
                capacity,
                closed: false,
            }),
            not_empty: Condvar::new(),
            not_full: Condvar::new(),
        };

        BoundedBuffer {
            inner: Arc::new(inner),
        }
    }

    /// Appends `item`, blocking while the buffer is full.
    ///
    /// Returns the item back inside [`Closed`] if the buffer is closed, either
    /// before the call or while waiting for room.
    pub fn put(&self, item: T) -> Result<(), Closed<T>> {
        let mut state = self.inner.lock_state();

        loop {
            if state.closed {
                return Err(Closed(item));
            }
            if state.items.len() < state.capacity {
                break;
            }
            state = self.inner.wait_not_full(state);
        }

        self.inner.push(state, item);
        Ok(())
    }

    /// Removes and returns the oldest item, blocking while the buffer is empty.
    ///
    /// Returns [`Closed`] once the buffer is closed and all remaining items
    /// have been taken.
    pub fn get(&self) -> Result<T, Closed> {
        let mut state = self.inner.lock_state();

        loop {
            if let Some(item) = state.items.pop_front() {
                drop(state);
                self.inner.not_full.notify_one();
                return Ok(item);
            }
            if state.closed {
                return Err(Closed(()));
            }
            state = self.inner.wait_not_empty(state);
        }
    }

    /// Appends `item` if there is room, without blocking.
    pub fn try_put(&self, item: T) -> Result<(), TryPutError<T>> {
        let state = self.inner.lock_state();
        if state.closed {
            return Err(TryPutError::Closed(item));
        }
        if state.items.len() >= state.capacity {
            return Err(TryPutError::Full(item));
        }
        self.inner.push(state, item);
        Ok(())
    }

    /// Removes the oldest item if there is one, without blocking.
    pub fn try_get(&self) -> Result<T, TryGetError> {
        let mut state = self.inner.lock_state();
        if let Some(item) = state.items.pop_front() {
            drop(state);
            self.inner.not_full.notify_one();
            return Ok(item);
        }
        if state.closed {
            Err(TryGetError::Closed)
        } else {
            Err(TryGetError::Empty)
        }
    }

    /// Closes the buffer.
    ///
    /// Wakes every blocked producer and consumer. Returns `true` if this call
    /// closed the buffer, `false` if it was already closed.
    pub fn close(&self) -> bool {
        let mut state = self.inner.lock_state();
        if state.closed {
            return false;
        }
        state.closed = true;
        drop(state);
        self.inner.not_empty.notify_all();
        self.inner.not_full.notify_all();
        true
    }

    pub fn is_closed(&self) -> bool {
        self.inner.lock_state().closed
    }

    /// Number of buffered items.
    ///
    /// **Note**: the value may be outdated by the time it is observed.
    pub fn len(&self) -> usize {
        self.inner.lock_state().items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn capacity(&self) -> usize {
        self.inner.lock_state().capacity
    }

    /// Returns a blocking iterator that yields items until the buffer is
    /// closed and drained.
    pub fn iter(&self) -> Iter<'_, T> {
        Iter { buffer: self }
    }
}

impl<T: Send + 'static> BoundedBuffer<T> {
    /// Like [`put`](Self::put), but gives up when `token` is cancelled.
    ///
    /// Cancellation only interrupts waiting: if there is room, the item is
    /// enqueued even when the token has already fired.
    pub fn put_until(&self, item: T, token: &CancellationToken) -> Result<(), PutError<T>> {
        let _listener = self.wake_on_cancel(token);
        let mut state = self.inner.lock_state();

        loop {
            if state.closed {
                return Err(PutError::Closed(item));
            }
            if state.items.len() < state.capacity {
                break;
            }
            if let Some(reason) = token.reason() {
                return Err(PutError::Cancelled(item, reason));
            }
            state = self.inner.wait_not_full(state);
        }

        self.inner.push(state, item);
        Ok(())
    }

    /// Like [`get`](Self::get), but gives up when `token` is cancelled.
    ///
    /// Cancellation is checked before taking an item, so no new item is
    /// handed out once the token has fired.
    pub fn get_until(&self, token: &CancellationToken) -> Result<T, GetError> {
        let _listener = self.wake_on_cancel(token);
        let mut state = self.inner.lock_state();

        loop {
            if let Some(reason) = token.reason() {
                // We may have consumed a notify_one meant for a consumer that
                // can still make progress.
                let pending = !state.items.is_empty();
                drop(state);
                if pending {
                    self.inner.not_empty.notify_one();
                }
                return Err(GetError::Cancelled(reason));
            }
            if let Some(item) = state.items.pop_front() {
                drop(state);
                self.inner.not_full.notify_one();
                return Ok(item);
            }
            if state.closed {
                return Err(GetError::Closed);
            }
            state = self.inner.wait_not_empty(state);
        }
    }

    fn wake_on_cancel(&self, token: &CancellationToken) -> CancelListener {
        let inner = self.inner.clone();
        token.on_cancel(move || inner.wake_all())
    }
}

impl<T> std::fmt::Debug for BoundedBuffer<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.inner.lock_state();
        f.debug_struct("BoundedBuffer")
            .field("len", &state.items.len())
            .field("capacity", &state.capacity)
            .field("closed", &state.closed)
            .finish()
    }
}

/// Blocking iterator over a [`BoundedBuffer`], see [`BoundedBuffer::iter`].
pub struct Iter<'a, T> {
    buffer: &'a BoundedBuffer<T>,
}

impl<T> Iterator for Iter<'_, T> {
    type Item = T;

    fn next(&mut self) -> Option<T> {
        self.buffer.get().ok()
    }
}

/// The state of the buffer that is protected by the Mutex.
struct State<T> {
    items: VecDeque<T>,
    capacity: usize,
    closed: bool,
}

/// The shared core of the buffer, containing the state and condition variables.
struct Inner<T> {
    state: Mutex<State<T>>,
    not_empty: Condvar, // To signal consumers that an item has been added.
    not_full: Condvar,  // To signal producers that space has become available.
}

impl<T> Inner<T> {
    fn lock_state(&self) -> MutexGuard<'_, State<T>> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn wait_not_full<'a>(&self, state: MutexGuard<'a, State<T>>) -> MutexGuard<'a, State<T>> {
        self.not_full
            .wait(state)
            .unwrap_or_else(PoisonError::into_inner)
    }

    fn wait_not_empty<'a>(&self, state: MutexGuard<'a, State<T>>) -> MutexGuard<'a, State<T>> {
        self.not_empty
            .wait(state)
            .unwrap_or_else(PoisonError::into_inner)
    }

    /// Appends an item under the held lock and wakes one consumer.
    fn push(&self, mut state: MutexGuard<'_, State<T>>, item: T) {
        debug_assert!(state.items.len() < state.capacity);
        state.items.push_back(item);
        // Drop the lock before notifying to reduce contention.
        drop(state);
        self.not_empty.notify_one();
    }

    /// Wakes all waiters so they re-check their cancellation token.
    ///
    /// Taking the lock orders this wakeup after any waiter that has already
    /// checked the token but not yet parked.
    fn wake_all(&self) {
        let _state = self.lock_state();
        self.not_empty.notify_all();
        self.not_full.notify_all();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::{
        thread,
        time::{Duration, Instant},
    };

    #[test]
    fn test_single_thread_put_get() {
        let buffer = BoundedBuffer::new(5);
        buffer.put("hello").unwrap();
        assert_eq!(buffer.len(), 1);
        assert_eq!(buffer.get().unwrap(), "hello");
        assert!(buffer.is_empty());
    }

    #[test]
    #[should_panic]
    fn test_zero_capacity_panics() {
        BoundedBuffer::<i32>::new(0);
    }

    #[test]
    fn test_fifo_order() {
        let buffer = BoundedBuffer::new(100);
        for i in 0..100 {
            buffer.put(i).unwrap();
        }
        for i in 0..100 {
            assert_eq!(buffer.get().unwrap(), i);
        }
    }

    #[test]
    fn test_random_put_get_respects_capacity_and_order() {
        const CAPACITY: usize = 7;
        fastrand::seed(0x5eed);
        let buffer = BoundedBuffer::new(CAPACITY);
        let mut next_in = 0u32;
        let mut next_out = 0u32;

        for _ in 0..10_000 {
            if fastrand::bool() {
                match buffer.try_put(next_in) {
                    Ok(()) => next_in += 1,
                    Err(TryPutError::Full(v)) => {
                        assert_eq!(v, next_in);
                        assert_eq!(buffer.len(), CAPACITY);
                    }
                    Err(TryPutError::Closed(_)) => panic!("buffer is open"),
                }
            } else {
                match buffer.try_get() {
                    Ok(v) => {
                        assert_eq!(v, next_out);
                        next_out += 1;
                    }
                    Err(TryGetError::Empty) => assert_eq!(next_in, next_out),
                    Err(TryGetError::Closed) => panic!("buffer is open"),
                }
            }
            assert!(buffer.len() <= CAPACITY);
            assert_eq!(buffer.len(), (next_in - next_out) as usize);
        }
    }

    #[test]
    fn test_get_blocks_until_put() {
        let buffer = BoundedBuffer::new(1);
        let consumer = {
            let buffer = buffer.clone();
            thread::spawn(move || buffer.get().unwrap())
        };

        thread::sleep(Duration::from_millis(50));
        assert!(!consumer.is_finished());
        buffer.put("from other thread").unwrap();
        assert_eq!(consumer.join().unwrap(), "from other thread");
    }

    #[test]
    fn test_put_blocks_on_full_buffer() {
        let buffer = BoundedBuffer::new(1);
        buffer.put("first").unwrap();

        let producer = {
            let buffer = buffer.clone();
            thread::spawn(move || buffer.put("second").unwrap())
        };

        thread::sleep(Duration::from_millis(50));
        assert!(!producer.is_finished());
        assert_eq!(buffer.len(), 1);

        assert_eq!(buffer.get().unwrap(), "first");
        producer.join().unwrap();
        assert_eq!(buffer.get().unwrap(), "second");
    }

    #[test]
    fn test_close_drains_then_reports_closed() {
        let buffer = BoundedBuffer::new(5);
        buffer.put(1).unwrap();
        buffer.put(2).unwrap();
        assert!(buffer.close());
        assert!(!buffer.close());

        assert_eq!(buffer.put(3), Err(Closed(3)));
        assert_eq!(buffer.get().unwrap(), 1);
        assert_eq!(buffer.get().unwrap(), 2);
        assert_eq!(buffer.get(), Err(Closed(())));
        assert_eq!(buffer.try_get(), Err(TryGetError::Closed));
    }

    #[test]
    fn test_close_releases_blocked_producer_and_consumer() {
        let full = BoundedBuffer::new(1);
        full.put(0).unwrap();
        let empty = BoundedBuffer::<i32>::new(1);

        let producer = {
            let full = full.clone();
            thread::spawn(move || full.put(1))
        };
        let consumer = {
            let empty = empty.clone();
            thread::spawn(move || empty.get())
        };

        thread::sleep(Duration::from_millis(50));
        full.close();
        empty.close();

        assert_eq!(producer.join().unwrap(), Err(Closed(1)));
        assert_eq!(consumer.join().unwrap(), Err(Closed(())));
    }

    #[test]
    fn test_get_until_cancelled_while_blocked() {
        let buffer = BoundedBuffer::<i32>::new(2);
        let token = CancellationToken::new();

        let consumer = {
            let buffer = buffer.clone();
            let token = token.clone();
            thread::spawn(move || buffer.get_until(&token))
        };

        thread::sleep(Duration::from_millis(50));
        let start = Instant::now();
        token.cancel();
        assert_eq!(
            consumer.join().unwrap(),
            Err(GetError::Cancelled(CancelReason::Cancelled))
        );
        assert!(start.elapsed() < Duration::from_secs(2));
    }

    #[test]
    fn test_get_until_prefers_cancellation_over_items() {
        let buffer = BoundedBuffer::new(2);
        buffer.put(7).unwrap();
        let token = CancellationToken::new();
        token.cancel();
        assert_eq!(
            buffer.get_until(&token),
            Err(GetError::Cancelled(CancelReason::Cancelled))
        );
        assert_eq!(buffer.len(), 1);
    }

    #[test]
    fn test_put_until_cancelled_while_full() {
        let buffer = BoundedBuffer::new(1);
        buffer.put(1).unwrap();
        let token = CancellationToken::new().child_with_timeout(Duration::from_millis(30));

        let err = buffer.put_until(2, &token).unwrap_err();
        assert_eq!(err, PutError::Cancelled(2, CancelReason::DeadlineExceeded));
        assert_eq!(err.into_inner(), 2);
        assert_eq!(buffer.len(), 1);
    }

    #[test]
    fn test_put_until_succeeds_with_room_after_cancel() {
        let buffer = BoundedBuffer::new(1);
        let token = CancellationToken::new();
        token.cancel();
        buffer.put_until(1, &token).unwrap();
        assert_eq!(buffer.get().unwrap(), 1);
    }

    #[test]
    fn test_cancelled_consumer_forwards_wakeup() {
        // Two consumers wait; one is cancelled. A single item must still reach
        // the surviving consumer.
        let buffer = BoundedBuffer::new(1);
        let doomed = CancellationToken::new();
        let alive = CancellationToken::new();

        thread::scope(|s| {
            let cancelled = s.spawn(|| buffer.get_until(&doomed));
            let survivor = s.spawn(|| buffer.get_until(&alive));

            thread::sleep(Duration::from_millis(50));
            doomed.cancel();
            buffer.put(42).unwrap();

            // Cancellation happens-before the put and is checked first.
            assert_eq!(
                cancelled.join().unwrap(),
                Err(GetError::Cancelled(CancelReason::Cancelled))
            );
            assert_eq!(survivor.join().unwrap(), Ok(42));
        });
    }

    #[test]
    fn test_iter_stops_at_close() {
        let buffer = BoundedBuffer::new(4);
        thread::scope(|s| {
            s.spawn(|| {
                for i in 0..10 {
                    buffer.put(i).unwrap();
                }
                buffer.close();
            });
            let collected: Vec<_> = buffer.iter().collect();
            assert_eq!(collected, (0..10).collect::<Vec<_>>());
        });
    }

    #[test]
    fn test_multi_producer_multi_consumer() {
        const NUM_PRODUCERS: usize = 4;
        const NUM_CONSUMERS: usize = 3;
        const ITEMS_PER_PRODUCER: usize = 1000;
        const TOTAL_ITEMS: usize = NUM_PRODUCERS * ITEMS_PER_PRODUCER;

        let buffer = BoundedBuffer::new(10);

        thread::scope(|s| {
            let producers: Vec<_> = (0..NUM_PRODUCERS)
                .map(|i| {
                    let buffer = &buffer;
                    s.spawn(move || {
                        let mut last = None;
                        for j in 0..ITEMS_PER_PRODUCER {
                            let item = i * ITEMS_PER_PRODUCER + j;
                            buffer.put(item).unwrap();
                            last = Some(item);
                        }
                        last
                    })
                })
                .collect();

            let consumers: Vec<_> = (0..NUM_CONSUMERS)
                .map(|_| s.spawn(|| buffer.iter().collect::<Vec<_>>()))
                .collect();

            for producer in producers {
                producer.join().unwrap();
            }
            buffer.close();

            let mut all_received = vec![];
            for consumer in consumers {
                let received = consumer.join().unwrap();
                // Items from one producer arrive in the order they were put.
                for window in received.windows(2) {
                    if window[0] / ITEMS_PER_PRODUCER == window[1] / ITEMS_PER_PRODUCER {
                        assert!(window[0] < window[1]);
                    }
                }
                all_received.extend(received);
            }

            assert_eq!(all_received.len(), TOTAL_ITEMS);
            all_received.sort();
            assert_eq!(all_received, (0..TOTAL_ITEMS).collect::<Vec<_>>());
        });
    }
}
