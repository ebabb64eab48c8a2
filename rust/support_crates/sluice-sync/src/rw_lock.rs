//! A writer-preference reader/writer lock.
//!
//! [`RawReadWriteLock`] grants shared access to any number of readers or
//! exclusive access to a single writer. New readers queue behind any waiting
//! writer, so a continuous stream of readers cannot starve a writer: a writer
//! that starts waiting acquires the lock before any reader that starts
//! waiting after it.
//!
//! [`ReadWriteLock<T>`] wraps a value and hands out RAII guards built on the
//! raw lock.
//!
//! Re-entrant acquisition is not supported. A thread that already holds the
//! lock (in either mode) and tries to acquire it again may deadlock, in
//! particular a reader re-acquiring while a writer waits.

use std::{
    cell::UnsafeCell,
    ops::{Deref, DerefMut},
    sync::{Condvar, Mutex, MutexGuard, PoisonError},
};

/// The counters of the lock, protected by its private mutex.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct LockState {
    /// Readers currently holding the lock.
    pub readers: usize,
    /// Writers blocked in `write_lock`.
    pub writers_waiting: usize,
    /// Whether a writer holds the lock.
    pub writer_active: bool,
}

/// The lock itself, without a protected value.
///
/// Every `*_lock` call must be paired with the matching `*_unlock` call on
/// the same lock. Unlocking a lock that is not held in that mode panics.
pub struct RawReadWriteLock {
    state: Mutex<LockState>,
    /// Shared by readers and writers; always broadcast.
    changed: Condvar,
}

impl RawReadWriteLock {
    pub const fn new() -> RawReadWriteLock {
        RawReadWriteLock {
            state: Mutex::new(LockState {
                readers: 0,
                writers_waiting: 0,
                writer_active: false,
            }),
            changed: Condvar::new(),
        }
    }

    /// Acquires shared access, blocking while a writer is active or waiting.
    pub fn read_lock(&self) {
        let mut state = self.lock_state();
        while state.writer_active || state.writers_waiting > 0 {
            state = self.wait(state);
        }
        state.readers += 1;
    }

    /// Acquires shared access if that is possible without blocking.
    pub fn try_read_lock(&self) -> bool {
        let mut state = self.lock_state();
        if state.writer_active || state.writers_waiting > 0 {
            return false;
        }
        state.readers += 1;
        true
    }

    /// Releases shared access.
    ///
    /// # Panics
    ///
    /// Panics if no reader holds the lock.
    pub fn read_unlock(&self) {
        let mut state = self.lock_state();
        assert!(
            state.readers > 0,
            "read_unlock called without a matching read_lock"
        );
        state.readers -= 1;
        if state.readers == 0 {
            drop(state);
            // Both a blocked writer and blocked readers may be eligible.
            self.changed.notify_all();
        }
    }

    /// Acquires exclusive access.
    ///
    /// Announces the intent to write first, which blocks new readers, then
    /// waits for active readers and any active writer to leave.
    pub fn write_lock(&self) {
        let mut state = self.lock_state();
        state.writers_waiting += 1;
        while state.readers > 0 || state.writer_active {
            state = self.wait(state);
        }
        state.writers_waiting -= 1;
        state.writer_active = true;
    }

    /// Acquires exclusive access if that is possible without blocking.
    pub fn try_write_lock(&self) -> bool {
        let mut state = self.lock_state();
        if state.readers > 0 || state.writer_active {
            return false;
        }
        state.writer_active = true;
        true
    }

    /// Releases exclusive access.
    ///
    /// # Panics
    ///
    /// Panics if no writer holds the lock.
    pub fn write_unlock(&self) {
        let mut state = self.lock_state();
        assert!(
            state.writer_active,
            "write_unlock called without a matching write_lock"
        );
        state.writer_active = false;
        drop(state);
        self.changed.notify_all();
    }

    /// Returns a snapshot of the lock counters.
    ///
    /// **Note**: This method is primarily intended for diagnostic purposes. The returned
    /// value may be outdated in a concurrent environment.
    pub fn state(&self) -> LockState {
        *self.lock_state()
    }

    fn lock_state(&self) -> MutexGuard<'_, LockState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn wait<'a>(&self, state: MutexGuard<'a, LockState>) -> MutexGuard<'a, LockState> {
        self.changed
            .wait(state)
            .unwrap_or_else(PoisonError::into_inner)
    }
}

impl Default for RawReadWriteLock {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for RawReadWriteLock {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("RawReadWriteLock")
            .field(&self.state())
            .finish()
    }
}

/// A value protected by a [`RawReadWriteLock`].
pub struct ReadWriteLock<T: ?Sized> {
    raw: RawReadWriteLock,
    data: UnsafeCell<T>,
}

// Same bounds as `std::sync::RwLock`: readers share `&T` across threads.
unsafe impl<T: ?Sized + Send> Send for ReadWriteLock<T> {}
unsafe impl<T: ?Sized + Send + Sync> Sync for ReadWriteLock<T> {}

impl<T> ReadWriteLock<T> {
    pub const fn new(value: T) -> ReadWriteLock<T> {
        ReadWriteLock {
            raw: RawReadWriteLock::new(),
            data: UnsafeCell::new(value),
        }
    }

    pub fn into_inner(self) -> T {
        self.data.into_inner()
    }
}

impl<T: ?Sized> ReadWriteLock<T> {
    /// Acquires shared access, see [`RawReadWriteLock::read_lock`].
    pub fn read(&self) -> ReadGuard<'_, T> {
        self.raw.read_lock();
        ReadGuard { lock: self }
    }

    pub fn try_read(&self) -> Option<ReadGuard<'_, T>> {
        self.raw.try_read_lock().then(|| ReadGuard { lock: self })
    }

    /// Acquires exclusive access, see [`RawReadWriteLock::write_lock`].
    pub fn write(&self) -> WriteGuard<'_, T> {
        self.raw.write_lock();
        WriteGuard { lock: self }
    }

    pub fn try_write(&self) -> Option<WriteGuard<'_, T>> {
        self.raw.try_write_lock().then(|| WriteGuard { lock: self })
    }

    /// Returns a mutable reference without locking; the borrow checker
    /// guarantees exclusivity.
    pub fn get_mut(&mut self) -> &mut T {
        self.data.get_mut()
    }

    /// Returns a snapshot of the lock counters, see [`RawReadWriteLock::state`].
    pub fn state(&self) -> LockState {
        self.raw.state()
    }
}

impl<T: Default> Default for ReadWriteLock<T> {
    fn default() -> Self {
        Self::new(T::default())
    }
}

impl<T: ?Sized> std::fmt::Debug for ReadWriteLock<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReadWriteLock")
            .field("state", &self.raw.state())
            .finish_non_exhaustive()
    }
}

/// Shared access to the value of a [`ReadWriteLock`]. Releases on drop.
#[must_use = "the lock is released as soon as the guard is dropped"]
pub struct ReadGuard<'a, T: ?Sized> {
    lock: &'a ReadWriteLock<T>,
}

impl<T: ?Sized> Deref for ReadGuard<'_, T> {
    type Target = T;

    fn deref(&self) -> &T {
        // SAFETY: the raw lock is held in shared mode, so no writer exists.
        unsafe { &*self.lock.data.get() }
    }
}

impl<T: ?Sized> Drop for ReadGuard<'_, T> {
    fn drop(&mut self) {
        self.lock.raw.read_unlock();
    }
}

/// Exclusive access to the value of a [`ReadWriteLock`]. Releases on drop.
#[must_use = "the lock is released as soon as the guard is dropped"]
pub struct WriteGuard<'a, T: ?Sized> {
    lock: &'a ReadWriteLock<T>,
}

impl<T: ?Sized> Deref for WriteGuard<'_, T> {
    type Target = T;

    fn deref(&self) -> &T {
        // SAFETY: the raw lock is held in exclusive mode.
        unsafe { &*self.lock.data.get() }
    }
}

impl<T: ?Sized> DerefMut for WriteGuard<'_, T> {
    fn deref_mut(&mut self) -> &mut T {
        // SAFETY: the raw lock is held in exclusive mode.
        unsafe { &mut *self.lock.data.get() }
    }
}

impl<T: ?Sized> Drop for WriteGuard<'_, T> {
    fn drop(&mut self) {
        self.lock.raw.write_unlock();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::{
        sync::{
            Arc,
            atomic::{AtomicBool, AtomicUsize, Ordering},
        },
        thread,
        time::{Duration, Instant},
    };

    fn wait_until(mut predicate: impl FnMut() -> bool) {
        let start = Instant::now();
        while !predicate() {
            assert!(start.elapsed() < Duration::from_secs(5), "condition not reached");
            thread::sleep(Duration::from_millis(1));
        }
    }

    #[test]
    fn test_multiple_readers_share_the_lock() {
        let lock = RawReadWriteLock::new();
        lock.read_lock();
        lock.read_lock();
        assert_eq!(lock.state().readers, 2);
        assert!(!lock.try_write_lock());
        lock.read_unlock();
        lock.read_unlock();
        assert!(lock.try_write_lock());
        assert!(lock.state().writer_active);
        assert!(!lock.try_read_lock());
        lock.write_unlock();
        assert_eq!(lock.state(), LockState::default());
    }

    #[test]
    #[should_panic(expected = "read_unlock called without a matching read_lock")]
    fn test_read_unlock_without_lock_panics() {
        RawReadWriteLock::new().read_unlock();
    }

    #[test]
    #[should_panic(expected = "write_unlock called without a matching write_lock")]
    fn test_double_write_unlock_panics() {
        let lock = RawReadWriteLock::new();
        lock.write_lock();
        lock.write_unlock();
        lock.write_unlock();
    }

    #[test]
    fn test_writer_excludes_readers_and_writers() {
        let lock = ReadWriteLock::new(0u64);
        let readers_inside = AtomicUsize::new(0);
        let writers_inside = AtomicUsize::new(0);

        thread::scope(|s| {
            for _ in 0..4 {
                s.spawn(|| {
                    for _ in 0..200 {
                        let guard = lock.read();
                        readers_inside.fetch_add(1, Ordering::SeqCst);
                        assert_eq!(writers_inside.load(Ordering::SeqCst), 0);
                        let _ = *guard;
                        readers_inside.fetch_sub(1, Ordering::SeqCst);
                    }
                });
            }
            for _ in 0..2 {
                s.spawn(|| {
                    for _ in 0..200 {
                        let mut guard = lock.write();
                        assert_eq!(writers_inside.fetch_add(1, Ordering::SeqCst), 0);
                        assert_eq!(readers_inside.load(Ordering::SeqCst), 0);
                        *guard += 1;
                        writers_inside.fetch_sub(1, Ordering::SeqCst);
                    }
                });
            }
        });

        assert_eq!(lock.into_inner(), 400);
    }

    #[test]
    fn test_waiting_writer_blocks_new_readers() {
        let lock = Arc::new(RawReadWriteLock::new());
        lock.read_lock();
        lock.read_lock();

        let writer = {
            let lock = lock.clone();
            thread::spawn(move || {
                lock.write_lock();
                lock.write_unlock();
            })
        };
        wait_until(|| lock.state().writers_waiting == 1);

        // A reader arriving now must queue behind the writer.
        assert!(!lock.try_read_lock());
        let late_reader_done = Arc::new(AtomicBool::new(false));
        let late_reader = {
            let lock = lock.clone();
            let done = late_reader_done.clone();
            thread::spawn(move || {
                lock.read_lock();
                done.store(true, Ordering::SeqCst);
                lock.read_unlock();
            })
        };

        thread::sleep(Duration::from_millis(50));
        assert!(!late_reader_done.load(Ordering::SeqCst));

        lock.read_unlock();
        lock.read_unlock();
        writer.join().unwrap();
        late_reader.join().unwrap();
        assert!(late_reader_done.load(Ordering::SeqCst));
        assert_eq!(lock.state(), LockState::default());
    }

    #[test]
    fn test_writer_not_starved_by_reader_stream() {
        let lock = ReadWriteLock::new(());
        let stop = AtomicBool::new(false);
        let writer_acquired = AtomicBool::new(false);

        thread::scope(|s| {
            // Two readers that keep re-acquiring with overlapping hold times.
            for _ in 0..2 {
                s.spawn(|| {
                    while !stop.load(Ordering::SeqCst) {
                        let _guard = lock.read();
                        thread::sleep(Duration::from_millis(5));
                    }
                });
            }

            thread::sleep(Duration::from_millis(20));
            let start = Instant::now();
            {
                let _guard = lock.write();
                writer_acquired.store(true, Ordering::SeqCst);
            }
            let waited = start.elapsed();
            stop.store(true, Ordering::SeqCst);

            assert!(waited < Duration::from_secs(2), "writer waited {waited:?}");
        });

        assert!(writer_acquired.load(Ordering::SeqCst));
    }

    #[test]
    fn test_guards_release_on_drop() {
        let lock = ReadWriteLock::new(vec![1, 2, 3]);
        {
            let a = lock.read();
            let b = lock.try_read().unwrap();
            assert_eq!(a.len() + b.len(), 6);
            assert!(lock.try_write().is_none());
        }
        {
            let mut w = lock.write();
            w.push(4);
            assert!(lock.try_read().is_none());
        }
        assert_eq!(*lock.read(), vec![1, 2, 3, 4]);
        assert_eq!(lock.state(), LockState::default());
    }

    #[test]
    fn test_no_writer_while_read_guard_alive() {
        let lock = ReadWriteLock::new(7u32);
        let reader = lock.read();
        assert_eq!(lock.state().readers, 1);
        assert!(lock.try_write().is_none());

        thread::scope(|s| {
            let writer = s.spawn(|| {
                let mut guard = lock.write();
                *guard = 99;
            });
            wait_until(|| lock.state().writers_waiting == 1);
            assert_eq!(*reader, 7);
            assert!(!writer.is_finished());
            drop(reader);
        });

        assert_eq!(*lock.read(), 99);
        assert_eq!(lock.state(), LockState::default());
    }
}
