use std::{
    sync::atomic::{AtomicUsize, Ordering},
    thread,
    time::Duration,
};

use sluice_sync::{
    BoundedBuffer, CancelReason, CancellationToken, ReadWriteLock, WaitGroup,
    bounded_buffer::GetError,
};

/// Writers keep two counters equal; a reader observing them unequal has
/// overlapped with a writer.
#[test]
fn test_rw_lock_random_interleavings() {
    let seed = fastrand::u64(..);
    let lock = ReadWriteLock::new((0u64, 0u64));
    let active_writers = AtomicUsize::new(0);

    thread::scope(|s| {
        for t in 0..8u64 {
            let lock = &lock;
            let active_writers = &active_writers;
            s.spawn(move || {
                let mut rng = fastrand::Rng::with_seed(seed ^ t);
                for _ in 0..500 {
                    if rng.u8(..4) == 0 {
                        let mut guard = lock.write();
                        let others = active_writers.fetch_add(1, Ordering::SeqCst);
                        assert_eq!(others, 0, "seed {seed}");
                        guard.0 += 1;
                        if rng.bool() {
                            thread::yield_now();
                        }
                        guard.1 += 1;
                        active_writers.fetch_sub(1, Ordering::SeqCst);
                    } else {
                        let guard = lock.read();
                        assert_eq!(active_writers.load(Ordering::SeqCst), 0, "seed {seed}");
                        assert_eq!(guard.0, guard.1, "seed {seed}");
                    }
                }
            });
        }
    });

    let (a, b) = lock.into_inner();
    assert_eq!(a, b);
}

/// Consumers blocked on several buffers under one token tree all leave when
/// the root is cancelled, and the wait group observes every exit.
#[test]
fn test_cancel_tree_releases_blocked_consumers() {
    let root = CancellationToken::new();
    let buffers: Vec<BoundedBuffer<u32>> = (0..4).map(|_| BoundedBuffer::new(2)).collect();
    let group = WaitGroup::new();
    let exits = AtomicUsize::new(0);

    thread::scope(|s| {
        for buffer in &buffers {
            let token = root.child().child();
            let guard = group.enter();
            let exits = &exits;
            s.spawn(move || {
                let _guard = guard;
                loop {
                    match buffer.get_until(&token) {
                        Ok(_) => continue,
                        Err(GetError::Cancelled(reason)) => {
                            assert_eq!(reason, CancelReason::Cancelled);
                            exits.fetch_add(1, Ordering::SeqCst);
                            return;
                        }
                        Err(GetError::Closed) => panic!("buffer closed unexpectedly"),
                    }
                }
            });
        }

        for (i, buffer) in buffers.iter().enumerate() {
            buffer.put(i as u32).unwrap();
        }
        thread::sleep(Duration::from_millis(30));
        assert!(!group.wait_timeout(Duration::from_millis(10)));

        root.cancel();
        assert!(group.wait_timeout(Duration::from_secs(5)));
    });

    assert_eq!(exits.load(Ordering::SeqCst), 4);
}
