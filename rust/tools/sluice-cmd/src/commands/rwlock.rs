//! Rwlock command implementation
//!
//! Readers keep re-acquiring a shared [`ReadWriteLock`] with overlapping
//! hold times, so the lock is never free. A writer arriving in the middle
//! still gets in, because new readers queue behind a waiting writer.

use std::{
    io::{self, Write},
    sync::atomic::{AtomicUsize, Ordering},
    thread,
    time::{Duration, Instant},
};

use anyhow::{Context, Result};
use sluice_sync::{CancellationToken, ReadWriteLock};

pub struct RwLockArgs {
    pub readers: usize,
    pub hold_ms: u64,
}

#[derive(Debug)]
pub struct RwLockReport {
    /// Read sections completed by all readers.
    pub reads: usize,
    /// Time the writer spent blocked before acquiring the lock.
    pub writer_wait: Duration,
    /// Value written by the writer, as observed by the last reader.
    pub observed: u64,
}

pub fn run(args: RwLockArgs) -> Result<()> {
    let report = contend(&args)?;
    let stdout = io::stdout();
    let mut out = stdout.lock();
    writeln!(
        out,
        "writer acquired the lock after {:?}; {} read(s) done, readers saw {}",
        report.writer_wait, report.reads, report.observed
    )?;
    Ok(())
}

pub fn contend(args: &RwLockArgs) -> Result<RwLockReport> {
    anyhow::ensure!(args.readers > 0, "--readers must be positive");

    let lock = ReadWriteLock::new(0u64);
    let reads = AtomicUsize::new(0);
    let stop = CancellationToken::new();
    let hold = Duration::from_millis(args.hold_ms);

    let writer_wait = thread::scope(|s| {
        for index in 0..args.readers {
            let (lock, reads, stop) = (&lock, &reads, &stop);
            thread::Builder::new()
                .name(format!("reader-{index}"))
                .spawn_scoped(s, move || {
                    while !stop.is_cancelled() {
                        let _guard = lock.read();
                        thread::sleep(hold);
                        reads.fetch_add(1, Ordering::Relaxed);
                    }
                })
                .context("Failed to start a reader thread")?;
        }

        // Let the readers overlap before the writer arrives.
        thread::sleep(hold);
        let start = Instant::now();
        {
            let mut value = lock.write();
            *value += 1;
        }
        let waited = start.elapsed();
        log::debug!("writer waited {waited:?}");
        stop.cancel();
        anyhow::Ok(waited)
    })?;

    Ok(RwLockReport {
        reads: reads.into_inner(),
        writer_wait,
        observed: *lock.read(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_writer_gets_in_under_continuous_reads() {
        let report = contend(&RwLockArgs {
            readers: 3,
            hold_ms: 20,
        })
        .unwrap();

        assert_eq!(report.observed, 1);
        assert!(report.reads > 0);
        // Bounded by one read hold, not by the lifetime of the readers.
        assert!(report.writer_wait < Duration::from_secs(1), "{report:?}");
    }
}
