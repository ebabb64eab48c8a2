//! Fetchers with scripted behavior.

use std::{
    collections::HashMap,
    sync::atomic::{AtomicUsize, Ordering},
    thread,
    time::Duration,
};

use sluice_pipeline::{FetchError, Fetcher};

#[derive(Debug, Clone)]
enum Script {
    Fail(FetchError),
    Panic,
}

/// A fetcher over task indices that returns the index as its payload.
///
/// Individual tasks can be scripted to fail or panic, and every fetch can be
/// slowed down by a fixed delay plus random jitter. The fetcher records how
/// many calls it received and the peak number of concurrent calls.
#[derive(Debug, Default)]
pub struct ScriptedFetcher {
    delay: Duration,
    jitter: Duration,
    scripts: HashMap<usize, Script>,
    calls: AtomicUsize,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
}

impl ScriptedFetcher {
    pub fn new() -> ScriptedFetcher {
        ScriptedFetcher::default()
    }

    /// Every fetch sleeps for `delay`.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    /// Every fetch sleeps for an additional random duration up to `jitter`.
    pub fn with_jitter(mut self, jitter: Duration) -> Self {
        self.jitter = jitter;
        self
    }

    /// Task `index` fails with `error`.
    pub fn fail_on(mut self, index: usize, error: FetchError) -> Self {
        self.scripts.insert(index, Script::Fail(error));
        self
    }

    /// Task `index` panics.
    pub fn panic_on(mut self, index: usize) -> Self {
        self.scripts.insert(index, Script::Panic);
        self
    }

    /// Number of fetches started so far.
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// Peak number of fetches running at the same time.
    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }

    fn sleep(&self) {
        let mut pause = self.delay;
        if !self.jitter.is_zero() {
            let jitter_us = u64::try_from(self.jitter.as_micros()).unwrap_or(u64::MAX);
            pause += Duration::from_micros(fastrand::u64(0..=jitter_us));
        }
        if !pause.is_zero() {
            thread::sleep(pause);
        }
    }
}

impl Fetcher for ScriptedFetcher {
    type Target = usize;
    type Payload = u64;

    fn fetch(&self, index: &usize) -> Result<u64, FetchError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let running = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(running, Ordering::SeqCst);

        self.sleep();
        self.in_flight.fetch_sub(1, Ordering::SeqCst);

        match self.scripts.get(index) {
            None => Ok(*index as u64),
            Some(Script::Fail(error)) => Err(error.clone()),
            Some(Script::Panic) => panic!("scripted panic on task {index}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_scripted_outcomes() {
        let fetcher = ScriptedFetcher::new()
            .fail_on(1, FetchError::status(404))
            .panic_on(2);

        assert_eq!(fetcher.fetch(&0), Ok(0));
        assert_eq!(fetcher.fetch(&1), Err(FetchError::Status { status: 404 }));
        let panicked =
            std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| fetcher.fetch(&2)));
        assert!(panicked.is_err());
        assert_eq!(fetcher.calls(), 3);
        assert_eq!(fetcher.max_in_flight(), 1);
    }
}
