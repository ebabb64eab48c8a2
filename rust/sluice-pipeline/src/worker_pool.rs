//! A fixed-size pool of worker threads between two bounded buffers.
//!
//! Each worker loops through a small state machine:
//!
//! ```text
//!   Idle --task--> Fetching --done--> Emitting --pushed--> Idle
//!     |                                   |
//!     +--closed & drained / cancelled-----+--cancelled--> Exited
//! ```
//!
//! Workers pull from the task buffer with [`BoundedBuffer::get_until`], so an
//! idle worker leaves promptly when the token fires. The token is also
//! checked at the top of each iteration: a worker never starts a new fetch
//! once cancellation has been observed. A fetch already in flight runs to
//! completion.
//!
//! The pool owns the closing of the result buffer. Every worker holds a
//! [`WaitGroup`] guard, and a dedicated closer thread waits for the group to
//! drain and then closes the results exactly once. The guard is released
//! during unwinding too, so the result buffer is closed even if a worker
//! panics.

use std::{
    any::Any,
    panic::{self, AssertUnwindSafe},
    thread,
    time::Duration,
};

use sluice_sync::{
    BoundedBuffer, CancelReason, CancellationToken, WaitGroup,
    bounded_buffer::{GetError, PutError},
};

use crate::{
    fetcher::{FetchError, Fetcher},
    task::TaskOutcome,
};

/// Lifecycle state of a single worker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerState {
    /// Waiting for a task.
    Idle,
    /// Running the fetcher.
    Fetching,
    /// Pushing the outcome to the result buffer.
    Emitting,
    Exited,
}

/// Why a worker left its loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerExit {
    /// The task buffer was closed and drained.
    Drained,
    Cancelled(CancelReason),
}

/// What a single worker did before exiting.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WorkerReport {
    pub worker: usize,
    /// Number of fetches performed, successful or not.
    pub processed: usize,
    /// Number of fetches that failed.
    pub failed: usize,
    pub exit: WorkerExit,
}

/// Per-worker reports of one [`WorkerPool::run`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PoolReport {
    pub workers: Vec<WorkerReport>,
}

impl PoolReport {
    pub fn processed(&self) -> usize {
        self.workers.iter().map(|w| w.processed).sum()
    }

    pub fn failed(&self) -> usize {
        self.workers.iter().map(|w| w.failed).sum()
    }

    /// The cancellation reason observed by any worker, if the pool was
    /// stopped early.
    pub fn cancelled(&self) -> Option<CancelReason> {
        self.workers.iter().find_map(|w| match w.exit {
            WorkerExit::Cancelled(reason) => Some(reason),
            WorkerExit::Drained => None,
        })
    }
}

/// A fixed number of workers applying a [`Fetcher`] to every task.
#[derive(Debug, Clone)]
pub struct WorkerPool {
    workers: usize,
    timeout: Option<Duration>,
    name: String,
}

impl WorkerPool {
    /// Creates a pool with `workers` threads.
    ///
    /// # Panics
    ///
    /// Panics if `workers` is zero.
    pub fn new(workers: usize) -> WorkerPool {
        assert!(workers > 0, "worker pool needs at least one worker");
        WorkerPool {
            workers,
            timeout: None,
            name: "sluice-worker".to_string(),
        }
    }

    /// Bounds each [`run`](Self::run) by `timeout`.
    ///
    /// The pool derives a child of the caller's token with this timeout, so
    /// the deadline stops this pool only. The caller's token is unaffected.
    pub fn with_timeout(mut self, timeout: Duration) -> WorkerPool {
        self.timeout = Some(timeout);
        self
    }

    /// Prefix of the worker thread names. Threads are named `<prefix>-<index>`.
    pub fn with_name(mut self, name: impl Into<String>) -> WorkerPool {
        self.name = name.into();
        self
    }

    pub fn workers(&self) -> usize {
        self.workers
    }

    pub fn timeout(&self) -> Option<Duration> {
        self.timeout
    }

    /// Runs the workers until the task buffer is closed and drained, or the
    /// token is cancelled. Blocks the calling thread until every worker has
    /// exited.
    ///
    /// `results` is closed once all workers have exited, on every path. The
    /// pool must be the only writer of `results`.
    pub fn run<F>(
        &self,
        fetcher: &F,
        tasks: &BoundedBuffer<F::Target>,
        results: &BoundedBuffer<TaskOutcome<F::Target, F::Payload>>,
        token: &CancellationToken,
    ) -> PoolReport
    where
        F: Fetcher,
        F::Target: 'static,
        F::Payload: 'static,
    {
        let token = match self.timeout {
            Some(timeout) => token.child_with_timeout(timeout),
            None => token.clone(),
        };
        let token = &token;
        let group = WaitGroup::new();

        log::debug!("{}: starting {} worker(s)", self.name, self.workers);
        let workers = thread::scope(|s| {
            let handles = (0..self.workers)
                .map(|index| {
                    let guard = group.enter();
                    thread::Builder::new()
                        .name(format!("{}-{index}", self.name))
                        .spawn_scoped(s, move || {
                            let _guard = guard;
                            run_worker(index, fetcher, tasks, results, token)
                        })
                        .expect("spawn worker thread")
                })
                .collect::<Vec<_>>();

            s.spawn(|| {
                group.wait();
                results.close();
                log::debug!("{}: all workers exited, results closed", self.name);
            });

            handles
                .into_iter()
                .map(|handle| {
                    handle
                        .join()
                        .unwrap_or_else(|payload| panic::resume_unwind(payload))
                })
                .collect::<Vec<_>>()
        });

        PoolReport { workers }
    }
}

fn run_worker<F: Fetcher>(
    index: usize,
    fetcher: &F,
    tasks: &BoundedBuffer<F::Target>,
    results: &BoundedBuffer<TaskOutcome<F::Target, F::Payload>>,
    token: &CancellationToken,
) -> WorkerReport
where
    F::Target: 'static,
    F::Payload: 'static,
{
    let mut report = WorkerReport {
        worker: index,
        processed: 0,
        failed: 0,
        exit: WorkerExit::Drained,
    };
    let mut state = WorkerState::Idle;

    report.exit = loop {
        if let Some(reason) = token.reason() {
            break WorkerExit::Cancelled(reason);
        }

        let task = match tasks.get_until(token) {
            Ok(task) => task,
            Err(GetError::Closed) => break WorkerExit::Drained,
            Err(GetError::Cancelled(reason)) => break WorkerExit::Cancelled(reason),
        };

        state = transition(index, state, WorkerState::Fetching);
        let result = fetch_contained(fetcher, &task);
        report.processed += 1;
        if let Err(error) = &result {
            report.failed += 1;
            log::warn!("worker {index}: task failed: {error}");
        }

        state = transition(index, state, WorkerState::Emitting);
        let outcome = TaskOutcome {
            task,
            result,
            worker: index,
        };
        match results.put_until(outcome, token) {
            Ok(()) => state = transition(index, state, WorkerState::Idle),
            Err(PutError::Cancelled(_, reason)) => break WorkerExit::Cancelled(reason),
            Err(PutError::Closed(_)) => {
                panic!("worker {index}: result buffer closed while workers are running")
            }
        }
    };

    transition(index, state, WorkerState::Exited);
    report
}

fn transition(index: usize, from: WorkerState, to: WorkerState) -> WorkerState {
    log::trace!("worker {index}: {from:?} -> {to:?}");
    to
}

/// Runs the fetch, turning a panic into a per-task failure.
fn fetch_contained<F: Fetcher>(fetcher: &F, target: &F::Target) -> Result<F::Payload, FetchError> {
    panic::catch_unwind(AssertUnwindSafe(|| fetcher.fetch(target)))
        .unwrap_or_else(|payload| Err(FetchError::Panicked(panic_message(payload.as_ref()))))
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        message.to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic payload".to_string()
    }
}
