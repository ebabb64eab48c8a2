//! The assembled producer → worker pool → aggregator pipeline.

use std::{
    panic::{self, AssertUnwindSafe},
    thread,
    time::{Duration, Instant},
};

use sluice_common::{Result, error::Error, verify_arg};
use sluice_sync::{BoundedBuffer, CancelReason, CancellationToken};

use crate::{
    aggregator::Aggregator,
    config::PipelineConfig,
    fetcher::Fetcher,
    generator::{GeneratorExit, GeneratorStop, produce},
    task::TaskFailure,
    worker_pool::{WorkerPool, WorkerReport},
};

/// How a pipeline run ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Termination {
    /// Every task was processed.
    Completed,
    /// The caller's token was cancelled.
    Cancelled,
    /// The pipeline timeout, or a deadline of the caller's token, elapsed.
    TimedOut,
}

impl Termination {
    fn from_reason(reason: Option<CancelReason>) -> Termination {
        match reason {
            None => Termination::Completed,
            Some(CancelReason::Cancelled) => Termination::Cancelled,
            Some(CancelReason::DeadlineExceeded) => Termination::TimedOut,
        }
    }
}

impl std::fmt::Display for Termination {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Termination::Completed => "completed",
            Termination::Cancelled => "cancelled",
            Termination::TimedOut => "timed out",
        };
        f.write_str(s)
    }
}

/// The result of [`Pipeline::run`].
#[derive(Debug, Clone)]
pub struct PipelineOutput<A, T> {
    /// The fold of every successful payload. Partial if the run was stopped
    /// early.
    pub value: A,
    /// Number of successful tasks folded into `value`.
    pub completed: usize,
    pub failures: Vec<TaskFailure<T>>,
    /// Number of tasks handed to the workers.
    pub produced: usize,
    pub termination: Termination,
    pub workers: Vec<WorkerReport>,
    pub elapsed: Duration,
}

impl<A, T> PipelineOutput<A, T> {
    /// `true` if every task was processed and none failed.
    pub fn is_success(&self) -> bool {
        self.termination == Termination::Completed && self.failures.is_empty()
    }

    /// Escalates task failures into an error.
    ///
    /// A cancelled or timed-out run with no failures is still `Ok`: stopping
    /// early is a normal outcome, and `value` holds the partial aggregate.
    pub fn into_result(self) -> Result<A> {
        match self.failures.first() {
            None => Ok(self.value),
            Some(first) => Err(Error::tasks_failed(
                self.failures.len(),
                first.error.to_string(),
            )),
        }
    }
}

/// Configures a [`Pipeline`].
pub struct PipelineBuilder<F> {
    fetcher: F,
    config: PipelineConfig,
    token: Option<CancellationToken>,
}

impl<F: Fetcher> PipelineBuilder<F> {
    pub fn workers(mut self, workers: usize) -> Self {
        self.config.workers = workers;
        self
    }

    pub fn task_capacity(mut self, capacity: usize) -> Self {
        self.config.task_capacity = capacity;
        self
    }

    pub fn result_capacity(mut self, capacity: usize) -> Self {
        self.config.result_capacity = capacity;
        self
    }

    /// Bounds the whole run. The bound applies to a token derived from the
    /// caller's, so the caller's token is never cancelled by it.
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.config.timeout_ms = Some(u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX));
        self
    }

    /// The caller's token. Cancelling it stops the run.
    pub fn token(mut self, token: CancellationToken) -> Self {
        self.token = Some(token);
        self
    }

    /// Replaces all sizing and limits at once.
    pub fn with_config(mut self, config: PipelineConfig) -> Self {
        self.config = config;
        self
    }

    /// Validates the configuration and binds the task source.
    pub fn build<I>(self, source: I) -> Result<Pipeline<F, I::IntoIter>>
    where
        I: IntoIterator<Item = F::Target>,
    {
        self.config.validate()?;
        verify_arg!(timeout_ms, self.config.timeout_ms.is_none_or(|ms| ms > 0));
        Ok(Pipeline {
            fetcher: self.fetcher,
            source: source.into_iter(),
            config: self.config,
            token: self.token.unwrap_or_default(),
        })
    }
}

/// A generator feeding a pool of workers whose outcomes are folded by an
/// aggregator.
///
/// ```
/// use sluice_pipeline::{FetchError, Pipeline, fetch_fn};
///
/// let pipeline = Pipeline::builder(fetch_fn(|n: &u64| Ok::<_, FetchError>(n * n)))
///     .workers(3)
///     .build(1..=4u64)
///     .unwrap();
/// let output = pipeline.run(0u64, |sum, sq| sum + sq);
/// assert_eq!(output.value, 30);
/// ```
pub struct Pipeline<F, I> {
    fetcher: F,
    source: I,
    config: PipelineConfig,
    token: CancellationToken,
}

impl<F: Fetcher> Pipeline<F, ()> {
    pub fn builder(fetcher: F) -> PipelineBuilder<F> {
        PipelineBuilder {
            fetcher,
            config: PipelineConfig::default(),
            token: None,
        }
    }
}

impl<F, I> Pipeline<F, I>
where
    F: Fetcher,
    F::Target: 'static,
    F::Payload: 'static,
    I: Iterator<Item = F::Target> + Send,
{
    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// Runs the pipeline to completion, cancellation or timeout.
    ///
    /// The producer and the workers run on their own threads, the
    /// aggregation runs on the calling thread. Returns once every thread has
    /// stopped. Per-task failures do not stop the run.
    ///
    /// # Panics
    ///
    /// A panic in the task source or in `combine` stops the run and is
    /// resumed on the caller once every pipeline thread has exited.
    pub fn run<A, C>(self, init: A, combine: C) -> PipelineOutput<A, F::Target>
    where
        C: FnMut(A, F::Payload) -> A,
    {
        let start = Instant::now();
        let Pipeline {
            fetcher,
            source,
            config,
            token,
        } = self;

        // The timeout bounds a derived token, never the caller's.
        let token = match config.timeout() {
            Some(timeout) => token.child_with_timeout(timeout),
            None => token.child(),
        };
        let tasks = BoundedBuffer::new(config.task_capacity);
        let results = BoundedBuffer::new(config.result_capacity);
        let pool = WorkerPool::new(config.workers);

        log::debug!(
            "pipeline: {} worker(s), capacities {}/{}, timeout {:?}",
            config.workers,
            config.task_capacity,
            config.result_capacity,
            config.timeout()
        );

        let (producer, pool_report, aggregate) = thread::scope(|s| {
            let producer_handle = thread::Builder::new()
                .name("sluice-producer".to_string())
                .spawn_scoped(s, || produce(source, &tasks, &token))
                .expect("spawn producer thread");
            let pool_handle = s.spawn(|| pool.run(&fetcher, &tasks, &results, &token));

            let aggregate = panic::catch_unwind(AssertUnwindSafe(|| {
                Aggregator::new(init, combine).drain(&results)
            }))
            .unwrap_or_else(|payload| {
                // Workers blocked on a full result buffer only leave through the token.
                log::warn!("pipeline: aggregation panicked, cancelling the run");
                token.cancel();
                panic::resume_unwind(payload)
            });

            (
                producer_handle
                    .join()
                    .unwrap_or_else(|payload| panic::resume_unwind(payload)),
                pool_handle
                    .join()
                    .unwrap_or_else(|payload| panic::resume_unwind(payload)),
                aggregate,
            )
        });

        let termination = Termination::from_reason(
            pool_report.cancelled().or(producer_cancelled(&producer)),
        );
        let elapsed = start.elapsed();
        log::info!(
            "pipeline {termination}: {} completed, {} failed, {} produced in {elapsed:?}",
            aggregate.completed,
            aggregate.failures.len(),
            producer.sent,
        );

        PipelineOutput {
            value: aggregate.value,
            completed: aggregate.completed,
            failures: aggregate.failures,
            produced: producer.sent,
            termination,
            workers: pool_report.workers,
            elapsed,
        }
    }
}

fn producer_cancelled(exit: &GeneratorExit) -> Option<CancelReason> {
    match exit.stop {
        GeneratorStop::Cancelled(reason) => Some(reason),
        GeneratorStop::Exhausted | GeneratorStop::SinkClosed => None,
    }
}
