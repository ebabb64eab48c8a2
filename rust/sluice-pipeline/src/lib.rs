//! A cancellable fan-out/fan-in worker pipeline.
//!
//! The pipeline moves work through three kinds of stages connected by
//! [`BoundedBuffer`](sluice_sync::BoundedBuffer)s:
//!
//! 1. A producer ([`generator`]) feeds tasks into a bounded task buffer and
//!    closes it once the source is exhausted.
//! 2. A [`worker_pool::WorkerPool`] of N threads pulls tasks, invokes the
//!    external [`fetcher::Fetcher`] once per task and pushes a
//!    [`task::TaskOutcome`] to a shared result buffer. A closer thread closes
//!    the result buffer after the last worker exits.
//! 3. An [`aggregator::Aggregator`] drains the result buffer and folds the
//!    successful values with an associative, commutative combine function.
//!
//! [`pipeline::Pipeline`] wires the three together. A
//! [`CancellationToken`](sluice_sync::CancellationToken) flows from the caller
//! to every stage; a stage-local timeout derives a child token so it bounds
//! that stage only.
//!
//! Per-task failures are data, not errors: they are collected in the output
//! and the pipeline keeps going. Cancellation and timeouts are normal
//! termination paths, reported through [`pipeline::Termination`].

pub mod aggregator;
pub mod config;
pub mod fetcher;
pub mod generator;
pub mod letters;
pub mod pipeline;
pub mod task;
pub mod worker_pool;

pub use aggregator::{Aggregate, Aggregator};
pub use config::PipelineConfig;
pub use fetcher::{FetchError, Fetcher, FetcherExt, fetch_fn};
pub use pipeline::{Pipeline, PipelineBuilder, PipelineOutput, Termination};
pub use task::{TaskFailure, TaskOutcome};
pub use worker_pool::{PoolReport, WorkerExit, WorkerPool, WorkerReport, WorkerState};
