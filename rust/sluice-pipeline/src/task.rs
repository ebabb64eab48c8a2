//! Records that flow from the workers to the aggregator.

use crate::fetcher::FetchError;

/// The result of processing a single task.
///
/// Produced by exactly one worker, consumed by exactly one aggregator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaskOutcome<T, P> {
    pub task: T,
    pub result: Result<P, FetchError>,
    /// Index of the worker that processed the task.
    pub worker: usize,
}

impl<T, P> TaskOutcome<T, P> {
    pub fn is_success(&self) -> bool {
        self.result.is_ok()
    }
}

/// A task whose fetch failed, as reported by the aggregator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaskFailure<T> {
    pub task: T,
    pub error: FetchError,
}

impl<T: std::fmt::Debug> std::fmt::Display for TaskFailure<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:?}: {}", self.task, self.error)
    }
}
