//! The fan-in stage: folds task outcomes into a single value.

use sluice_sync::BoundedBuffer;

use crate::task::{TaskFailure, TaskOutcome};

/// Folds successful payloads with a combine function and collects failures.
///
/// Results arrive in completion order, which is nondeterministic, so
/// `combine` must be associative and commutative for the aggregate to be
/// reproducible.
pub struct Aggregator<A, C> {
    init: A,
    combine: C,
}

/// The final state of an [`Aggregator`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Aggregate<A, T> {
    pub value: A,
    /// Number of successful outcomes folded into `value`.
    pub completed: usize,
    /// Failed outcomes, in arrival order.
    pub failures: Vec<TaskFailure<T>>,
}

impl<A, C> Aggregator<A, C> {
    pub fn new(init: A, combine: C) -> Self {
        Aggregator { init, combine }
    }

    /// Drains `results` until it is closed and empty, then returns the
    /// aggregate.
    ///
    /// The aggregator does not watch any cancellation token: whoever writes
    /// the result buffer is responsible for closing it, and every outcome
    /// pushed before the close is folded.
    pub fn drain<T, P>(self, results: &BoundedBuffer<TaskOutcome<T, P>>) -> Aggregate<A, T>
    where
        C: FnMut(A, P) -> A,
    {
        self.fold(results.iter())
    }

    /// Folds every outcome produced by `outcomes`.
    pub fn fold<T, P, I>(self, outcomes: I) -> Aggregate<A, T>
    where
        C: FnMut(A, P) -> A,
        I: IntoIterator<Item = TaskOutcome<T, P>>,
    {
        let Aggregator {
            init: mut value,
            mut combine,
        } = self;
        let mut completed = 0;
        let mut failures = Vec::new();

        for outcome in outcomes {
            match outcome.result {
                Ok(payload) => {
                    value = combine(value, payload);
                    completed += 1;
                }
                Err(error) => {
                    log::debug!("aggregator: task failed: {error}");
                    failures.push(TaskFailure {
                        task: outcome.task,
                        error,
                    });
                }
            }
        }

        log::debug!(
            "aggregator: {completed} completed, {} failed",
            failures.len()
        );
        Aggregate {
            value,
            completed,
            failures,
        }
    }
}

impl<A, T> Aggregate<A, T> {
    pub fn failed(&self) -> usize {
        self.failures.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fetcher::FetchError;
    use std::thread;

    fn ok(task: u32, value: u64) -> TaskOutcome<u32, u64> {
        TaskOutcome {
            task,
            result: Ok(value),
            worker: 0,
        }
    }

    #[test]
    fn test_fold_sums_and_collects_failures() {
        let outcomes = vec![
            ok(0, 1),
            TaskOutcome {
                task: 1,
                result: Err(FetchError::status(404)),
                worker: 1,
            },
            ok(2, 2),
            ok(3, 3),
        ];

        let aggregate = Aggregator::new(0u64, |a: u64, b: u64| a + b).fold(outcomes);
        assert_eq!(aggregate.value, 6);
        assert_eq!(aggregate.completed, 3);
        assert_eq!(aggregate.failed(), 1);
        assert_eq!(
            aggregate.failures[0],
            TaskFailure {
                task: 1,
                error: FetchError::Status { status: 404 }
            }
        );
    }

    #[test]
    fn test_empty_input_yields_init() {
        let results = BoundedBuffer::<TaskOutcome<u32, u64>>::new(1);
        results.close();
        let aggregate = Aggregator::new(7u64, |a: u64, b: u64| a + b).drain(&results);
        assert_eq!(aggregate.value, 7);
        assert_eq!(aggregate.completed, 0);
        assert!(aggregate.failures.is_empty());
    }

    #[test]
    fn test_drain_waits_for_close() {
        let results = BoundedBuffer::new(2);
        thread::scope(|s| {
            s.spawn(|| {
                for i in 0..10 {
                    results.put(ok(i, u64::from(i))).unwrap();
                }
                results.close();
            });
            let aggregate = Aggregator::new(Vec::new(), |mut seen: Vec<u64>, v: u64| {
                seen.push(v);
                seen
            })
            .drain(&results);
            assert_eq!(aggregate.value, (0..10).collect::<Vec<_>>());
        });
    }
}
