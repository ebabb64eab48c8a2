//! The external operation performed once per task.

use std::{marker::PhantomData, sync::Arc};

use thiserror::Error;

/// Per-task failure produced by a [`Fetcher`].
///
/// A fetch failure never aborts the pipeline. It travels to the aggregator as
/// part of the task outcome and is reported alongside the aggregate.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FetchError {
    /// The remote end answered with a non-success status.
    #[error("unexpected status {status}")]
    Status { status: u16 },

    /// Reading the target failed.
    #[error("IO error for '{context}': {message}")]
    Io { context: String, message: String },

    #[error("{0}")]
    Failed(String),

    /// The fetcher panicked. The panic was contained to this task.
    #[error("fetch panicked: {0}")]
    Panicked(String),
}

impl FetchError {
    pub fn status(status: u16) -> FetchError {
        FetchError::Status { status }
    }

    pub fn failed(message: impl Into<String>) -> FetchError {
        FetchError::Failed(message.into())
    }

    pub fn io(context: impl Into<String>, error: &std::io::Error) -> FetchError {
        FetchError::Io {
            context: context.into(),
            message: error.to_string(),
        }
    }
}

/// Performs the per-task operation, e.g. fetching a URL or reading a file.
///
/// A fetcher is shared by all workers of a pool, so it must be `Sync`.
/// Implementations may block; a long-running fetch is not interrupted by
/// cancellation, the worker observes cancellation after the call returns.
pub trait Fetcher: Send + Sync {
    type Target: Send;
    type Payload: Send;

    fn fetch(&self, target: &Self::Target) -> Result<Self::Payload, FetchError>;
}

impl<F: Fetcher + ?Sized> Fetcher for &F {
    type Target = F::Target;
    type Payload = F::Payload;

    fn fetch(&self, target: &Self::Target) -> Result<Self::Payload, FetchError> {
        (**self).fetch(target)
    }
}

impl<F: Fetcher + ?Sized> Fetcher for Arc<F> {
    type Target = F::Target;
    type Payload = F::Payload;

    fn fetch(&self, target: &Self::Target) -> Result<Self::Payload, FetchError> {
        (**self).fetch(target)
    }
}

/// Combinators over [`Fetcher`].
pub trait FetcherExt: Fetcher + Sized {
    /// Transforms every successful payload with `map`.
    ///
    /// The mapping runs on the worker thread, right after the fetch, so
    /// expensive per-payload work (parsing, counting) is parallelized along
    /// with the fetch itself.
    fn map_payload<P, M>(self, map: M) -> MapPayload<Self, M>
    where
        M: Fn(Self::Payload) -> P + Send + Sync,
        P: Send,
    {
        MapPayload {
            fetcher: self,
            map,
        }
    }
}

impl<F: Fetcher> FetcherExt for F {}

/// See [`FetcherExt::map_payload`].
#[derive(Debug, Clone)]
pub struct MapPayload<F, M> {
    fetcher: F,
    map: M,
}

impl<F, M, P> Fetcher for MapPayload<F, M>
where
    F: Fetcher,
    M: Fn(F::Payload) -> P + Send + Sync,
    P: Send,
{
    type Target = F::Target;
    type Payload = P;

    fn fetch(&self, target: &Self::Target) -> Result<P, FetchError> {
        self.fetcher.fetch(target).map(&self.map)
    }
}

/// Wraps a closure as a [`Fetcher`].
///
/// ```
/// use sluice_pipeline::{FetchError, Fetcher, fetch_fn};
///
/// let double = fetch_fn(|n: &u32| Ok::<_, FetchError>(n * 2));
/// assert_eq!(double.fetch(&21), Ok(42));
/// ```
pub fn fetch_fn<T, P, F>(f: F) -> FnFetcher<T, P, F>
where
    F: Fn(&T) -> Result<P, FetchError> + Send + Sync,
    T: Send,
    P: Send,
{
    FnFetcher {
        f,
        _types: PhantomData,
    }
}

/// See [`fetch_fn`].
pub struct FnFetcher<T, P, F> {
    f: F,
    _types: PhantomData<fn(&T) -> P>,
}

impl<T, P, F> Fetcher for FnFetcher<T, P, F>
where
    F: Fn(&T) -> Result<P, FetchError> + Send + Sync,
    T: Send,
    P: Send,
{
    type Target = T;
    type Payload = P;

    fn fetch(&self, target: &T) -> Result<P, FetchError> {
        (self.f)(target)
    }
}
