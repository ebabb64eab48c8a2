//! Producers that feed a bounded buffer from an iterator.
//!
//! A producer owns the closing of its sink: once the source is exhausted it
//! closes the buffer, which is how downstream consumers learn that no more
//! items will arrive. A producer stopped by cancellation leaves the sink open;
//! consumers observe the same token and stop on their own.
//!
//! Sources may be infinite (`std::iter::repeat`), in which case only
//! cancellation or a closed sink ends the producer.

use std::{
    io,
    panic,
    thread::{self, JoinHandle},
};

use sluice_sync::{BoundedBuffer, CancelReason, CancellationToken, bounded_buffer::PutError};

/// Why a producer stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GeneratorStop {
    /// The source ran out and the sink was closed.
    Exhausted,
    /// The token was cancelled. The sink was left open.
    Cancelled(CancelReason),
    /// Somebody else closed the sink.
    SinkClosed,
}

/// Final report of a producer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GeneratorExit {
    /// Number of items accepted by the sink.
    pub sent: usize,
    pub stop: GeneratorStop,
}

/// Pushes every item of `items` into `sink`, blocking while the sink is full.
///
/// Runs on the calling thread. Stops early when `token` is cancelled or the
/// sink is closed; the item in hand at that point is dropped. On exhaustion
/// the sink is closed, so `produce` must be the only writer of `sink`.
///
/// If the source panics the sink is closed before the panic propagates, so
/// consumers drain what was sent and stop.
pub fn produce<I>(items: I, sink: &BoundedBuffer<I::Item>, token: &CancellationToken) -> GeneratorExit
where
    I: IntoIterator,
    I::Item: Send + 'static,
{
    let _close_on_unwind = CloseOnUnwind(sink);
    let mut sent = 0;
    for item in items {
        if let Some(reason) = token.reason() {
            log::debug!("producer cancelled ({reason}) after {sent} item(s)");
            return GeneratorExit {
                sent,
                stop: GeneratorStop::Cancelled(reason),
            };
        }
        match sink.put_until(item, token) {
            Ok(()) => sent += 1,
            Err(PutError::Cancelled(_, reason)) => {
                log::debug!("producer cancelled ({reason}) after {sent} item(s)");
                return GeneratorExit {
                    sent,
                    stop: GeneratorStop::Cancelled(reason),
                };
            }
            Err(PutError::Closed(_)) => {
                log::debug!("producer sink closed after {sent} item(s)");
                return GeneratorExit {
                    sent,
                    stop: GeneratorStop::SinkClosed,
                };
            }
        }
    }

    sink.close();
    log::debug!("producer exhausted after {sent} item(s)");
    GeneratorExit {
        sent,
        stop: GeneratorStop::Exhausted,
    }
}

struct CloseOnUnwind<'a, T>(&'a BoundedBuffer<T>);

impl<T> Drop for CloseOnUnwind<'_, T> {
    fn drop(&mut self) {
        if thread::panicking() {
            log::warn!("producer source panicked, closing its sink");
            self.0.close();
        }
    }
}

/// A producer running on its own named thread.
pub struct Generator {
    name: String,
    handle: JoinHandle<GeneratorExit>,
}

impl Generator {
    /// Starts a thread named `name` that runs [`produce`] over `items`.
    pub fn spawn<I>(
        name: impl Into<String>,
        items: I,
        sink: BoundedBuffer<I::Item>,
        token: CancellationToken,
    ) -> io::Result<Generator>
    where
        I: IntoIterator + Send + 'static,
        I::Item: Send + 'static,
    {
        let name = name.into();
        let handle = thread::Builder::new()
            .name(name.clone())
            .spawn(move || produce(items, &sink, &token))?;
        Ok(Generator { name, handle })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }

    /// Waits for the producer to stop. A panic on the producer thread is
    /// resumed on the caller.
    pub fn join(self) -> GeneratorExit {
        self.handle
            .join()
            .unwrap_or_else(|payload| panic::resume_unwind(payload))
    }
}

impl std::fmt::Debug for Generator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Generator")
            .field("name", &self.name)
            .field("finished", &self.is_finished())
            .finish()
    }
}
