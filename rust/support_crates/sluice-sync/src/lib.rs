//! Blocking synchronization primitives for thread-based pipelines.
//!
//! Every primitive in this crate is built from a `Mutex` and one or more
//! `Condvar`s. All waits are condition loops: a woken thread re-checks its
//! predicate before proceeding, so spurious wakeups and multi-waiter races are
//! harmless.
//!
//! # Key Components
//!
//! ## Cancellation
//!
//! - [`cancellation::CancellationToken`] - A hierarchical, cooperative "stop work"
//!   signal. Derived tokens may carry their own deadline, which is enforced by a
//!   single background timer thread (see [`deadline`]).
//!
//! ## Queues and Barriers
//!
//! - [`bounded_buffer::BoundedBuffer`] - A fixed-capacity blocking FIFO with
//!   explicit close and cancellation-aware `put_until`/`get_until`.
//! - [`wait_group::WaitGroup`] - A counting barrier used to detect that a group
//!   of threads has finished.
//!
//! ## Locks and Events
//!
//! - [`rw_lock::ReadWriteLock`] - A writer-preference reader/writer lock.
//! - [`named_events::NamedEventSet`] - Level-triggered named events sharing a
//!   single broadcast condition.
//!
//! # Locking Discipline
//!
//! Each primitive owns a private mutex. No primitive holds its mutex while
//! blocking on a different primitive, and cancellation callbacks run only after
//! the token's own mutex has been released.

pub mod bounded_buffer;
pub mod cancellation;
pub mod deadline;
pub mod named_events;
pub mod rw_lock;
pub mod wait_group;

pub use bounded_buffer::BoundedBuffer;
pub use cancellation::{CancelReason, CancellationToken};
pub use named_events::NamedEventSet;
pub use rw_lock::ReadWriteLock;
pub use wait_group::WaitGroup;
