//! Hierarchical cooperative cancellation.
//!
//! A [`CancellationToken`] is a cheap, cloneable handle to a node in a token
//! tree. Cancelling a node cancels every live descendant exactly once;
//! cancelling a descendant never affects its parent or siblings.
//!
//! ## Token Tree
//!
//! Children keep a strong reference to their parent, parents keep only weak
//! references to their children. A subtree is therefore reclaimed as soon as
//! nobody holds a handle to it, while a live child keeps the chain of ancestors
//! (and their deadlines) alive.
//!
//! ## Deadlines
//!
//! [`CancellationToken::child_with_timeout`] derives a token that is cancelled
//! with [`CancelReason::DeadlineExceeded`] once its timeout elapses, measured
//! from its own creation. Whichever of parent cancellation and own deadline
//! happens first wins.
//!
//! ## Waking Blocked Threads
//!
//! Blocking primitives register a callback with [`CancellationToken::on_cancel`]
//! so that a thread parked on their condition variable is woken when the token
//! fires. Callbacks run on the cancelling thread after the token's mutex has
//! been released.

use std::{
    sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError, Weak},
    time::{Duration, Instant},
};

use crate::deadline::DeadlineTimer;

/// Why a token was cancelled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CancelReason {
    /// [`CancellationToken::cancel`] was called on the token or an ancestor.
    Cancelled,
    /// The deadline of the token or an ancestor expired.
    DeadlineExceeded,
}

impl std::fmt::Display for CancelReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CancelReason::Cancelled => f.write_str("operation cancelled"),
            CancelReason::DeadlineExceeded => f.write_str("deadline exceeded"),
        }
    }
}

impl std::error::Error for CancelReason {}

/// A handle to a node in a cancellation tree.
///
/// Clones share the same node: cancelling any clone cancels them all.
/// Use [`child`](Self::child) or [`child_with_timeout`](Self::child_with_timeout)
/// to derive an independent subtree.
#[derive(Clone)]
pub struct CancellationToken(Arc<TokenNode>);

impl CancellationToken {
    /// Creates a new root token in the active state.
    pub fn new() -> CancellationToken {
        CancellationToken(TokenNode::new_root())
    }

    /// Derives a child token without a deadline.
    ///
    /// If this token is already cancelled, the child starts out cancelled with
    /// the same reason.
    pub fn child(&self) -> CancellationToken {
        CancellationToken(self.0.create_child(None))
    }

    /// Derives a child token that cancels itself once `timeout` elapses.
    ///
    /// The deadline is relative to the moment of this call and independent of
    /// any ancestor deadline. A timeout too large to be represented as an
    /// `Instant` behaves like [`child`](Self::child).
    pub fn child_with_timeout(&self, timeout: Duration) -> CancellationToken {
        let deadline = Instant::now().checked_add(timeout);
        let node = self.0.create_child(deadline);
        if let Some(deadline) = deadline {
            if !node.is_cancelled() {
                DeadlineTimer::global().schedule(deadline, Arc::downgrade(&node));
            }
        }
        CancellationToken(node)
    }

    /// Cancels this token and, transitively, all of its live descendants.
    ///
    /// Cancelling an already cancelled token is a no-op.
    pub fn cancel(&self) {
        self.0.cancel(CancelReason::Cancelled);
    }

    /// Returns `true` once the token has been cancelled.
    pub fn is_cancelled(&self) -> bool {
        self.0.is_cancelled()
    }

    /// Returns the cancellation reason, or `None` while the token is active.
    pub fn reason(&self) -> Option<CancelReason> {
        self.0.lock_state().reason
    }

    /// Returns the deadline this token was created with, if any.
    ///
    /// Ancestor deadlines are not reflected here.
    pub fn deadline(&self) -> Option<Instant> {
        self.0.deadline
    }

    /// Blocks the calling thread until the token is cancelled.
    pub fn wait(&self) -> CancelReason {
        let mut state = self.0.lock_state();
        loop {
            if let Some(reason) = state.reason {
                return reason;
            }
            state = self
                .0
                .cancelled
                .wait(state)
                .unwrap_or_else(PoisonError::into_inner);
        }
    }

    /// Blocks until the token is cancelled or `timeout` elapses.
    ///
    /// Returns the cancellation reason, or `None` on timeout.
    pub fn wait_timeout(&self, timeout: Duration) -> Option<CancelReason> {
        let state = self.0.lock_state();
        let (state, _) = self
            .0
            .cancelled
            .wait_timeout_while(state, timeout, |state| state.reason.is_none())
            .unwrap_or_else(PoisonError::into_inner);
        state.reason
    }

    /// Registers `f` to be called once when the token is cancelled.
    ///
    /// If the token is already cancelled, `f` runs immediately on the calling
    /// thread. Dropping the returned [`CancelListener`] unregisters `f` if it
    /// has not run yet.
    ///
    /// `f` runs on the cancelling thread, after the token's internal mutex has
    /// been released. It must not block.
    pub fn on_cancel<F>(&self, f: F) -> CancelListener
    where
        F: FnOnce() + Send + 'static,
    {
        let id = {
            let mut state = self.0.lock_state();
            if state.reason.is_none() {
                let id = state.next_listener_id;
                state.next_listener_id += 1;
                state.listeners.push((id, Box::new(f)));
                Some(id)
            } else {
                drop(state);
                f();
                None
            }
        };
        CancelListener {
            node: self.0.clone(),
            id,
        }
    }

    /// Returns `true` if both handles refer to the same token.
    pub fn same_token(&self, other: &CancellationToken) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }

    #[cfg(test)]
    pub(crate) fn node(&self) -> &Arc<TokenNode> {
        &self.0
    }
}

impl Default for CancellationToken {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for CancellationToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CancellationToken")
            .field("reason", &self.reason())
            .field("deadline", &self.0.deadline)
            .finish_non_exhaustive()
    }
}

/// RAII registration of a cancellation callback.
///
/// Unregisters the callback when dropped.
#[must_use = "dropping the listener unregisters the callback"]
pub struct CancelListener {
    node: Arc<TokenNode>,
    id: Option<u64>,
}

impl Drop for CancelListener {
    fn drop(&mut self) {
        if let Some(id) = self.id.take() {
            self.node.remove_listener(id);
        }
    }
}

type ListenerFn = Box<dyn FnOnce() + Send>;

#[derive(Default)]
struct TokenState {
    reason: Option<CancelReason>,
    children: Vec<Weak<TokenNode>>,
    listeners: Vec<(u64, ListenerFn)>,
    next_listener_id: u64,
}

/// A node in the cancellation tree.
pub(crate) struct TokenNode {
    state: Mutex<TokenState>,
    /// Notified (broadcast) when the node transitions to cancelled.
    cancelled: Condvar,
    deadline: Option<Instant>,
    /// Kept alive so that ancestor deadlines still fire while a child exists.
    _parent: Option<Arc<TokenNode>>,
}

impl TokenNode {
    fn new_root() -> Arc<TokenNode> {
        Arc::new(TokenNode {
            state: Mutex::new(TokenState::default()),
            cancelled: Condvar::new(),
            deadline: None,
            _parent: None,
        })
    }

    fn create_child(self: &Arc<Self>, deadline: Option<Instant>) -> Arc<TokenNode> {
        let mut parent_state = self.lock_state();
        let child = Arc::new(TokenNode {
            state: Mutex::new(TokenState {
                reason: parent_state.reason,
                ..Default::default()
            }),
            cancelled: Condvar::new(),
            deadline,
            _parent: Some(self.clone()),
        });
        if parent_state.reason.is_none() {
            parent_state
                .children
                .retain(|child| child.strong_count() != 0);
            parent_state.children.push(Arc::downgrade(&child));
        }
        child
    }

    pub(crate) fn is_cancelled(&self) -> bool {
        self.lock_state().reason.is_some()
    }

    /// Transitions the node to cancelled and propagates to live children.
    ///
    /// Only the first call has an effect.
    pub(crate) fn cancel(&self, reason: CancelReason) {
        let (children, listeners) = {
            let mut state = self.lock_state();
            if state.reason.is_some() {
                return;
            }
            state.reason = Some(reason);
            (
                std::mem::take(&mut state.children),
                std::mem::take(&mut state.listeners),
            )
        };

        self.cancelled.notify_all();

        for (_, listener) in listeners {
            listener();
        }

        for child in children {
            if let Some(child) = child.upgrade() {
                child.cancel(reason);
            }
        }
    }

    fn remove_listener(&self, id: u64) {
        // Absent once the token fired: the listener list was taken by `cancel`.
        let removed = {
            let mut state = self.lock_state();
            state
                .listeners
                .iter()
                .position(|(lid, _)| *lid == id)
                .map(|pos| state.listeners.swap_remove(pos))
        };
        // The callback may own the last handle to another primitive; release
        // it outside of the token lock.
        drop(removed);
    }

    fn lock_state(&self) -> MutexGuard<'_, TokenState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
