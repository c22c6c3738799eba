//! # Cooperative Cancellation
//!
//! A single cancellation handle is threaded through every async call in the
//! core: dispatch, commit, resilience policies and the transport poll loops
//! all observe the same token. Cancelling it aborts the operation and
//! surfaces as the distinct [`Cancelled`](crate::error::Cancelled) signal,
//! never as a failure outcome.
//!
//! Tokens can be linked: a child is cancelled when any of its ancestors is
//! cancelled or when it is cancelled directly. The transport uses this to
//! bind each subscription loop to both its caller's token and the
//! transport-wide shutdown token.

use std::sync::Arc;

use tokio::sync::watch;

#[derive(Debug)]
struct Signal {
    tx: watch::Sender<bool>,
}

impl Signal {
    fn new() -> Self {
        let (tx, _rx) = watch::channel(false);
        Self { tx }
    }

    fn fire(&self) {
        self.tx.send_replace(true);
    }

    fn fired(&self) -> bool {
        *self.tx.borrow()
    }

    async fn wait(self: Arc<Self>) {
        let mut rx = self.tx.subscribe();
        while !*rx.borrow_and_update() {
            // The sender lives in `self`, which we hold, so `changed` cannot
            // observe a dropped sender here.
            if rx.changed().await.is_err() {
                return;
            }
        }
    }
}

/// Cancellation token with parent linking.
///
/// Cloning shares the same underlying signal; `child` and `linked_with`
/// derive new tokens that also observe their ancestors.
#[derive(Debug, Clone)]
pub struct CancellationToken {
    own: Arc<Signal>,
    ancestors: Vec<Arc<Signal>>,
}

impl CancellationToken {
    /// Create an independent token.
    pub fn new() -> Self {
        Self {
            own: Arc::new(Signal::new()),
            ancestors: Vec::new(),
        }
    }

    /// Derive a token cancelled when `self` is cancelled or when the child
    /// itself is cancelled. Cancelling the child never affects the parent.
    pub fn child(&self) -> Self {
        Self {
            own: Arc::new(Signal::new()),
            ancestors: self.chain().collect(),
        }
    }

    /// Derive a token observing both `self` and `other`, for loops bound to
    /// two shutdown sources at once.
    pub fn linked_with(&self, other: &CancellationToken) -> Self {
        Self {
            own: Arc::new(Signal::new()),
            ancestors: self.chain().chain(other.chain()).collect(),
        }
    }

    /// Request cancellation. Idempotent.
    pub fn cancel(&self) {
        self.own.fire();
    }

    /// Whether this token or any ancestor has been cancelled.
    pub fn is_cancelled(&self) -> bool {
        self.chain().any(|signal| signal.fired())
    }

    /// Wait until this token or any ancestor is cancelled.
    pub async fn cancelled(&self) {
        let waits: Vec<_> = self
            .chain()
            .map(|signal| Box::pin(signal.wait()))
            .collect();
        futures::future::select_all(waits).await;
    }

    fn chain(&self) -> impl Iterator<Item = Arc<Signal>> + '_ {
        self.ancestors
            .iter()
            .cloned()
            .chain(std::iter::once(Arc::clone(&self.own)))
    }
}

impl Default for CancellationToken {
    fn default() -> Self {
        Self::new()
    }
}
