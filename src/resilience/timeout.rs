//! Timeout policy: race an operation against a deadline.

use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::time::Duration;

use futures::FutureExt;
use tokio::time::Instant;
use tracing::warn;

use crate::cancellation::CancellationToken;
use crate::error::{Cancelled, DispatchError, DispatchResult};
use crate::outcome::{metadata_keys, Outcome};

/// Bounds an operation's wall-clock time. The operation runs under a child
/// token; on timeout the child is cancelled so in-flight work the operation
/// spawned can stop cooperatively, and a timeout failure is returned with
/// `timeout_ms` and `elapsed_ms` metadata. Completed outcomes get
/// `elapsed_ms` as well.
#[derive(Debug, Clone)]
pub struct TimeoutPolicy {
    timeout: Duration,
}

impl TimeoutPolicy {
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Run the operation under this policy. Cancellation of the caller's
    /// token wins over both completion and the deadline.
    pub async fn execute<T, F, Fut>(
        &self,
        operation: F,
        token: &CancellationToken,
    ) -> DispatchResult<Outcome<T>>
    where
        F: FnOnce(CancellationToken) -> Fut,
        Fut: Future<Output = DispatchResult<Outcome<T>>>,
    {
        if token.is_cancelled() {
            return Err(Cancelled);
        }

        let child = token.child();
        let started = Instant::now();
        let run = AssertUnwindSafe(operation(child.clone())).catch_unwind();

        tokio::select! {
            _ = token.cancelled() => Err(Cancelled),
            result = run => {
                let elapsed_ms = started.elapsed().as_millis() as u64;
                let outcome = match result {
                    Ok(Ok(outcome)) => outcome,
                    Ok(Err(Cancelled)) => return Err(Cancelled),
                    Err(panic) => Outcome::failure(DispatchError::from_panic(panic)),
                };
                Ok(outcome.with_metadata(metadata_keys::ELAPSED_MS, elapsed_ms))
            }
            _ = tokio::time::sleep(self.timeout) => {
                // Stop whatever the operation left running.
                child.cancel();
                let timeout_ms = self.timeout.as_millis() as u64;
                let elapsed_ms = started.elapsed().as_millis() as u64;
                warn!(timeout_ms, "Operation timed out");
                Ok(Outcome::failure(DispatchError::timeout(timeout_ms, elapsed_ms))
                    .with_metadata(metadata_keys::TIMEOUT_MS, timeout_ms)
                    .with_metadata(metadata_keys::ELAPSED_MS, elapsed_ms))
            }
        }
    }
}
