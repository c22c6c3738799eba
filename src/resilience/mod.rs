//! # Resilience Policies
//!
//! Retry and timeout policies wrapping dispatch operations. An operation is
//! a closure taking a [`CancellationToken`] and producing a
//! `DispatchResult<Outcome<T>>`; policies re-run it, race it against a
//! deadline, and record what happened in outcome metadata. Cancellation is
//! never retried and never converted into a failure.

pub mod retry;
pub mod timeout;

pub use retry::{RetryPolicy, RetryPolicyConfig};
pub use timeout::TimeoutPolicy;

use std::future::Future;

use crate::cancellation::CancellationToken;
use crate::error::DispatchResult;
use crate::outcome::Outcome;

/// A retry or timeout policy behind one dispatchable surface.
#[derive(Debug, Clone)]
pub enum ResultPolicy {
    Retry(RetryPolicy),
    Timeout(TimeoutPolicy),
}

impl ResultPolicy {
    /// Run an operation under this policy.
    pub async fn execute<T, F, Fut>(
        &self,
        operation: F,
        token: &CancellationToken,
    ) -> DispatchResult<Outcome<T>>
    where
        F: Fn(CancellationToken) -> Fut,
        Fut: Future<Output = DispatchResult<Outcome<T>>>,
    {
        match self {
            Self::Retry(policy) => policy.execute(operation, token).await,
            Self::Timeout(policy) => policy.execute(operation, token).await,
        }
    }
}

impl From<RetryPolicy> for ResultPolicy {
    fn from(policy: RetryPolicy) -> Self {
        Self::Retry(policy)
    }
}

impl From<TimeoutPolicy> for ResultPolicy {
    fn from(policy: TimeoutPolicy) -> Self {
        Self::Timeout(policy)
    }
}
