//! Retry policy: sequential re-execution with pluggable delays.

use std::fmt;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

use futures::FutureExt;
use tracing::{debug, warn};

use crate::cancellation::CancellationToken;
use crate::error::{Cancelled, DispatchError, DispatchResult};
use crate::outcome::{metadata_keys, Outcome};

type DelayProvider = Arc<dyn Fn(u32) -> Duration + Send + Sync>;
type FailurePredicate = Arc<dyn Fn(&[DispatchError]) -> bool + Send + Sync>;
type PanicPredicate = Arc<dyn Fn(&DispatchError) -> bool + Send + Sync>;

/// Retry configuration: attempt budget, delay schedule and optional
/// predicates deciding which failures are worth retrying. Without
/// predicates, every failure and every panic is retried.
#[derive(Clone)]
pub struct RetryPolicyConfig {
    /// Total attempts, the first included. At least 1.
    pub max_attempts: u32,
    /// Delay before attempt `n + 1`, given the just-failed attempt `n`.
    pub delay_provider: DelayProvider,
    /// Decides from a failure outcome's errors whether to retry.
    pub retry_on_failure: Option<FailurePredicate>,
    /// Decides from a panic-converted error whether to retry.
    pub retry_on_panic: Option<PanicPredicate>,
}

impl RetryPolicyConfig {
    /// Constant delay between attempts.
    pub fn fixed(max_attempts: u32, delay: Duration) -> Self {
        Self {
            max_attempts,
            delay_provider: Arc::new(move |_| delay),
            retry_on_failure: None,
            retry_on_panic: None,
        }
    }

    /// No delay between attempts.
    pub fn immediate(max_attempts: u32) -> Self {
        Self::fixed(max_attempts, Duration::ZERO)
    }

    /// Delay doubling per attempt: `base`, `2 * base`, `4 * base`, ...
    pub fn exponential(max_attempts: u32, base: Duration) -> Self {
        Self {
            max_attempts,
            delay_provider: Arc::new(move |attempt| {
                base.saturating_mul(1u32 << attempt.saturating_sub(1).min(16))
            }),
            retry_on_failure: None,
            retry_on_panic: None,
        }
    }

    pub fn with_failure_predicate(
        mut self,
        predicate: impl Fn(&[DispatchError]) -> bool + Send + Sync + 'static,
    ) -> Self {
        self.retry_on_failure = Some(Arc::new(predicate));
        self
    }

    pub fn with_panic_predicate(
        mut self,
        predicate: impl Fn(&DispatchError) -> bool + Send + Sync + 'static,
    ) -> Self {
        self.retry_on_panic = Some(Arc::new(predicate));
        self
    }

    pub fn validate(&self) -> Result<(), DispatchError> {
        if self.max_attempts == 0 {
            return Err(DispatchError::configuration(
                "retry max_attempts must be at least 1",
            ));
        }
        Ok(())
    }

    /// Delay to apply after failed attempt `attempt`.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        (self.delay_provider)(attempt)
    }
}

impl fmt::Debug for RetryPolicyConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RetryPolicyConfig")
            .field("max_attempts", &self.max_attempts)
            .field("retry_on_failure", &self.retry_on_failure.is_some())
            .field("retry_on_panic", &self.retry_on_panic.is_some())
            .finish_non_exhaustive()
    }
}

/// Re-runs a failing operation until it succeeds, retry is declined, or the
/// attempt budget is spent. The returned outcome carries the attempt count
/// in `attempts` metadata. Attempts run strictly one at a time.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    config: RetryPolicyConfig,
}

impl RetryPolicy {
    pub fn new(config: RetryPolicyConfig) -> Result<Self, DispatchError> {
        config.validate()?;
        Ok(Self { config })
    }

    pub fn config(&self) -> &RetryPolicyConfig {
        &self.config
    }

    /// Run the operation under this policy. Each attempt gets a clone of
    /// the caller's token; cancellation aborts immediately, between or
    /// within attempts, and is surfaced as `Cancelled` rather than failure.
    pub async fn execute<T, F, Fut>(
        &self,
        operation: F,
        token: &CancellationToken,
    ) -> DispatchResult<Outcome<T>>
    where
        F: Fn(CancellationToken) -> Fut,
        Fut: Future<Output = DispatchResult<Outcome<T>>>,
    {
        let max_attempts = self.config.max_attempts.max(1);

        for attempt in 1..=max_attempts {
            if token.is_cancelled() {
                return Err(Cancelled);
            }

            let run = AssertUnwindSafe(operation(token.clone())).catch_unwind();
            let result = tokio::select! {
                _ = token.cancelled() => return Err(Cancelled),
                result = run => result,
            };

            let outcome = match result {
                Ok(Ok(outcome)) => {
                    if outcome.is_success() {
                        if attempt > 1 {
                            debug!(attempt, "Operation succeeded after retries");
                        }
                        return Ok(outcome.with_metadata(metadata_keys::ATTEMPTS, attempt));
                    }
                    if !self.should_retry_failure(outcome.errors()) {
                        return Ok(outcome.with_metadata(metadata_keys::ATTEMPTS, attempt));
                    }
                    outcome
                }
                Ok(Err(Cancelled)) => return Err(Cancelled),
                Err(panic) => {
                    let error = DispatchError::from_panic(panic);
                    let retry = self
                        .config
                        .retry_on_panic
                        .as_ref()
                        .map_or(true, |predicate| predicate(&error));
                    let outcome = Outcome::failure(error);
                    if !retry {
                        return Ok(outcome.with_metadata(metadata_keys::ATTEMPTS, attempt));
                    }
                    outcome
                }
            };

            if attempt == max_attempts {
                warn!(
                    attempts = max_attempts,
                    error = %outcome.first_error().map(ToString::to_string).unwrap_or_default(),
                    "Retry budget exhausted"
                );
                return Ok(outcome.with_metadata(metadata_keys::ATTEMPTS, attempt));
            }

            let delay = self.config.delay_for(attempt);
            if !delay.is_zero() {
                tokio::select! {
                    _ = token.cancelled() => return Err(Cancelled),
                    _ = tokio::time::sleep(delay) => {}
                }
            }
        }

        unreachable!("loop returns on the final attempt")
    }

    fn should_retry_failure(&self, errors: &[DispatchError]) -> bool {
        self.config
            .retry_on_failure
            .as_ref()
            .map_or(true, |predicate| predicate(errors))
    }
}
