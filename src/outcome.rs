//! # Outcome Type
//!
//! The uniform success/failure value returned by every operation in the
//! core. An outcome is exactly one of a success value or a non-empty error
//! list, plus an additive string-keyed metadata bag that wrapping layers
//! (retry, timeout, dispatchers) merge into as the outcome passes through
//! them. Outcomes are values: annotation produces a new outcome, nothing
//! mutates in place.
//!
//! Only the role as a uniform return type lives here; a full combinator
//! library is intentionally out of scope.

use std::collections::HashMap;

use serde_json::Value;

use crate::error::DispatchError;

/// Metadata keys used by the resilience policies.
pub mod metadata_keys {
    /// Number of attempts a retry policy made before returning.
    pub const ATTEMPTS: &str = "attempts";
    /// Wall-clock time the wrapped operation took, in milliseconds.
    pub const ELAPSED_MS: &str = "elapsed_ms";
    /// Configured timeout budget, in milliseconds.
    pub const TIMEOUT_MS: &str = "timeout_ms";
}

#[derive(Debug, Clone)]
enum OutcomeState<T> {
    Success(T),
    Failure(Vec<DispatchError>),
}

/// Success/failure outcome with accumulated metadata.
///
/// Invariant: a success holds a value and no errors; a failure holds at
/// least one error and no value. The constructors are the only way to build
/// an outcome, so the invariant holds by construction.
#[derive(Debug, Clone)]
pub struct Outcome<T = ()> {
    state: OutcomeState<T>,
    metadata: HashMap<String, Value>,
}

impl<T> Outcome<T> {
    /// Create a successful outcome carrying `value`.
    pub fn success(value: T) -> Self {
        Self {
            state: OutcomeState::Success(value),
            metadata: HashMap::new(),
        }
    }

    /// Create a failed outcome from a single error.
    pub fn failure(error: DispatchError) -> Self {
        Self::failures(vec![error])
    }

    /// Create a failed outcome from one or more errors. An empty error list
    /// is a programming error and is recorded as a configuration failure
    /// rather than a bogus success.
    pub fn failures(errors: Vec<DispatchError>) -> Self {
        let errors = if errors.is_empty() {
            vec![DispatchError::configuration(
                "failure outcome constructed without errors",
            )]
        } else {
            errors
        };
        Self {
            state: OutcomeState::Failure(errors),
            metadata: HashMap::new(),
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self.state, OutcomeState::Success(_))
    }

    pub fn is_failure(&self) -> bool {
        !self.is_success()
    }

    /// The success value, if any.
    pub fn value(&self) -> Option<&T> {
        match &self.state {
            OutcomeState::Success(value) => Some(value),
            OutcomeState::Failure(_) => None,
        }
    }

    /// Consume the outcome and return the success value, if any.
    pub fn into_value(self) -> Option<T> {
        match self.state {
            OutcomeState::Success(value) => Some(value),
            OutcomeState::Failure(_) => None,
        }
    }

    /// The error list; empty for successes.
    pub fn errors(&self) -> &[DispatchError] {
        match &self.state {
            OutcomeState::Success(_) => &[],
            OutcomeState::Failure(errors) => errors,
        }
    }

    /// The first error, if this is a failure.
    pub fn first_error(&self) -> Option<&DispatchError> {
        self.errors().first()
    }

    /// The accumulated metadata bag.
    pub fn metadata(&self) -> &HashMap<String, Value> {
        &self.metadata
    }

    /// A metadata entry by key.
    pub fn metadata_value(&self, key: &str) -> Option<&Value> {
        self.metadata.get(key)
    }

    /// Return a new outcome with `key` set in the metadata bag.
    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }

    /// Return a new outcome with all entries of `other` merged in. Existing
    /// keys are overwritten; merging is additive across wrapping layers.
    pub fn with_merged_metadata(mut self, other: &HashMap<String, Value>) -> Self {
        for (key, value) in other {
            self.metadata.insert(key.clone(), value.clone());
        }
        self
    }

    /// Map the success value, keeping errors and metadata intact. Internal
    /// plumbing for type erasure at the dispatch boundary.
    pub(crate) fn map_value<U>(self, f: impl FnOnce(T) -> U) -> Outcome<U> {
        let state = match self.state {
            OutcomeState::Success(value) => OutcomeState::Success(f(value)),
            OutcomeState::Failure(errors) => OutcomeState::Failure(errors),
        };
        Outcome {
            state,
            metadata: self.metadata,
        }
    }

    /// Drop the success value, keeping the success/failure state, errors and
    /// metadata.
    pub fn discard_value(self) -> Outcome<()> {
        self.map_value(|_| ())
    }

    /// Decompose into the underlying result and metadata bag. Internal
    /// plumbing for rebuilding a typed outcome at the dispatch boundary.
    pub(crate) fn into_parts(self) -> (Result<T, Vec<DispatchError>>, HashMap<String, Value>) {
        let result = match self.state {
            OutcomeState::Success(value) => Ok(value),
            OutcomeState::Failure(errors) => Err(errors),
        };
        (result, self.metadata)
    }
}

impl Outcome<()> {
    /// A successful unit outcome.
    pub fn ok() -> Self {
        Self::success(())
    }
}

impl<T> From<DispatchError> for Outcome<T> {
    fn from(error: DispatchError) -> Self {
        Self::failure(error)
    }
}

/// Collapse per-handler outcomes from a broadcast dispatch into one outcome:
/// success if every outcome succeeded, otherwise a failure aggregating every
/// observed error. Metadata bags are merged additively in input order.
pub fn consolidate(outcomes: Vec<Outcome<()>>) -> Outcome<()> {
    let mut errors = Vec::new();
    let mut metadata = HashMap::new();
    for outcome in outcomes {
        errors.extend(outcome.errors().iter().cloned());
        metadata.extend(outcome.metadata.clone());
    }
    let consolidated = if errors.is_empty() {
        Outcome::ok()
    } else {
        Outcome::failure(DispatchError::aggregate(errors))
    };
    consolidated.with_merged_metadata(&metadata)
}
