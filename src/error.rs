//! # Dispatch Error Types
//!
//! Structured error handling for the dispatch core using thiserror.
//! Every expected failure mode is represented here and travels inside an
//! [`Outcome`](crate::outcome::Outcome); raw errors never escape a public
//! entry point. Cancellation is deliberately *not* part of this taxonomy —
//! it is a distinct signal (see [`Cancelled`]) so callers can always tell
//! "the operation failed" apart from "the operation was called off".

use thiserror::Error;

/// Errors produced by dispatch, outbox, transport and resilience operations.
///
/// Variants are `Clone` so they can live inside outcome values that are
/// copied between wrapping layers; causing errors are captured as rendered
/// message chains rather than boxed sources.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum DispatchError {
    /// A message failed validation. Carries the offending field and one or
    /// more human-readable messages.
    #[error("Validation failed for '{field}': {}", messages.join("; "))]
    Validation {
        field: String,
        messages: Vec<String>,
    },

    /// A handler or behavior failed with an unexpected error or panic.
    #[error("Unhandled error: {message}")]
    Exceptional {
        message: String,
        /// Chained inner cause, if any.
        cause: Option<Box<DispatchError>>,
    },

    /// An operation exceeded its time budget.
    #[error("Operation timed out after {elapsed_ms}ms (budget {timeout_ms}ms)")]
    Timeout { timeout_ms: u64, elapsed_ms: u64 },

    /// Multiple independent failures consolidated into one reported error.
    #[error("{} dispatch failures: {}", causes.len(), causes.iter().map(ToString::to_string).collect::<Vec<_>>().join("; "))]
    Aggregate { causes: Vec<DispatchError> },

    /// No handler registered for a request type. This is a configuration
    /// error reported at dispatch time, never a silent no-op.
    #[error("No handler registered for message type '{message_type}'")]
    HandlerMissing { message_type: String },

    /// Invalid registration or setup.
    #[error("Configuration error: {reason}")]
    Configuration { reason: String },

    /// Payload could not be serialized or deserialized.
    #[error("Serialization error: {message}")]
    Serialization { message: String },

    /// A queue backend operation failed.
    #[error("Transport error: {operation} on '{topic}': {message}")]
    Transport {
        topic: String,
        operation: String,
        message: String,
    },

    /// Outbox storage failed.
    #[error("Outbox error: {message}")]
    Outbox { message: String },
}

impl DispatchError {
    /// Create a validation error for a single message.
    pub fn validation(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Validation {
            field: field.into(),
            messages: vec![message.into()],
        }
    }

    /// Create an exceptional error without a chained cause.
    pub fn exceptional(message: impl Into<String>) -> Self {
        Self::Exceptional {
            message: message.into(),
            cause: None,
        }
    }

    /// Create an exceptional error chaining an inner cause.
    pub fn exceptional_with_cause(message: impl Into<String>, cause: DispatchError) -> Self {
        Self::Exceptional {
            message: message.into(),
            cause: Some(Box::new(cause)),
        }
    }

    /// Create a timeout error from a budget and an observed elapsed time.
    pub fn timeout(timeout_ms: u64, elapsed_ms: u64) -> Self {
        Self::Timeout {
            timeout_ms,
            elapsed_ms,
        }
    }

    /// Consolidate several failures into one aggregate error. A single
    /// failure is passed through unwrapped.
    pub fn aggregate(mut causes: Vec<DispatchError>) -> Self {
        if causes.len() == 1 {
            causes.remove(0)
        } else {
            Self::Aggregate { causes }
        }
    }

    /// Create a missing-handler error.
    pub fn handler_missing(message_type: impl Into<String>) -> Self {
        Self::HandlerMissing {
            message_type: message_type.into(),
        }
    }

    /// Create a configuration error.
    pub fn configuration(reason: impl Into<String>) -> Self {
        Self::Configuration {
            reason: reason.into(),
        }
    }

    /// Create a serialization error.
    pub fn serialization(message: impl Into<String>) -> Self {
        Self::Serialization {
            message: message.into(),
        }
    }

    /// Create a transport error.
    pub fn transport(
        topic: impl Into<String>,
        operation: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self::Transport {
            topic: topic.into(),
            operation: operation.into(),
            message: message.into(),
        }
    }

    /// Create an outbox storage error.
    pub fn outbox(message: impl Into<String>) -> Self {
        Self::Outbox {
            message: message.into(),
        }
    }

    /// Build an exceptional error from a caught panic payload.
    pub fn from_panic(payload: Box<dyn std::any::Any + Send>) -> Self {
        let message = if let Some(s) = payload.downcast_ref::<&str>() {
            (*s).to_string()
        } else if let Some(s) = payload.downcast_ref::<String>() {
            s.clone()
        } else {
            "handler panicked".to_string()
        };
        Self::exceptional(format!("panic: {message}"))
    }

    /// Whether this error (or any aggregated cause) is a timeout.
    pub fn is_timeout(&self) -> bool {
        match self {
            Self::Timeout { .. } => true,
            Self::Aggregate { causes } => causes.iter().any(DispatchError::is_timeout),
            _ => false,
        }
    }
}

impl From<serde_json::Error> for DispatchError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization {
            message: err.to_string(),
        }
    }
}

/// Marker for a cancelled operation. Cancellation always propagates as this
/// signal, never as a failure outcome.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("operation cancelled")]
pub struct Cancelled;

/// Result type for every async entry point in the core: either an outcome
/// (success or failure, see [`Outcome`](crate::outcome::Outcome)) or the
/// distinct cancellation signal.
pub type DispatchResult<T> = std::result::Result<T, Cancelled>;
