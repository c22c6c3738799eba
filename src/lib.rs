#![allow(clippy::missing_errors_doc)] // Allow public functions without # Errors sections
#![allow(clippy::must_use_candidate)] // Allow methods without must_use when context is clear

//! # Relay Core
//!
//! Message dispatch core for in-process and cross-boundary messaging.
//!
//! ## Overview
//!
//! Relay routes two kinds of messages: **requests**, dispatched
//! point-to-point to exactly one handler that produces a typed response,
//! and **events**, broadcast to every registered handler. Both travel
//! through an ordered behavior chain for cross-cutting concerns, and every
//! dispatch produces an [`outcome::Outcome`] carrying either a value or a
//! non-empty list of structured errors plus metadata. Cancellation is a
//! first-class signal, distinct from failure, propagated through
//! [`cancellation::CancellationToken`].
//!
//! ## Module Organization
//!
//! - [`outcome`] - Dispatch result type: value or errors, plus metadata
//! - [`error`] - Structured error taxonomy and the cancellation signal
//! - [`message`] - Request and event marker traits
//! - [`dispatch`] - Handler registry, behavior chain, request and event dispatchers
//! - [`context`] - Per-operation correlation handle and outbox commit
//! - [`outbox`] - Durable event staging with at-least-once replay
//! - [`transport`] - Envelopes, queue backends and the polling transport
//! - [`resilience`] - Retry and timeout policies
//! - [`config`] - Layered configuration with environment overrides
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use relay_core::cancellation::CancellationToken;
//! use relay_core::dispatch::{EventDispatcher, HandlerRegistry, RequestDispatcher};
//! use relay_core::outbox::InMemoryOutboxStorage;
//!
//! # async fn example() {
//! let registry = Arc::new(HandlerRegistry::new());
//! let outbox = Arc::new(InMemoryOutboxStorage::new());
//! let events = Arc::new(EventDispatcher::new(Arc::clone(&registry), outbox));
//! let requests = RequestDispatcher::new(Arc::clone(&registry));
//! let token = CancellationToken::new();
//! # let _ = (events, requests, token);
//! # }
//! ```
//!
//! ## Delivery Guarantees
//!
//! Events published in outbox mode are staged durably and dispatched at
//! commit; the guarantee is at-least-once, so event handlers must be
//! idempotent or deduplicate by event id. The polling transport mirrors
//! those semantics across process boundaries with visibility-timeout
//! redelivery.

pub mod cancellation;
pub mod config;
pub mod context;
pub mod dispatch;
pub mod error;
pub mod message;
pub mod outbox;
pub mod outcome;
pub mod resilience;
pub mod transport;

pub use cancellation::CancellationToken;
pub use config::RelayConfig;
pub use context::MessageContext;
pub use dispatch::{
    Behavior, EventDispatchPolicy, EventDispatcher, EventHandler, HandlerRegistry, PublishMode,
    RequestDispatcher, RequestHandler,
};
pub use error::{Cancelled, DispatchError, DispatchResult};
pub use message::{Event, Message, Request};
pub use outcome::Outcome;
