//! # Message Dispatch
//!
//! The request/event dispatch pipeline: a handler registry queried by
//! message-type token, a behavior chain composed by function folding, a
//! point-to-point request dispatcher and a broadcast event dispatcher with
//! immediate and outbox publish modes.

pub mod behavior;
pub mod publisher;
pub mod registry;
pub mod sender;

pub use behavior::{Behavior, BehaviorFuture, ErasedOutcome, ErasedValue, Next};
pub use publisher::{EventDispatchPolicy, EventDispatcher, PublishMode};
pub use registry::{EventHandler, HandlerRegistry, RequestHandler};
pub use sender::RequestDispatcher;
