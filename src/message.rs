//! # Message Markers
//!
//! Requests and events are plain data-carrying types with no behavior.
//! A request is routed to exactly one handler and declares a response type;
//! an event is broadcast to zero or more handlers. Both carry a stable type
//! token used by the handler registry for lookup — a map key, not
//! reflection.

use std::any::Any;

/// Base trait for every dispatchable message.
pub trait Message: Send + Sync + 'static {
    /// Stable token identifying this message type in the registry and on
    /// the wire (`payload_type` envelope field).
    fn message_type() -> &'static str
    where
        Self: Sized,
    {
        std::any::type_name::<Self>()
    }
}

/// Point-to-point message with a declared response type. Routed to exactly
/// one handler.
pub trait Request: Message {
    type Response: Send + 'static;
}

/// Broadcast message delivered to zero or more handlers. Events are cloned
/// per staging site (outbox, pending list), so they must be `Clone`.
pub trait Event: Message + Clone {}

/// Type-erased view of a message as it travels the behavior chain.
/// Behaviors see the type token and can downcast when they need the
/// concrete type.
pub trait MessageRef: Send + Sync {
    fn message_type(&self) -> &'static str;
    fn as_any(&self) -> &(dyn Any + Send + Sync);
}

impl<M: Message> MessageRef for M {
    fn message_type(&self) -> &'static str {
        M::message_type()
    }

    fn as_any(&self) -> &(dyn Any + Send + Sync) {
        self
    }
}
