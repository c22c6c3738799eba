//! # Handler Registry
//!
//! Explicit, statically built mapping from message-type token to handler.
//! Populated once at startup (mirroring what build-time registration
//! tooling produces); dispatch performs a map lookup, not reflection.
//!
//! Requests have exactly one handler — registering a second for the same
//! type is a configuration error. Events have zero or more handlers.

use std::any::Any;
use std::marker::PhantomData;
use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashMap;
use tracing::{debug, info};

use crate::cancellation::CancellationToken;
use crate::context::MessageContext;
use crate::dispatch::behavior::{ErasedOutcome, ErasedValue};
use crate::error::DispatchError;
use crate::message::{Event, Request};
use crate::outcome::Outcome;

/// Handler for a point-to-point request.
#[async_trait]
pub trait RequestHandler<R: Request>: Send + Sync + 'static {
    async fn handle(
        &self,
        ctx: &MessageContext,
        request: &R,
        token: &CancellationToken,
    ) -> Outcome<R::Response>;
}

/// Handler for a broadcast event. Handlers must be idempotent or
/// deduplicate by message id: outbox replay delivers at-least-once.
#[async_trait]
pub trait EventHandler<E: Event>: Send + Sync + 'static {
    async fn handle(
        &self,
        ctx: &MessageContext,
        event: &E,
        token: &CancellationToken,
    ) -> Outcome<()>;

    /// Handler name for logs.
    fn name(&self) -> &str {
        "unnamed_handler"
    }
}

/// Type-erased request handler stored in the registry.
#[async_trait]
pub(crate) trait ErasedRequestHandler: Send + Sync {
    async fn handle(
        &self,
        ctx: &MessageContext,
        request: &(dyn Any + Send + Sync),
        token: &CancellationToken,
    ) -> ErasedOutcome;
}

struct RequestAdapter<R, H> {
    handler: H,
    _marker: PhantomData<fn() -> R>,
}

#[async_trait]
impl<R, H> ErasedRequestHandler for RequestAdapter<R, H>
where
    R: Request,
    H: RequestHandler<R>,
{
    async fn handle(
        &self,
        ctx: &MessageContext,
        request: &(dyn Any + Send + Sync),
        token: &CancellationToken,
    ) -> ErasedOutcome {
        match request.downcast_ref::<R>() {
            Some(typed) => self
                .handler
                .handle(ctx, typed, token)
                .await
                .map_value(|value| Box::new(value) as ErasedValue),
            None => Outcome::failure(DispatchError::configuration(format!(
                "payload does not match registered request type '{}'",
                R::message_type()
            ))),
        }
    }
}

/// Type-erased event handler stored in the registry.
#[async_trait]
pub(crate) trait ErasedEventHandler: Send + Sync {
    async fn handle(
        &self,
        ctx: &MessageContext,
        event: &(dyn Any + Send + Sync),
        token: &CancellationToken,
    ) -> Outcome<()>;

    fn name(&self) -> &str;
}

struct EventAdapter<E, H> {
    handler: H,
    _marker: PhantomData<fn() -> E>,
}

#[async_trait]
impl<E, H> ErasedEventHandler for EventAdapter<E, H>
where
    E: Event,
    H: EventHandler<E>,
{
    async fn handle(
        &self,
        ctx: &MessageContext,
        event: &(dyn Any + Send + Sync),
        token: &CancellationToken,
    ) -> Outcome<()> {
        match event.downcast_ref::<E>() {
            Some(typed) => self.handler.handle(ctx, typed, token).await,
            None => Outcome::failure(DispatchError::configuration(format!(
                "payload does not match registered event type '{}'",
                E::message_type()
            ))),
        }
    }

    fn name(&self) -> &str {
        self.handler.name()
    }
}

/// Thread-safe registry mapping message-type tokens to handlers.
#[derive(Default)]
pub struct HandlerRegistry {
    request_handlers: DashMap<&'static str, Arc<dyn ErasedRequestHandler>>,
    event_handlers: DashMap<&'static str, Vec<Arc<dyn ErasedEventHandler>>>,
}

impl HandlerRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register the single handler for request type `R`.
    ///
    /// Returns a configuration error if a handler is already registered for
    /// the type.
    pub fn register_request_handler<R, H>(&self, handler: H) -> Result<(), DispatchError>
    where
        R: Request,
        H: RequestHandler<R>,
    {
        let token = R::message_type();
        match self.request_handlers.entry(token) {
            dashmap::mapref::entry::Entry::Occupied(_) => {
                Err(DispatchError::configuration(format!(
                    "request type '{token}' already has a registered handler"
                )))
            }
            dashmap::mapref::entry::Entry::Vacant(entry) => {
                entry.insert(Arc::new(RequestAdapter::<R, H> {
                    handler,
                    _marker: PhantomData,
                }));
                info!(message_type = token, "Registered request handler");
                Ok(())
            }
        }
    }

    /// Register an additional handler for event type `E`.
    pub fn register_event_handler<E, H>(&self, handler: H)
    where
        E: Event,
        H: EventHandler<E>,
    {
        let token = E::message_type();
        let adapter: Arc<dyn ErasedEventHandler> = Arc::new(EventAdapter::<E, H> {
            handler,
            _marker: PhantomData,
        });
        self.event_handlers
            .entry(token)
            .or_default()
            .push(adapter);
        debug!(message_type = token, "Registered event handler");
    }

    pub(crate) fn request_handler(
        &self,
        message_type: &str,
    ) -> Option<Arc<dyn ErasedRequestHandler>> {
        self.request_handlers
            .get(message_type)
            .map(|entry| Arc::clone(entry.value()))
    }

    pub(crate) fn event_handlers(&self, message_type: &str) -> Vec<Arc<dyn ErasedEventHandler>> {
        self.event_handlers
            .get(message_type)
            .map(|entry| entry.value().clone())
            .unwrap_or_default()
    }

    /// Number of registered request types.
    pub fn request_handler_count(&self) -> usize {
        self.request_handlers.len()
    }

    /// Number of handlers registered for an event type.
    pub fn event_handler_count(&self, message_type: &str) -> usize {
        self.event_handlers
            .get(message_type)
            .map(|entry| entry.value().len())
            .unwrap_or(0)
    }

    /// Registered request-type tokens, for diagnostics.
    pub fn registered_request_types(&self) -> Vec<&'static str> {
        self.request_handlers
            .iter()
            .map(|entry| *entry.key())
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dispatch::EventDispatcher;
    use crate::message::Message;
    use crate::outbox::InMemoryOutboxStorage;

    #[derive(Debug)]
    struct Ping;
    impl Message for Ping {}
    impl Request for Ping {
        type Response = String;
    }

    #[derive(Debug, Clone)]
    struct Pinged;
    impl Message for Pinged {}
    impl Event for Pinged {}

    struct PingHandler;

    #[async_trait]
    impl RequestHandler<Ping> for PingHandler {
        async fn handle(
            &self,
            _ctx: &MessageContext,
            _request: &Ping,
            _token: &CancellationToken,
        ) -> Outcome<String> {
            Outcome::success("pong".to_string())
        }
    }

    struct PingedHandler;

    #[async_trait]
    impl EventHandler<Pinged> for PingedHandler {
        async fn handle(
            &self,
            _ctx: &MessageContext,
            _event: &Pinged,
            _token: &CancellationToken,
        ) -> Outcome<()> {
            Outcome::ok()
        }
    }

    struct NamedPingedHandler;

    #[async_trait]
    impl EventHandler<Pinged> for NamedPingedHandler {
        async fn handle(
            &self,
            _ctx: &MessageContext,
            _event: &Pinged,
            _token: &CancellationToken,
        ) -> Outcome<()> {
            Outcome::ok()
        }

        fn name(&self) -> &str {
            "pinged_projection"
        }
    }

    #[test]
    fn test_duplicate_request_registration_is_configuration_error() {
        let registry = HandlerRegistry::new();
        registry
            .register_request_handler::<Ping, _>(PingHandler)
            .unwrap();

        let err = registry
            .register_request_handler::<Ping, _>(PingHandler)
            .unwrap_err();
        assert!(matches!(err, DispatchError::Configuration { .. }));
        assert_eq!(registry.request_handler_count(), 1);
    }

    #[test]
    fn test_multiple_event_handlers_allowed() {
        let registry = HandlerRegistry::new();
        registry.register_event_handler::<Pinged, _>(PingedHandler);
        registry.register_event_handler::<Pinged, _>(PingedHandler);

        assert_eq!(registry.event_handler_count(Pinged::message_type()), 2);
        assert!(registry.event_handlers("unknown").is_empty());
    }

    #[test]
    fn test_erased_event_handler_forwards_name() {
        let registry = HandlerRegistry::new();
        registry.register_event_handler::<Pinged, _>(NamedPingedHandler);
        registry.register_event_handler::<Pinged, _>(PingedHandler);

        let handlers = registry.event_handlers(Pinged::message_type());
        assert_eq!(handlers[0].name(), "pinged_projection");
        assert_eq!(handlers[1].name(), "unnamed_handler");
    }

    #[tokio::test]
    async fn test_erased_handler_rejects_mismatched_payload() {
        let registry = HandlerRegistry::new();
        registry
            .register_request_handler::<Ping, _>(PingHandler)
            .unwrap();

        let handler = registry.request_handler(Ping::message_type()).unwrap();
        let ctx = MessageContext::new(Arc::new(EventDispatcher::new(
            Arc::new(HandlerRegistry::new()),
            Arc::new(InMemoryOutboxStorage::new()),
        )));
        let token = CancellationToken::new();

        let wrong_payload = Pinged;
        let outcome = handler
            .handle(&ctx, &wrong_payload as &(dyn Any + Send + Sync), &token)
            .await;
        assert!(outcome.is_failure());
        assert!(matches!(
            outcome.first_error(),
            Some(DispatchError::Configuration { .. })
        ));
    }
}
