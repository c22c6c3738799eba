//! # Request Dispatcher
//!
//! Routes a request to its single registered handler through the request
//! behavior chain. The dispatcher itself performs no I/O: side effects are
//! confined to the handler and behaviors. A missing handler is a
//! configuration error reported as a failure outcome at dispatch time,
//! never a silent no-op.

use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use futures::FutureExt;
use tracing::{debug, warn};

use crate::cancellation::CancellationToken;
use crate::context::MessageContext;
use crate::dispatch::behavior::{invoke_chain, Behavior, ErasedOutcome, Next};
use crate::dispatch::registry::HandlerRegistry;
use crate::error::{Cancelled, DispatchError, DispatchResult};
use crate::message::Request;
use crate::outcome::Outcome;

/// Point-to-point request dispatcher ("sender").
pub struct RequestDispatcher {
    registry: Arc<HandlerRegistry>,
    behaviors: Vec<Arc<dyn Behavior>>,
}

impl RequestDispatcher {
    /// Create a dispatcher with no behaviors.
    pub fn new(registry: Arc<HandlerRegistry>) -> Self {
        Self::with_behaviors(registry, Vec::new())
    }

    /// Create a dispatcher with an ordered behavior chain. The first
    /// behavior in the list executes first (outermost).
    pub fn with_behaviors(
        registry: Arc<HandlerRegistry>,
        behaviors: Vec<Arc<dyn Behavior>>,
    ) -> Self {
        Self {
            registry,
            behaviors,
        }
    }

    /// Dispatch `request` to its registered handler and return the
    /// handler's outcome.
    ///
    /// Handler and behavior panics are caught at this boundary and
    /// converted to failure outcomes; cancellation propagates as
    /// [`Cancelled`].
    pub async fn send<R: Request>(
        &self,
        ctx: &MessageContext,
        request: &R,
        token: &CancellationToken,
    ) -> DispatchResult<Outcome<R::Response>> {
        if token.is_cancelled() {
            return Err(Cancelled);
        }

        let message_type = R::message_type();
        let Some(handler) = self.registry.request_handler(message_type) else {
            warn!(
                correlation_id = %ctx.correlation_id(),
                message_type,
                "No handler registered for request"
            );
            return Ok(Outcome::failure(DispatchError::handler_missing(
                message_type,
            )));
        };

        debug!(
            correlation_id = %ctx.correlation_id(),
            message_type,
            "Dispatching request"
        );

        let terminal: Next<'_> = Box::new(move || {
            Box::pin(async move {
                if token.is_cancelled() {
                    return Err(Cancelled);
                }
                let invocation = AssertUnwindSafe(handler.handle(
                    ctx,
                    request as &(dyn Any + Send + Sync),
                    token,
                ))
                .catch_unwind();
                match invocation.await {
                    Ok(outcome) => Ok(outcome),
                    Err(payload) => Ok(Outcome::failure(DispatchError::from_panic(payload))),
                }
            })
        });

        let erased = invoke_chain(&self.behaviors, ctx, request, token, terminal).await?;
        Ok(downcast_response::<R::Response>(erased, message_type))
    }
}

/// Rebuild the typed response outcome from the erased chain outcome.
fn downcast_response<T: 'static>(erased: ErasedOutcome, message_type: &str) -> Outcome<T> {
    let (result, metadata) = erased.into_parts();
    let outcome = match result {
        Ok(boxed) => match boxed.downcast::<T>() {
            Ok(value) => Outcome::success(*value),
            Err(_) => Outcome::failure(DispatchError::configuration(format!(
                "behavior chain for '{message_type}' produced a value of the wrong type"
            ))),
        },
        Err(errors) => Outcome::failures(errors),
    };
    outcome.with_merged_metadata(&metadata)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dispatch::registry::RequestHandler;
    use crate::dispatch::EventDispatcher;
    use crate::message::{Message, MessageRef};
    use crate::outbox::InMemoryOutboxStorage;
    use async_trait::async_trait;

    #[derive(Debug)]
    struct AddItem {
        quantity: u32,
    }
    impl Message for AddItem {}
    impl Request for AddItem {
        type Response = u32;
    }

    #[derive(Debug)]
    struct Unregistered;
    impl Message for Unregistered {}
    impl Request for Unregistered {
        type Response = ();
    }

    struct AddItemHandler;

    #[async_trait]
    impl RequestHandler<AddItem> for AddItemHandler {
        async fn handle(
            &self,
            _ctx: &MessageContext,
            request: &AddItem,
            _token: &CancellationToken,
        ) -> Outcome<u32> {
            Outcome::success(request.quantity + 1)
        }
    }

    struct PanickingHandler;

    #[async_trait]
    impl RequestHandler<AddItem> for PanickingHandler {
        async fn handle(
            &self,
            _ctx: &MessageContext,
            _request: &AddItem,
            _token: &CancellationToken,
        ) -> Outcome<u32> {
            panic!("handler exploded");
        }
    }

    struct Tagging;

    #[async_trait]
    impl Behavior for Tagging {
        async fn handle<'a>(
            &self,
            _ctx: &MessageContext,
            _message: &dyn MessageRef,
            next: Next<'a>,
            _token: &CancellationToken,
        ) -> DispatchResult<ErasedOutcome> {
            let outcome = next().await?;
            Ok(outcome.with_metadata("tagged", true))
        }
    }

    fn test_context() -> MessageContext {
        MessageContext::new(Arc::new(EventDispatcher::new(
            Arc::new(HandlerRegistry::new()),
            Arc::new(InMemoryOutboxStorage::new()),
        )))
    }

    #[tokio::test]
    async fn test_send_returns_handler_outcome() {
        let registry = Arc::new(HandlerRegistry::new());
        registry
            .register_request_handler::<AddItem, _>(AddItemHandler)
            .unwrap();
        let dispatcher = RequestDispatcher::new(registry);

        let ctx = test_context();
        let outcome = dispatcher
            .send(&ctx, &AddItem { quantity: 41 }, &CancellationToken::new())
            .await
            .unwrap();

        assert!(outcome.is_success());
        assert_eq!(outcome.value(), Some(&42));
    }

    #[tokio::test]
    async fn test_missing_handler_is_failure_outcome() {
        let dispatcher = RequestDispatcher::new(Arc::new(HandlerRegistry::new()));
        let ctx = test_context();

        let outcome = dispatcher
            .send(&ctx, &Unregistered, &CancellationToken::new())
            .await
            .unwrap();

        assert!(outcome.is_failure());
        assert!(matches!(
            outcome.first_error(),
            Some(DispatchError::HandlerMissing { .. })
        ));
    }

    #[tokio::test]
    async fn test_handler_panic_becomes_failure_outcome() {
        let registry = Arc::new(HandlerRegistry::new());
        registry
            .register_request_handler::<AddItem, _>(PanickingHandler)
            .unwrap();
        let dispatcher = RequestDispatcher::new(registry);

        let ctx = test_context();
        let outcome = dispatcher
            .send(&ctx, &AddItem { quantity: 1 }, &CancellationToken::new())
            .await
            .unwrap();

        assert!(outcome.is_failure());
        assert!(outcome
            .first_error()
            .unwrap()
            .to_string()
            .contains("handler exploded"));
    }

    #[tokio::test]
    async fn test_behavior_metadata_survives_downcast() {
        let registry = Arc::new(HandlerRegistry::new());
        registry
            .register_request_handler::<AddItem, _>(AddItemHandler)
            .unwrap();
        let dispatcher = RequestDispatcher::with_behaviors(registry, vec![Arc::new(Tagging)]);

        let ctx = test_context();
        let outcome = dispatcher
            .send(&ctx, &AddItem { quantity: 1 }, &CancellationToken::new())
            .await
            .unwrap();

        assert!(outcome.is_success());
        assert_eq!(
            outcome.metadata_value("tagged"),
            Some(&serde_json::Value::Bool(true))
        );
    }

    #[tokio::test]
    async fn test_cancelled_token_propagates_as_cancellation() {
        let registry = Arc::new(HandlerRegistry::new());
        registry
            .register_request_handler::<AddItem, _>(AddItemHandler)
            .unwrap();
        let dispatcher = RequestDispatcher::new(registry);

        let ctx = test_context();
        let token = CancellationToken::new();
        token.cancel();

        let result = dispatcher.send(&ctx, &AddItem { quantity: 1 }, &token).await;
        assert_eq!(result.unwrap_err(), Cancelled);
    }
}
