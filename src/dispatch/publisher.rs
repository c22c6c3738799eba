//! # Event Dispatcher
//!
//! Broadcast dispatcher ("publisher") routing events to zero or more
//! handlers through the event behavior chain, with two publish modes:
//!
//! - **Immediate**: handlers run within the publish call;
//! - **Outbox**: the event is staged durably and only delivered when the
//!   owning context commits. Replay goes through a dedicated entry point
//!   that never re-stores the event, so commits cannot loop.
//!
//! The fan-out discipline for one event across multiple handlers is a
//! configurable policy. The default runs handlers concurrently and
//! aggregates every failure instead of stopping at the first, since
//! handler independence is the norm for broadcast events.

use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use futures::future::join_all;
use futures::FutureExt;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::cancellation::CancellationToken;
use crate::config::{DispatchConfig, OutboxConfig};
use crate::context::MessageContext;
use crate::dispatch::behavior::{invoke_chain, Behavior, ErasedValue, Next};
use crate::dispatch::registry::{ErasedEventHandler, HandlerRegistry};
use crate::error::{Cancelled, DispatchResult};
use crate::message::{Event, MessageRef};
use crate::outbox::{EventOutboxStorage, StagedEvent};
use crate::outcome::{consolidate, Outcome};

/// How a published event reaches its handlers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PublishMode {
    /// Dispatch to all handlers within the publish call.
    #[default]
    Immediate,
    /// Stage in the outbox; deliver at commit.
    Outbox,
}

/// Fan-out discipline for dispatching one event to multiple handlers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventDispatchPolicy {
    /// Run handlers concurrently; collect all failures into one aggregate.
    #[default]
    ConcurrentAggregate,
    /// Run handlers in registration order; stop at the first failure.
    SequentialFailFast,
}

/// Broadcast event dispatcher.
pub struct EventDispatcher {
    registry: Arc<HandlerRegistry>,
    behaviors: Vec<Arc<dyn Behavior>>,
    outbox: Arc<dyn EventOutboxStorage>,
    policy: EventDispatchPolicy,
    outbox_config: OutboxConfig,
}

impl EventDispatcher {
    /// Create a dispatcher with the default policy and no behaviors.
    pub fn new(registry: Arc<HandlerRegistry>, outbox: Arc<dyn EventOutboxStorage>) -> Self {
        Self {
            registry,
            behaviors: Vec::new(),
            outbox,
            policy: EventDispatchPolicy::default(),
            outbox_config: OutboxConfig::default(),
        }
    }

    /// Set the ordered event behavior chain.
    pub fn with_behaviors(mut self, behaviors: Vec<Arc<dyn Behavior>>) -> Self {
        self.behaviors = behaviors;
        self
    }

    /// Set the fan-out policy.
    pub fn with_policy(mut self, policy: EventDispatchPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Apply the dispatch section of a loaded configuration.
    pub fn with_dispatch_config(self, config: &DispatchConfig) -> Self {
        self.with_policy(config.event_dispatch_policy)
    }

    /// Set the outbox configuration.
    pub fn with_outbox_config(mut self, config: OutboxConfig) -> Self {
        self.outbox_config = config;
        self
    }

    /// The outbox storage backing this dispatcher.
    pub fn outbox(&self) -> &Arc<dyn EventOutboxStorage> {
        &self.outbox
    }

    pub(crate) fn outbox_config(&self) -> &OutboxConfig {
        &self.outbox_config
    }

    /// Publish an event in the given mode.
    ///
    /// Immediate mode dispatches to all registered handlers before
    /// returning; outbox mode stages the event and returns without
    /// invoking any handler.
    pub async fn publish<E: Event>(
        &self,
        ctx: &MessageContext,
        event: &E,
        mode: PublishMode,
        token: &CancellationToken,
    ) -> DispatchResult<Outcome<()>> {
        if token.is_cancelled() {
            return Err(Cancelled);
        }
        match mode {
            PublishMode::Immediate => self.dispatch(ctx, event, token).await,
            PublishMode::Outbox => {
                let staged = StagedEvent::new(event.clone());
                debug!(
                    correlation_id = %ctx.correlation_id(),
                    event_type = staged.event_type,
                    event_id = %staged.id,
                    "Staging event for outbox delivery"
                );
                let added = self.outbox.add(staged.clone()).await;
                if added.is_failure() {
                    return Ok(added);
                }
                ctx.stage(staged);
                Ok(Outcome::ok())
            }
        }
    }

    /// Immediately dispatch an event to all handlers registered for its
    /// type. Zero handlers is a successful no-op.
    pub async fn dispatch<E: Event>(
        &self,
        ctx: &MessageContext,
        event: &E,
        token: &CancellationToken,
    ) -> DispatchResult<Outcome<()>> {
        let handlers = self.registry.event_handlers(E::message_type());
        self.fan_out(ctx, event, handlers, token).await
    }

    /// Outbox-replay entry point: dispatch a previously staged event.
    ///
    /// This path never re-stores the event, regardless of the mode it was
    /// originally published with — the store-at-publish/deliver-at-commit
    /// cycle must not feed back into itself.
    pub async fn dispatch_from_outbox(
        &self,
        ctx: &MessageContext,
        staged: &StagedEvent,
        token: &CancellationToken,
    ) -> DispatchResult<Outcome<()>> {
        let handlers = self.registry.event_handlers(staged.event_type);
        debug!(
            correlation_id = %ctx.correlation_id(),
            event_type = staged.event_type,
            event_id = %staged.id,
            handler_count = handlers.len(),
            "Replaying event from outbox"
        );
        self.fan_out(ctx, staged.payload.as_ref(), handlers, token)
            .await
    }

    async fn fan_out(
        &self,
        ctx: &MessageContext,
        message: &dyn MessageRef,
        handlers: Vec<Arc<dyn ErasedEventHandler>>,
        token: &CancellationToken,
    ) -> DispatchResult<Outcome<()>> {
        if token.is_cancelled() {
            return Err(Cancelled);
        }
        if handlers.is_empty() {
            debug!(
                message_type = message.message_type(),
                "No handlers registered for event"
            );
            return Ok(Outcome::ok());
        }

        match self.policy {
            EventDispatchPolicy::ConcurrentAggregate => {
                let invocations = handlers
                    .iter()
                    .map(|handler| self.invoke_handler(ctx, message, Arc::clone(handler), token));
                let results = join_all(invocations).await;
                let mut outcomes = Vec::with_capacity(results.len());
                for result in results {
                    outcomes.push(result?);
                }
                Ok(consolidate(outcomes))
            }
            EventDispatchPolicy::SequentialFailFast => {
                let mut last = Outcome::ok();
                for handler in handlers {
                    let outcome = self.invoke_handler(ctx, message, handler, token).await?;
                    if outcome.is_failure() {
                        warn!(
                            message_type = message.message_type(),
                            "Event handler failed, stopping fail-fast dispatch"
                        );
                        return Ok(outcome);
                    }
                    last = outcome;
                }
                Ok(last)
            }
        }
    }

    /// Run one handler through the event behavior chain, converting panics
    /// to failure outcomes at this boundary.
    async fn invoke_handler(
        &self,
        ctx: &MessageContext,
        message: &dyn MessageRef,
        handler: Arc<dyn ErasedEventHandler>,
        token: &CancellationToken,
    ) -> DispatchResult<Outcome<()>> {
        debug!(
            handler = handler.name(),
            message_type = message.message_type(),
            "Invoking event handler"
        );
        let terminal: Next<'_> = Box::new(move || {
            Box::pin(async move {
                if token.is_cancelled() {
                    return Err(Cancelled);
                }
                let invocation =
                    AssertUnwindSafe(handler.handle(ctx, message.as_any(), token)).catch_unwind();
                match invocation.await {
                    Ok(outcome) => {
                        Ok(outcome.map_value(|value| Box::new(value) as ErasedValue))
                    }
                    Err(payload) => Ok(Outcome::failure(
                        crate::error::DispatchError::from_panic(payload),
                    )),
                }
            })
        });

        let erased = invoke_chain(&self.behaviors, ctx, message, token, terminal).await?;
        Ok(erased.discard_value())
    }
}
