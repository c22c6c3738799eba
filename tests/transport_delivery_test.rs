//! Cross-boundary delivery: events serialized into envelopes, carried by
//! the polling transport, and dispatched to in-process handlers on the
//! receiving side.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use relay_core::cancellation::CancellationToken;
use relay_core::dispatch::{EventDispatcher, EventHandler, HandlerRegistry};
use relay_core::error::{DispatchError, DispatchResult};
use relay_core::message::{Event, Message};
use relay_core::outbox::InMemoryOutboxStorage;
use relay_core::outcome::Outcome;
use relay_core::resilience::RetryPolicyConfig;
use relay_core::transport::{
    decode, encode, InMemoryQueueBackend, JsonSerializer, MessageEnvelope, MessageSerializer,
    MessageTransport, PollingTransport, SubscriptionDescriptor, SubscriptionHandler,
};
use relay_core::{config::TransportConfig, MessageContext};

#[derive(Debug, Clone, Serialize, Deserialize)]
struct ShipmentDispatched {
    shipment_id: u64,
}

impl Message for ShipmentDispatched {
    fn message_type() -> &'static str {
        "logistics.shipment_dispatched"
    }
}

impl Event for ShipmentDispatched {}

struct ShipmentProjection {
    applied: Arc<AtomicUsize>,
    last_shipment: Arc<AtomicUsize>,
}

#[async_trait]
impl EventHandler<ShipmentDispatched> for ShipmentProjection {
    async fn handle(
        &self,
        _ctx: &MessageContext,
        event: &ShipmentDispatched,
        _token: &CancellationToken,
    ) -> Outcome<()> {
        self.applied.fetch_add(1, Ordering::SeqCst);
        self.last_shipment
            .store(event.shipment_id as usize, Ordering::SeqCst);
        Outcome::ok()
    }
}

/// Receiving side of the boundary: decodes the envelope payload and
/// dispatches the event in-process, continuing the sender's correlation.
struct InboundEventHandler {
    dispatcher: Arc<EventDispatcher>,
}

#[async_trait]
impl SubscriptionHandler for InboundEventHandler {
    async fn handle(
        &self,
        envelope: MessageEnvelope,
        token: &CancellationToken,
    ) -> DispatchResult<Outcome<()>> {
        if envelope.payload_type != ShipmentDispatched::message_type() {
            return Ok(Outcome::failure(DispatchError::configuration(format!(
                "unexpected payload type '{}'",
                envelope.payload_type
            ))));
        }
        let event: ShipmentDispatched = match decode(&JsonSerializer, &envelope.payload) {
            Ok(event) => event,
            Err(error) => return Ok(Outcome::failure(error)),
        };
        let ctx =
            MessageContext::with_correlation_id(Arc::clone(&self.dispatcher), envelope.correlation_id);
        self.dispatcher.dispatch(&ctx, &event, token).await
    }
}

fn fast_config() -> TransportConfig {
    TransportConfig {
        poll_wait_ms: 20,
        receive_backoff_ms: 20,
        drain_timeout_ms: 500,
        visibility_timeout_secs: 30,
        max_batch_size: None,
        default_max_delivery_attempts: 3,
        redelivery_delay_ms: 0,
    }
}

async fn wait_until(applied: &AtomicUsize, expected: usize) {
    for _ in 0..200 {
        if applied.load(Ordering::SeqCst) == expected {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("expected {expected} deliveries");
}

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

#[tokio::test]
async fn event_crosses_the_boundary_and_reaches_handlers() {
    init_tracing();
    let registry = Arc::new(HandlerRegistry::new());
    let outbox = Arc::new(InMemoryOutboxStorage::new());
    let dispatcher = Arc::new(EventDispatcher::new(Arc::clone(&registry), outbox));

    let applied = Arc::new(AtomicUsize::new(0));
    let last_shipment = Arc::new(AtomicUsize::new(0));
    registry.register_event_handler::<ShipmentDispatched, _>(ShipmentProjection {
        applied: Arc::clone(&applied),
        last_shipment: Arc::clone(&last_shipment),
    });

    let backend = Arc::new(InMemoryQueueBackend::default());
    let transport = PollingTransport::new("logistics", backend, fast_config());
    let token = CancellationToken::new();

    let inbound = Arc::new(InboundEventHandler {
        dispatcher: Arc::clone(&dispatcher),
    });
    let subscribed = transport
        .subscribe(
            SubscriptionDescriptor::new("shipments", inbound)
                .with_max_concurrency(4)
                .with_retry_policy(RetryPolicyConfig::immediate(3)),
            &token,
        )
        .await
        .unwrap();
    assert!(subscribed.is_success());

    // Sending side: serialize the event into an envelope and publish.
    let serializer = JsonSerializer;
    let event = ShipmentDispatched { shipment_id: 777 };
    let envelope = MessageEnvelope::new(
        Uuid::new_v4(),
        ShipmentDispatched::message_type(),
        serializer.content_type(),
        encode(&serializer, &event).unwrap(),
    );
    let published = transport
        .publish("shipments", envelope, &token)
        .await
        .unwrap();
    assert!(published.is_success());

    wait_until(&applied, 1).await;
    assert_eq!(last_shipment.load(Ordering::SeqCst), 777);

    transport.shutdown().await;
}

#[tokio::test]
async fn multiple_events_deliver_concurrently() {
    init_tracing();
    let registry = Arc::new(HandlerRegistry::new());
    let outbox = Arc::new(InMemoryOutboxStorage::new());
    let dispatcher = Arc::new(EventDispatcher::new(Arc::clone(&registry), outbox));

    let applied = Arc::new(AtomicUsize::new(0));
    let last_shipment = Arc::new(AtomicUsize::new(0));
    registry.register_event_handler::<ShipmentDispatched, _>(ShipmentProjection {
        applied: Arc::clone(&applied),
        last_shipment: Arc::clone(&last_shipment),
    });

    let backend = Arc::new(InMemoryQueueBackend::default());
    let transport = PollingTransport::new("logistics", backend, fast_config());
    let token = CancellationToken::new();
    transport
        .subscribe(
            SubscriptionDescriptor::new(
                "shipments",
                Arc::new(InboundEventHandler {
                    dispatcher: Arc::clone(&dispatcher),
                }) as Arc<dyn SubscriptionHandler>,
            )
            .with_max_concurrency(8),
            &token,
        )
        .await
        .unwrap();

    let serializer = JsonSerializer;
    for shipment_id in 1..=10 {
        let event = ShipmentDispatched { shipment_id };
        let envelope = MessageEnvelope::new(
            Uuid::new_v4(),
            ShipmentDispatched::message_type(),
            serializer.content_type(),
            encode(&serializer, &event).unwrap(),
        );
        transport
            .publish("shipments", envelope, &token)
            .await
            .unwrap();
    }

    wait_until(&applied, 10).await;
    transport.shutdown().await;
}
