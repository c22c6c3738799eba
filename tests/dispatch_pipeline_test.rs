//! End-to-end dispatch pipeline: typed request handling through behaviors,
//! event fan-out, and failure aggregation across the public API.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;

use relay_core::cancellation::CancellationToken;
use relay_core::dispatch::{
    Behavior, ErasedOutcome, EventDispatchPolicy, EventDispatcher, EventHandler, HandlerRegistry,
    Next, PublishMode, RequestDispatcher, RequestHandler,
};
use relay_core::error::{DispatchError, DispatchResult};
use relay_core::message::{Event, Message, MessageRef, Request};
use relay_core::outbox::InMemoryOutboxStorage;
use relay_core::outcome::Outcome;
use relay_core::MessageContext;

#[derive(Debug)]
struct CreateInvoice {
    customer: String,
    amount_cents: i64,
}

impl Message for CreateInvoice {
    fn message_type() -> &'static str {
        "billing.create_invoice"
    }
}

impl Request for CreateInvoice {
    type Response = InvoiceCreated;
}

#[derive(Debug, Clone, PartialEq)]
struct InvoiceCreated {
    invoice_id: u64,
    customer: String,
}

#[derive(Debug, Clone)]
struct InvoiceIssued {
    invoice_id: u64,
}

impl Message for InvoiceIssued {
    fn message_type() -> &'static str {
        "billing.invoice_issued"
    }
}

impl Event for InvoiceIssued {}

struct CreateInvoiceHandler;

#[async_trait]
impl RequestHandler<CreateInvoice> for CreateInvoiceHandler {
    async fn handle(
        &self,
        _ctx: &MessageContext,
        request: &CreateInvoice,
        _token: &CancellationToken,
    ) -> Outcome<InvoiceCreated> {
        if request.amount_cents <= 0 {
            return Outcome::failure(DispatchError::validation(
                "amount_cents",
                "must be positive",
            ));
        }
        Outcome::success(InvoiceCreated {
            invoice_id: 4001,
            customer: request.customer.clone(),
        })
    }
}

struct CountingEventHandler {
    seen: Arc<AtomicUsize>,
}

#[async_trait]
impl EventHandler<InvoiceIssued> for CountingEventHandler {
    async fn handle(
        &self,
        _ctx: &MessageContext,
        _event: &InvoiceIssued,
        _token: &CancellationToken,
    ) -> Outcome<()> {
        self.seen.fetch_add(1, Ordering::SeqCst);
        Outcome::ok()
    }
}

struct FailingEventHandler {
    reason: &'static str,
}

#[async_trait]
impl EventHandler<InvoiceIssued> for FailingEventHandler {
    async fn handle(
        &self,
        _ctx: &MessageContext,
        _event: &InvoiceIssued,
        _token: &CancellationToken,
    ) -> Outcome<()> {
        Outcome::failure(DispatchError::exceptional(self.reason))
    }
}

struct AuditBehavior {
    log: Arc<Mutex<Vec<String>>>,
}

#[async_trait]
impl Behavior for AuditBehavior {
    async fn handle<'a>(
        &self,
        _ctx: &MessageContext,
        message: &dyn MessageRef,
        next: Next<'a>,
        _token: &CancellationToken,
    ) -> DispatchResult<ErasedOutcome> {
        self.log.lock().push(message.message_type().to_string());
        let outcome = next().await?;
        Ok(outcome.with_metadata("audited", true))
    }

    fn name(&self) -> &str {
        "audit"
    }
}

fn pipeline() -> (Arc<HandlerRegistry>, Arc<EventDispatcher>, MessageContext) {
    let registry = Arc::new(HandlerRegistry::new());
    let outbox = Arc::new(InMemoryOutboxStorage::new());
    let dispatcher = Arc::new(EventDispatcher::new(Arc::clone(&registry), outbox));
    let ctx = MessageContext::new(Arc::clone(&dispatcher));
    (registry, dispatcher, ctx)
}

#[tokio::test]
async fn request_flows_through_behavior_to_typed_response() {
    let (registry, _dispatcher, ctx) = pipeline();
    registry
        .register_request_handler::<CreateInvoice, _>(CreateInvoiceHandler)
        .unwrap();

    let log = Arc::new(Mutex::new(Vec::new()));
    let sender = RequestDispatcher::with_behaviors(
        Arc::clone(&registry),
        vec![Arc::new(AuditBehavior {
            log: Arc::clone(&log),
        })],
    );
    let token = CancellationToken::new();

    let outcome = sender
        .send(
            &ctx,
            &CreateInvoice {
                customer: "acme".to_string(),
                amount_cents: 12_500,
            },
            &token,
        )
        .await
        .unwrap();

    assert!(outcome.is_success());
    assert_eq!(
        outcome.value(),
        Some(&InvoiceCreated {
            invoice_id: 4001,
            customer: "acme".to_string(),
        })
    );
    assert_eq!(
        outcome.metadata_value("audited"),
        Some(&serde_json::json!(true))
    );
    assert_eq!(*log.lock(), vec!["billing.create_invoice"]);
}

#[tokio::test]
async fn handler_validation_failure_is_an_outcome_not_an_abort() {
    let (registry, _dispatcher, ctx) = pipeline();
    registry
        .register_request_handler::<CreateInvoice, _>(CreateInvoiceHandler)
        .unwrap();
    let sender = RequestDispatcher::new(Arc::clone(&registry));
    let token = CancellationToken::new();

    let outcome = sender
        .send(
            &ctx,
            &CreateInvoice {
                customer: "acme".to_string(),
                amount_cents: -5,
            },
            &token,
        )
        .await
        .unwrap();

    assert!(outcome.is_failure());
    assert!(matches!(
        outcome.first_error(),
        Some(DispatchError::Validation { .. })
    ));
}

#[tokio::test]
async fn missing_handler_is_a_failure_outcome() {
    let (registry, _dispatcher, ctx) = pipeline();
    let sender = RequestDispatcher::new(registry);
    let token = CancellationToken::new();

    let outcome = sender
        .send(
            &ctx,
            &CreateInvoice {
                customer: "acme".to_string(),
                amount_cents: 100,
            },
            &token,
        )
        .await
        .unwrap();

    assert!(outcome.is_failure());
    assert!(matches!(
        outcome.first_error(),
        Some(DispatchError::HandlerMissing { .. })
    ));
}

#[tokio::test]
async fn duplicate_request_handler_registration_is_rejected() {
    let (registry, _dispatcher, _ctx) = pipeline();
    registry
        .register_request_handler::<CreateInvoice, _>(CreateInvoiceHandler)
        .unwrap();
    assert!(registry
        .register_request_handler::<CreateInvoice, _>(CreateInvoiceHandler)
        .is_err());
}

#[tokio::test]
async fn event_fans_out_to_every_handler_and_aggregates_failures() {
    let (registry, dispatcher, ctx) = pipeline();
    let seen = Arc::new(AtomicUsize::new(0));
    registry.register_event_handler::<InvoiceIssued, _>(CountingEventHandler {
        seen: Arc::clone(&seen),
    });
    registry.register_event_handler::<InvoiceIssued, _>(FailingEventHandler {
        reason: "ledger offline",
    });
    registry.register_event_handler::<InvoiceIssued, _>(FailingEventHandler {
        reason: "email bounced",
    });

    let token = CancellationToken::new();
    let outcome = dispatcher
        .dispatch(&ctx, &InvoiceIssued { invoice_id: 4001 }, &token)
        .await
        .unwrap();

    // Healthy handler still ran; both failures are reported together.
    assert_eq!(seen.load(Ordering::SeqCst), 1);
    assert!(outcome.is_failure());
    let rendered = outcome
        .errors()
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ");
    assert!(rendered.contains("ledger offline"));
    assert!(rendered.contains("email bounced"));
}

#[tokio::test]
async fn sequential_fail_fast_stops_at_first_failure() {
    let registry = Arc::new(HandlerRegistry::new());
    let outbox = Arc::new(InMemoryOutboxStorage::new());
    let dispatcher = Arc::new(
        EventDispatcher::new(Arc::clone(&registry), outbox)
            .with_policy(EventDispatchPolicy::SequentialFailFast),
    );
    let ctx = MessageContext::new(Arc::clone(&dispatcher));

    let seen = Arc::new(AtomicUsize::new(0));
    registry.register_event_handler::<InvoiceIssued, _>(FailingEventHandler {
        reason: "ledger offline",
    });
    registry.register_event_handler::<InvoiceIssued, _>(CountingEventHandler {
        seen: Arc::clone(&seen),
    });

    let token = CancellationToken::new();
    let outcome = dispatcher
        .dispatch(&ctx, &InvoiceIssued { invoice_id: 4001 }, &token)
        .await
        .unwrap();

    assert!(outcome.is_failure());
    assert_eq!(
        seen.load(Ordering::SeqCst),
        0,
        "later handlers must not run after a fail-fast failure"
    );
}

#[tokio::test]
async fn event_with_no_handlers_publishes_cleanly() {
    let (_registry, dispatcher, ctx) = pipeline();
    let token = CancellationToken::new();

    let outcome = ctx
        .publish_event(
            InvoiceIssued { invoice_id: 1 },
            PublishMode::Immediate,
            &token,
        )
        .await
        .unwrap();
    assert!(outcome.is_success());
    let _ = dispatcher;
}

#[tokio::test]
async fn cancelled_token_aborts_dispatch_without_a_failure_outcome() {
    let (registry, _dispatcher, ctx) = pipeline();
    registry
        .register_request_handler::<CreateInvoice, _>(CreateInvoiceHandler)
        .unwrap();
    let sender = RequestDispatcher::new(registry);
    let token = CancellationToken::new();
    token.cancel();

    let result = sender
        .send(
            &ctx,
            &CreateInvoice {
                customer: "acme".to_string(),
                amount_cents: 100,
            },
            &token,
        )
        .await;
    assert!(result.is_err());
}
