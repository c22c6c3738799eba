//! # Message Transport
//!
//! Cross-boundary delivery: envelopes carry serialized payloads plus wire
//! attributes, a queue backend provides visibility-timeout receive
//! semantics, and the polling transport runs one poll loop per subscribed
//! topic, dispatching received envelopes to subscription handlers with
//! redelivery on failure.

pub mod backend;
pub mod envelope;
pub mod polling;
pub mod serializer;

pub use backend::{InMemoryQueueBackend, QueueBackend, ReceivedMessage};
pub use envelope::{attribute_keys, unwrap_notification, MessageEnvelope};
pub use polling::PollingTransport;
pub use serializer::{decode, encode, JsonSerializer, MessageSerializer};

use std::sync::Arc;

use async_trait::async_trait;

use crate::cancellation::CancellationToken;
use crate::error::DispatchResult;
use crate::outcome::Outcome;
use crate::resilience::RetryPolicyConfig;

/// Receives envelopes delivered on a subscribed topic.
///
/// A failure outcome requests redelivery (until the subscription's attempt
/// budget is spent); `Cancelled` leaves the delivery in flight so it
/// reappears after its visibility timeout.
#[async_trait]
pub trait SubscriptionHandler: Send + Sync {
    async fn handle(
        &self,
        envelope: MessageEnvelope,
        token: &CancellationToken,
    ) -> DispatchResult<Outcome<()>>;
}

/// Everything a transport needs to run one topic subscription.
#[derive(Clone)]
pub struct SubscriptionDescriptor {
    pub topic: String,
    pub handler: Arc<dyn SubscriptionHandler>,
    /// Messages processed concurrently per poll batch.
    pub max_concurrency: usize,
    /// Redelivery schedule; the transport's defaults apply when unset.
    pub retry_policy: Option<RetryPolicyConfig>,
}

impl SubscriptionDescriptor {
    pub fn new(topic: impl Into<String>, handler: Arc<dyn SubscriptionHandler>) -> Self {
        Self {
            topic: topic.into(),
            handler,
            max_concurrency: 1,
            retry_policy: None,
        }
    }

    pub fn with_max_concurrency(mut self, max_concurrency: usize) -> Self {
        self.max_concurrency = max_concurrency.max(1);
        self
    }

    pub fn with_retry_policy(mut self, retry_policy: RetryPolicyConfig) -> Self {
        self.retry_policy = Some(retry_policy);
        self
    }
}

/// A pluggable cross-boundary transport.
#[async_trait]
pub trait MessageTransport: Send + Sync {
    /// Transport instance name, for logs and diagnostics.
    fn name(&self) -> &str;

    /// Publish an envelope to a topic.
    async fn publish(
        &self,
        topic: &str,
        envelope: MessageEnvelope,
        token: &CancellationToken,
    ) -> DispatchResult<Outcome<()>>;

    /// Start delivering a topic's messages to the descriptor's handler.
    async fn subscribe(
        &self,
        descriptor: SubscriptionDescriptor,
        token: &CancellationToken,
    ) -> DispatchResult<Outcome<()>>;

    /// Stop a topic subscription, draining in-flight work within the
    /// configured grace period.
    async fn unsubscribe(&self, topic: &str, token: &CancellationToken)
        -> DispatchResult<Outcome<()>>;
}
