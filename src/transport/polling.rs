//! Polling transport: one poll loop per subscribed topic.
//!
//! Each subscription spawns a task that repeatedly receives a bounded batch
//! from the queue backend and processes the batch concurrently. Successful
//! deliveries are deleted; failed ones are scheduled for redelivery by
//! resetting their visibility timeout, until the attempt budget is spent
//! and the message is dropped. Unsubscribe and shutdown drain in-flight
//! work within a grace period before hard-cancelling the loop.

use std::collections::HashMap;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::future::join_all;
use futures::FutureExt;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use super::envelope::{unwrap_notification, MessageEnvelope};
use super::{MessageTransport, QueueBackend, ReceivedMessage, SubscriptionDescriptor};
use crate::cancellation::CancellationToken;
use crate::config::TransportConfig;
use crate::error::{Cancelled, DispatchError, DispatchResult};
use crate::outcome::Outcome;

struct PollingTask {
    token: CancellationToken,
    handle: JoinHandle<()>,
}

/// Queue-backed transport polling each subscribed topic on its own task.
pub struct PollingTransport {
    name: String,
    backend: Arc<dyn QueueBackend>,
    config: TransportConfig,
    shutdown: CancellationToken,
    tasks: Mutex<HashMap<String, PollingTask>>,
}

impl PollingTransport {
    pub fn new(
        name: impl Into<String>,
        backend: Arc<dyn QueueBackend>,
        config: TransportConfig,
    ) -> Self {
        Self {
            name: name.into(),
            backend,
            config,
            shutdown: CancellationToken::new(),
            tasks: Mutex::new(HashMap::new()),
        }
    }

    /// Topics with a running poll loop.
    pub async fn subscribed_topics(&self) -> Vec<String> {
        self.tasks.lock().await.keys().cloned().collect()
    }

    /// Stop every poll loop, draining each within the grace period.
    pub async fn shutdown(&self) {
        info!(transport = %self.name, "Transport shutting down");
        self.shutdown.cancel();
        let tasks: Vec<(String, PollingTask)> = self.tasks.lock().await.drain().collect();
        for (topic, task) in tasks {
            drain_task(&topic, task, self.config.drain_timeout()).await;
        }
    }
}

#[async_trait]
impl MessageTransport for PollingTransport {
    fn name(&self) -> &str {
        &self.name
    }

    async fn publish(
        &self,
        topic: &str,
        envelope: MessageEnvelope,
        token: &CancellationToken,
    ) -> DispatchResult<Outcome<()>> {
        if token.is_cancelled() {
            return Err(Cancelled);
        }
        let attributes = envelope.to_attributes();
        match self.backend.send(topic, envelope.payload, attributes).await {
            Ok(()) => {
                debug!(transport = %self.name, topic, message_id = %envelope.message_id, "Published");
                Ok(Outcome::ok())
            }
            Err(error) => Ok(Outcome::failure(error)),
        }
    }

    async fn subscribe(
        &self,
        descriptor: SubscriptionDescriptor,
        token: &CancellationToken,
    ) -> DispatchResult<Outcome<()>> {
        if token.is_cancelled() {
            return Err(Cancelled);
        }
        if let Some(retry) = &descriptor.retry_policy {
            if let Err(error) = retry.validate() {
                return Ok(Outcome::failure(error));
            }
        }

        let mut tasks = self.tasks.lock().await;
        if tasks.contains_key(&descriptor.topic) {
            return Ok(Outcome::failure(DispatchError::transport(
                &descriptor.topic,
                "subscribe",
                "topic already subscribed",
            )));
        }

        let topic = descriptor.topic.clone();
        // The loop stops on transport shutdown, on the subscriber's own
        // token, or on unsubscribe (which cancels the linked token itself).
        let loop_token = self.shutdown.linked_with(token);
        let poll_loop = PollLoop {
            transport: self.name.clone(),
            backend: Arc::clone(&self.backend),
            config: self.config.clone(),
            descriptor,
            token: loop_token.clone(),
        };
        let handle = tokio::spawn(poll_loop.run());
        tasks.insert(
            topic.clone(),
            PollingTask {
                token: loop_token,
                handle,
            },
        );
        info!(transport = %self.name, topic, "Subscribed");
        Ok(Outcome::ok())
    }

    async fn unsubscribe(
        &self,
        topic: &str,
        token: &CancellationToken,
    ) -> DispatchResult<Outcome<()>> {
        if token.is_cancelled() {
            return Err(Cancelled);
        }
        let task = self.tasks.lock().await.remove(topic);
        match task {
            Some(task) => {
                drain_task(topic, task, self.config.drain_timeout()).await;
                info!(transport = %self.name, topic, "Unsubscribed");
                Ok(Outcome::ok())
            }
            None => Ok(Outcome::failure(DispatchError::transport(
                topic,
                "unsubscribe",
                "topic not subscribed",
            ))),
        }
    }
}

/// Cancel a poll loop and wait for it to finish, aborting after the grace
/// period.
async fn drain_task(topic: &str, task: PollingTask, drain_timeout: Duration) {
    task.token.cancel();
    let mut handle = task.handle;
    if tokio::time::timeout(drain_timeout, &mut handle).await.is_err() {
        warn!(topic, "Poll loop did not drain in time, aborting");
        handle.abort();
    }
}

struct PollLoop {
    transport: String,
    backend: Arc<dyn QueueBackend>,
    config: TransportConfig,
    descriptor: SubscriptionDescriptor,
    token: CancellationToken,
}

impl PollLoop {
    async fn run(self) {
        let topic = self.descriptor.topic.clone();
        let backend_cap = self
            .config
            .max_batch_size
            .map_or(self.backend.max_batch_size(), |cap| {
                cap.min(self.backend.max_batch_size())
            });
        let batch_size = self.descriptor.max_concurrency.min(backend_cap).max(1);
        debug!(transport = %self.transport, topic, batch_size, "Poll loop started");

        loop {
            let received = tokio::select! {
                _ = self.token.cancelled() => break,
                received = self.backend.receive(
                    &topic,
                    batch_size,
                    self.config.poll_wait(),
                    self.config.visibility_timeout(),
                ) => received,
            };

            match received {
                Ok(messages) if messages.is_empty() => continue,
                Ok(messages) => {
                    join_all(messages.into_iter().map(|message| self.process(message))).await;
                }
                Err(err) => {
                    error!(transport = %self.transport, topic, error = %err, "Receive failed");
                    tokio::select! {
                        _ = self.token.cancelled() => break,
                        _ = tokio::time::sleep(self.config.receive_backoff()) => {}
                    }
                }
            }
        }
        debug!(transport = %self.transport, topic, "Poll loop stopped");
    }

    async fn process(&self, message: ReceivedMessage) {
        let topic = &self.descriptor.topic;

        // Topic fan-out wraps the original message in a notification
        // document; unwrap it before decoding, otherwise the raw body and
        // queue attributes are the envelope.
        let (body, attributes) = match unwrap_notification(&message.body) {
            Some((body, attributes)) => (body, attributes),
            None => (message.body, message.attributes),
        };

        let envelope = match MessageEnvelope::from_attributes(&attributes, body) {
            Ok(envelope) => envelope,
            Err(err) => {
                // Undecodable messages can never succeed; redelivery would
                // loop forever.
                warn!(topic, error = %err, "Dropping undecodable message");
                self.delete(&message.receipt).await;
                return;
            }
        };

        let message_id = envelope.message_id;
        let run = AssertUnwindSafe(self.descriptor.handler.handle(envelope, &self.token))
            .catch_unwind();
        let outcome = match run.await {
            Ok(Ok(outcome)) => outcome,
            Ok(Err(Cancelled)) => {
                // Left in flight; the visibility timeout redelivers it.
                debug!(topic, %message_id, "Delivery cancelled, message stays in flight");
                return;
            }
            Err(panic) => Outcome::failure(DispatchError::from_panic(panic)),
        };

        if outcome.is_success() {
            self.delete(&message.receipt).await;
            return;
        }

        let max_attempts = self
            .descriptor
            .retry_policy
            .as_ref()
            .map_or(self.config.default_max_delivery_attempts, |retry| {
                retry.max_attempts
            });
        let reason = outcome
            .first_error()
            .map(ToString::to_string)
            .unwrap_or_default();

        if message.delivery_attempt < max_attempts {
            let delay = self
                .descriptor
                .retry_policy
                .as_ref()
                .map_or(self.config.redelivery_delay(), |retry| {
                    retry.delay_for(message.delivery_attempt)
                });
            warn!(
                topic,
                %message_id,
                attempt = message.delivery_attempt,
                delay_ms = delay.as_millis() as u64,
                error = %reason,
                "Delivery failed, scheduling redelivery"
            );
            if let Err(err) = self
                .backend
                .change_visibility(topic, &message.receipt, delay)
                .await
            {
                warn!(topic, %message_id, error = %err, "Failed to schedule redelivery");
            }
        } else {
            error!(
                topic,
                %message_id,
                attempts = message.delivery_attempt,
                error = %reason,
                "Delivery attempts exhausted, dropping message"
            );
            self.delete(&message.receipt).await;
        }
    }

    async fn delete(&self, receipt: &str) {
        if let Err(err) = self.backend.delete(&self.descriptor.topic, receipt).await {
            warn!(topic = %self.descriptor.topic, error = %err, "Failed to delete message");
        }
    }
}
