//! Queue backend abstraction for the polling transport.
//!
//! A backend is any queue system with per-message visibility control:
//! received messages become invisible for a timeout and reappear unless
//! deleted. The in-memory implementation mirrors those semantics for tests
//! and single-process deployments.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;
use tokio::sync::{Mutex, Notify};
use tokio::time::Instant;
use tracing::debug;
use uuid::Uuid;

use crate::error::DispatchError;

/// A message pulled from a queue, invisible until deleted or its
/// visibility timeout lapses.
#[derive(Debug, Clone)]
pub struct ReceivedMessage {
    /// Opaque handle for delete / change-visibility on this delivery.
    pub receipt: String,
    pub body: Vec<u8>,
    pub attributes: HashMap<String, String>,
    /// 1 on first delivery, incremented on each redelivery.
    pub delivery_attempt: u32,
}

/// Queue system with visibility-timeout receive semantics.
#[async_trait]
pub trait QueueBackend: Send + Sync {
    /// Upper bound on messages per receive call.
    fn max_batch_size(&self) -> usize;

    async fn send(
        &self,
        topic: &str,
        body: Vec<u8>,
        attributes: HashMap<String, String>,
    ) -> Result<(), DispatchError>;

    /// Receive up to `max_messages`, waiting at most `wait` for the first
    /// arrival. Returned messages are invisible for `visibility`.
    async fn receive(
        &self,
        topic: &str,
        max_messages: usize,
        wait: Duration,
        visibility: Duration,
    ) -> Result<Vec<ReceivedMessage>, DispatchError>;

    /// Acknowledge a delivery; the message is gone for good.
    async fn delete(&self, topic: &str, receipt: &str) -> Result<(), DispatchError>;

    /// Reset the visibility timeout on an in-flight delivery. A zero
    /// duration makes the message immediately receivable again.
    async fn change_visibility(
        &self,
        topic: &str,
        receipt: &str,
        visibility: Duration,
    ) -> Result<(), DispatchError>;
}

struct StoredMessage {
    receipt: String,
    body: Vec<u8>,
    attributes: HashMap<String, String>,
    receive_count: u32,
    invisible_until: Option<Instant>,
}

#[derive(Default)]
struct TopicQueue {
    messages: Mutex<Vec<StoredMessage>>,
    arrival: Notify,
}

/// In-memory queue backend with visibility timeouts and delivery counts.
pub struct InMemoryQueueBackend {
    topics: DashMap<String, Arc<TopicQueue>>,
    max_batch_size: usize,
}

impl Default for InMemoryQueueBackend {
    fn default() -> Self {
        Self::new(10)
    }
}

impl InMemoryQueueBackend {
    pub fn new(max_batch_size: usize) -> Self {
        Self {
            topics: DashMap::new(),
            max_batch_size: max_batch_size.max(1),
        }
    }

    fn topic(&self, topic: &str) -> Arc<TopicQueue> {
        self.topics
            .entry(topic.to_string())
            .or_default()
            .value()
            .clone()
    }

    /// Messages currently stored on a topic, in-flight included.
    pub async fn depth(&self, topic: &str) -> usize {
        match self.topics.get(topic) {
            Some(queue) => queue.messages.lock().await.len(),
            None => 0,
        }
    }
}

#[async_trait]
impl QueueBackend for InMemoryQueueBackend {
    fn max_batch_size(&self) -> usize {
        self.max_batch_size
    }

    async fn send(
        &self,
        topic: &str,
        body: Vec<u8>,
        attributes: HashMap<String, String>,
    ) -> Result<(), DispatchError> {
        let queue = self.topic(topic);
        {
            let mut messages = queue.messages.lock().await;
            messages.push(StoredMessage {
                receipt: Uuid::new_v4().to_string(),
                body,
                attributes,
                receive_count: 0,
                invisible_until: None,
            });
        }
        queue.arrival.notify_waiters();
        debug!(topic, "Message enqueued");
        Ok(())
    }

    async fn receive(
        &self,
        topic: &str,
        max_messages: usize,
        wait: Duration,
        visibility: Duration,
    ) -> Result<Vec<ReceivedMessage>, DispatchError> {
        let queue = self.topic(topic);
        let deadline = Instant::now() + wait;
        let limit = max_messages.min(self.max_batch_size).max(1);

        loop {
            let now = Instant::now();
            let received = {
                let mut messages = queue.messages.lock().await;
                let mut received = Vec::new();
                for stored in messages.iter_mut() {
                    if received.len() == limit {
                        break;
                    }
                    let visible = stored.invisible_until.map_or(true, |until| until <= now);
                    if visible {
                        stored.receive_count += 1;
                        stored.invisible_until = Some(now + visibility);
                        received.push(ReceivedMessage {
                            receipt: stored.receipt.clone(),
                            body: stored.body.clone(),
                            attributes: stored.attributes.clone(),
                            delivery_attempt: stored.receive_count,
                        });
                    }
                }
                received
            };

            if !received.is_empty() {
                return Ok(received);
            }

            let now = Instant::now();
            if now >= deadline {
                return Ok(Vec::new());
            }
            // Wake on arrival, or re-scan shortly for visibility expiry.
            let rescan = (deadline - now).min(Duration::from_millis(20));
            tokio::select! {
                _ = queue.arrival.notified() => {}
                _ = tokio::time::sleep(rescan) => {}
            }
        }
    }

    async fn delete(&self, topic: &str, receipt: &str) -> Result<(), DispatchError> {
        let queue = self.topic(topic);
        let mut messages = queue.messages.lock().await;
        let before = messages.len();
        messages.retain(|stored| stored.receipt != receipt);
        if messages.len() == before {
            return Err(DispatchError::transport(
                topic,
                "delete",
                format!("no message with receipt {receipt}"),
            ));
        }
        Ok(())
    }

    async fn change_visibility(
        &self,
        topic: &str,
        receipt: &str,
        visibility: Duration,
    ) -> Result<(), DispatchError> {
        let queue = self.topic(topic);
        let mut messages = queue.messages.lock().await;
        match messages
            .iter_mut()
            .find(|stored| stored.receipt == receipt)
        {
            Some(stored) => {
                stored.invisible_until = if visibility.is_zero() {
                    None
                } else {
                    Some(Instant::now() + visibility)
                };
                drop(messages);
                if visibility.is_zero() {
                    queue.arrival.notify_waiters();
                }
                Ok(())
            }
            None => Err(DispatchError::transport(
                topic,
                "change_visibility",
                format!("no message with receipt {receipt}"),
            )),
        }
    }
}
