//! # Message Context
//!
//! Per-operation correlation handle. A context is created for each inbound
//! operation, carries a correlation id and occurrence timestamp fixed at
//! creation, accumulates events published in outbox mode, and exposes the
//! commit that drains them through the dispatcher's outbox-replay entry
//! point. Only the owning call path appends or commits: the context is not
//! `Clone` and is dropped after the response goes out.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use tracing::{debug, info};
use uuid::Uuid;

use crate::cancellation::CancellationToken;
use crate::dispatch::{EventDispatcher, PublishMode};
use crate::error::{Cancelled, DispatchError, DispatchResult};
use crate::message::Event;
use crate::outbox::StagedEvent;
use crate::outcome::Outcome;

/// Correlation handle for one inbound operation.
pub struct MessageContext {
    correlation_id: Uuid,
    occurred_at: DateTime<Utc>,
    dispatcher: Arc<EventDispatcher>,
    pending: Mutex<Vec<StagedEvent>>,
}

impl MessageContext {
    /// Create a context with a fresh correlation id.
    pub fn new(dispatcher: Arc<EventDispatcher>) -> Self {
        Self {
            correlation_id: Uuid::new_v4(),
            occurred_at: Utc::now(),
            dispatcher,
            pending: Mutex::new(Vec::new()),
        }
    }

    /// Create a context continuing an existing correlation, e.g. when the
    /// operation was triggered by a message from the transport.
    pub fn with_correlation_id(dispatcher: Arc<EventDispatcher>, correlation_id: Uuid) -> Self {
        Self {
            correlation_id,
            occurred_at: Utc::now(),
            dispatcher,
            pending: Mutex::new(Vec::new()),
        }
    }

    /// Opaque correlation id, fixed at creation.
    pub fn correlation_id(&self) -> Uuid {
        self.correlation_id
    }

    /// When this context was created, fixed at creation.
    pub fn occurred_at(&self) -> DateTime<Utc> {
        self.occurred_at
    }

    /// Events staged through this context and not yet committed.
    pub fn pending_count(&self) -> usize {
        self.pending.lock().len()
    }

    pub(crate) fn stage(&self, staged: StagedEvent) {
        self.pending.lock().push(staged);
    }

    /// Publish an event through the dispatcher in the given mode.
    pub async fn publish_event<E: Event>(
        &self,
        event: E,
        mode: PublishMode,
        token: &CancellationToken,
    ) -> DispatchResult<Outcome<()>> {
        let dispatcher = Arc::clone(&self.dispatcher);
        dispatcher.publish(self, &event, mode, token).await
    }

    /// Commit staged events: replay every pending outbox entry through the
    /// dispatcher's outbox-replay entry point and mark successfully
    /// dispatched entries processed.
    ///
    /// Entries whose dispatch fails stay pending for a future commit —
    /// at-least-once, not exactly-once. A crash between a successful
    /// dispatch and mark-processed redelivers on the next cycle, so
    /// handlers must tolerate duplicates.
    pub async fn commit_events(&self, token: &CancellationToken) -> DispatchResult<Outcome<()>> {
        if token.is_cancelled() {
            return Err(Cancelled);
        }

        // The storage is the source of truth at commit: it also holds
        // entries staged by earlier cycles that were never committed.
        self.pending.lock().clear();

        let dispatcher = Arc::clone(&self.dispatcher);
        let outbox = Arc::clone(dispatcher.outbox());
        let batch_limit = dispatcher.outbox_config().max_replay_batch;
        let pending = outbox.get_pending().await;

        let mut committed = 0u64;
        let mut failed = 0u64;
        let mut errors: Vec<DispatchError> = Vec::new();

        for staged in pending.into_iter().take(batch_limit) {
            if token.is_cancelled() {
                return Err(Cancelled);
            }

            let outcome = dispatcher.dispatch_from_outbox(self, &staged, token).await?;
            if outcome.is_success() {
                let marked = outbox.mark_processed(staged.id).await;
                if marked.is_failure() {
                    errors.extend(marked.errors().iter().cloned());
                    failed += 1;
                } else {
                    committed += 1;
                }
            } else {
                let reason = outcome
                    .first_error()
                    .map(ToString::to_string)
                    .unwrap_or_else(|| "dispatch failed".to_string());
                // Entry stays pending; a future commit retries it.
                let _ = outbox.mark_failed(staged.id, reason).await;
                errors.extend(outcome.errors().iter().cloned());
                failed += 1;
            }
        }

        if failed > 0 {
            info!(
                correlation_id = %self.correlation_id,
                committed,
                failed,
                "Commit finished with failures, entries left pending"
            );
        } else {
            debug!(
                correlation_id = %self.correlation_id,
                committed,
                "Commit finished"
            );
        }

        let outcome = if errors.is_empty() {
            Outcome::ok()
        } else {
            Outcome::failure(DispatchError::aggregate(errors))
        };
        Ok(outcome
            .with_metadata("committed", committed)
            .with_metadata("failed", failed))
    }
}
