//! # Event Outbox
//!
//! Durable staging area guaranteeing events are not lost between being
//! raised and being delivered. Events published in outbox mode are staged
//! here and only dispatched when the owning context commits; a crash
//! between successful dispatch and mark-processed causes redelivery on the
//! next commit cycle. The guarantee is at-least-once, never exactly-once —
//! handlers must be idempotent or deduplicate by event id.

mod in_memory;

pub use in_memory::InMemoryOutboxStorage;

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::message::{Event, MessageRef};
use crate::outcome::Outcome;

/// An event staged for later dispatch, type-erased for storage.
#[derive(Clone)]
pub struct StagedEvent {
    /// Identity of the staged entry; also the dedup key for idempotent
    /// mark-processed.
    pub id: Uuid,
    /// Message-type token used to resolve handlers on replay.
    pub event_type: &'static str,
    /// The event payload.
    pub payload: Arc<dyn MessageRef>,
    /// When the event was staged.
    pub staged_at: DateTime<Utc>,
}

impl StagedEvent {
    /// Stage an event, assigning it a fresh id.
    pub fn new<E: Event>(event: E) -> Self {
        Self {
            id: Uuid::new_v4(),
            event_type: E::message_type(),
            payload: Arc::new(event),
            staged_at: Utc::now(),
        }
    }
}

impl fmt::Debug for StagedEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StagedEvent")
            .field("id", &self.id)
            .field("event_type", &self.event_type)
            .field("staged_at", &self.staged_at)
            .finish_non_exhaustive()
    }
}

/// Lifecycle state of an outbox entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutboxEntryState {
    /// Staged, awaiting dispatch.
    Pending,
    /// Dispatched and acknowledged.
    Processed,
}

/// An outbox record wrapping a staged event with its delivery state.
#[derive(Clone)]
pub struct OutboxEntry {
    pub event: StagedEvent,
    pub state: OutboxEntryState,
    /// Failed replay attempts so far.
    pub attempts: u32,
    /// Last replay error, if any.
    pub last_error: Option<String>,
    pub processed_at: Option<DateTime<Utc>>,
}

impl OutboxEntry {
    fn pending(event: StagedEvent) -> Self {
        Self {
            event,
            state: OutboxEntryState::Pending,
            attempts: 0,
            last_error: None,
            processed_at: None,
        }
    }
}

/// Durable staging area for events awaiting dispatch.
///
/// Implementations must tolerate concurrent `add`/`get_pending`/
/// `mark_processed` across commit cycles with read-after-write consistency
/// per entry. Entries are never expired automatically — redelivery risk is
/// managed by the caller's commit discipline.
#[async_trait]
pub trait EventOutboxStorage: Send + Sync {
    /// Stage an event. Staging the same entry id twice is a no-op success.
    async fn add(&self, event: StagedEvent) -> Outcome<()>;

    /// All pending events, in staging order.
    async fn get_pending(&self) -> Vec<StagedEvent>;

    /// Mark an entry processed. Idempotent: marking a processed entry again
    /// is a no-op success and never triggers redelivery.
    async fn mark_processed(&self, event_id: Uuid) -> Outcome<()>;

    /// Record a failed replay attempt; the entry stays pending.
    async fn mark_failed(&self, event_id: Uuid, error: String) -> Outcome<()>;

    /// Remove every entry, pending or processed.
    async fn clear(&self) -> Outcome<()>;
}
