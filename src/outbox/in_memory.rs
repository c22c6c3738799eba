//! In-memory outbox storage.
//!
//! Reference implementation backed by a `parking_lot` RwLock. Suitable for
//! tests and single-process deployments; a durable implementation plugs in
//! behind the same trait.

use async_trait::async_trait;
use parking_lot::RwLock;
use tracing::{debug, warn};
use uuid::Uuid;

use super::{EventOutboxStorage, OutboxEntry, OutboxEntryState, StagedEvent};
use crate::error::DispatchError;
use crate::outcome::Outcome;

/// Thread-safe in-memory outbox.
#[derive(Default)]
pub struct InMemoryOutboxStorage {
    entries: RwLock<Vec<OutboxEntry>>,
}

impl InMemoryOutboxStorage {
    pub fn new() -> Self {
        Self::default()
    }

    /// Total entries, pending and processed.
    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }

    /// Entries still awaiting dispatch.
    pub fn pending_count(&self) -> usize {
        self.entries
            .read()
            .iter()
            .filter(|entry| entry.state == OutboxEntryState::Pending)
            .count()
    }

    /// Snapshot of a single entry, for diagnostics and tests.
    pub fn entry(&self, event_id: Uuid) -> Option<OutboxEntry> {
        self.entries
            .read()
            .iter()
            .find(|entry| entry.event.id == event_id)
            .cloned()
    }
}

#[async_trait]
impl EventOutboxStorage for InMemoryOutboxStorage {
    async fn add(&self, event: StagedEvent) -> Outcome<()> {
        let mut entries = self.entries.write();
        if entries.iter().any(|entry| entry.event.id == event.id) {
            debug!(event_id = %event.id, "Outbox entry already staged");
            return Outcome::ok();
        }
        debug!(event_id = %event.id, event_type = event.event_type, "Staged event in outbox");
        entries.push(OutboxEntry::pending(event));
        Outcome::ok()
    }

    async fn get_pending(&self) -> Vec<StagedEvent> {
        self.entries
            .read()
            .iter()
            .filter(|entry| entry.state == OutboxEntryState::Pending)
            .map(|entry| entry.event.clone())
            .collect()
    }

    async fn mark_processed(&self, event_id: Uuid) -> Outcome<()> {
        let mut entries = self.entries.write();
        match entries
            .iter_mut()
            .find(|entry| entry.event.id == event_id)
        {
            Some(entry) => {
                if entry.state == OutboxEntryState::Processed {
                    // Idempotent: a second mark is a no-op.
                    return Outcome::ok();
                }
                entry.state = OutboxEntryState::Processed;
                entry.processed_at = Some(chrono::Utc::now());
                debug!(event_id = %event_id, "Outbox entry processed");
                Outcome::ok()
            }
            None => Outcome::failure(DispatchError::outbox(format!(
                "no outbox entry with id {event_id}"
            ))),
        }
    }

    async fn mark_failed(&self, event_id: Uuid, error: String) -> Outcome<()> {
        let mut entries = self.entries.write();
        match entries
            .iter_mut()
            .find(|entry| entry.event.id == event_id)
        {
            Some(entry) => {
                entry.attempts += 1;
                warn!(
                    event_id = %event_id,
                    attempts = entry.attempts,
                    error = %error,
                    "Outbox replay failed, entry stays pending"
                );
                entry.last_error = Some(error);
                Outcome::ok()
            }
            None => Outcome::failure(DispatchError::outbox(format!(
                "no outbox entry with id {event_id}"
            ))),
        }
    }

    async fn clear(&self) -> Outcome<()> {
        self.entries.write().clear();
        Outcome::ok()
    }
}
