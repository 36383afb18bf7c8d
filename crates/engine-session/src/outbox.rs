use engine_core::{CanonicalMessage, DeliveryState};
use uuid::Uuid;

/// Ordered collection of locally-originated messages awaiting server
/// confirmation or retry.
#[derive(Debug, Default)]
pub struct PendingOutbox {
    entries: Vec<CanonicalMessage>,
}

impl PendingOutbox {
    pub fn push(&mut self, message: CanonicalMessage) {
        self.entries.push(message);
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn entries(&self) -> &[CanonicalMessage] {
        &self.entries
    }

    /// Temporary local ids of every queued message.
    pub fn local_ids(&self) -> Vec<i64> {
        self.entries.iter().map(|message| message.id).collect()
    }

    /// Remove and return the entry whose correlation token the server
    /// echoed. Exact match; same-day sends never alias each other.
    pub fn confirm(&mut self, correlation: Uuid) -> Option<CanonicalMessage> {
        let index = self
            .entries
            .iter()
            .position(|message| message.correlation == Some(correlation))?;
        Some(self.entries.remove(index))
    }

    /// Flag every queued message as failed, keeping it for retry.
    pub fn mark_all_failed(&mut self) {
        for message in &mut self.entries {
            message.delivery = DeliveryState::Failed;
        }
    }

    /// Snapshot and clear the queue, for retry replay.
    pub fn drain_all(&mut self) -> Vec<CanonicalMessage> {
        std::mem::take(&mut self.entries)
    }
}
