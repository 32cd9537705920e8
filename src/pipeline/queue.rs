//! In-process FIFO buffer between ingestion and the batch aggregator
//!
//! Many producers, one consumer. The lock is only held for a single
//! push/pop, so `enqueue` never waits on aggregation work.

use super::error::ValidationError;
use super::types::{PlayEvent, QueuedEvent};
use std::collections::VecDeque;
use std::sync::{Mutex, MutexGuard};

/// Unbounded, ordered queue of accepted-but-unprocessed play events
#[derive(Debug, Default)]
pub struct EventQueue {
    events: Mutex<VecDeque<QueuedEvent>>,
}

impl EventQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Validate, stamp and append an event to the tail
    ///
    /// Returns the stored event. Rejected events are never stored.
    pub fn enqueue(&self, event: PlayEvent) -> Result<QueuedEvent, ValidationError> {
        event.validate()?;

        let queued = QueuedEvent {
            event,
            queued_at: chrono::Utc::now(),
        };

        let size = {
            let mut events = self.lock();
            events.push_back(queued.clone());
            events.len()
        };

        log::debug!(
            "Event queued: {} on {} (queue size: {})",
            queued.campaign_id(),
            queued.screen_id(),
            size
        );

        Ok(queued)
    }

    /// Remove and return the head element, or `None` if empty
    pub fn dequeue(&self) -> Option<QueuedEvent> {
        self.lock().pop_front()
    }

    /// Number of pending events
    pub fn size(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.size() == 0
    }

    /// Drop every pending event, returning how many were discarded
    pub fn clear(&self) -> usize {
        let mut events = self.lock();
        let dropped = events.len();
        events.clear();
        dropped
    }

    // Push/pop cannot leave the deque half-modified, so a poisoned lock is
    // still safe to keep using.
    fn lock(&self) -> MutexGuard<'_, VecDeque<QueuedEvent>> {
        self.events.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}
