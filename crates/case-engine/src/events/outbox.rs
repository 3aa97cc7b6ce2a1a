//! In-process outbox for post-commit delivery

use tracing::debug;

use super::{BroadcastMessage, DomainEvent, EventBus};

/// Buffers domain events and broadcasts produced inside one unit of work
///
/// Call [`EventOutbox::flush`] only after the unit of work committed. Dropping
/// an outbox without flushing discards everything it buffered.
#[derive(Debug, Default)]
pub struct EventOutbox {
    events: Vec<DomainEvent>,
    broadcasts: Vec<BroadcastMessage>,
}

impl EventOutbox {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&mut self, event: DomainEvent) {
        self.events.push(event);
    }

    pub fn broadcast(&mut self, message: BroadcastMessage) {
        if !self.broadcasts.contains(&message) {
            self.broadcasts.push(message);
        }
    }

    pub fn events(&self) -> &[DomainEvent] {
        &self.events
    }

    pub fn broadcasts(&self) -> &[BroadcastMessage] {
        &self.broadcasts
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty() && self.broadcasts.is_empty()
    }

    /// Publish broadcasts, hand events to the dispatcher and deliver them
    pub async fn flush(mut self, bus: &EventBus) {
        let events = std::mem::take(&mut self.events);
        let broadcasts = std::mem::take(&mut self.broadcasts);

        for message in broadcasts {
            bus.broadcaster().publish(message);
        }

        if events.is_empty() {
            return;
        }

        bus.dispatcher().enqueue(events);
        bus.dispatcher().dispatch_pending().await;
    }
}

impl Drop for EventOutbox {
    fn drop(&mut self) {
        if !self.is_empty() {
            debug!(
                "🗑️ Discarding {} event(s) and {} broadcast(s) from an uncommitted unit of work",
                self.events.len(),
                self.broadcasts.len()
            );
        }
    }
}
