//! Shared collaborators handed to every manager at construction

use std::sync::Arc;

use chrono::{DateTime, Utc};

use crate::clock::Clock;
use crate::error::Result;
use crate::events::{EventBus, EventOutbox};
use crate::locks::{LockGuard, LockRegistry};
use crate::store::{Store, StoreTx};

#[derive(Clone)]
pub struct EngineContext {
    pub store: Arc<dyn Store>,
    pub locks: LockRegistry,
    pub events: EventBus,
    pub clock: Arc<dyn Clock>,
}

impl EngineContext {
    pub fn new(store: Arc<dyn Store>, locks: LockRegistry, events: EventBus, clock: Arc<dyn Clock>) -> Self {
        Self {
            store,
            locks,
            events,
            clock,
        }
    }

    pub fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }

    pub async fn begin(&self) -> Result<Box<dyn StoreTx>> {
        self.store.begin().await
    }

    /// Commit the unit of work, release its locks, then deliver what it
    /// produced
    ///
    /// Listeners may take the same locks again, so delivery must happen after
    /// the guards are gone.
    pub async fn commit(&self, tx: Box<dyn StoreTx>, outbox: EventOutbox, guards: Vec<LockGuard>) -> Result<()> {
        tx.commit().await?;
        drop(guards);
        outbox.flush(&self.events).await;
        Ok(())
    }
}
