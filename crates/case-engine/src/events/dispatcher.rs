//! Domain event dispatcher
//!
//! Events handed over by a flushed outbox are queued in FIFO order and
//! delivered to every registered listener. Events produced while listeners
//! run (for example a listener enqueueing a case) are appended to the same
//! queue and delivered by whichever drain is currently active, so delivery
//! never recurses.

use std::collections::VecDeque;
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};
use tokio::sync::{broadcast, watch, Notify};
use tokio::task::JoinHandle;
use tracing::{debug, error, info};

use super::{DomainEvent, DomainEventListener};

pub struct EventDispatcher {
    pending: Mutex<VecDeque<DomainEvent>>,
    listeners: RwLock<Vec<Arc<dyn DomainEventListener>>>,
    notify: Notify,
    tap: broadcast::Sender<DomainEvent>,
    draining: tokio::sync::Mutex<()>,
}

impl EventDispatcher {
    pub fn new() -> Self {
        let (tap, _) = broadcast::channel(1024);
        Self {
            pending: Mutex::new(VecDeque::new()),
            listeners: RwLock::new(Vec::new()),
            notify: Notify::new(),
            tap,
            draining: tokio::sync::Mutex::new(()),
        }
    }

    pub fn register(&self, listener: Arc<dyn DomainEventListener>) {
        debug!("👂 Registering domain event listener '{}'", listener.name());
        self.listeners.write().push(listener);
    }

    pub fn listener_count(&self) -> usize {
        self.listeners.read().len()
    }

    /// Observe every delivered event
    pub fn subscribe(&self) -> broadcast::Receiver<DomainEvent> {
        self.tap.subscribe()
    }

    pub fn enqueue(&self, events: impl IntoIterator<Item = DomainEvent>) {
        self.pending.lock().extend(events);
        self.notify.notify_one();
    }

    pub fn pending_count(&self) -> usize {
        self.pending.lock().len()
    }

    /// Deliver queued events until the queue is empty
    ///
    /// Returns immediately when another drain is active; that drain picks up
    /// whatever this caller enqueued.
    pub async fn dispatch_pending(&self) -> usize {
        let mut delivered = 0;

        loop {
            let Ok(_draining) = self.draining.try_lock() else {
                return delivered;
            };

            loop {
                let next = self.pending.lock().pop_front();
                let Some(event) = next else { break };
                self.deliver(&event).await;
                delivered += 1;
            }

            drop(_draining);
            if self.pending.lock().is_empty() {
                return delivered;
            }
        }
    }

    async fn deliver(&self, event: &DomainEvent) {
        debug!("📨 Dispatching {}", event);

        let listeners: Vec<Arc<dyn DomainEventListener>> = self.listeners.read().clone();
        for listener in listeners {
            if let Err(e) = listener.on_event(event).await {
                error!("❌ Listener '{}' failed on {}: {}", listener.name(), event, e);
            }
        }

        let _ = self.tap.send(event.clone());
    }

    /// Background task draining events left behind by other producers
    pub fn spawn_pump(self: &Arc<Self>, mut shutdown: watch::Receiver<bool>) -> JoinHandle<()> {
        let dispatcher = Arc::clone(self);
        tokio::spawn(async move {
            info!("🚀 Domain event pump started");
            loop {
                tokio::select! {
                    changed = shutdown.changed() => {
                        if changed.is_err() || *shutdown.borrow() {
                            break;
                        }
                    }
                    _ = dispatcher.notify.notified() => {
                        dispatcher.dispatch_pending().await;
                    }
                }
            }
            info!("🛑 Domain event pump stopped");
        })
    }
}

impl Default for EventDispatcher {
    fn default() -> Self {
        Self::new()
    }
}
