//! In-process event bus
//!
//! Events are fanned out through a tokio broadcast channel. Each subscriber
//! filters by topic pattern on its own side. Slow subscribers lose the oldest
//! buffered events and log the lag.

use flock_core::{BusEvent, EventBus, Subscription};
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::debug;

/// Default number of buffered events per subscriber
const DEFAULT_CAPACITY: usize = 1024;

/// Event bus backed by a broadcast channel
#[derive(Clone)]
pub struct InMemoryEventBus {
    sender: Arc<broadcast::Sender<BusEvent>>,
}

impl InMemoryEventBus {
    /// Create a bus buffering up to `capacity` events per subscriber
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self {
            sender: Arc::new(sender),
        }
    }

    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for InMemoryEventBus {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}

impl EventBus for InMemoryEventBus {
    fn publish(&self, topic: &str, payload: serde_json::Value) {
        debug!("Publishing {}", topic);

        // send() only fails when nobody is listening
        if self.sender.send(BusEvent::new(topic, payload)).is_err() {
            debug!("No subscribers listening to {}", topic);
        }
    }

    fn subscribe(&self, pattern: &str) -> Subscription {
        Subscription::new(self.sender.subscribe(), pattern)
    }
}
