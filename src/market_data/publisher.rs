// =============================================================================
// Fan-out Publisher — per-instrument tick topics
// =============================================================================
//
// Every accepted tick is pushed to its instrument's topic immediately after
// the ring-buffer write. Delivery must never block or fail ingestion, so each
// topic is a bounded `tokio::sync::broadcast` channel: the sender always
// succeeds, and a subscriber that falls more than the queue depth behind
// drops its own oldest pending ticks (surfaced to it as a `Lagged` marker)
// instead of slowing the publisher. At-most-once per tick per subscriber.
// =============================================================================

use std::collections::HashMap;

use parking_lot::RwLock;
use tokio::sync::broadcast;
use tracing::debug;

use crate::types::Tick;

/// Per-subscriber queue depth. Slow readers skip ahead past anything older.
const TOPIC_QUEUE_DEPTH: usize = 64;

pub struct TickPublisher {
    topics: RwLock<HashMap<String, broadcast::Sender<Tick>>>,
}

impl TickPublisher {
    pub fn new() -> Self {
        Self {
            topics: RwLock::new(HashMap::new()),
        }
    }

    /// Subscribe to one instrument's tick topic. The topic is created on
    /// first use; subscribers only ever see ticks published after they join.
    pub fn subscribe(&self, instrument: &str) -> broadcast::Receiver<Tick> {
        if let Some(tx) = self.topics.read().get(instrument) {
            return tx.subscribe();
        }
        self.topics
            .write()
            .entry(instrument.to_string())
            .or_insert_with(|| broadcast::channel(TOPIC_QUEUE_DEPTH).0)
            .subscribe()
    }

    /// Deliver `tick` to the instrument's subscribers, if any. Never blocks;
    /// a topic with no subscribers is a no-op.
    pub fn publish(&self, tick: &Tick) {
        let topics = self.topics.read();
        let Some(tx) = topics.get(&tick.instrument) else {
            return;
        };
        // Err here only means no live receivers; nothing to do about it.
        if tx.send(tick.clone()).is_err() {
            debug!(instrument = %tick.instrument, "tick published to empty topic");
        }
    }

    /// Number of live subscribers on an instrument's topic.
    pub fn subscriber_count(&self, instrument: &str) -> usize {
        self.topics
            .read()
            .get(instrument)
            .map_or(0, broadcast::Sender::receiver_count)
    }
}

impl Default for TickPublisher {
    fn default() -> Self {
        Self::new()
    }
}
