//! Events for higher-level tracking modes.

use serde::Serialize;
use tokio::sync::broadcast;
use tracing::debug;

/// Event published to tracking consumers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum TrackingEvent {
    /// Halt every automatic tracking mode before a manual maneuver
    StopAllTracking,
}

/// Publishing side of the event bus.
pub trait EventPublisher: Send + Sync {
    fn publish(&self, event: TrackingEvent);
}

/// Broadcasts tracking events to any number of subscribers.
///
/// Slow subscribers that fall behind skip events.
pub struct EventBus {
    tx: broadcast::Sender<TrackingEvent>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<TrackingEvent> {
        self.tx.subscribe()
    }

    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(16)
    }
}

impl EventPublisher for EventBus {
    fn publish(&self, event: TrackingEvent) {
        let receivers = self.tx.send(event).unwrap_or(0);
        debug!("Published {:?} to {} subscriber(s)", event, receivers);
    }
}
