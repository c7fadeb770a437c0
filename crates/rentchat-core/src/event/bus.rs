//! Broadcast event bus for distributing `EngineEvent` to multiple subscribers.
//!
//! Built on `tokio::sync::broadcast`. Publishing with no active subscribers
//! is a no-op; slow subscribers observe `Lagged` and should re-read snapshots.

use rentchat_types::event::EngineEvent;
use tokio::sync::broadcast;

/// Multi-consumer bus for engine state-change events.
///
/// Cloning the bus clones the sender, allowing multiple producers and
/// consumers.
pub struct EngineEvents {
    sender: broadcast::Sender<EngineEvent>,
}

impl EngineEvents {
    /// Create a new event bus with the given channel capacity.
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    /// Create a new subscriber that will receive all future events.
    pub fn subscribe(&self) -> broadcast::Receiver<EngineEvent> {
        self.sender.subscribe()
    }

    /// Publish an event to all current subscribers.
    ///
    /// If there are no subscribers, the event is silently dropped.
    pub fn publish(&self, event: EngineEvent) {
        let _ = self.sender.send(event);
    }
}

impl Clone for EngineEvents {
    fn clone(&self) -> Self {
        Self {
            sender: self.sender.clone(),
        }
    }
}

impl std::fmt::Debug for EngineEvents {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EngineEvents")
            .field("receiver_count", &self.sender.receiver_count())
            .finish()
    }
}
