//! Overlay notifications.
//!
//! Observers call [`crate::Overlay::subscribe`] and get a broadcast
//! receiver; dropping the receiver unsubscribes.

use serde_json::Value;
use tokio::sync::broadcast;

use crate::peer::{PeerAddr, PeerId};

/// Capacity of the notification channel. Slow observers see `Lagged`.
pub const EVENT_CHANNEL_CAPACITY: usize = 256;

/// Notification published by an overlay.
#[derive(Debug, Clone, PartialEq)]
pub enum OverlayEvent {
    /// A connection reached `connected`.
    PeerConnected {
        peer: PeerId,
        addr: Option<PeerAddr>,
    },
    /// A connected peer went away.
    PeerDisconnected {
        peer: PeerId,
        addr: Option<PeerAddr>,
    },
    /// Application-level notice raised by a middleware.
    Notice { topic: String, payload: Value },
}

/// Sending side of the notification channel.
#[derive(Debug, Clone)]
pub struct EventBus {
    tx: broadcast::Sender<OverlayEvent>,
}

impl EventBus {
    /// Create an event bus.
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self { tx }
    }

    /// Register a new observer.
    pub fn subscribe(&self) -> broadcast::Receiver<OverlayEvent> {
        self.tx.subscribe()
    }

    /// Publish an event. Having no observers is not an error.
    pub fn emit(&self, event: OverlayEvent) {
        let _ = self.tx.send(event);
    }

    /// Number of live observers.
    pub fn observer_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}
