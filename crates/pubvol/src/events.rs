//! Volume event definitions and bus.
//!
//! Metadata-change notifications are fire-and-forget: publishing never
//! fails and expects no acknowledgment from the registry side.

use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

/// Volume event types.
#[allow(missing_docs)]
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum VolumeEvent {
    /// Detected filesystem type changed.
    FsTypeChanged { id: String, fstype: String },
    /// Detected filesystem UUID changed.
    FsUuidChanged { id: String, uuid: String },
    /// Detected filesystem label changed.
    FsLabelChanged { id: String, label: String },
}

/// Event bus for volume events.
#[derive(Debug, Clone)]
pub struct EventBus {
    sender: broadcast::Sender<VolumeEvent>,
}

impl Default for EventBus {
    fn default() -> Self {
        let (sender, _) = broadcast::channel(256);
        Self { sender }
    }
}

impl EventBus {
    /// Create a new event bus.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Subscribe to events.
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<VolumeEvent> {
        self.sender.subscribe()
    }

    /// Publish an event.
    pub fn publish(&self, event: VolumeEvent) {
        // Ignore SendError (no subscribers)
        let _ = self.sender.send(event);
    }
}
