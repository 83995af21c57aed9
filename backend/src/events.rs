//! Event broadcasting for controller state, load progress and session lifecycle.

use futures::Stream;
use loopmix_types::MixEvent;
use std::sync::Arc;
use tokio::sync::broadcast;
use tokio_stream::wrappers::BroadcastStream;
use tokio_stream::StreamExt;
use tracing::{debug, warn};

/// Fan-out of [`MixEvent`]s to any number of observers.
#[derive(Clone)]
pub struct EventBroadcaster {
    /// Broadcast channel for events
    sender: Arc<broadcast::Sender<MixEvent>>,
}

impl EventBroadcaster {
    /// Create a new event broadcaster with a buffer size.
    pub fn new(buffer_size: usize) -> Self {
        let (sender, _) = broadcast::channel(buffer_size.max(1));
        Self {
            sender: Arc::new(sender),
        }
    }

    /// Broadcast an event to all subscribers.
    pub fn broadcast(&self, event: MixEvent) {
        debug!("Broadcasting event: {}", event.description());
        // No subscribers is not an error
        let _ = self.sender.send(event);
    }

    /// Subscribe to raw events.
    pub fn subscribe(&self) -> broadcast::Receiver<MixEvent> {
        self.sender.subscribe()
    }

    /// Subscribe to events as a stream. Lagged events are skipped.
    pub fn stream(&self) -> impl Stream<Item = MixEvent> {
        BroadcastStream::new(self.sender.subscribe()).filter_map(|result| match result {
            Ok(event) => Some(event),
            Err(e) => {
                warn!("Subscriber lagging, skipping events: {}", e);
                None
            }
        })
    }

    /// Get the number of active subscribers.
    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for EventBroadcaster {
    fn default() -> Self {
        Self::new(100)
    }
}
