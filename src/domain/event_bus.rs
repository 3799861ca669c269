//! Broadcast channel for change-log events.
//!
//! [`EventBus`] wraps a [`tokio::sync::broadcast`] channel. The service
//! publishes a [`ChangeLogEvent`] after every acknowledged write, and
//! background subscribers (the webhook notifier) react to them.

use tokio::sync::broadcast;

use super::ChangeLogEvent;

/// Broadcast bus for [`ChangeLogEvent`]s.
///
/// Backed by a `tokio::broadcast` channel with a configurable capacity.
/// When the ring buffer is full, the oldest events are dropped for lagging
/// receivers. Publishing never blocks a writer.
#[derive(Debug, Clone)]
pub struct EventBus {
    sender: broadcast::Sender<ChangeLogEvent>,
}

impl EventBus {
    /// Creates a new `EventBus` with the given channel capacity.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    /// Publishes an event to all subscribers.
    ///
    /// Returns the number of receivers that received the event.
    /// If there are no active receivers, the event is silently dropped.
    pub fn publish(&self, event: ChangeLogEvent) -> usize {
        self.sender.send(event).unwrap_or(0)
    }

    /// Creates a new receiver that will receive all future events.
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<ChangeLogEvent> {
        self.sender.subscribe()
    }

    /// Returns the current number of active receivers.
    #[must_use]
    pub fn receiver_count(&self) -> usize {
        self.sender.receiver_count()
    }
}
