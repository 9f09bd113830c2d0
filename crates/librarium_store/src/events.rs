//! Enqueue notifications for the operation queue.

use parking_lot::RwLock;
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use uuid::Uuid;

/// Fan-out of "operation queued" notifications.
///
/// Subscribers receive the ID of every operation enqueued after they
/// subscribed. The queue rows themselves are the durable record; this
/// feed is only a doorbell for the push orchestrator's auto-trigger.
/// Disconnected subscribers are pruned on emit.
pub struct QueueEvents {
    subscribers: RwLock<Vec<UnboundedSender<Uuid>>>,
}

impl QueueEvents {
    /// Creates an empty feed.
    pub fn new() -> Self {
        Self {
            subscribers: RwLock::new(Vec::new()),
        }
    }

    /// Subscribes to future enqueue notifications.
    pub fn subscribe(&self) -> UnboundedReceiver<Uuid> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.subscribers.write().push(tx);
        rx
    }

    /// Notifies all live subscribers.
    pub fn emit(&self, id: Uuid) {
        let mut subscribers = self.subscribers.write();
        subscribers.retain(|tx| tx.send(id).is_ok());
    }

    /// Returns the number of live subscribers.
    pub fn subscriber_count(&self) -> usize {
        self.subscribers.read().len()
    }
}

impl Default for QueueEvents {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn emit_and_receive() {
        let events = QueueEvents::new();
        let mut rx = events.subscribe();

        let id = Uuid::new_v4();
        events.emit(id);

        assert_eq!(rx.recv().await, Some(id));
    }

    #[tokio::test]
    async fn multiple_subscribers() {
        let events = QueueEvents::new();
        let mut rx1 = events.subscribe();
        let mut rx2 = events.subscribe();

        let id = Uuid::new_v4();
        events.emit(id);

        assert_eq!(rx1.recv().await, Some(id));
        assert_eq!(rx2.recv().await, Some(id));
    }

    #[tokio::test]
    async fn dropped_subscriber_is_pruned() {
        let events = QueueEvents::new();
        let rx = events.subscribe();
        assert_eq!(events.subscriber_count(), 1);

        drop(rx);
        events.emit(Uuid::new_v4());
        assert_eq!(events.subscriber_count(), 0);
    }
}
