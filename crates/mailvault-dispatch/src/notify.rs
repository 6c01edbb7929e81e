//! Best-effort change publication.
//!
//! The hub relays "a fresh dispatch row exists" signals to whichever
//! scheduler is listening for that consumer. Delivery is at-most-once: no
//! subscriber, a dropped subscription, or a full buffer loses the signal.
//! That is safe because the queue is durable and polled — a lost
//! notification costs latency, never a delivery.

use dashmap::DashMap;
use mailvault_core::{ConsumerId, EnqueueHook};
use tokio::sync::broadcast;
use tracing::trace;

/// Default per-consumer channel capacity.
const DEFAULT_CAPACITY: usize = 64;

/// In-process publish/subscribe hub keyed by consumer identity.
///
/// Implements [`EnqueueHook`], so attaching a hub to a
/// [`mailvault_core::DispatchRepository`] publishes one notification per
/// fresh queue entry, carrying the mail id.
#[derive(Debug)]
pub struct NotifyHub {
    capacity: usize,
    channels: DashMap<ConsumerId, broadcast::Sender<String>>,
}

impl NotifyHub {
    /// Creates a hub whose per-consumer channels buffer `capacity`
    /// notifications before dropping the oldest.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            channels: DashMap::new(),
        }
    }

    /// Subscribe to the notifications for one consumer.
    ///
    /// The subscription only observes notifications published after this
    /// call; anything earlier has to be found by polling the queue.
    #[must_use]
    pub fn subscribe(&self, consumer_id: ConsumerId) -> broadcast::Receiver<String> {
        self.channels
            .entry(consumer_id)
            .or_insert_with(|| broadcast::channel(self.capacity).0)
            .subscribe()
    }

    /// Publish a notification for one consumer.
    ///
    /// A send without subscribers is silently dropped.
    pub fn publish(&self, consumer_id: ConsumerId, mail_id: &str) {
        if let Some(channel) = self.channels.get(&consumer_id) {
            trace!("notifying consumer {consumer_id} about mail {mail_id}");
            let _ = channel.send(mail_id.to_string());
        }
    }

    /// Drop the channel of a removed consumer.
    ///
    /// Live subscriptions observe the close and resubscribe if the
    /// consumer comes back.
    pub fn remove(&self, consumer_id: ConsumerId) {
        self.channels.remove(&consumer_id);
    }
}

impl Default for NotifyHub {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}

impl EnqueueHook for NotifyHub {
    fn enqueued(&self, consumer_id: ConsumerId, mail_id: &str) {
        self.publish(consumer_id, mail_id);
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use tokio::sync::broadcast::error::{RecvError, TryRecvError};

    use super::*;

    const CONSUMER: ConsumerId = ConsumerId::new(7);
    const OTHER: ConsumerId = ConsumerId::new(8);

    #[tokio::test]
    async fn test_subscriber_receives_notification() {
        let hub = NotifyHub::default();
        let mut rx = hub.subscribe(CONSUMER);

        hub.publish(CONSUMER, "<m1>");
        assert_eq!(rx.recv().await.unwrap(), "<m1>");
    }

    #[tokio::test]
    async fn test_channels_are_scoped_per_consumer() {
        let hub = NotifyHub::default();
        let mut ours = hub.subscribe(CONSUMER);
        let mut theirs = hub.subscribe(OTHER);

        hub.publish(CONSUMER, "<m1>");
        assert_eq!(ours.recv().await.unwrap(), "<m1>");
        assert!(matches!(theirs.try_recv(), Err(TryRecvError::Empty)));
    }

    #[tokio::test]
    async fn test_publish_without_subscriber_is_lost() {
        let hub = NotifyHub::default();
        hub.publish(CONSUMER, "<m1>");

        // A later subscription does not see earlier notifications.
        let mut rx = hub.subscribe(CONSUMER);
        hub.publish(CONSUMER, "<m2>");
        assert_eq!(rx.recv().await.unwrap(), "<m2>");
        assert!(matches!(rx.try_recv(), Err(TryRecvError::Empty)));
    }

    #[tokio::test]
    async fn test_slow_subscriber_drops_oldest() {
        let hub = NotifyHub::new(1);
        let mut rx = hub.subscribe(CONSUMER);

        hub.publish(CONSUMER, "<m1>");
        hub.publish(CONSUMER, "<m2>");

        assert!(matches!(rx.recv().await, Err(RecvError::Lagged(1))));
        assert_eq!(rx.recv().await.unwrap(), "<m2>");
    }

    #[tokio::test]
    async fn test_remove_closes_subscriptions() {
        let hub = NotifyHub::default();
        let mut rx = hub.subscribe(CONSUMER);

        hub.remove(CONSUMER);
        assert!(matches!(rx.recv().await, Err(RecvError::Closed)));
    }
}
