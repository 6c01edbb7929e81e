//! Consumer lifecycle.

use mailvault_core::{ConsumerId, ConsumerRepository};
use tracing::info;

use crate::lock::ConsumerLocks;
use crate::notify::NotifyHub;
use crate::Result;

/// Register a new consumer and return its assigned id.
///
/// # Errors
///
/// Returns an error if the registry is unreachable.
pub async fn create_consumer(consumers: &ConsumerRepository, name: &str) -> Result<ConsumerId> {
    Ok(consumers.create(name).await?)
}

/// Remove a consumer, its pending dispatches, and its in-process state.
///
/// Acquires the consumer's advisory lock first, so removal cannot
/// interleave with an in-flight processing burst: any burst finishes its
/// bookkeeping before the rows vanish, and attempts after the cascade see
/// absent rows, which is a no-op. Returns `true` if the consumer existed.
///
/// # Errors
///
/// Returns an error if the registry is unreachable.
pub async fn remove_consumer(
    consumers: &ConsumerRepository,
    locks: &ConsumerLocks,
    hub: &NotifyHub,
    consumer_id: ConsumerId,
) -> Result<bool> {
    let guard = locks.acquire(consumer_id).await;
    let deleted = consumers.delete(consumer_id).await?;
    drop(guard);

    hub.remove(consumer_id);
    locks.remove(consumer_id);
    if deleted {
        info!("removed consumer {consumer_id}");
    }
    Ok(deleted)
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use chrono::Utc;
    use mailvault_core::{Mail, Storage};

    use super::*;

    #[tokio::test]
    async fn test_remove_consumer_clears_queue_and_state() {
        let storage = Storage::in_memory().await.unwrap();
        let consumers = storage.consumers();
        let consumer = create_consumer(&consumers, "short-lived").await.unwrap();

        let mail = Mail::new("<m1>", Utc::now(), "body", b"raw".to_vec());
        storage.archive().store(&mail, &[]).await.unwrap();
        let dispatches = storage.dispatches();
        dispatches.enqueue(consumer, "<m1>").await.unwrap();

        let locks = ConsumerLocks::new();
        let hub = NotifyHub::default();
        assert!(remove_consumer(&consumers, &locks, &hub, consumer)
            .await
            .unwrap());

        assert_eq!(dispatches.count(consumer).await.unwrap(), 0);
        assert!(consumers.get(consumer).await.unwrap().is_none());

        // Removing again reports the consumer as already gone.
        assert!(!remove_consumer(&consumers, &locks, &hub, consumer)
            .await
            .unwrap());
    }

    #[tokio::test]
    async fn test_remove_waits_for_in_flight_burst() {
        let storage = Storage::in_memory().await.unwrap();
        let consumers = storage.consumers();
        let consumer = create_consumer(&consumers, "busy").await.unwrap();

        let locks = std::sync::Arc::new(ConsumerLocks::new());

        // Simulate a scheduler mid-burst.
        let burst = locks.try_acquire(consumer).unwrap();

        let removal = {
            let locks = std::sync::Arc::clone(&locks);
            let consumers = storage.consumers();
            tokio::spawn(async move {
                remove_consumer(&consumers, &locks, &NotifyHub::default(), consumer).await
            })
        };

        tokio::task::yield_now().await;
        assert!(!removal.is_finished());

        drop(burst);
        assert!(removal.await.unwrap().unwrap());
    }
}
