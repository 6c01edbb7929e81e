//! Per-consumer advisory locks.
//!
//! At most one scheduler instance may process a given consumer's queue at
//! any instant. The lock is cooperative and scoped to a processing burst:
//! it is never held across an idle wait, and losing the race is a no-op,
//! not an error.

use std::sync::Arc;

use dashmap::DashMap;
use mailvault_core::ConsumerId;
use tokio::sync::{Mutex, OwnedMutexGuard};

/// Guard held for the duration of one processing burst.
pub type BurstGuard = OwnedMutexGuard<()>;

/// Advisory mutual exclusion keyed by consumer identity.
#[derive(Debug, Default)]
pub struct ConsumerLocks {
    locks: DashMap<ConsumerId, Arc<Mutex<()>>>,
}

impl ConsumerLocks {
    /// Creates an empty lock table.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn entry(&self, consumer_id: ConsumerId) -> Arc<Mutex<()>> {
        self.locks.entry(consumer_id).or_default().clone()
    }

    /// Try to take the burst lock for a consumer.
    ///
    /// `None` means another instance is mid-burst; the caller treats its
    /// wake-up as a no-op and goes back to waiting.
    #[must_use]
    pub fn try_acquire(&self, consumer_id: ConsumerId) -> Option<BurstGuard> {
        self.entry(consumer_id).try_lock_owned().ok()
    }

    /// Wait for the burst lock for a consumer.
    ///
    /// Used by consumer removal, which must not interleave with an
    /// in-flight burst.
    pub async fn acquire(&self, consumer_id: ConsumerId) -> BurstGuard {
        self.entry(consumer_id).lock_owned().await
    }

    /// Drop the lock entry of a removed consumer.
    pub fn remove(&self, consumer_id: ConsumerId) {
        self.locks.remove(&consumer_id);
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    const CONSUMER: ConsumerId = ConsumerId::new(1);

    #[tokio::test]
    async fn test_contention_is_a_noop() {
        let locks = ConsumerLocks::new();

        let guard = locks.try_acquire(CONSUMER).unwrap();
        assert!(locks.try_acquire(CONSUMER).is_none());

        drop(guard);
        assert!(locks.try_acquire(CONSUMER).is_some());
    }

    #[tokio::test]
    async fn test_locks_are_independent_per_consumer() {
        let locks = ConsumerLocks::new();

        let _one = locks.try_acquire(ConsumerId::new(1)).unwrap();
        assert!(locks.try_acquire(ConsumerId::new(2)).is_some());
    }

    #[tokio::test]
    async fn test_acquire_waits_for_burst_to_finish() {
        let locks = Arc::new(ConsumerLocks::new());

        let guard = locks.try_acquire(CONSUMER).unwrap();
        let waiter = {
            let locks = Arc::clone(&locks);
            tokio::spawn(async move {
                let _guard = locks.acquire(CONSUMER).await;
            })
        };

        // The waiter cannot finish while the burst guard is held.
        tokio::task::yield_now().await;
        assert!(!waiter.is_finished());

        drop(guard);
        waiter.await.unwrap();
    }
}
