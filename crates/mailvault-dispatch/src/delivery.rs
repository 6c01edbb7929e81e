//! The injected delivery capability.

use async_trait::async_trait;
use mailvault_core::Mail;
use thiserror::Error;

/// Failure reported by a delivery capability.
///
/// This is data for the scheduler's retry bookkeeping, not an escalating
/// error: a failed delivery reschedules the dispatch row and nothing else.
#[derive(Debug, Error)]
#[error("delivery failed: {reason}")]
pub struct DeliveryError {
    /// Human-readable failure reason, logged with the retry.
    pub reason: String,
}

impl DeliveryError {
    /// Creates a delivery failure with the given reason.
    #[must_use]
    pub fn new(reason: impl Into<String>) -> Self {
        Self {
            reason: reason.into(),
        }
    }
}

/// Transport that hands an archived mail to a consumer.
///
/// Implementations do not need to be idempotent: the queue guarantees
/// at-least-once delivery, and a consumer that crashes between accepting
/// a mail and the queue recording the success will see it again.
#[async_trait]
pub trait Delivery: Send + Sync {
    /// Attempt to deliver one mail.
    ///
    /// # Errors
    ///
    /// Returns a [`DeliveryError`] when the consumer did not accept the
    /// mail; the scheduler reschedules the dispatch with backoff.
    async fn deliver(&self, mail: &Mail) -> Result<(), DeliveryError>;
}
