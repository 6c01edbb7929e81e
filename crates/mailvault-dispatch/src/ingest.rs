//! Ingestion fan-out.
//!
//! The only write path that creates dispatch rows outside of retry
//! bookkeeping: archive a newly received mail, then enqueue it for every
//! consumer the interest policy names.

use async_trait::async_trait;
use mailvault_core::{
    ArchiveRepository, Attachment, ConsumerId, ConsumerRepository, DispatchRepository, Mail,
};
use tracing::debug;

use crate::Result;

/// Decides which consumers should receive a newly archived mail.
///
/// How interest is computed is external to the queue; implementations can
/// consult the registry, a subscription filter, or anything else.
#[async_trait]
pub trait InterestPolicy: Send + Sync {
    /// Returns the consumers interested in `mail`.
    ///
    /// # Errors
    ///
    /// Returns an error if the decision requires storage and storage
    /// fails.
    async fn interested(&self, mail: &Mail) -> Result<Vec<ConsumerId>>;
}

/// The simplest policy: every registered consumer gets every mail.
pub struct AllConsumers {
    consumers: ConsumerRepository,
}

impl AllConsumers {
    /// Creates the policy over the consumer registry.
    #[must_use]
    pub const fn new(consumers: ConsumerRepository) -> Self {
        Self { consumers }
    }
}

#[async_trait]
impl InterestPolicy for AllConsumers {
    async fn interested(&self, _mail: &Mail) -> Result<Vec<ConsumerId>> {
        let consumers = self.consumers.list().await?;
        Ok(consumers.into_iter().map(|c| c.id).collect())
    }
}

/// Archive a mail and enqueue it for every interested consumer.
///
/// Returns the number of fresh dispatch rows created.
///
/// # Errors
///
/// Returns an error if archiving fails (including a duplicate message id)
/// or if the queue is unreachable. A single fan-out target that vanished
/// between the policy decision and the enqueue is skipped, not an error.
pub async fn ingest_mail(
    archive: &ArchiveRepository,
    dispatches: &DispatchRepository,
    policy: &dyn InterestPolicy,
    mail: &Mail,
    attachments: &[Attachment],
) -> Result<usize> {
    archive.store(mail, attachments).await?;
    fan_out(dispatches, policy, mail).await
}

/// Enqueue an already-archived mail for every interested consumer.
///
/// # Errors
///
/// Returns an error if the queue is unreachable.
pub async fn fan_out(
    dispatches: &DispatchRepository,
    policy: &dyn InterestPolicy,
    mail: &Mail,
) -> Result<usize> {
    let mut created = 0;
    for consumer_id in policy.interested(mail).await? {
        match dispatches.enqueue(consumer_id, &mail.id).await {
            Ok(true) => created += 1,
            Ok(false) => {}
            // The consumer was deleted while the fan-out was in flight;
            // it no longer accumulates delivery obligations.
            Err(mailvault_core::Error::Reference(reason)) => {
                debug!("skipping fan-out target: {reason}");
            }
            Err(err) => return Err(err.into()),
        }
    }
    debug!("fanned out mail {} to {created} consumer(s)", mail.id);
    Ok(created)
}
