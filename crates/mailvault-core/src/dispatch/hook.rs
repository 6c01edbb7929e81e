//! Post-commit hook for fresh queue entries.

use crate::consumer::ConsumerId;

/// Observer invoked after a fresh dispatch row is committed.
///
/// This is the attachment point for the change publisher: the queue calls
/// it exactly once per newly created `(consumer, mail)` pair, after the
/// insert is durable, and never for an idempotent re-enqueue. The hook must
/// not block; delivery of whatever signal it emits is allowed to be lossy,
/// because the queue itself is also polled.
pub trait EnqueueHook: Send + Sync {
    /// Called after a fresh dispatch row for `(consumer_id, mail_id)` has
    /// been committed.
    fn enqueued(&self, consumer_id: ConsumerId, mail_id: &str);
}
