//! Dispatch data models.

use chrono::{DateTime, Duration, Utc};

use crate::consumer::ConsumerId;

/// A pending obligation to deliver one mail to one consumer.
///
/// Identified by `(consumer_id, mail_id)`. Whenever `last_time` is set,
/// `next_time` strictly exceeds it; a row that should not be retried is
/// deleted, never left with a stale schedule.
#[derive(Debug, Clone)]
pub struct Dispatch {
    /// Consumer this delivery is owed to.
    pub consumer_id: ConsumerId,
    /// Mail to deliver.
    pub mail_id: String,
    /// Most recent delivery attempt, `None` before the first attempt.
    pub last_time: Option<DateTime<Utc>>,
    /// Next scheduled attempt.
    pub next_time: DateTime<Utc>,
    /// When the row was enqueued.
    pub created_at: DateTime<Utc>,
}

impl Dispatch {
    /// Returns true if the row is due at the given instant.
    #[must_use]
    pub fn is_due(&self, at: DateTime<Utc>) -> bool {
        self.next_time <= at
    }

    /// Returns the currently scheduled retry gap, if an attempt was made.
    ///
    /// This is the delay the last failure was rescheduled with, so a
    /// backoff policy can grow it without any stored attempt counter.
    #[must_use]
    pub fn previous_delay(&self) -> Option<Duration> {
        self.last_time.map(|last| self.next_time - last)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn row(last: Option<DateTime<Utc>>, next: DateTime<Utc>) -> Dispatch {
        Dispatch {
            consumer_id: ConsumerId::new(1),
            mail_id: "<m@example.com>".to_string(),
            last_time: last,
            next_time: next,
            created_at: Utc::now(),
        }
    }

    #[test]
    fn test_is_due() {
        let now = Utc::now();
        assert!(row(None, now - Duration::seconds(1)).is_due(now));
        assert!(row(None, now).is_due(now));
        assert!(!row(None, now + Duration::seconds(1)).is_due(now));
    }

    #[test]
    fn test_previous_delay() {
        let now = Utc::now();
        assert_eq!(row(None, now).previous_delay(), None);

        let retried = row(Some(now), now + Duration::seconds(30));
        assert_eq!(retried.previous_delay(), Some(Duration::seconds(30)));
    }
}
