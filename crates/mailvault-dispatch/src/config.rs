//! Scheduler configuration types.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Retry backoff tuning for failed deliveries.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct BackoffConfig {
    /// Delay before the first retry.
    pub base: Duration,
    /// Upper bound on any retry delay.
    pub cap: Duration,
    /// Jitter factor applied to each delay, `0.0` to disable.
    ///
    /// Values are clamped below `0.5`: doubling minus up to half keeps
    /// every delay at least as long as the previous one, so the retry
    /// schedule never moves backwards.
    pub jitter: f64,
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self {
            base: Duration::from_secs(60),
            cap: Duration::from_secs(86_400),
            jitter: 0.2,
        }
    }
}

/// Configuration for a per-consumer dispatch scheduler.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct SchedulerConfig {
    /// How often to poll the queue when no notification arrives.
    ///
    /// The poll timer is the correctness backstop: notifications only cut
    /// latency, so this interval bounds how stale a due row can get when
    /// every notification for it was lost.
    pub poll_interval: Duration,
    /// Upper bound on a single delivery attempt.
    ///
    /// A stuck delivery capability is treated as a failed attempt so the
    /// consumer's advisory lock is always released.
    pub delivery_timeout: Duration,
    /// Buffered notifications per consumer channel before the oldest are
    /// dropped.
    pub channel_capacity: usize,
    /// Retry backoff tuning.
    pub backoff: BackoffConfig,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(60),
            delivery_timeout: Duration::from_secs(30),
            channel_capacity: 64,
            backoff: BackoffConfig::default(),
        }
    }
}

impl SchedulerConfig {
    /// Sets the poll interval.
    #[must_use]
    pub const fn poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    /// Sets the per-attempt delivery timeout.
    #[must_use]
    pub const fn delivery_timeout(mut self, timeout: Duration) -> Self {
        self.delivery_timeout = timeout;
        self
    }

    /// Sets the notification channel capacity.
    #[must_use]
    pub const fn channel_capacity(mut self, capacity: usize) -> Self {
        self.channel_capacity = capacity;
        self
    }

    /// Sets the backoff tuning.
    #[must_use]
    pub const fn backoff(mut self, backoff: BackoffConfig) -> Self {
        self.backoff = backoff;
        self
    }
}
