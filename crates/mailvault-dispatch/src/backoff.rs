//! Retry backoff policies.
//!
//! The dispatch row already persists the gap it was last rescheduled with
//! (`next_time - last_time`), so a policy grows that gap instead of
//! tracking an attempt counter. The schedule survives restarts with no
//! state beyond the row itself.

use chrono::Duration;
use rand::Rng;

use crate::config::BackoffConfig;

/// Strategy for spacing out retry attempts after failed deliveries.
///
/// Implementations must return a strictly positive delay, and the
/// sequence of delays produced by feeding each result back as `previous`
/// must be non-decreasing up to the policy's cap.
pub trait BackoffPolicy: Send + Sync {
    /// Returns the delay for the next retry.
    ///
    /// `previous` is the currently persisted retry gap of the row, `None`
    /// before the first failure.
    fn next_delay(&self, previous: Option<Duration>) -> Duration;
}

/// Exponential backoff with a cap and optional jitter.
///
/// The first failure is delayed by `base`; each later failure doubles the
/// previously persisted gap, applies ±jitter, and clamps to `cap`.
#[derive(Debug, Clone)]
pub struct ExponentialBackoff {
    base: Duration,
    cap: Duration,
    jitter: f64,
}

impl ExponentialBackoff {
    /// Creates a policy from the configured tuning.
    ///
    /// The jitter factor is clamped into `[0, 0.5)` so the delay sequence
    /// stays non-decreasing.
    #[must_use]
    pub fn new(config: &BackoffConfig) -> Self {
        Self {
            base: to_chrono(config.base),
            cap: to_chrono(config.cap),
            jitter: config.jitter.clamp(0.0, 0.49),
        }
    }
}

impl Default for ExponentialBackoff {
    fn default() -> Self {
        Self::new(&BackoffConfig::default())
    }
}

impl BackoffPolicy for ExponentialBackoff {
    fn next_delay(&self, previous: Option<Duration>) -> Duration {
        let target = previous.map_or(self.base, |prev| prev.checked_mul(2).unwrap_or(self.cap));

        // Intentional precision loss and casting for randomization
        #[allow(
            clippy::cast_precision_loss,
            clippy::cast_possible_truncation,
            clippy::cast_sign_loss
        )]
        let jittered = if self.jitter > 0.0 {
            let millis = target.num_milliseconds();
            let range = (millis as f64) * self.jitter;
            let mut rng = rand::rng();
            let offset: f64 = rng.random_range(-range..=range);
            Duration::milliseconds(((millis as f64) + offset).max(1.0) as i64)
        } else {
            target.max(Duration::milliseconds(1))
        };

        // Jitter before the clamp: once the schedule reaches the cap it
        // stays there instead of oscillating below it.
        jittered.min(self.cap)
    }
}

fn to_chrono(duration: std::time::Duration) -> Duration {
    Duration::from_std(duration).unwrap_or(Duration::MAX)
}
