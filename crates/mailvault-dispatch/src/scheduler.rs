//! Per-consumer dispatch scheduler.
//!
//! One scheduler runs per consumer. It alternates between a passive wait
//! (the consumer's notification subscription and a poll timer, whichever
//! resolves first) and a processing burst over the currently due rows.
//! The poll timer is the correctness backstop: notifications are lossy
//! and only exist to cut wake-up latency.

use std::sync::Arc;

use chrono::Utc;
use mailvault_core::{ArchiveRepository, ConsumerId, Dispatch, DispatchRepository, Storage};
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::watch;
use tokio::time::timeout;
use tracing::{debug, error, info, warn};

use crate::backoff::{BackoffPolicy, ExponentialBackoff};
use crate::config::SchedulerConfig;
use crate::delivery::Delivery;
use crate::lock::ConsumerLocks;
use crate::notify::NotifyHub;
use crate::Result;

/// Long-lived delivery worker for a single consumer.
pub struct Scheduler {
    consumer_id: ConsumerId,
    dispatches: DispatchRepository,
    archive: ArchiveRepository,
    delivery: Arc<dyn Delivery>,
    hub: Arc<NotifyHub>,
    locks: Arc<ConsumerLocks>,
    backoff: Arc<dyn BackoffPolicy>,
    config: SchedulerConfig,
}

impl Scheduler {
    /// Creates a scheduler for one consumer.
    ///
    /// The hub and lock table must be shared with every other scheduler
    /// (and with consumer removal) in the process.
    #[must_use]
    pub fn new(
        storage: &Storage,
        consumer_id: ConsumerId,
        delivery: Arc<dyn Delivery>,
        hub: Arc<NotifyHub>,
        locks: Arc<ConsumerLocks>,
        config: SchedulerConfig,
    ) -> Self {
        Self {
            consumer_id,
            dispatches: storage.dispatches(),
            archive: storage.archive(),
            delivery,
            hub,
            locks,
            backoff: Arc::new(ExponentialBackoff::new(&config.backoff)),
            config,
        }
    }

    /// Replaces the default exponential backoff with a custom policy.
    #[must_use]
    pub fn with_backoff(mut self, backoff: Arc<dyn BackoffPolicy>) -> Self {
        self.backoff = backoff;
        self
    }

    /// Run until the shutdown signal turns true (or its sender is gone).
    ///
    /// Shutdown is only observed between bursts, so an in-flight burst
    /// always completes and releases the consumer lock before the task
    /// exits.
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) {
        info!("scheduler for consumer {} started", self.consumer_id);
        let mut notifications = self.hub.subscribe(self.consumer_id);

        loop {
            let wait = self.next_wait().await;
            tokio::select! {
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow_and_update() {
                        break;
                    }
                    continue;
                }
                () = tokio::time::sleep(wait) => {
                    debug!("poll timer fired for consumer {}", self.consumer_id);
                }
                received = notifications.recv() => match received {
                    Ok(mail_id) => {
                        debug!("notified about mail {mail_id} for consumer {}", self.consumer_id);
                    }
                    Err(RecvError::Lagged(skipped)) => {
                        // Dropped notifications cost nothing: the due scan
                        // below finds every row they pointed at.
                        debug!(
                            "consumer {} missed {skipped} notification(s)",
                            self.consumer_id
                        );
                    }
                    Err(RecvError::Closed) => {
                        warn!(
                            "notification channel for consumer {} closed, resubscribing",
                            self.consumer_id
                        );
                        notifications = self.hub.subscribe(self.consumer_id);
                        continue;
                    }
                },
            }

            if let Err(err) = self.process_due().await {
                // Storage failure is the one class that must reach the
                // operator. The burst is abandoned wholesale; the rows it
                // covered are still in the queue and the next wake-up
                // retries them.
                error!(
                    "storage failure while processing consumer {}: {err}",
                    self.consumer_id
                );
            }

            if *shutdown.borrow() {
                break;
            }
        }

        info!("scheduler for consumer {} stopped", self.consumer_id);
    }

    /// How long to wait before the next poll.
    ///
    /// Armed to the earliest known scheduled attempt when that is sooner
    /// than the poll interval — a latency optimization, not a correctness
    /// requirement, so a storage error here just falls back to the
    /// configured interval.
    async fn next_wait(&self) -> std::time::Duration {
        match self.dispatches.next_scheduled(self.consumer_id).await {
            Ok(Some(next)) => {
                let until = (next - Utc::now())
                    .to_std()
                    .unwrap_or(std::time::Duration::ZERO);
                until.min(self.config.poll_interval)
            }
            Ok(None) => self.config.poll_interval,
            Err(err) => {
                warn!(
                    "could not read schedule for consumer {}: {err}",
                    self.consumer_id
                );
                self.config.poll_interval
            }
        }
    }

    /// One processing burst: deliver everything currently due.
    async fn process_due(&self) -> Result<()> {
        // Advisory lock, held for the burst only. Losing the race means
        // another instance is already processing this consumer.
        let Some(_guard) = self.locks.try_acquire(self.consumer_id) else {
            debug!(
                "consumer {} is being processed elsewhere, skipping burst",
                self.consumer_id
            );
            return Ok(());
        };

        let due = self.dispatches.due(self.consumer_id, Utc::now()).await?;
        if due.is_empty() {
            return Ok(());
        }
        debug!(
            "processing {} due dispatch(es) for consumer {}",
            due.len(),
            self.consumer_id
        );

        for dispatch in &due {
            self.attempt(dispatch).await?;
        }
        Ok(())
    }

    /// One delivery attempt for one due row.
    ///
    /// Delivery failure is never fatal: it becomes a reschedule with
    /// backoff. Only storage errors propagate.
    async fn attempt(&self, dispatch: &Dispatch) -> Result<()> {
        let Some(mail) = self.archive.get(&dispatch.mail_id).await? else {
            // The mail was deleted after the due scan; its dispatch rows
            // cascaded with it.
            debug!("mail {} vanished before delivery", dispatch.mail_id);
            return Ok(());
        };

        let attempted_at = Utc::now();
        // A stuck capability counts as a failed attempt so the lock is
        // always released.
        let failure = match timeout(self.config.delivery_timeout, self.delivery.deliver(&mail)).await
        {
            Ok(Ok(())) => None,
            Ok(Err(failure)) => Some(failure.to_string()),
            Err(_elapsed) => Some("attempt timed out".to_string()),
        };

        match failure {
            None => {
                self.dispatches
                    .record_success(self.consumer_id, &dispatch.mail_id)
                    .await?;
            }
            Some(reason) => {
                let delay = self.backoff.next_delay(dispatch.previous_delay());
                warn!(
                    "delivery of mail {} to consumer {} failed ({reason}), retrying in {}s",
                    dispatch.mail_id,
                    self.consumer_id,
                    delay.num_seconds()
                );
                self.dispatches
                    .record_failure(self.consumer_id, &dispatch.mail_id, attempted_at, delay)
                    .await?;
            }
        }
        Ok(())
    }
}
