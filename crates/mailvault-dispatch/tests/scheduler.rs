//! Integration tests for the dispatch scheduler.
//!
//! These drive real schedulers over an in-memory store with a scripted
//! delivery capability, so every timing is short but the control flow is
//! the production one.

#![allow(clippy::unwrap_used)]

use std::sync::Arc;
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use mailvault_core::{ConsumerId, Dispatch, DispatchRepository, EnqueueHook, Mail, Storage};
use mailvault_dispatch::{
    AllConsumers, BackoffConfig, ConsumerLocks, Delivery, DeliveryError, NotifyHub, Scheduler,
    SchedulerConfig, ingest_mail,
};
use tokio::sync::watch;
use tokio::time::Instant;

/// Delivery capability with a scripted number of initial failures and an
/// artificial per-attempt delay.
struct MockDelivery {
    fail_first: usize,
    delay: Duration,
    attempts: AtomicUsize,
    delivered: Mutex<Vec<String>>,
}

impl MockDelivery {
    fn new(fail_first: usize, delay: Duration) -> Arc<Self> {
        Arc::new(Self {
            fail_first,
            delay,
            attempts: AtomicUsize::new(0),
            delivered: Mutex::new(Vec::new()),
        })
    }

    fn attempts(&self) -> usize {
        self.attempts.load(Ordering::SeqCst)
    }

    fn delivered(&self) -> Vec<String> {
        self.delivered.lock().unwrap().clone()
    }
}

#[async_trait]
impl Delivery for MockDelivery {
    async fn deliver(&self, mail: &Mail) -> Result<(), DeliveryError> {
        let attempt = self.attempts.fetch_add(1, Ordering::SeqCst);
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        if attempt < self.fail_first {
            return Err(DeliveryError::new("scripted failure"));
        }
        self.delivered.lock().unwrap().push(mail.id.clone());
        Ok(())
    }
}

/// Fast test tuning: tight poll, tight backoff, no jitter.
fn test_config() -> SchedulerConfig {
    SchedulerConfig::default()
        .poll_interval(Duration::from_millis(100))
        .delivery_timeout(Duration::from_secs(1))
        .backoff(BackoffConfig {
            base: Duration::from_millis(100),
            cap: Duration::from_secs(1),
            jitter: 0.0,
        })
}

async fn setup(name: &str) -> (Storage, ConsumerId, Arc<NotifyHub>, Arc<ConsumerLocks>) {
    let storage = Storage::in_memory().await.unwrap();
    let consumer = storage.consumers().create(name).await.unwrap();
    (storage, consumer, Arc::new(NotifyHub::default()), Arc::new(ConsumerLocks::new()))
}

async fn ingest(storage: &Storage, hub: &Arc<NotifyHub>, id: &str) {
    let mail = Mail::new(id, Utc::now(), "body", b"raw".to_vec());
    let dispatches = storage
        .dispatches()
        .with_hook(Arc::clone(hub) as Arc<dyn EnqueueHook>);
    let policy = AllConsumers::new(storage.consumers());
    ingest_mail(&storage.archive(), &dispatches, &policy, &mail, &[])
        .await
        .unwrap();
}

async fn wait_for_empty_queue(
    dispatches: &DispatchRepository,
    consumer: ConsumerId,
    deadline: Duration,
) -> bool {
    let start = Instant::now();
    while start.elapsed() < deadline {
        if dispatches.count(consumer).await.unwrap() == 0 {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    false
}

async fn wait_for_attempted_row(
    dispatches: &DispatchRepository,
    consumer: ConsumerId,
    mail_id: &str,
    deadline: Duration,
) -> Option<Dispatch> {
    let start = Instant::now();
    while start.elapsed() < deadline {
        if let Some(row) = dispatches.get(consumer, mail_id).await.unwrap()
            && row.last_time.is_some()
        {
            return Some(row);
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    None
}

async fn wait_for_attempts(delivery: &MockDelivery, n: usize, deadline: Duration) -> bool {
    let start = Instant::now();
    while start.elapsed() < deadline {
        if delivery.attempts() >= n {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    false
}

#[tokio::test]
async fn fails_once_then_succeeds_and_clears_the_row() {
    let (storage, consumer, hub, locks) = setup("flaky").await;
    let delivery = MockDelivery::new(1, Duration::ZERO);
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    // A wide enough retry gap to observe the rescheduled row in between.
    let config = test_config().backoff(BackoffConfig {
        base: Duration::from_millis(300),
        cap: Duration::from_secs(1),
        jitter: 0.0,
    });
    let scheduler = Scheduler::new(
        &storage,
        consumer,
        delivery.clone(),
        Arc::clone(&hub),
        Arc::clone(&locks),
        config,
    );
    let worker = tokio::spawn(scheduler.run(shutdown_rx));

    ingest(&storage, &hub, "<m1@example.com>").await;
    let dispatches = storage.dispatches();

    // The first attempt fails: the row must show the attempt and a
    // strictly later schedule.
    let row = wait_for_attempted_row(&dispatches, consumer, "<m1@example.com>", Duration::from_secs(2))
        .await
        .unwrap();
    assert!(row.next_time > row.last_time.unwrap());

    // The retry succeeds and deletes the row for good.
    assert!(wait_for_empty_queue(&dispatches, consumer, Duration::from_secs(3)).await);
    assert_eq!(delivery.attempts(), 2);
    assert_eq!(delivery.delivered(), vec!["<m1@example.com>".to_string()]);

    shutdown_tx.send(true).unwrap();
    worker.await.unwrap();

    // Nothing reappears without an explicit enqueue.
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(dispatches.count(consumer).await.unwrap(), 0);
}

#[tokio::test]
async fn polling_picks_up_rows_without_any_notification() {
    let (storage, consumer, hub, locks) = setup("unnotified").await;
    let delivery = MockDelivery::new(0, Duration::ZERO);
    let (_shutdown_tx, shutdown_rx) = watch::channel(false);

    let scheduler = Scheduler::new(
        &storage,
        consumer,
        delivery.clone(),
        Arc::clone(&hub),
        Arc::clone(&locks),
        test_config(),
    );
    tokio::spawn(scheduler.run(shutdown_rx));

    // Enqueue through a repository with no hook attached: the
    // notification channel never fires for this row.
    let mail = Mail::new("<quiet@example.com>", Utc::now(), "body", b"raw".to_vec());
    storage.archive().store(&mail, &[]).await.unwrap();
    let dispatches = storage.dispatches();
    dispatches.enqueue(consumer, "<quiet@example.com>").await.unwrap();

    assert!(wait_for_empty_queue(&dispatches, consumer, Duration::from_secs(3)).await);
    assert_eq!(delivery.delivered(), vec!["<quiet@example.com>".to_string()]);
}

#[tokio::test]
async fn notification_beats_a_long_poll_interval() {
    let (storage, consumer, hub, locks) = setup("latency").await;
    let delivery = MockDelivery::new(0, Duration::ZERO);
    let (_shutdown_tx, shutdown_rx) = watch::channel(false);

    // A poll interval far beyond the test deadline: only the
    // notification path can deliver in time.
    let config = test_config().poll_interval(Duration::from_secs(30));
    let scheduler = Scheduler::new(
        &storage,
        consumer,
        delivery.clone(),
        Arc::clone(&hub),
        Arc::clone(&locks),
        config,
    );
    tokio::spawn(scheduler.run(shutdown_rx));

    // Let the scheduler arm its long wait before the mail arrives.
    tokio::time::sleep(Duration::from_millis(200)).await;
    ingest(&storage, &hub, "<fast@example.com>").await;

    let dispatches = storage.dispatches();
    assert!(wait_for_empty_queue(&dispatches, consumer, Duration::from_secs(3)).await);
}

#[tokio::test]
async fn two_schedulers_deliver_each_row_exactly_once() {
    let (storage, consumer, hub, locks) = setup("contended").await;
    // The artificial delay keeps bursts long enough that the two
    // instances genuinely contend for the lock.
    let delivery = MockDelivery::new(0, Duration::from_millis(50));
    let (_shutdown_tx, shutdown_rx) = watch::channel(false);

    for _ in 0..2 {
        let scheduler = Scheduler::new(
            &storage,
            consumer,
            delivery.clone(),
            Arc::clone(&hub),
            Arc::clone(&locks),
            test_config(),
        );
        tokio::spawn(scheduler.run(shutdown_rx.clone()));
    }

    for id in ["<a@example.com>", "<b@example.com>", "<c@example.com>"] {
        ingest(&storage, &hub, id).await;
    }

    let dispatches = storage.dispatches();
    assert!(wait_for_empty_queue(&dispatches, consumer, Duration::from_secs(5)).await);

    // Each mail was delivered exactly once across both instances.
    let mut delivered = delivery.delivered();
    delivered.sort();
    assert_eq!(
        delivered,
        vec![
            "<a@example.com>".to_string(),
            "<b@example.com>".to_string(),
            "<c@example.com>".to_string(),
        ]
    );
}

#[tokio::test]
async fn shutdown_finishes_the_in_flight_burst() {
    let (storage, consumer, hub, locks) = setup("draining").await;
    let delivery = MockDelivery::new(0, Duration::from_millis(300));
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let scheduler = Scheduler::new(
        &storage,
        consumer,
        delivery.clone(),
        Arc::clone(&hub),
        Arc::clone(&locks),
        test_config(),
    );
    let worker = tokio::spawn(scheduler.run(shutdown_rx));

    ingest(&storage, &hub, "<slow@example.com>").await;

    // Signal shutdown while the delivery is still in flight.
    assert!(wait_for_attempts(&delivery, 1, Duration::from_secs(2)).await);
    shutdown_tx.send(true).unwrap();

    // The worker exits promptly, but only after the burst completed.
    tokio::time::timeout(Duration::from_secs(2), worker)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(delivery.delivered(), vec!["<slow@example.com>".to_string()]);
    assert_eq!(storage.dispatches().count(consumer).await.unwrap(), 0);
}

#[tokio::test]
async fn repeated_failures_grow_the_retry_gap() {
    let (storage, consumer, hub, locks) = setup("struggling").await;
    let delivery = MockDelivery::new(usize::MAX, Duration::ZERO);
    let (_shutdown_tx, shutdown_rx) = watch::channel(false);

    let scheduler = Scheduler::new(
        &storage,
        consumer,
        delivery.clone(),
        Arc::clone(&hub),
        Arc::clone(&locks),
        test_config(),
    );
    tokio::spawn(scheduler.run(shutdown_rx));

    ingest(&storage, &hub, "<doomed@example.com>").await;
    // Once the fourth attempt has started, the third failure's reschedule
    // is committed.
    assert!(wait_for_attempts(&delivery, 4, Duration::from_secs(5)).await);

    // 100ms, 200ms, 400ms, ...: by the third failure the persisted gap
    // has doubled at least twice, and the schedule still moves forward.
    let dispatches = storage.dispatches();
    let row = dispatches
        .get(consumer, "<doomed@example.com>")
        .await
        .unwrap()
        .unwrap();
    assert!(row.next_time > row.last_time.unwrap());
    assert!(row.previous_delay().unwrap() >= chrono::Duration::milliseconds(400));
    assert!(delivery.delivered().is_empty());
}

#[tokio::test]
async fn delivery_timeout_counts_as_a_failure() {
    let (storage, consumer, hub, locks) = setup("stuck").await;
    // Slower than the configured delivery timeout.
    let delivery = MockDelivery::new(0, Duration::from_millis(500));
    let (_shutdown_tx, shutdown_rx) = watch::channel(false);

    let config = test_config().delivery_timeout(Duration::from_millis(50));
    let scheduler = Scheduler::new(
        &storage,
        consumer,
        delivery.clone(),
        Arc::clone(&hub),
        Arc::clone(&locks),
        config,
    );
    tokio::spawn(scheduler.run(shutdown_rx));

    ingest(&storage, &hub, "<tarpit@example.com>").await;

    let dispatches = storage.dispatches();
    let row = wait_for_attempted_row(&dispatches, consumer, "<tarpit@example.com>", Duration::from_secs(2))
        .await
        .unwrap();
    assert!(row.next_time > row.last_time.unwrap());
    assert!(delivery.delivered().is_empty());
}
