//! End-to-end fan-out against an in-memory store.
//!
//! Registers two consumers, wires a scheduler for each, archives one mail,
//! and watches both schedulers deliver it.
//!
//! Run with: `cargo run --example local_fanout`

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use mailvault_core::{EnqueueHook, Mail, Storage};
use mailvault_dispatch::{
    AllConsumers, BackoffConfig, ConsumerLocks, Delivery, DeliveryError, NotifyHub, Scheduler,
    SchedulerConfig, ingest_mail,
};
use tokio::sync::watch;

/// Prints each mail instead of pushing it anywhere.
struct PrintDelivery {
    label: &'static str,
}

#[async_trait]
impl Delivery for PrintDelivery {
    async fn deliver(&self, mail: &Mail) -> Result<(), DeliveryError> {
        println!("[{}] delivered {} ({} bytes)", self.label, mail.id, mail.data.len());
        Ok(())
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("debug")),
        )
        .init();

    let storage = Storage::in_memory().await?;
    let consumers = storage.consumers();
    let hub = Arc::new(NotifyHub::default());
    let locks = Arc::new(ConsumerLocks::new());

    let config = SchedulerConfig::default()
        .poll_interval(Duration::from_secs(5))
        .backoff(BackoffConfig {
            base: Duration::from_millis(500),
            cap: Duration::from_secs(5),
            jitter: 0.2,
        });

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let mut workers = Vec::new();
    for label in ["audit-log", "webhook-bridge"] {
        let id = consumers.create(label).await?;
        let scheduler = Scheduler::new(
            &storage,
            id,
            Arc::new(PrintDelivery { label }),
            Arc::clone(&hub),
            Arc::clone(&locks),
            config,
        );
        workers.push(tokio::spawn(scheduler.run(shutdown_rx.clone())));
    }

    let mail = Mail::new(
        "<20260807120000.demo@example.com>",
        Utc::now(),
        "hello from the archive",
        b"Message-ID: <20260807120000.demo@example.com>\r\n\r\nhello".to_vec(),
    );
    let dispatches = storage
        .dispatches()
        .with_hook(Arc::clone(&hub) as Arc<dyn EnqueueHook>);
    let policy = AllConsumers::new(storage.consumers());
    let created = ingest_mail(&storage.archive(), &dispatches, &policy, &mail, &[]).await?;
    println!("enqueued {created} dispatch(es)");

    tokio::time::sleep(Duration::from_secs(1)).await;

    shutdown_tx.send(true)?;
    for worker in workers {
        worker.await?;
    }
    Ok(())
}
