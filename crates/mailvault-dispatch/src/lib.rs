//! # mailvault-dispatch
//!
//! The delivery side of `MailVault`: long-lived per-consumer schedulers
//! that drain the durable dispatch queue in `mailvault-core`.
//!
//! This crate provides:
//! - A per-consumer [`Scheduler`] combining a lossy notification wake-up
//!   with a durable polling fallback
//! - The [`NotifyHub`] change publisher (best-effort, non-durable)
//! - Pluggable [`BackoffPolicy`] with a capped, jittered exponential
//!   default
//! - Per-consumer advisory locks so two scheduler instances never process
//!   the same consumer at once
//! - Ingestion fan-out behind an injected [`InterestPolicy`]
//! - Consumer lifecycle helpers that respect the lock discipline
//!
//! Delivery transports are injected through the [`Delivery`] trait; the
//! queue guarantees at-least-once delivery per `(consumer, mail)` pair.

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![forbid(unsafe_code)]

pub mod backoff;
pub mod config;
pub mod delivery;
mod error;
pub mod ingest;
pub mod lock;
pub mod notify;
pub mod registry;
pub mod scheduler;

pub use backoff::{BackoffPolicy, ExponentialBackoff};
pub use config::{BackoffConfig, SchedulerConfig};
pub use delivery::{Delivery, DeliveryError};
pub use error::{Error, Result};
pub use ingest::{AllConsumers, InterestPolicy, fan_out, ingest_mail};
pub use lock::{BurstGuard, ConsumerLocks};
pub use notify::NotifyHub;
pub use registry::{create_consumer, remove_consumer};
pub use scheduler::Scheduler;
