//! # mailvault-core
//!
//! Durable storage layer for `MailVault`: an archive of received mail, a
//! registry of consumers, and the dispatch queue that records which mail
//! still has to reach which consumer.
//!
//! This crate provides:
//! - Mail/attachment archive (immutable once stored)
//! - Consumer registry with cascading deletion
//! - Dispatch queue with idempotent enqueue, due-row scans, and
//!   success/failure bookkeeping
//! - A post-commit hook seam for change publication
//!
//! The `next_time > last_time` retry invariant and all ownership cascades
//! are enforced in the `SQLite` schema itself, not just in application
//! code. The delivery workers live in `mailvault-dispatch`.

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![forbid(unsafe_code)]

pub mod archive;
pub mod consumer;
mod db;
pub mod dispatch;
mod error;

pub use archive::{ArchiveRepository, Attachment, Mail};
pub use consumer::{Consumer, ConsumerId, ConsumerRepository};
pub use db::Storage;
pub use dispatch::{Dispatch, DispatchRepository, EnqueueHook};
pub use error::{Error, Result};
