//! Dispatch queue storage.
//!
//! A dispatch row is the obligation to deliver one mail to one consumer.
//! The table is the single source of truth for what still needs sending:
//! rows are created by ingestion fan-out and destroyed by successful
//! delivery or consumer deletion, never left behind.

mod hook;
mod model;
mod repository;

pub use hook::EnqueueHook;
pub use model::Dispatch;
pub use repository::DispatchRepository;
