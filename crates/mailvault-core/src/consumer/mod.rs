//! Consumer registry.
//!
//! Consumers are the delivery targets of the dispatch subsystem. Deleting
//! a consumer cascades to its pending dispatches so a removed consumer
//! cannot accumulate delivery obligations.

mod model;
mod repository;

pub use model::{Consumer, ConsumerId};
pub use repository::ConsumerRepository;
