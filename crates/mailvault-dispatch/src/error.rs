//! Error types for the dispatch subsystem.
//!
//! Delivery failures are deliberately not represented here: a failing
//! delivery capability is recovered locally by rescheduling the dispatch
//! row, and a lost notification channel degrades to polling. The only
//! error class that escalates past a scheduler is storage failure.

use thiserror::Error;

/// Errors that can occur in dispatch operations.
#[derive(Debug, Error)]
pub enum Error {
    /// The dispatch queue or the mail archive is unreachable or refused
    /// an operation.
    #[error("storage error: {0}")]
    Storage(#[from] mailvault_core::Error),
}

/// Result type alias using our Error type.
pub type Result<T> = std::result::Result<T, Error>;
