//! Consumer data models.

use std::fmt;

use chrono::{DateTime, Utc};

/// Identifier of a registered consumer, assigned on creation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConsumerId(pub i64);

impl ConsumerId {
    /// Creates a consumer id from a raw database id.
    #[must_use]
    pub const fn new(id: i64) -> Self {
        Self(id)
    }
}

impl fmt::Display for ConsumerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A registered delivery target.
#[derive(Debug, Clone)]
pub struct Consumer {
    /// Synthetic identifier assigned on creation.
    pub id: ConsumerId,
    /// Display name.
    pub name: String,
    /// When the consumer was registered.
    pub created_at: DateTime<Utc>,
}
