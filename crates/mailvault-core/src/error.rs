//! Error types for the core library.

use thiserror::Error;

/// Errors that can occur in storage operations.
#[derive(Debug, Error)]
pub enum Error {
    /// An operation referenced a consumer or mail that does not exist.
    #[error("unknown reference: {0}")]
    Reference(String),

    /// An operation would violate a storage invariant (duplicate key,
    /// or a retry schedule that does not move forward in time).
    #[error("invariant violation: {0}")]
    Invariant(String),

    /// Database operation failed.
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
}

/// Result type alias using our Error type.
pub type Result<T> = std::result::Result<T, Error>;

/// SQLite extended result codes, as surfaced through `sqlx`.
///
/// Constraint failures all map to `sqlx::Error::Database`; the extended
/// code is the only way to tell a missing foreign key from a duplicate
/// primary key or a CHECK failure.
pub(crate) mod sqlite {
    /// `SQLITE_CONSTRAINT_FOREIGNKEY`
    pub const FOREIGN_KEY: &str = "787";
    /// `SQLITE_CONSTRAINT_CHECK`
    pub const CHECK: &str = "275";
    /// `SQLITE_CONSTRAINT_PRIMARYKEY`
    pub const PRIMARY_KEY: &str = "1555";
    /// `SQLITE_CONSTRAINT_UNIQUE`
    pub const UNIQUE: &str = "2067";
}

/// Returns the SQLite extended result code of a constraint failure, if any.
pub(crate) fn constraint_code(err: &sqlx::Error) -> Option<String> {
    match err {
        sqlx::Error::Database(db) => db.code().map(|code| code.into_owned()),
        _ => None,
    }
}
