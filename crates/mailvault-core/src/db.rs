//! Shared database handle and schema.
//!
//! The archive, consumer, and dispatch tables are related by foreign keys
//! (consumer and mail deletions cascade into `dispatch`), so a single
//! [`Storage`] owns the pool and the schema and hands out repositories that
//! share it.

use chrono::{DateTime, SecondsFormat, Utc};
use sqlx::sqlite::{SqlitePool, SqlitePoolOptions};

use crate::Result;
use crate::archive::ArchiveRepository;
use crate::consumer::ConsumerRepository;
use crate::dispatch::DispatchRepository;

/// Shared handle to the MailVault database.
#[derive(Debug, Clone)]
pub struct Storage {
    pool: SqlitePool,
}

impl Storage {
    /// Open (or create) the database at the given path.
    ///
    /// # Errors
    ///
    /// Returns an error if the database connection fails or schema creation
    /// fails.
    pub async fn open(database_path: &str) -> Result<Self> {
        let url = format!("sqlite:{database_path}?mode=rwc");
        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect(&url)
            .await?;

        let storage = Self { pool };
        storage.initialize().await?;
        Ok(storage)
    }

    /// Create an in-memory database for testing.
    ///
    /// # Errors
    ///
    /// Returns an error if the database connection fails or schema creation
    /// fails.
    pub async fn in_memory() -> Result<Self> {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await?;

        let storage = Self { pool };
        storage.initialize().await?;
        Ok(storage)
    }

    /// Initialize database schema.
    ///
    /// The `next_time > last_time` rule and all ownership cascades are
    /// declared here so the storage layer enforces them even for writers
    /// that bypass the repositories.
    async fn initialize(&self) -> Result<()> {
        sqlx::query(
            r"
            CREATE TABLE IF NOT EXISTS mail (
                id TEXT PRIMARY KEY,
                date TEXT NOT NULL,
                text TEXT NOT NULL,
                data BLOB NOT NULL
            )
            ",
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r"
            CREATE TABLE IF NOT EXISTS attachment (
                mail_id TEXT NOT NULL REFERENCES mail(id) ON DELETE CASCADE,
                number INTEGER NOT NULL CHECK (number >= 0),
                name TEXT,
                type TEXT NOT NULL,
                code TEXT,
                data BLOB NOT NULL,
                PRIMARY KEY (mail_id, number)
            )
            ",
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r"
            CREATE TABLE IF NOT EXISTS consumer (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                name TEXT NOT NULL,
                created_at TEXT NOT NULL
            )
            ",
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r"
            CREATE TABLE IF NOT EXISTS dispatch (
                consumer_id INTEGER NOT NULL REFERENCES consumer(id) ON DELETE CASCADE,
                mail_id TEXT NOT NULL REFERENCES mail(id) ON DELETE CASCADE,
                last_time TEXT,
                next_time TEXT NOT NULL,
                created_at TEXT NOT NULL,
                PRIMARY KEY (consumer_id, mail_id),
                CHECK (last_time IS NULL OR next_time > last_time)
            )
            ",
        )
        .execute(&self.pool)
        .await?;

        // Index for the due-row scan, which always filters by consumer and
        // orders by next_time.
        sqlx::query(
            r"
            CREATE INDEX IF NOT EXISTS idx_dispatch_next_time
                ON dispatch(consumer_id, next_time)
            ",
        )
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Returns the underlying connection pool.
    #[must_use]
    pub const fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Returns a repository over the mail archive.
    #[must_use]
    pub fn archive(&self) -> ArchiveRepository {
        ArchiveRepository::new(self.pool.clone())
    }

    /// Returns a repository over the consumer registry.
    #[must_use]
    pub fn consumers(&self) -> ConsumerRepository {
        ConsumerRepository::new(self.pool.clone())
    }

    /// Returns a repository over the dispatch queue.
    #[must_use]
    pub fn dispatches(&self) -> DispatchRepository {
        DispatchRepository::new(self.pool.clone())
    }
}

/// Format a timestamp for storage.
///
/// Fixed-width UTC (microsecond precision, `Z` suffix) so that the string
/// comparisons in SQL (`next_time <= ?`, the `next_time > last_time` CHECK)
/// match chronological order.
pub(crate) fn format_time(time: DateTime<Utc>) -> String {
    time.to_rfc3339_opts(SecondsFormat::Micros, true)
}

/// Parse a stored timestamp.
pub(crate) fn parse_time(raw: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .ok()
        .map(|time| time.with_timezone(&Utc))
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_schema_creation_is_idempotent() {
        let storage = Storage::in_memory().await.unwrap();
        storage.initialize().await.unwrap();
    }

    #[test]
    fn test_time_roundtrip() {
        let now = Utc::now();
        let parsed = parse_time(&format_time(now)).unwrap();
        // Microsecond precision is the storage resolution.
        assert_eq!(parsed.timestamp_micros(), now.timestamp_micros());
    }

    #[test]
    fn test_time_format_orders_lexicographically() {
        let earlier = Utc::now();
        let later = earlier + chrono::Duration::microseconds(1);
        assert!(format_time(earlier) < format_time(later));
    }
}
