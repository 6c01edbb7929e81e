//! Consumer storage repository.

use chrono::Utc;
use sqlx::Row;
use sqlx::sqlite::{SqlitePool, SqliteRow};
use tracing::debug;

use super::model::{Consumer, ConsumerId};
use crate::Result;
use crate::db::{format_time, parse_time};

/// Repository for the consumer registry.
pub struct ConsumerRepository {
    pool: SqlitePool,
}

impl ConsumerRepository {
    /// Creates a repository over the given pool.
    ///
    /// The schema must already exist; see [`crate::Storage`].
    #[must_use]
    pub const fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Register a new consumer and return its assigned id.
    ///
    /// # Errors
    ///
    /// Returns an error if the database query fails.
    pub async fn create(&self, name: &str) -> Result<ConsumerId> {
        let result = sqlx::query(
            r"
            INSERT INTO consumer (name, created_at)
            VALUES (?, ?)
            ",
        )
        .bind(name)
        .bind(format_time(Utc::now()))
        .execute(&self.pool)
        .await?;

        let id = ConsumerId::new(result.last_insert_rowid());
        debug!("registered consumer {id} ({name})");
        Ok(id)
    }

    /// Get a consumer by id.
    ///
    /// # Errors
    ///
    /// Returns an error if the database query fails.
    pub async fn get(&self, id: ConsumerId) -> Result<Option<Consumer>> {
        let row = sqlx::query(
            r"
            SELECT id, name, created_at
            FROM consumer
            WHERE id = ?
            ",
        )
        .bind(id.0)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.as_ref().and_then(row_to_consumer))
    }

    /// Get all registered consumers.
    ///
    /// # Errors
    ///
    /// Returns an error if the database query fails.
    pub async fn list(&self) -> Result<Vec<Consumer>> {
        let rows = sqlx::query(
            r"
            SELECT id, name, created_at
            FROM consumer
            ORDER BY id ASC
            ",
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.iter().filter_map(row_to_consumer).collect())
    }

    /// Delete a consumer.
    ///
    /// Pending dispatches for the consumer cascade with it. Returns `true`
    /// if a consumer was deleted.
    ///
    /// # Errors
    ///
    /// Returns an error if the database query fails.
    pub async fn delete(&self, id: ConsumerId) -> Result<bool> {
        let result = sqlx::query("DELETE FROM consumer WHERE id = ?")
            .bind(id.0)
            .execute(&self.pool)
            .await?;

        let deleted = result.rows_affected() > 0;
        if deleted {
            debug!("deleted consumer {id}");
        }
        Ok(deleted)
    }
}

/// Convert a database row to a Consumer.
fn row_to_consumer(row: &SqliteRow) -> Option<Consumer> {
    let created_at = parse_time(row.get("created_at"))?;
    Some(Consumer {
        id: ConsumerId::new(row.get("id")),
        name: row.get("name"),
        created_at,
    })
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::Storage;

    #[tokio::test]
    async fn test_create_and_retrieve_consumer() {
        let storage = Storage::in_memory().await.unwrap();
        let consumers = storage.consumers();

        let id = consumers.create("webhook-bridge").await.unwrap();
        let consumer = consumers.get(id).await.unwrap().unwrap();
        assert_eq!(consumer.id, id);
        assert_eq!(consumer.name, "webhook-bridge");
    }

    #[tokio::test]
    async fn test_ids_are_assigned_in_order() {
        let storage = Storage::in_memory().await.unwrap();
        let consumers = storage.consumers();

        let first = consumers.create("first").await.unwrap();
        let second = consumers.create("second").await.unwrap();
        assert!(second > first);

        let listed = consumers.list().await.unwrap();
        assert_eq!(listed.len(), 2);
        assert_eq!(listed[0].id, first);
        assert_eq!(listed[1].id, second);
    }

    #[tokio::test]
    async fn test_delete_consumer() {
        let storage = Storage::in_memory().await.unwrap();
        let consumers = storage.consumers();

        let id = consumers.create("short-lived").await.unwrap();
        assert!(consumers.delete(id).await.unwrap());
        assert!(!consumers.delete(id).await.unwrap());
        assert!(consumers.get(id).await.unwrap().is_none());
    }
}
