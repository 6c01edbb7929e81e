//! Dispatch queue repository.

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use sqlx::Row;
use sqlx::sqlite::{SqlitePool, SqliteRow};
use tracing::debug;

use super::hook::EnqueueHook;
use super::model::Dispatch;
use crate::consumer::ConsumerId;
use crate::db::{format_time, parse_time};
use crate::error::{constraint_code, sqlite};
use crate::{Error, Result};

/// Repository for the dispatch queue.
///
/// All mutations are single atomic statements, so concurrent scheduler
/// instances can share the table without in-process coordination: for any
/// delivery attempt exactly one of [`record_success`] or [`record_failure`]
/// applies.
///
/// [`record_success`]: DispatchRepository::record_success
/// [`record_failure`]: DispatchRepository::record_failure
pub struct DispatchRepository {
    pool: SqlitePool,
    hook: Option<Arc<dyn EnqueueHook>>,
}

impl DispatchRepository {
    /// Creates a repository over the given pool.
    ///
    /// The schema must already exist; see [`crate::Storage`].
    #[must_use]
    pub const fn new(pool: SqlitePool) -> Self {
        Self { pool, hook: None }
    }

    /// Attaches a post-commit hook fired for every fresh queue entry.
    #[must_use]
    pub fn with_hook(mut self, hook: Arc<dyn EnqueueHook>) -> Self {
        self.hook = Some(hook);
        self
    }

    /// Enqueue a delivery of `mail_id` to `consumer_id`.
    ///
    /// Idempotent: if the pair is already queued, nothing changes (the
    /// existing schedule and attempt history are kept) and the hook does
    /// not fire. Returns `true` if a fresh row was created.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Reference`] if the consumer or the mail does not
    /// exist, [`Error::Database`] on storage failure.
    pub async fn enqueue(&self, consumer_id: ConsumerId, mail_id: &str) -> Result<bool> {
        let now = format_time(Utc::now());
        let result = sqlx::query(
            r"
            INSERT INTO dispatch (consumer_id, mail_id, next_time, created_at)
            VALUES (?, ?, ?, ?)
            ON CONFLICT(consumer_id, mail_id) DO NOTHING
            ",
        )
        .bind(consumer_id.0)
        .bind(mail_id)
        .bind(&now)
        .bind(&now)
        .execute(&self.pool)
        .await
        .map_err(|e| map_enqueue_error(e, consumer_id, mail_id))?;

        let inserted = result.rows_affected() > 0;
        if inserted {
            debug!("enqueued mail {mail_id} for consumer {consumer_id}");
            if let Some(hook) = &self.hook {
                hook.enqueued(consumer_id, mail_id);
            }
        }
        Ok(inserted)
    }

    /// Get the due dispatches for a consumer, oldest schedule first.
    ///
    /// Ordering by `next_time` bounds the worst-case staleness of any
    /// single entry.
    ///
    /// # Errors
    ///
    /// Returns an error if the database query fails.
    pub async fn due(&self, consumer_id: ConsumerId, at: DateTime<Utc>) -> Result<Vec<Dispatch>> {
        let rows = sqlx::query(
            r"
            SELECT consumer_id, mail_id, last_time, next_time, created_at
            FROM dispatch
            WHERE consumer_id = ? AND next_time <= ?
            ORDER BY next_time ASC
            ",
        )
        .bind(consumer_id.0)
        .bind(format_time(at))
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.iter().filter_map(row_to_dispatch).collect())
    }

    /// Get the earliest scheduled attempt time for a consumer, if any.
    ///
    /// Used by schedulers to arm their poll timer no later than the next
    /// known piece of work.
    ///
    /// # Errors
    ///
    /// Returns an error if the database query fails.
    pub async fn next_scheduled(&self, consumer_id: ConsumerId) -> Result<Option<DateTime<Utc>>> {
        let row = sqlx::query(
            r"
            SELECT next_time
            FROM dispatch
            WHERE consumer_id = ?
            ORDER BY next_time ASC
            LIMIT 1
            ",
        )
        .bind(consumer_id.0)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.and_then(|r| parse_time(r.get("next_time"))))
    }

    /// Record a successful delivery: the row is deleted.
    ///
    /// Returns `false` if no row existed — the row being absent already
    /// means "delivered" (or the consumer is gone), so this is not an
    /// error.
    ///
    /// # Errors
    ///
    /// Returns an error if the database query fails.
    pub async fn record_success(&self, consumer_id: ConsumerId, mail_id: &str) -> Result<bool> {
        let result = sqlx::query(
            r"
            DELETE FROM dispatch
            WHERE consumer_id = ? AND mail_id = ?
            ",
        )
        .bind(consumer_id.0)
        .bind(mail_id)
        .execute(&self.pool)
        .await?;

        let deleted = result.rows_affected() > 0;
        if deleted {
            debug!("delivered mail {mail_id} to consumer {consumer_id}");
        }
        Ok(deleted)
    }

    /// Record a failed delivery attempt and reschedule the row.
    ///
    /// Sets `last_time = attempted_at` and `next_time = attempted_at +
    /// backoff`. Returns `false` if the row no longer exists (the consumer
    /// was deleted mid-burst, or a competing scheduler already delivered
    /// it); a vanished row is never resurrected.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Invariant`] if `backoff` is not strictly positive
    /// — the rescheduled `next_time` must exceed `last_time`, which the
    /// schema enforces as well. Returns [`Error::Database`] on storage
    /// failure.
    pub async fn record_failure(
        &self,
        consumer_id: ConsumerId,
        mail_id: &str,
        attempted_at: DateTime<Utc>,
        backoff: Duration,
    ) -> Result<bool> {
        if backoff <= Duration::zero() {
            return Err(Error::Invariant(format!(
                "backoff for mail {mail_id} to consumer {consumer_id} must be positive, got {backoff}"
            )));
        }

        let result = sqlx::query(
            r"
            UPDATE dispatch
            SET last_time = ?, next_time = ?
            WHERE consumer_id = ? AND mail_id = ?
            ",
        )
        .bind(format_time(attempted_at))
        .bind(format_time(attempted_at + backoff))
        .bind(consumer_id.0)
        .bind(mail_id)
        .execute(&self.pool)
        .await
        .map_err(|e| map_failure_error(e, consumer_id, mail_id))?;

        let rescheduled = result.rows_affected() > 0;
        if rescheduled {
            debug!(
                "rescheduled mail {mail_id} for consumer {consumer_id} in {}s",
                backoff.num_seconds()
            );
        }
        Ok(rescheduled)
    }

    /// Remove every dispatch owed to a consumer.
    ///
    /// Returns the number of removed rows.
    ///
    /// # Errors
    ///
    /// Returns an error if the database query fails.
    pub async fn delete_for_consumer(&self, consumer_id: ConsumerId) -> Result<u64> {
        let result = sqlx::query("DELETE FROM dispatch WHERE consumer_id = ?")
            .bind(consumer_id.0)
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected())
    }

    /// Get a single dispatch row, if present.
    ///
    /// # Errors
    ///
    /// Returns an error if the database query fails.
    pub async fn get(&self, consumer_id: ConsumerId, mail_id: &str) -> Result<Option<Dispatch>> {
        let row = sqlx::query(
            r"
            SELECT consumer_id, mail_id, last_time, next_time, created_at
            FROM dispatch
            WHERE consumer_id = ? AND mail_id = ?
            ",
        )
        .bind(consumer_id.0)
        .bind(mail_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.as_ref().and_then(row_to_dispatch))
    }

    /// Count the pending dispatches for a consumer.
    ///
    /// # Errors
    ///
    /// Returns an error if the database query fails.
    pub async fn count(&self, consumer_id: ConsumerId) -> Result<i64> {
        let row = sqlx::query("SELECT COUNT(*) as count FROM dispatch WHERE consumer_id = ?")
            .bind(consumer_id.0)
            .fetch_one(&self.pool)
            .await?;

        Ok(row.get("count"))
    }
}

fn map_enqueue_error(err: sqlx::Error, consumer_id: ConsumerId, mail_id: &str) -> Error {
    match constraint_code(&err).as_deref() {
        Some(sqlite::FOREIGN_KEY) => Error::Reference(format!(
            "cannot enqueue mail {mail_id} for consumer {consumer_id}: no such consumer or mail"
        )),
        _ => Error::Database(err),
    }
}

fn map_failure_error(err: sqlx::Error, consumer_id: ConsumerId, mail_id: &str) -> Error {
    match constraint_code(&err).as_deref() {
        Some(sqlite::CHECK) => Error::Invariant(format!(
            "reschedule of mail {mail_id} for consumer {consumer_id} does not move next_time forward"
        )),
        _ => Error::Database(err),
    }
}

/// Convert a database row to a Dispatch.
///
/// Rows with unparseable timestamps are treated as absent.
fn row_to_dispatch(row: &SqliteRow) -> Option<Dispatch> {
    let next_time = parse_time(row.get("next_time"))?;
    let created_at = parse_time(row.get("created_at"))?;
    let last_time = match row.get::<Option<String>, _>("last_time") {
        Some(raw) => Some(parse_time(&raw)?),
        None => None,
    };

    Some(Dispatch {
        consumer_id: ConsumerId::new(row.get("consumer_id")),
        mail_id: row.get("mail_id"),
        last_time,
        next_time,
        created_at,
    })
}
