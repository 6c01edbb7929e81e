//! Archive storage repository.

use sqlx::Row;
use sqlx::sqlite::{SqlitePool, SqliteRow};
use tracing::debug;

use super::model::{Attachment, Mail};
use crate::db::{format_time, parse_time};
use crate::error::{constraint_code, sqlite};
use crate::{Error, Result};

/// Repository for archived mail and attachments.
pub struct ArchiveRepository {
    pool: SqlitePool,
}

impl ArchiveRepository {
    /// Creates a repository over the given pool.
    ///
    /// The schema must already exist; see [`crate::Storage`].
    #[must_use]
    pub const fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Archive a mail together with its attachments.
    ///
    /// The insert is a single transaction: either the mail and all of its
    /// attachments are stored, or nothing is.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Invariant`] if the message id is already archived,
    /// if an attachment does not belong to this mail, or if an attachment
    /// number is negative or duplicated. Returns [`Error::Database`] on
    /// storage failure.
    pub async fn store(&self, mail: &Mail, attachments: &[Attachment]) -> Result<()> {
        if let Some(stray) = attachments.iter().find(|a| a.mail_id != mail.id) {
            return Err(Error::Invariant(format!(
                "attachment {}#{} stored under mail {}",
                stray.mail_id, stray.number, mail.id
            )));
        }

        let mut tx = self.pool.begin().await?;

        sqlx::query(
            r"
            INSERT INTO mail (id, date, text, data)
            VALUES (?, ?, ?, ?)
            ",
        )
        .bind(&mail.id)
        .bind(format_time(mail.date))
        .bind(&mail.text)
        .bind(&mail.data)
        .execute(&mut *tx)
        .await
        .map_err(|e| map_store_error(e, &mail.id))?;

        for attachment in attachments {
            sqlx::query(
                r"
                INSERT INTO attachment (mail_id, number, name, type, code, data)
                VALUES (?, ?, ?, ?, ?, ?)
                ",
            )
            .bind(&attachment.mail_id)
            .bind(attachment.number)
            .bind(&attachment.name)
            .bind(&attachment.content_type)
            .bind(&attachment.charset)
            .bind(&attachment.data)
            .execute(&mut *tx)
            .await
            .map_err(|e| map_store_error(e, &mail.id))?;
        }

        tx.commit().await?;
        debug!(
            "archived mail {} with {} attachment(s)",
            mail.id,
            attachments.len()
        );
        Ok(())
    }

    /// Get an archived mail by message id.
    ///
    /// # Errors
    ///
    /// Returns an error if the database query fails.
    pub async fn get(&self, id: &str) -> Result<Option<Mail>> {
        let row = sqlx::query(
            r"
            SELECT id, date, text, data
            FROM mail
            WHERE id = ?
            ",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.as_ref().and_then(row_to_mail))
    }

    /// Check whether a message id is archived.
    ///
    /// # Errors
    ///
    /// Returns an error if the database query fails.
    pub async fn contains(&self, id: &str) -> Result<bool> {
        let row = sqlx::query("SELECT COUNT(*) as count FROM mail WHERE id = ?")
            .bind(id)
            .fetch_one(&self.pool)
            .await?;

        let count: i64 = row.get("count");
        Ok(count > 0)
    }

    /// Get all attachments of a mail, in message order.
    ///
    /// # Errors
    ///
    /// Returns an error if the database query fails.
    pub async fn attachments(&self, mail_id: &str) -> Result<Vec<Attachment>> {
        let rows = sqlx::query(
            r"
            SELECT mail_id, number, name, type, code, data
            FROM attachment
            WHERE mail_id = ?
            ORDER BY number ASC
            ",
        )
        .bind(mail_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.iter().map(row_to_attachment).collect())
    }

    /// Get a single attachment by mail id and number.
    ///
    /// # Errors
    ///
    /// Returns an error if the database query fails.
    pub async fn attachment(&self, mail_id: &str, number: i64) -> Result<Option<Attachment>> {
        let row = sqlx::query(
            r"
            SELECT mail_id, number, name, type, code, data
            FROM attachment
            WHERE mail_id = ? AND number = ?
            ",
        )
        .bind(mail_id)
        .bind(number)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.as_ref().map(row_to_attachment))
    }

    /// Delete an archived mail.
    ///
    /// Attachments and any pending dispatches cascade with it. Returns
    /// `true` if a mail was deleted.
    ///
    /// # Errors
    ///
    /// Returns an error if the database query fails.
    pub async fn delete(&self, id: &str) -> Result<bool> {
        let result = sqlx::query("DELETE FROM mail WHERE id = ?")
            .bind(id)
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected() > 0)
    }
}

fn map_store_error(err: sqlx::Error, mail_id: &str) -> Error {
    match constraint_code(&err).as_deref() {
        Some(sqlite::PRIMARY_KEY | sqlite::UNIQUE) => {
            Error::Invariant(format!("mail {mail_id} is already archived"))
        }
        Some(sqlite::CHECK) => Error::Invariant(format!(
            "mail {mail_id} has an attachment with a negative number"
        )),
        _ => Error::Database(err),
    }
}

/// Convert a database row to a Mail.
///
/// Rows with an unparseable date are treated as absent.
fn row_to_mail(row: &SqliteRow) -> Option<Mail> {
    let date = parse_time(row.get("date"))?;
    Some(Mail {
        id: row.get("id"),
        date,
        text: row.get("text"),
        data: row.get("data"),
    })
}

/// Convert a database row to an Attachment.
fn row_to_attachment(row: &SqliteRow) -> Attachment {
    Attachment {
        mail_id: row.get("mail_id"),
        number: row.get("number"),
        name: row.get("name"),
        content_type: row.get("type"),
        charset: row.get("code"),
        data: row.get("data"),
    }
}
