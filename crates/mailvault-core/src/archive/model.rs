//! Archive data models.

use chrono::{DateTime, Utc};

/// An archived mail message.
///
/// Identified by its message id, an opaque globally unique string taken
/// from the original message. Immutable once stored.
#[derive(Debug, Clone)]
pub struct Mail {
    /// Message id (opaque, globally unique, stable).
    pub id: String,
    /// Origination timestamp of the message.
    pub date: DateTime<Utc>,
    /// Extracted plain text body.
    pub text: String,
    /// Raw message bytes as received.
    pub data: Vec<u8>,
}

impl Mail {
    /// Creates a new mail record.
    #[must_use]
    pub fn new(
        id: impl Into<String>,
        date: DateTime<Utc>,
        text: impl Into<String>,
        data: Vec<u8>,
    ) -> Self {
        Self {
            id: id.into(),
            date,
            text: text.into(),
            data,
        }
    }
}

/// An attachment extracted from an archived mail.
///
/// Identified by `(mail_id, number)`. Numbers preserve the attachment
/// order within the original message but need not be contiguous.
#[derive(Debug, Clone)]
pub struct Attachment {
    /// Id of the mail this attachment belongs to.
    pub mail_id: String,
    /// Position within the original message, `>= 0`.
    pub number: i64,
    /// Original file name, if any.
    pub name: Option<String>,
    /// MIME type.
    pub content_type: String,
    /// Text charset, for `text/*` attachments.
    pub charset: Option<String>,
    /// Raw attachment bytes.
    pub data: Vec<u8>,
}

impl Attachment {
    /// Creates a new attachment record.
    #[must_use]
    pub fn new(
        mail_id: impl Into<String>,
        number: i64,
        content_type: impl Into<String>,
        data: Vec<u8>,
    ) -> Self {
        Self {
            mail_id: mail_id.into(),
            number,
            name: None,
            content_type: content_type.into(),
            charset: None,
            data,
        }
    }

    /// Sets the original file name.
    #[must_use]
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Sets the text charset.
    #[must_use]
    pub fn with_charset(mut self, charset: impl Into<String>) -> Self {
        self.charset = Some(charset.into());
        self
    }

    /// Returns true if this is a text attachment.
    #[must_use]
    pub fn is_text(&self) -> bool {
        self.content_type.starts_with("text/")
    }
}
