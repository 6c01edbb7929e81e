//! Archived mail storage.
//!
//! Mail is immutable once archived: the dispatch subsystem only ever reads
//! it. Attachments are owned by their mail and are removed with it.

mod model;
mod repository;

pub use model::{Attachment, Mail};
pub use repository::ArchiveRepository;
