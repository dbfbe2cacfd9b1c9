//! Mailbox access.
//!
//! The pipeline only sees the [`MessageSource`] capability: list identifiers
//! matching a filter, fetch one body by identifier. Transport details stay
//! behind the trait so tests can substitute an in-memory mailbox.
//!
//! # Architecture
//!
//! ```text
//! Maildir (new/ + cur/) → MaildirSource ─┐
//!            ↓                            ├→ mime::flatten_plain_text → Pipeline
//!      MailboxWatcher      IMAP → ImapSource ┘
//!    (triggers re-runs)
//! ```

pub mod imap;
pub mod maildir;
pub mod mime;
pub mod watcher;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::domain::MessageId;

// Re-export key types
pub use imap::ImapSource;
pub use maildir::MaildirSource;
pub use mime::flatten_plain_text;
pub use watcher::{MailboxChange, MailboxWatcher, WatchHandle, WatcherError};

/// Errors raised by a message source
#[derive(Debug, Error)]
pub enum SourceError {
    /// Connection or mailbox-level failure; fatal to the run
    #[error("Mailbox unavailable: {0}")]
    Unavailable(String),

    /// One message could not be fetched; only that message is skipped
    #[error("Failed to fetch message {id}: {reason}")]
    FetchFailed { id: MessageId, reason: String },
}

impl SourceError {
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::Unavailable(_))
    }
}

/// Criteria for selecting candidate messages.
///
/// Both fields are case-insensitive substring matches; an empty filter
/// selects every message.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageFilter {
    #[serde(default)]
    pub from: Option<String>,
    #[serde(default)]
    pub subject: Option<String>,
}

impl MessageFilter {
    /// Filter that selects everything
    pub fn all() -> Self {
        Self::default()
    }

    pub fn is_all(&self) -> bool {
        self.from.is_none() && self.subject.is_none()
    }

    /// Check header values against the filter
    pub fn matches(&self, from: Option<&str>, subject: Option<&str>) -> bool {
        fn contains(haystack: Option<&str>, needle: &Option<String>) -> bool {
            match needle {
                None => true,
                Some(needle) => haystack
                    .map(|h| h.to_lowercase().contains(&needle.to_lowercase()))
                    .unwrap_or(false),
            }
        }

        contains(from, &self.from) && contains(subject, &self.subject)
    }
}

/// Mailbox capability consumed by the pipeline
#[async_trait]
pub trait MessageSource: Send + Sync {
    /// Human-readable source name
    fn name(&self) -> &str;

    /// Enumerate identifiers of messages matching `filter`.
    /// Order is source-defined and may contain duplicates.
    async fn list_ids(&self, filter: &MessageFilter) -> Result<Vec<MessageId>, SourceError>;

    /// Fetch the flattened plain-text body of one message
    async fn fetch_body(&self, id: &MessageId) -> Result<String, SourceError>;
}
