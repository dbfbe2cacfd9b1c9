//! Mailbox message identity.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Opaque, stable identifier for one mailbox entry.
///
/// Only equality matters: the ledger keys on it, nothing orders by it.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MessageId(String);

impl MessageId {
    /// Wrap a source-provided identifier
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Borrow the raw identifier
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Whether this id can be stored as a single ledger line
    pub fn is_ledger_safe(&self) -> bool {
        !self.0.trim().is_empty() && !self.0.contains(['\n', '\r'])
    }
}

impl fmt::Display for MessageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for MessageId {
    fn from(id: &str) -> Self {
        Self::new(id)
    }
}

impl From<String> for MessageId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

/// A fetched message, alive only while the pipeline extracts its links.
#[derive(Debug, Clone)]
pub struct MessageRecord {
    pub id: MessageId,

    /// Concatenated plain-text content of the message
    pub body: String,
}

impl MessageRecord {
    pub fn new(id: MessageId, body: String) -> Self {
        Self { id, body }
    }
}
