//! Aggregate diagnostics for one pipeline pass.
//!
//! A run is a single `Enumerate → {PerMessage}* → Done` pass over the
//! mailbox. Nothing here is persisted; the summary is logged and optionally
//! printed as JSON.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::download::DownloadResult;

/// Counters collected over a pipeline run
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunSummary {
    /// Unique identifier for this run
    pub id: Uuid,

    /// Current state of the run
    pub state: RunState,

    /// When the run started
    pub started_at: DateTime<Utc>,

    /// When the run finished (if applicable)
    pub finished_at: Option<DateTime<Utc>>,

    /// Identifiers returned by the source (including duplicates)
    pub messages_seen: usize,

    /// Already in the ledger, or listed twice
    pub messages_skipped: usize,

    /// Fully attempted and marked in the ledger
    pub messages_processed: usize,

    /// Left unmarked because the body could not be fetched
    pub messages_fetch_failed: usize,

    /// Processed messages that contained no qualifying link
    pub messages_without_links: usize,

    pub urls_attempted: usize,
    pub urls_succeeded: usize,
    pub urls_failed: usize,

    /// Links that appeared more than once in the same message
    pub urls_duplicated: usize,

    /// Files written into the output directory
    pub files_published: usize,
}

impl RunSummary {
    /// Start a new run
    pub fn new() -> Self {
        Self::with_id(Uuid::new_v4())
    }

    pub fn with_id(id: Uuid) -> Self {
        Self {
            id,
            state: RunState::Running,
            started_at: Utc::now(),
            finished_at: None,
            messages_seen: 0,
            messages_skipped: 0,
            messages_processed: 0,
            messages_fetch_failed: 0,
            messages_without_links: 0,
            urls_attempted: 0,
            urls_succeeded: 0,
            urls_failed: 0,
            urls_duplicated: 0,
            files_published: 0,
        }
    }

    /// Tally one download attempt
    pub fn record_download(&mut self, result: &DownloadResult) {
        self.urls_attempted += 1;
        if result.is_success() {
            self.urls_succeeded += 1;
            self.files_published += result.published().len();
        } else {
            self.urls_failed += 1;
        }
    }

    /// Close the run with a final state
    pub fn finish(&mut self, state: RunState) {
        self.state = state;
        self.finished_at = Some(Utc::now());
    }

    /// Check if the run is still in progress
    pub fn is_running(&self) -> bool {
        matches!(self.state, RunState::Running)
    }
}

impl Default for RunSummary {
    fn default() -> Self {
        Self::new()
    }
}

/// State of a pipeline run
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "status")]
pub enum RunState {
    /// Currently executing
    Running,

    /// Enumeration finished; per-message failures may still have happened
    Completed,

    /// Stopped early by a cancellation request
    Cancelled,
}

impl Default for RunState {
    fn default() -> Self {
        Self::Running
    }
}
