//! Outcomes of a single download attempt.

use std::path::PathBuf;

use serde::Serialize;

use super::link::VideoUrl;

/// What happened to one URL
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case", tag = "status")]
pub enum DownloadOutcome {
    /// Downloader exited cleanly; these files were published
    Success { published: Vec<PathBuf> },

    /// Downloader failed, timed out, or publishing broke
    Failure { reason: String },
}

/// Result of `DownloadSandbox::download`. Consumed by logging and the run
/// summary, never persisted.
#[derive(Debug, Clone, Serialize)]
pub struct DownloadResult {
    pub url: VideoUrl,
    pub outcome: DownloadOutcome,

    /// Combined stdout/stderr of the downloader
    pub diagnostics: String,
}

impl DownloadResult {
    pub fn success(url: VideoUrl, published: Vec<PathBuf>, diagnostics: String) -> Self {
        Self {
            url,
            outcome: DownloadOutcome::Success { published },
            diagnostics,
        }
    }

    pub fn failure(url: VideoUrl, reason: impl Into<String>, diagnostics: String) -> Self {
        Self {
            url,
            outcome: DownloadOutcome::Failure {
                reason: reason.into(),
            },
            diagnostics,
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self.outcome, DownloadOutcome::Success { .. })
    }

    /// Files published by this attempt (empty on failure)
    pub fn published(&self) -> &[PathBuf] {
        match &self.outcome {
            DownloadOutcome::Success { published } => published,
            DownloadOutcome::Failure { .. } => &[],
        }
    }
}
