//! Adapter interfaces for external programs.
//!
//! The downloader is an opaque subprocess: given a URL and a working
//! directory it writes zero or more audio files there, exits 0 on success
//! and non-zero with diagnostic output on failure.

pub mod ytdlp;

use std::path::Path;
use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;

// Re-export the yt-dlp adapter
pub use ytdlp::YtDlpAdapter;

/// Errors that prevent a downloader from producing an exit status
#[derive(Debug, Error)]
pub enum DownloaderError {
    #[error("No downloader executable found (tried {0})")]
    NotFound(String),

    #[error("Failed to spawn downloader '{binary}': {source}")]
    Spawn {
        binary: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Downloader timed out after {0:?}")]
    TimedOut(Duration),

    #[error("Downloader I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Completed downloader invocation
#[derive(Debug, Clone)]
pub struct DownloaderOutput {
    /// Whether the process exited with status 0
    pub success: bool,

    /// Exit code, if the process was not killed by a signal
    pub exit_code: Option<i32>,

    /// Combined stdout and stderr
    pub diagnostics: String,
}

impl DownloaderOutput {
    pub fn succeeded(diagnostics: impl Into<String>) -> Self {
        Self {
            success: true,
            exit_code: Some(0),
            diagnostics: diagnostics.into(),
        }
    }

    pub fn failed(exit_code: i32, diagnostics: impl Into<String>) -> Self {
        Self {
            success: false,
            exit_code: Some(exit_code),
            diagnostics: diagnostics.into(),
        }
    }
}

/// Trait for audio downloaders
#[async_trait]
pub trait Downloader: Send + Sync {
    /// Human-readable downloader name
    fn name(&self) -> &str;

    /// Download the audio of `url` into `workdir`, bounded by `timeout`
    async fn fetch_audio(
        &self,
        url: &str,
        workdir: &Path,
        timeout: Duration,
    ) -> Result<DownloaderOutput, DownloaderError>;
}
