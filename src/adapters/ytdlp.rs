//! yt-dlp / youtube-dl subprocess adapter.
//!
//! Spawns the downloader inside the sandbox working directory with a fixed
//! option set: audio-only extraction, a pinned stream selector and a
//! deterministic `title-id.ext` output template.

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use tokio::process::Command;
use tokio::time::timeout;

use super::{Downloader, DownloaderError, DownloaderOutput};
use crate::config::DownloaderSettings;

/// Executables tried on PATH when none is configured
const CANDIDATES: [&str; 2] = ["yt-dlp", "youtube-dl"];

/// Downloader adapter using subprocess mode
#[derive(Debug, Clone)]
pub struct YtDlpAdapter {
    /// Path to the downloader binary
    binary_path: PathBuf,
    audio_format: String,
    format: String,
    output_template: String,
}

impl YtDlpAdapter {
    /// Build from settings, discovering the executable on PATH when the
    /// settings do not name one
    pub fn from_settings(settings: &DownloaderSettings) -> Result<Self, DownloaderError> {
        let binary_path = match &settings.binary {
            Some(path) => path.clone(),
            None => Self::discover()?,
        };

        Ok(Self {
            binary_path,
            audio_format: settings.audio_format.clone(),
            format: settings.format.clone(),
            output_template: settings.output_template.clone(),
        })
    }

    /// Create an adapter with a custom binary path and default options
    pub fn with_binary_path(binary_path: impl Into<PathBuf>) -> Self {
        let defaults = DownloaderSettings::default();
        Self {
            binary_path: binary_path.into(),
            audio_format: defaults.audio_format,
            format: defaults.format,
            output_template: defaults.output_template,
        }
    }

    /// Look for yt-dlp first, then youtube-dl
    fn discover() -> Result<PathBuf, DownloaderError> {
        CANDIDATES
            .iter()
            .find_map(|name| which::which(name).ok())
            .ok_or_else(|| DownloaderError::NotFound(CANDIDATES.join(", ")))
    }

    pub fn binary_path(&self) -> &Path {
        &self.binary_path
    }

    /// Full argument list for one URL
    pub fn args(&self, url: &str) -> Vec<String> {
        vec![
            "--extract-audio".to_string(),
            "--audio-format".to_string(),
            self.audio_format.clone(),
            "-f".to_string(),
            self.format.clone(),
            "-o".to_string(),
            self.output_template.clone(),
            "--no-playlist".to_string(),
            "--no-progress".to_string(),
            url.to_string(),
        ]
    }
}

#[async_trait]
impl Downloader for YtDlpAdapter {
    fn name(&self) -> &str {
        "yt-dlp"
    }

    async fn fetch_audio(
        &self,
        url: &str,
        workdir: &Path,
        step_timeout: Duration,
    ) -> Result<DownloaderOutput, DownloaderError> {
        let child = Command::new(&self.binary_path)
            .args(self.args(url))
            .current_dir(workdir)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|source| DownloaderError::Spawn {
                binary: self.binary_path.display().to_string(),
                source,
            })?;

        // Dropping the future on timeout kills the child
        let output = timeout(step_timeout, child.wait_with_output())
            .await
            .map_err(|_| DownloaderError::TimedOut(step_timeout))??;

        let mut diagnostics = String::from_utf8_lossy(&output.stdout).into_owned();
        diagnostics.push_str(&String::from_utf8_lossy(&output.stderr));

        Ok(DownloaderOutput {
            success: output.status.success(),
            exit_code: output.status.code(),
            diagnostics,
        })
    }
}
