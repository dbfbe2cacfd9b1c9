//! Isolated download-and-publish step.
//!
//! Each download runs in a private working directory leased from a fixed
//! pool of slots (`slot-0`, `slot-1`, ...). A slot is used by at most one
//! download at a time and is wiped on entry, so leftovers from a crashed or
//! failed attempt are never mistaken for fresh output.
//!
//! After a successful run every audio file in the slot is published into the
//! shared output directory through a temp file and an atomic rename. A file
//! with the same name is overwritten.

use std::fs::File;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use glob::{MatchOptions, Pattern, PatternError};
use thiserror::Error;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tracing::{debug, info, instrument, warn};

use crate::adapters::{Downloader, DownloaderError};
use crate::domain::{DownloadResult, VideoUrl};

/// Errors building a sandbox
#[derive(Debug, Error)]
pub enum SandboxError {
    #[error("Invalid audio file pattern: {0}")]
    InvalidPattern(#[from] PatternError),

    #[error("Failed to create directory {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

/// Settings for a [`DownloadSandbox`]
#[derive(Debug, Clone)]
pub struct SandboxSettings {
    /// Parent of the slot directories
    pub root: PathBuf,

    /// Shared directory receiving published audio
    pub output_dir: PathBuf,

    /// Number of slots, i.e. maximum concurrent downloads
    pub slots: usize,

    /// Upper bound for one downloader run
    pub timeout: Duration,

    /// File name globs that count as audio output
    pub audio_patterns: Vec<String>,
}

const NAME_MATCH: MatchOptions = MatchOptions {
    case_sensitive: false,
    require_literal_separator: true,
    require_literal_leading_dot: true,
};

/// Runs downloads in leased working directories and publishes the results
pub struct DownloadSandbox {
    downloader: Arc<dyn Downloader>,
    output_dir: PathBuf,
    audio_patterns: Vec<Pattern>,
    timeout: Duration,
    permits: Arc<Semaphore>,
    free_slots: Arc<Mutex<Vec<PathBuf>>>,
}

/// Exclusive use of one slot directory; returned to the pool on drop
struct WorkDirLease {
    dir: PathBuf,
    free_slots: Arc<Mutex<Vec<PathBuf>>>,
    _permit: OwnedSemaphorePermit,
}

impl Drop for WorkDirLease {
    fn drop(&mut self) {
        let mut free = self.free_slots.lock().unwrap_or_else(|e| e.into_inner());
        free.push(self.dir.clone());
    }
}

impl DownloadSandbox {
    /// Create the sandbox, its slot root and the output directory
    pub fn new(
        downloader: Arc<dyn Downloader>,
        settings: SandboxSettings,
    ) -> Result<Self, SandboxError> {
        let audio_patterns = settings
            .audio_patterns
            .iter()
            .map(|p| Pattern::new(p))
            .collect::<Result<Vec<_>, _>>()?;

        for dir in [&settings.root, &settings.output_dir] {
            std::fs::create_dir_all(dir).map_err(|source| SandboxError::Io {
                path: dir.clone(),
                source,
            })?;
        }

        let slots = settings.slots.max(1);
        let free_slots = (0..slots)
            .rev()
            .map(|i| settings.root.join(format!("slot-{}", i)))
            .collect();

        Ok(Self {
            downloader,
            output_dir: settings.output_dir,
            audio_patterns,
            timeout: settings.timeout,
            permits: Arc::new(Semaphore::new(slots)),
            free_slots: Arc::new(Mutex::new(free_slots)),
        })
    }

    pub fn output_dir(&self) -> &Path {
        &self.output_dir
    }

    /// Wait for a free slot
    async fn lease(&self) -> Option<WorkDirLease> {
        let permit = self.permits.clone().acquire_owned().await.ok()?;
        let dir = self
            .free_slots
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .pop()?;

        Some(WorkDirLease {
            dir,
            free_slots: self.free_slots.clone(),
            _permit: permit,
        })
    }

    /// Download one URL and publish what it produced.
    ///
    /// Never fails as a whole: every problem becomes a failure outcome for
    /// this URL only.
    #[instrument(skip(self, url), fields(url = %url))]
    pub async fn download(&self, url: &VideoUrl) -> DownloadResult {
        let Some(lease) = self.lease().await else {
            return DownloadResult::failure(
                url.clone(),
                "no working directory available",
                String::new(),
            );
        };

        if let Err(e) = reset_dir(&lease.dir).await {
            warn!(dir = %lease.dir.display(), "Failed to reset working directory: {}", e);
            return DownloadResult::failure(
                url.clone(),
                format!("failed to prepare working directory: {}", e),
                String::new(),
            );
        }

        debug!(dir = %lease.dir.display(), downloader = self.downloader.name(), "Starting download");

        let output = match self
            .downloader
            .fetch_audio(url.as_str(), &lease.dir, self.timeout)
            .await
        {
            Ok(output) => output,
            Err(DownloaderError::TimedOut(limit)) => {
                warn!(?limit, "Download timed out");
                return DownloadResult::failure(
                    url.clone(),
                    format!("timed out after {:?}", limit),
                    String::new(),
                );
            }
            Err(e) => {
                warn!("Downloader could not run: {}", e);
                return DownloadResult::failure(url.clone(), e.to_string(), String::new());
            }
        };

        if !output.success {
            let code = output
                .exit_code
                .map(|c| c.to_string())
                .unwrap_or_else(|| "signal".to_string());
            warn!(exit_code = %code, diagnostics = %output.diagnostics.trim(), "Download failed");
            // Partial artifacts stay in the slot until its next reset
            return DownloadResult::failure(
                url.clone(),
                format!("downloader exited with {}", code),
                output.diagnostics,
            );
        }

        debug!(diagnostics = %output.diagnostics.trim(), "Downloader finished");

        let produced = match self.audio_files(&lease.dir).await {
            Ok(files) => files,
            Err(e) => {
                return DownloadResult::failure(
                    url.clone(),
                    format!("failed to list working directory: {}", e),
                    output.diagnostics,
                );
            }
        };

        if produced.is_empty() {
            warn!("Downloader succeeded but produced no audio files");
        }

        let mut published = Vec::with_capacity(produced.len());
        for file in produced {
            let output_dir = self.output_dir.clone();
            let source = file.clone();
            let result = tokio::task::spawn_blocking(move || publish_file(&source, &output_dir))
                .await
                .unwrap_or_else(|e| Err(io::Error::new(io::ErrorKind::Other, e)));

            match result {
                Ok(Published { path, replaced }) => {
                    if replaced {
                        warn!(file = %path.display(), "Overwrote existing output file");
                    }
                    info!(file = %path.display(), "Published");
                    published.push(path);
                }
                Err(e) => {
                    warn!(file = %file.display(), "Failed to publish: {}", e);
                    return DownloadResult::failure(
                        url.clone(),
                        format!("failed to publish {}: {}", file.display(), e),
                        output.diagnostics,
                    );
                }
            }
        }

        if let Err(e) = reset_dir(&lease.dir).await {
            debug!("Failed to clear working directory after publish: {}", e);
        }

        DownloadResult::success(url.clone(), published, output.diagnostics)
    }

    /// Audio files directly inside `dir`, sorted by name
    async fn audio_files(&self, dir: &Path) -> io::Result<Vec<PathBuf>> {
        let mut files = Vec::new();
        let mut entries = tokio::fs::read_dir(dir).await?;

        while let Some(entry) = entries.next_entry().await? {
            if !entry.file_type().await?.is_file() {
                continue;
            }
            let name = entry.file_name();
            let Some(name) = name.to_str() else {
                continue;
            };
            if self
                .audio_patterns
                .iter()
                .any(|p| p.matches_with(name, NAME_MATCH))
            {
                files.push(entry.path());
            }
        }

        files.sort();
        Ok(files)
    }
}

/// Remove and recreate a working directory
async fn reset_dir(dir: &Path) -> io::Result<()> {
    match tokio::fs::remove_dir_all(dir).await {
        Ok(()) => {}
        Err(e) if e.kind() == io::ErrorKind::NotFound => {}
        Err(e) => return Err(e),
    }
    tokio::fs::create_dir_all(dir).await
}

/// A file placed into the output directory
#[derive(Debug)]
pub struct Published {
    pub path: PathBuf,

    /// Whether a file with the same name was replaced
    pub replaced: bool,
}

/// Copy `source` into `output_dir` under the same name, atomically.
///
/// The copy is written to a hidden temp file in `output_dir` and renamed
/// over the target, so readers see either the old file or the complete new
/// one.
pub fn publish_file(source: &Path, output_dir: &Path) -> io::Result<Published> {
    let name = source.file_name().ok_or_else(|| {
        io::Error::new(
            io::ErrorKind::InvalidInput,
            format!("not a file path: {}", source.display()),
        )
    })?;
    let target = output_dir.join(name);
    let replaced = target.exists();

    let mut tmp = tempfile::Builder::new()
        .prefix(".mash-")
        .suffix(".part")
        .tempfile_in(output_dir)?;

    let mut reader = File::open(source)?;
    io::copy(&mut reader, tmp.as_file_mut())?;
    tmp.as_file().sync_all()?;
    std::fs::set_permissions(tmp.path(), std::fs::metadata(source)?.permissions())?;

    tmp.persist(&target).map_err(|e| e.error)?;

    Ok(Published {
        path: target,
        replaced,
    })
}
