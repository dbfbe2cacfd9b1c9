//! Test doubles shared by the integration tests.
//!
//! `InMemorySource` stands in for a mailbox and `FakeDownloader` for the
//! yt-dlp subprocess. Both record how they were called.

#![allow(dead_code)]

use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tempfile::TempDir;
use tokio_util::sync::CancellationToken;

use mash::adapters::{Downloader, DownloaderError, DownloaderOutput};
use mash::core::{DownloadSandbox, SandboxSettings};
use mash::domain::MessageId;
use mash::mailbox::{MessageFilter, MessageSource, SourceError};

// ============================================================================
// Mailbox
// ============================================================================

#[derive(Default)]
struct SourceState {
    /// Ids in listing order; may repeat
    listing: Vec<MessageId>,
    /// Body per id; `None` makes the fetch fail
    bodies: HashMap<MessageId, Option<String>>,
    list_unavailable: bool,
    fetch_unavailable: bool,
}

/// Mailbox held in memory
#[derive(Default)]
pub struct InMemorySource {
    state: Mutex<SourceState>,
    list_calls: AtomicUsize,
    fetch_calls: AtomicUsize,
}

impl InMemorySource {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Deliver a message
    pub fn add_message(&self, id: &str, body: &str) {
        let mut state = self.state.lock().unwrap();
        let id = MessageId::new(id);
        if !state.bodies.contains_key(&id) {
            state.listing.push(id.clone());
        }
        state.bodies.insert(id, Some(body.to_string()));
    }

    /// Deliver a message whose body cannot be fetched
    pub fn add_broken_message(&self, id: &str) {
        let mut state = self.state.lock().unwrap();
        let id = MessageId::new(id);
        if !state.bodies.contains_key(&id) {
            state.listing.push(id.clone());
        }
        state.bodies.insert(id, None);
    }

    /// List an existing id once more
    pub fn list_again(&self, id: &str) {
        self.state.lock().unwrap().listing.push(MessageId::new(id));
    }

    pub fn set_list_unavailable(&self, unavailable: bool) {
        self.state.lock().unwrap().list_unavailable = unavailable;
    }

    pub fn set_fetch_unavailable(&self, unavailable: bool) {
        self.state.lock().unwrap().fetch_unavailable = unavailable;
    }

    pub fn list_calls(&self) -> usize {
        self.list_calls.load(Ordering::SeqCst)
    }

    pub fn fetch_calls(&self) -> usize {
        self.fetch_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl MessageSource for InMemorySource {
    fn name(&self) -> &str {
        "memory"
    }

    async fn list_ids(&self, _filter: &MessageFilter) -> Result<Vec<MessageId>, SourceError> {
        self.list_calls.fetch_add(1, Ordering::SeqCst);
        let state = self.state.lock().unwrap();
        if state.list_unavailable {
            return Err(SourceError::Unavailable("connection refused".to_string()));
        }
        Ok(state.listing.clone())
    }

    async fn fetch_body(&self, id: &MessageId) -> Result<String, SourceError> {
        self.fetch_calls.fetch_add(1, Ordering::SeqCst);
        let state = self.state.lock().unwrap();
        if state.fetch_unavailable {
            return Err(SourceError::Unavailable("connection reset".to_string()));
        }
        match state.bodies.get(id) {
            Some(Some(body)) => Ok(body.clone()),
            _ => Err(SourceError::FetchFailed {
                id: id.clone(),
                reason: "message vanished".to_string(),
            }),
        }
    }
}

// ============================================================================
// Downloader
// ============================================================================

/// Scripted behaviour for one URL
#[derive(Debug, Clone)]
pub enum Behavior {
    /// Write these `(file name, contents)` pairs and exit 0
    Produce(Vec<(String, String)>),

    /// Write a partial file and exit with this code
    Fail(i32),

    /// Never finish within the timeout
    Hang,
}

/// One recorded downloader invocation
#[derive(Debug, Clone)]
pub struct Call {
    pub url: String,
    pub workdir: PathBuf,

    /// Names already present in the working directory at start
    pub leftovers: Vec<String>,
}

/// Downloader that follows a script instead of running a process.
///
/// URLs without a script produce one `<last segment>.mp3` file.
#[derive(Default)]
pub struct FakeDownloader {
    script: Mutex<HashMap<String, Behavior>>,
    calls: Mutex<Vec<Call>>,
    delay: Mutex<Duration>,
    active_dirs: Mutex<HashSet<PathBuf>>,
    max_active: AtomicUsize,
    shared_dir_seen: AtomicUsize,
    cancel_on_call: Mutex<Option<CancellationToken>>,
}

impl FakeDownloader {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn script(&self, url: &str, behavior: Behavior) {
        self.script
            .lock()
            .unwrap()
            .insert(url.to_string(), behavior);
    }

    /// Hold every invocation open for `delay`
    pub fn set_delay(&self, delay: Duration) {
        *self.delay.lock().unwrap() = delay;
    }

    /// Cancel `token` as soon as the first download starts
    pub fn cancel_on_call(&self, token: CancellationToken) {
        *self.cancel_on_call.lock().unwrap() = Some(token);
    }

    pub fn calls(&self) -> Vec<Call> {
        self.calls.lock().unwrap().clone()
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().unwrap().len()
    }

    /// Highest number of simultaneous invocations observed
    pub fn max_active(&self) -> usize {
        self.max_active.load(Ordering::SeqCst)
    }

    /// Times two invocations ran in the same directory at once
    pub fn shared_dir_seen(&self) -> usize {
        self.shared_dir_seen.load(Ordering::SeqCst)
    }

    fn default_behavior(url: &str) -> Behavior {
        let segment = url.rsplit('/').next().unwrap_or("clip");
        let name: String = segment
            .chars()
            .map(|c| if c.is_ascii_alphanumeric() { c } else { '_' })
            .collect();
        Behavior::Produce(vec![(format!("{}.mp3", name), format!("audio of {}", url))])
    }
}

#[async_trait]
impl Downloader for FakeDownloader {
    fn name(&self) -> &str {
        "fake"
    }

    async fn fetch_audio(
        &self,
        url: &str,
        workdir: &Path,
        timeout: Duration,
    ) -> Result<DownloaderOutput, DownloaderError> {
        let mut leftovers: Vec<String> = std::fs::read_dir(workdir)?
            .filter_map(|e| e.ok())
            .map(|e| e.file_name().to_string_lossy().into_owned())
            .collect();
        leftovers.sort();

        self.calls.lock().unwrap().push(Call {
            url: url.to_string(),
            workdir: workdir.to_path_buf(),
            leftovers,
        });

        if let Some(token) = self.cancel_on_call.lock().unwrap().as_ref() {
            token.cancel();
        }

        {
            let mut active = self.active_dirs.lock().unwrap();
            if !active.insert(workdir.to_path_buf()) {
                self.shared_dir_seen.fetch_add(1, Ordering::SeqCst);
            }
            self.max_active.fetch_max(active.len(), Ordering::SeqCst);
        }

        let delay = *self.delay.lock().unwrap();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }

        let behavior = self
            .script
            .lock()
            .unwrap()
            .get(url)
            .cloned()
            .unwrap_or_else(|| Self::default_behavior(url));

        let result = match behavior {
            Behavior::Produce(files) => {
                for (name, contents) in &files {
                    std::fs::write(workdir.join(name), contents)?;
                }
                Ok(DownloaderOutput::succeeded(format!(
                    "[download] Destination: {} file(s)",
                    files.len()
                )))
            }
            Behavior::Fail(code) => {
                std::fs::write(workdir.join("partial.m4a.part"), "half")?;
                std::fs::write(workdir.join("partial.m4a"), "half")?;
                Ok(DownloaderOutput::failed(code, "ERROR: Video unavailable"))
            }
            Behavior::Hang => {
                tokio::time::sleep(timeout).await;
                Err(DownloaderError::TimedOut(timeout))
            }
        };

        self.active_dirs.lock().unwrap().remove(workdir);
        result
    }
}

// ============================================================================
// Fixtures
// ============================================================================

/// Sandbox rooted in `temp` with `slots` working directories
pub fn create_sandbox(
    downloader: Arc<FakeDownloader>,
    temp: &TempDir,
    slots: usize,
) -> Arc<DownloadSandbox> {
    create_sandbox_with_timeout(downloader, temp, slots, Duration::from_secs(10))
}

pub fn create_sandbox_with_timeout(
    downloader: Arc<FakeDownloader>,
    temp: &TempDir,
    slots: usize,
    timeout: Duration,
) -> Arc<DownloadSandbox> {
    let sandbox = DownloadSandbox::new(
        downloader,
        SandboxSettings {
            root: temp.path().join("sandbox"),
            output_dir: temp.path().join("audio"),
            slots,
            timeout,
            audio_patterns: mash::config::default_audio_patterns(),
        },
    )
    .unwrap();
    Arc::new(sandbox)
}

/// Sorted file names directly inside `dir`
pub fn file_names(dir: &Path) -> Vec<String> {
    let mut names: Vec<String> = match std::fs::read_dir(dir) {
        Ok(entries) => entries
            .filter_map(|e| e.ok())
            .map(|e| e.file_name().to_string_lossy().into_owned())
            .collect(),
        Err(_) => Vec::new(),
    };
    names.sort();
    names
}
