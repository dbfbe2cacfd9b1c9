//! Maildir change watcher.
//!
//! Watches the Maildir's `new/` and `cur/` folders and emits a change
//! notification whenever mail is delivered or moved. Bursts of filesystem
//! events are debounced into one notification; the receiver decides when to
//! start the next pipeline run.

use std::path::PathBuf;
use std::time::Duration;

use anyhow::Result;
use notify::RecursiveMode;
use notify_debouncer_mini::new_debouncer;
use thiserror::Error;
use tokio::sync::mpsc;

/// Errors that can occur with the watcher
#[derive(Debug, Error)]
pub enum WatcherError {
    #[error("Maildir folder does not exist: {0}")]
    DirectoryNotFound(PathBuf),

    #[error("Notify error: {0}")]
    Notify(#[from] notify::Error),
}

/// A debounced batch of changes in the mailbox
#[derive(Debug, Clone)]
pub struct MailboxChange {
    /// Paths touched in this batch
    pub paths: Vec<PathBuf>,
}

/// Watches a Maildir for deliveries
pub struct MailboxWatcher {
    maildir: PathBuf,
    debounce: Duration,
}

impl MailboxWatcher {
    pub fn new(maildir: impl Into<PathBuf>) -> Self {
        Self {
            maildir: maildir.into(),
            debounce: Duration::from_secs(2),
        }
    }

    /// Override the debounce window
    pub fn with_debounce(mut self, debounce: Duration) -> Self {
        self.debounce = debounce;
        self
    }

    /// Folders that receive messages
    fn watch_paths(&self) -> Result<Vec<PathBuf>, WatcherError> {
        let paths: Vec<PathBuf> = ["new", "cur"]
            .iter()
            .map(|sub| self.maildir.join(sub))
            .filter(|p| p.is_dir())
            .collect();

        if paths.is_empty() {
            return Err(WatcherError::DirectoryNotFound(self.maildir.join("new")));
        }
        Ok(paths)
    }

    /// Start watching; changes arrive on the returned channel until the
    /// handle is stopped
    pub fn watch(&self) -> Result<(mpsc::Receiver<MailboxChange>, WatchHandle), WatcherError> {
        let paths = self.watch_paths()?;

        let (change_tx, change_rx) = mpsc::channel::<MailboxChange>(16);
        let (stop_tx, stop_rx) = mpsc::channel::<()>(1);
        let debounce = self.debounce;

        // Set up the debouncer before returning so registration errors surface here
        let (tx, rx) = std::sync::mpsc::channel();
        let mut debouncer = new_debouncer(debounce, tx)?;
        for path in &paths {
            debouncer.watcher().watch(path, RecursiveMode::NonRecursive)?;
            tracing::info!("Watching {} for new mail", path.display());
        }

        let task = tokio::task::spawn_blocking(move || {
            // Dropping the debouncer stops the notify backend
            let _debouncer = debouncer;
            run_watcher(rx, change_tx, stop_rx);
        });

        Ok((change_rx, WatchHandle { stop_tx, task }))
    }
}

/// Handle to control the watcher
pub struct WatchHandle {
    stop_tx: mpsc::Sender<()>,
    task: tokio::task::JoinHandle<()>,
}

impl WatchHandle {
    /// Stop the watcher
    pub async fn stop(self) -> Result<()> {
        let _ = self.stop_tx.send(()).await;
        self.task.await?;
        Ok(())
    }
}

/// Internal watcher loop (runs on a blocking thread)
fn run_watcher(
    rx: std::sync::mpsc::Receiver<notify_debouncer_mini::DebounceEventResult>,
    change_tx: mpsc::Sender<MailboxChange>,
    mut stop_rx: mpsc::Receiver<()>,
) {
    loop {
        if stop_rx.try_recv().is_ok() {
            tracing::info!("Watcher stopping...");
            break;
        }

        match rx.recv_timeout(Duration::from_millis(500)) {
            Ok(Ok(events)) => {
                let paths: Vec<PathBuf> = events
                    .into_iter()
                    .map(|e| e.path)
                    .filter(|p| {
                        p.file_name()
                            .and_then(|n| n.to_str())
                            .map(|n| !n.starts_with('.'))
                            .unwrap_or(false)
                    })
                    .collect();

                if paths.is_empty() {
                    continue;
                }

                tracing::debug!(count = paths.len(), "Mailbox changed");
                if change_tx.blocking_send(MailboxChange { paths }).is_err() {
                    // Receiver gone, nobody is listening anymore
                    break;
                }
            }
            Ok(Err(e)) => {
                tracing::warn!("Watcher error: {:?}", e);
            }
            Err(std::sync::mpsc::RecvTimeoutError::Timeout) => {}
            Err(std::sync::mpsc::RecvTimeoutError::Disconnected) => {
                tracing::error!("Watcher channel disconnected");
                break;
            }
        }
    }
}
