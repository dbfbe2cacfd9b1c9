//! Durable record of fully processed messages.
//!
//! The ledger file holds one message id per line (UTF-8). Membership only
//! ever grows. Every new entry rewrites the whole file into a temp file in
//! the same directory and atomically renames it over the old one, so a
//! crash leaves either the previous or the next complete ledger on disk.
//!
//! A damaged or missing ledger can only make messages look new again
//! (they get reprocessed); it never makes an unseen message look processed.
//!
//! While a ledger is open it holds an exclusive lock on `<ledger>.lock`,
//! making this process the single writer.

use std::collections::HashSet;
use std::fs::{self, File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use fs2::FileExt;
use tempfile::NamedTempFile;
use thiserror::Error;

use crate::domain::MessageId;

/// Errors that can occur with the ledger
#[derive(Debug, Error)]
pub enum LedgerError {
    #[error("Ledger I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("Ledger is locked by another process: {0}")]
    Locked(PathBuf),

    #[error("Failed to persist ledger {path}: {source}")]
    Persist {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("Message id cannot be stored as a ledger line: {0:?}")]
    InvalidId(String),
}

/// Set of processed message ids backed by a line-per-id file
pub struct ProcessedLedger {
    path: PathBuf,

    /// Insertion order, for diagnostics only
    order: Vec<MessageId>,

    index: HashSet<MessageId>,

    /// Held for the lifetime of the ledger; released on drop
    _lock: File,
}

impl ProcessedLedger {
    /// Lock and load the ledger at `path`, creating parent directories.
    /// A missing file is an empty ledger.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self, LedgerError> {
        let path = path.into();

        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).map_err(|source| LedgerError::Io {
                path: parent.to_path_buf(),
                source,
            })?;
        }

        let lock_path = lock_path_for(&path);
        let lock = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(false)
            .open(&lock_path)
            .map_err(|source| LedgerError::Io {
                path: lock_path.clone(),
                source,
            })?;
        lock.try_lock_exclusive()
            .map_err(|_| LedgerError::Locked(path.clone()))?;

        let mut ledger = Self {
            path,
            order: Vec::new(),
            index: HashSet::new(),
            _lock: lock,
        };
        ledger.load()?;
        Ok(ledger)
    }

    /// Re-read the persisted ledger, replacing in-memory state.
    /// Returns the number of distinct ids.
    pub fn load(&mut self) -> Result<usize, LedgerError> {
        self.order = Self::read_entries(&self.path)?;
        self.index = self.order.iter().cloned().collect();

        tracing::debug!(
            entries = self.order.len(),
            path = %self.path.display(),
            "Loaded ledger"
        );

        Ok(self.order.len())
    }

    /// Read the distinct ids stored at `path` without taking the lock.
    /// Duplicate lines collapse to their first occurrence.
    pub fn read_entries(path: &Path) -> Result<Vec<MessageId>, LedgerError> {
        let bytes = match fs::read(path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(source) => {
                return Err(LedgerError::Io {
                    path: path.to_path_buf(),
                    source,
                })
            }
        };

        let content = String::from_utf8_lossy(&bytes);
        let mut seen = HashSet::new();
        let mut entries = Vec::new();
        let mut duplicates = 0usize;

        // Lines are kept byte-exact; only the line terminator is dropped
        for line in content.lines() {
            if line.trim().is_empty() {
                continue;
            }
            let id = MessageId::new(line);
            if seen.insert(id.clone()) {
                entries.push(id);
            } else {
                duplicates += 1;
            }
        }

        if duplicates > 0 {
            tracing::debug!(duplicates, "Collapsed duplicate ledger entries");
        }

        Ok(entries)
    }

    /// True if `id` has not been marked processed
    pub fn is_new(&self, id: &MessageId) -> bool {
        !self.index.contains(id)
    }

    /// Record `id` as processed and persist. Marking an id that is already
    /// present is a no-op and returns `Ok(false)`.
    ///
    /// If persisting fails the entry is rolled back, so memory never claims
    /// more than disk.
    pub fn mark_processed(&mut self, id: &MessageId) -> Result<bool, LedgerError> {
        if !id.is_ledger_safe() {
            return Err(LedgerError::InvalidId(id.as_str().to_string()));
        }
        if self.index.contains(id) {
            return Ok(false);
        }

        self.index.insert(id.clone());
        self.order.push(id.clone());

        if let Err(e) = self.persist() {
            self.index.remove(id);
            self.order.pop();
            return Err(e);
        }

        Ok(true)
    }

    /// Atomically replace the ledger file with the current entries
    fn persist(&self) -> Result<(), LedgerError> {
        let dir = self
            .path
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .unwrap_or(Path::new("."));
        let persist_err = |source: io::Error| LedgerError::Persist {
            path: self.path.clone(),
            source,
        };

        let mut tmp = NamedTempFile::new_in(dir).map_err(persist_err)?;
        {
            let file = tmp.as_file_mut();
            for id in &self.order {
                writeln!(file, "{}", id).map_err(persist_err)?;
            }
            file.flush().map_err(persist_err)?;
            file.sync_all().map_err(persist_err)?;
        }
        tmp.persist(&self.path).map_err(|e| persist_err(e.error))?;

        // Make the rename itself durable
        #[cfg(unix)]
        {
            if let Err(e) = sync_dir(dir) {
                tracing::warn!(
                    dir = %dir.display(),
                    "Ledger rename may not be durable, directory sync failed: {}",
                    e
                );
            }
        }

        Ok(())
    }

    /// Ids in the order they were first recorded
    pub fn entries(&self) -> &[MessageId] {
        &self.order
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl std::fmt::Debug for ProcessedLedger {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProcessedLedger")
            .field("path", &self.path)
            .field("entries", &self.order.len())
            .finish()
    }
}

#[cfg(unix)]
fn sync_dir(dir: &Path) -> io::Result<()> {
    File::open(dir)?.sync_all()
}

fn lock_path_for(path: &Path) -> PathBuf {
    let mut name = path
        .file_name()
        .map(|n| n.to_os_string())
        .unwrap_or_else(|| "ledger".into());
    name.push(".lock");
    path.with_file_name(name)
}
