//! Maildir-backed message source.
//!
//! Mail is expected to be delivered into a local Maildir (by fetchmail,
//! mbsync, an MDA, ...). The message id is the unique part of the file
//! name, i.e. everything before the `:2,FLAGS` info suffix, so it stays
//! stable when a mail client moves the file from `new/` to `cur/`.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use async_trait::async_trait;
use tokio::fs;

use super::mime::{flatten_plain_text, split_entity};
use super::{MessageFilter, MessageSource, SourceError};
use crate::domain::MessageId;

const SUBDIRS: [&str; 2] = ["new", "cur"];

/// Reads messages from a Maildir's `new/` and `cur/` folders
#[derive(Debug)]
pub struct MaildirSource {
    root: PathBuf,

    /// Paths seen by the last directory scan, keyed by id
    index: Mutex<HashMap<MessageId, PathBuf>>,
}

impl MaildirSource {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            index: Mutex::new(HashMap::new()),
        }
    }

    /// Root of the Maildir
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Derive a message id from a Maildir file name
    pub fn id_from_file_name(file_name: &str) -> MessageId {
        let unique = file_name.split(':').next().unwrap_or(file_name);
        MessageId::new(unique)
    }

    /// All message files with their ids, `new/` first
    async fn entries(&self) -> Result<Vec<(MessageId, PathBuf)>, SourceError> {
        if !self.root.is_dir() {
            return Err(SourceError::Unavailable(format!(
                "Maildir does not exist: {}",
                self.root.display()
            )));
        }

        let mut found = Vec::new();
        let mut any_subdir = false;

        for sub in SUBDIRS {
            let dir = self.root.join(sub);
            if !dir.is_dir() {
                continue;
            }
            any_subdir = true;

            let mut entries = fs::read_dir(&dir).await.map_err(|e| {
                SourceError::Unavailable(format!("Failed to read {}: {}", dir.display(), e))
            })?;

            while let Some(entry) = entries.next_entry().await.map_err(|e| {
                SourceError::Unavailable(format!("Failed to read {}: {}", dir.display(), e))
            })? {
                let Some(name) = entry.file_name().to_str().map(str::to_owned) else {
                    continue;
                };
                if name.starts_with('.') {
                    continue;
                }
                found.push((Self::id_from_file_name(&name), entry.path()));
            }
        }

        if !any_subdir {
            return Err(SourceError::Unavailable(format!(
                "Not a Maildir (no new/ or cur/): {}",
                self.root.display()
            )));
        }

        if let Ok(mut index) = self.index.lock() {
            index.clear();
            index.extend(found.iter().cloned());
        }

        Ok(found)
    }

    fn cached_path(&self, id: &MessageId) -> Option<PathBuf> {
        self.index.lock().ok()?.get(id).cloned()
    }

    /// Find the current file for an id. The last scan is consulted first;
    /// the directories are rescanned only when the file is not where that
    /// scan saw it (new mail, or a move to cur/).
    async fn locate(&self, id: &MessageId) -> Result<Option<PathBuf>, SourceError> {
        if let Some(path) = self.cached_path(id) {
            if fs::metadata(&path).await.map(|m| m.is_file()).unwrap_or(false) {
                return Ok(Some(path));
            }
        }

        tracing::debug!(message_id = %id, "Not at indexed path, rescanning maildir");
        Ok(self
            .entries()
            .await?
            .into_iter()
            .find(|(entry_id, _)| entry_id == id)
            .map(|(_, path)| path))
    }
}

#[async_trait]
impl MessageSource for MaildirSource {
    fn name(&self) -> &str {
        "maildir"
    }

    async fn list_ids(&self, filter: &MessageFilter) -> Result<Vec<MessageId>, SourceError> {
        let entries = self.entries().await?;
        if filter.is_all() {
            return Ok(entries.into_iter().map(|(id, _)| id).collect());
        }

        let mut ids = Vec::new();
        for (id, path) in entries {
            match fs::read(&path).await {
                Ok(bytes) => {
                    let (headers, _) = split_entity(&String::from_utf8_lossy(&bytes));
                    if filter.matches(headers.get("From"), headers.get("Subject")) {
                        ids.push(id);
                    }
                }
                Err(e) => {
                    // Keep it: the fetch will fail and leave it unmarked for the next run
                    tracing::warn!(message_id = %id, "Failed to read headers: {}", e);
                    ids.push(id);
                }
            }
        }

        Ok(ids)
    }

    async fn fetch_body(&self, id: &MessageId) -> Result<String, SourceError> {
        let path = self.locate(id).await?.ok_or_else(|| SourceError::FetchFailed {
            id: id.clone(),
            reason: "message no longer in maildir".to_string(),
        })?;

        let bytes = fs::read(&path).await.map_err(|e| SourceError::FetchFailed {
            id: id.clone(),
            reason: format!("{}: {}", path.display(), e),
        })?;

        Ok(flatten_plain_text(&String::from_utf8_lossy(&bytes)))
    }
}
