//! Mailbox-to-audio ingestion pipeline.
//!
//! One run walks `Enumerate → {Fetch → Extract → {Download}* → Mark}*`.
//! A message id enters the ledger only after every link extracted from it
//! has been attempted, whatever the individual download outcomes were.
//!
//! Sequential processing (`max_concurrent_messages = 1`) is the reference
//! behaviour. With more, messages run side by side; ledger writes are
//! serialised through a mutex and each download leases its own sandbox slot.

use std::collections::HashSet;
use std::sync::Arc;

use futures::stream::{self, StreamExt};
use thiserror::Error;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};

use crate::domain::{DownloadResult, MessageId, MessageRecord, RunState, RunSummary, VideoUrl};
use crate::mailbox::{MessageFilter, MessageSource, SourceError};

use super::extractor::LinkExtractor;
use super::ledger::{LedgerError, ProcessedLedger};
use super::sandbox::DownloadSandbox;

/// Errors that halt a run
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("Mailbox unavailable: {0}")]
    SourceUnavailable(String),

    #[error("Ledger unwritable: {0}")]
    LedgerUnwritable(#[from] LedgerError),
}

/// Run-level settings
#[derive(Debug, Clone)]
pub struct PipelineSettings {
    pub filter: MessageFilter,
    pub max_concurrent_messages: usize,
}

impl Default for PipelineSettings {
    fn default() -> Self {
        Self {
            filter: MessageFilter::all(),
            max_concurrent_messages: 1,
        }
    }
}

/// What happened to one message
#[derive(Debug)]
enum MessageOutcome {
    /// Already in the ledger
    Skipped,

    /// Body could not be fetched; left unmarked for the next run
    FetchFailed,

    /// Every link attempted and the id recorded
    Processed {
        results: Vec<DownloadResult>,
        duplicates: usize,
    },
}

/// Root orchestrator wiring source, extractor, ledger and sandbox
pub struct Pipeline {
    source: Arc<dyn MessageSource>,
    extractor: LinkExtractor,
    ledger: Arc<Mutex<ProcessedLedger>>,
    sandbox: Arc<DownloadSandbox>,
    settings: PipelineSettings,
}

impl Pipeline {
    pub fn new(
        source: Arc<dyn MessageSource>,
        extractor: LinkExtractor,
        ledger: ProcessedLedger,
        sandbox: Arc<DownloadSandbox>,
        settings: PipelineSettings,
    ) -> Self {
        Self {
            source,
            extractor,
            ledger: Arc::new(Mutex::new(ledger)),
            sandbox,
            settings,
        }
    }

    /// Shared handle to the ledger
    pub fn ledger(&self) -> Arc<Mutex<ProcessedLedger>> {
        self.ledger.clone()
    }

    /// Execute one pass over the mailbox.
    ///
    /// Returns `Ok` once enumeration completed (or was cancelled), even if
    /// individual messages or downloads failed. Only a fatal error is `Err`.
    #[instrument(skip_all, fields(source = self.source.name()))]
    pub async fn run(&self, cancel: &CancellationToken) -> Result<RunSummary, PipelineError> {
        let mut summary = RunSummary::new();
        info!(run_id = %summary.id, "Starting run");

        match self.run_messages(&mut summary, cancel).await {
            Ok(()) => {
                let state = if cancel.is_cancelled() {
                    RunState::Cancelled
                } else {
                    RunState::Completed
                };
                summary.finish(state);
                info!(
                    run_id = %summary.id,
                    seen = summary.messages_seen,
                    skipped = summary.messages_skipped,
                    processed = summary.messages_processed,
                    fetch_failed = summary.messages_fetch_failed,
                    urls_attempted = summary.urls_attempted,
                    urls_succeeded = summary.urls_succeeded,
                    urls_failed = summary.urls_failed,
                    "Run finished"
                );
                Ok(summary)
            }
            Err(e) => {
                error!(
                    run_id = %summary.id,
                    processed = summary.messages_processed,
                    "Run aborted: {}",
                    e
                );
                Err(e)
            }
        }
    }

    async fn run_messages(
        &self,
        summary: &mut RunSummary,
        cancel: &CancellationToken,
    ) -> Result<(), PipelineError> {
        let listed = self
            .source
            .list_ids(&self.settings.filter)
            .await
            .map_err(|e| match e {
                SourceError::Unavailable(reason) => PipelineError::SourceUnavailable(reason),
                other => PipelineError::SourceUnavailable(other.to_string()),
            })?;

        summary.messages_seen = listed.len();

        // A listing may repeat an id; only its first occurrence is processed
        let mut listed_once = HashSet::new();
        let mut candidates = Vec::with_capacity(listed.len());
        for id in listed {
            if !id.is_ledger_safe() {
                warn!(message_id = ?id.as_str(), "Ignoring id that cannot be recorded");
                summary.messages_skipped += 1;
            } else if listed_once.insert(id.clone()) {
                candidates.push(id);
            } else {
                debug!(message_id = %id, "Listed twice, skipping repeat");
                summary.messages_skipped += 1;
            }
        }

        let concurrency = self.settings.max_concurrent_messages.max(1);
        let mut outcomes = stream::iter(candidates)
            .take_while(|_| futures::future::ready(!cancel.is_cancelled()))
            .map(|id| async move {
                let outcome = self.process_message(&id).await;
                (id, outcome)
            })
            .buffer_unordered(concurrency);

        while let Some((id, outcome)) = outcomes.next().await {
            match outcome? {
                MessageOutcome::Skipped => summary.messages_skipped += 1,
                MessageOutcome::FetchFailed => summary.messages_fetch_failed += 1,
                MessageOutcome::Processed {
                    results,
                    duplicates,
                } => {
                    debug!(message_id = %id, urls = results.len(), "Message processed");
                    summary.messages_processed += 1;
                    summary.urls_duplicated += duplicates;
                    if results.is_empty() {
                        summary.messages_without_links += 1;
                    }
                    for result in &results {
                        summary.record_download(result);
                    }
                }
            }
        }

        if cancel.is_cancelled() {
            info!("Run cancelled, unstarted messages stay unmarked");
        }

        Ok(())
    }

    /// Fetch → Extract → {Download}* → MarkProcessed for one message
    #[instrument(skip(self, id), fields(message_id = %id))]
    async fn process_message(&self, id: &MessageId) -> Result<MessageOutcome, PipelineError> {
        if !self.ledger.lock().await.is_new(id) {
            debug!("Already processed");
            return Ok(MessageOutcome::Skipped);
        }

        let body = match self.source.fetch_body(id).await {
            Ok(body) => body,
            Err(SourceError::Unavailable(reason)) => {
                return Err(PipelineError::SourceUnavailable(reason));
            }
            Err(e) => {
                warn!("{}; will retry next run", e);
                return Ok(MessageOutcome::FetchFailed);
            }
        };

        let record = MessageRecord::new(id.clone(), body);
        let urls: Vec<VideoUrl> = self.extractor.extract(&record.body).collect();
        drop(record);

        let mut distinct = HashSet::new();
        let duplicates = urls
            .iter()
            .filter(|url| !distinct.insert(url.as_str()))
            .count();
        if duplicates > 0 {
            info!(duplicates, "Message repeats links; each occurrence is attempted");
        }

        if urls.is_empty() {
            info!("No video links found");
        } else {
            info!(count = urls.len(), "Found video links");
        }

        let mut results = Vec::with_capacity(urls.len());
        for url in &urls {
            let result = self.sandbox.download(url).await;
            if result.is_success() {
                info!(url = %url, files = result.published().len(), "ok");
            } else {
                warn!(url = %url, outcome = ?result.outcome, "ko");
            }
            results.push(result);
        }

        self.ledger.lock().await.mark_processed(id)?;

        Ok(MessageOutcome::Processed {
            results,
            duplicates,
        })
    }
}
