//! mash - mailbox audio shelf
//!
//! Watches a mailbox for messages that contain video links, downloads the
//! audio track of each link with yt-dlp, and publishes the resulting files
//! into a shared directory.
//!
//! # Architecture
//!
//! One run is a single pass over the mailbox:
//! - Message ids are enumerated from a [`mailbox::MessageSource`]
//! - Ids already in the [`core::ProcessedLedger`] are skipped
//! - Each new body is scanned by the [`core::LinkExtractor`]
//! - Every link is downloaded in an isolated working directory and its
//!   audio is atomically published by the [`core::DownloadSandbox`]
//! - The id is recorded only after all of its links were attempted
//!
//! # Modules
//!
//! - `adapters`: External programs (yt-dlp)
//! - `config`: Path and runtime settings resolution
//! - `core`: Extraction, ledger, sandbox and the pipeline itself
//! - `domain`: Data structures (MessageId, VideoUrl, DownloadResult, RunSummary)
//! - `mailbox`: Message sources (Maildir, IMAP) and change watching
//! - `cli`: Command-line interface
//!
//! # Usage
//!
//! ```bash
//! # Process new mail once
//! mash run
//!
//! # Keep processing as mail arrives
//! mash watch
//!
//! # Inspect the ledger
//! mash status
//! ```

pub mod adapters;
pub mod cli;
pub mod config;
pub mod core;
pub mod domain;
pub mod mailbox;

// Re-export main types at crate root for convenience
pub use core::{DownloadSandbox, LinkExtractor, Pipeline, PipelineError, ProcessedLedger};
pub use domain::{DownloadOutcome, DownloadResult, MessageId, RunState, RunSummary, VideoUrl};
pub use mailbox::{ImapSource, MaildirSource, MessageFilter, MessageSource, SourceError};
