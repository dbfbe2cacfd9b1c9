//! Core ingestion logic.
//!
//! This module contains:
//! - LinkExtractor: Video link scanning with a host allow-list
//! - ProcessedLedger: Durable set of handled message ids
//! - DownloadSandbox: Isolated download and atomic publish
//! - Pipeline: Per-run orchestration

pub mod extractor;
pub mod ledger;
pub mod pipeline;
pub mod sandbox;

// Re-export commonly used types
pub use extractor::LinkExtractor;
pub use ledger::{LedgerError, ProcessedLedger};
pub use pipeline::{Pipeline, PipelineError, PipelineSettings};
pub use sandbox::{publish_file, DownloadSandbox, Published, SandboxError, SandboxSettings};
