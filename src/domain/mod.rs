//! Domain types for the mash ingestion pipeline.
//!
//! This module contains the core data structures:
//! - Message: mailbox identity and transient bodies
//! - Link: validated video URLs
//! - Download: per-URL attempt outcomes
//! - Run: aggregate counters for one pipeline pass

pub mod download;
pub mod link;
pub mod message;
pub mod run;

// Re-export commonly used types
pub use download::{DownloadOutcome, DownloadResult};
pub use link::{LinkError, VideoUrl};
pub use message::{MessageId, MessageRecord};
pub use run::{RunState, RunSummary};
