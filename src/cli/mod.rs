//! Command-line interface for mash.
//!
//! Provides commands for a single pipeline pass, continuous watching,
//! inspecting the ledger and showing the resolved configuration.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tokio::sync::mpsc::Receiver;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::adapters::YtDlpAdapter;
use crate::config::{self, ResolvedConfig, SourceKind};
use crate::core::{
    DownloadSandbox, LinkExtractor, Pipeline, PipelineSettings, ProcessedLedger, SandboxSettings,
};
use crate::domain::{RunState, RunSummary};
use crate::mailbox::{ImapSource, MailboxChange, MailboxWatcher, MaildirSource, MessageSource};

/// mash - pull video links out of mail and keep their audio
#[derive(Parser, Debug)]
#[command(name = "mash")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Enable debug logging
    #[arg(short, long, global = true)]
    pub debug: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Process every new message once and exit
    Run {
        /// Print the run summary as JSON
        #[arg(long)]
        json: bool,

        /// Messages processed side by side (overrides config)
        #[arg(short = 'j', long)]
        concurrency: Option<usize>,
    },

    /// Keep running: process on new mail and on a fixed interval
    Watch {
        /// Seconds between polls when no mail arrives (overrides config)
        #[arg(short, long)]
        interval: Option<u64>,

        /// Messages processed side by side (overrides config)
        #[arg(short = 'j', long)]
        concurrency: Option<usize>,
    },

    /// Show ledger status
    Status {
        /// Number of most recent ledger entries to show
        #[arg(short, long, default_value = "10")]
        limit: usize,
    },

    /// Show resolved configuration (debug)
    Config,
}

impl Cli {
    /// Execute the CLI command
    pub async fn execute(self) -> Result<()> {
        match self.command {
            Commands::Run { json, concurrency } => run_once(json, concurrency).await,
            Commands::Watch {
                interval,
                concurrency,
            } => watch(interval, concurrency).await,
            Commands::Status { limit } => show_status(limit).await,
            Commands::Config => show_config().await,
        }
    }
}

/// Wire source, extractor, ledger and sandbox from the resolved config
pub fn build_pipeline(cfg: &ResolvedConfig, concurrency: Option<usize>) -> Result<Pipeline> {
    cfg.ensure_dirs()?;

    let concurrency = concurrency.unwrap_or(cfg.max_concurrent_messages).max(1);

    let source: Arc<dyn MessageSource> = match cfg.source {
        SourceKind::Maildir => Arc::new(MaildirSource::new(&cfg.maildir)),
        SourceKind::Imap => {
            let settings = cfg.imap.clone().context(
                "IMAP source needs MASH_SMTP_SERVER, MASH_SMTP_LOGIN and MASH_SMTP_PASSWORD",
            )?;
            Arc::new(ImapSource::new(settings))
        }
    };
    debug!(source = source.name(), "Using mail source");
    let extractor = LinkExtractor::new(&cfg.allowed_hosts)
        .context("Invalid host pattern in links.allowed_hosts")?;
    let ledger = ProcessedLedger::open(&cfg.ledger_path)
        .with_context(|| format!("Failed to open ledger: {}", cfg.ledger_path.display()))?;

    let downloader = YtDlpAdapter::from_settings(&cfg.downloader)?;
    debug!(binary = %downloader.binary_path().display(), "Using downloader");

    let sandbox = DownloadSandbox::new(
        Arc::new(downloader),
        SandboxSettings {
            root: cfg.sandbox_dir.clone(),
            output_dir: cfg.output_dir.clone(),
            slots: concurrency,
            timeout: cfg.downloader.timeout(),
            audio_patterns: cfg.audio_patterns.clone(),
        },
    )?;

    Ok(Pipeline::new(
        source,
        extractor,
        ledger,
        Arc::new(sandbox),
        PipelineSettings {
            filter: cfg.filter.clone(),
            max_concurrent_messages: concurrency,
        },
    ))
}

/// Cancel `token` on Ctrl+C. Work already started finishes; nothing new
/// is picked up.
fn cancel_on_ctrl_c(token: CancellationToken) {
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            eprintln!();
            eprintln!("Stopping after in-flight messages...");
            token.cancel();
        }
    });
}

/// Single pass over the mailbox
async fn run_once(json: bool, concurrency: Option<usize>) -> Result<()> {
    let cfg = config::load_config()?;
    let pipeline = build_pipeline(&cfg, concurrency)?;

    let cancel = CancellationToken::new();
    cancel_on_ctrl_c(cancel.clone());

    let summary = pipeline.run(&cancel).await?;

    if json {
        println!("{}", serde_json::to_string_pretty(&summary)?);
    } else {
        print_summary(&summary);
    }

    Ok(())
}

/// Run now, then again whenever mail arrives or the poll interval elapses
async fn watch(interval: Option<u64>, concurrency: Option<usize>) -> Result<()> {
    let cfg = config::load_config()?;
    let pipeline = build_pipeline(&cfg, concurrency)?;
    let interval = Duration::from_secs(interval.unwrap_or(cfg.poll_interval_seconds).max(1));

    let cancel = CancellationToken::new();
    cancel_on_ctrl_c(cancel.clone());

    // Only a local Maildir can be watched; IMAP is polled
    let (mut changes, handle) = match cfg.source {
        SourceKind::Maildir => match MailboxWatcher::new(&cfg.maildir).watch() {
            Ok((rx, handle)) => (Some(rx), Some(handle)),
            Err(e) => {
                warn!("File watching unavailable, polling only: {}", e);
                (None, None)
            }
        },
        SourceKind::Imap => (None, None),
    };

    println!("Watching: {}", source_label(&cfg));
    println!("    Polling every {}s. Press Ctrl+C to stop", interval.as_secs());
    println!();

    loop {
        let summary = pipeline.run(&cancel).await?;
        print_summary(&summary);

        if cancel.is_cancelled() {
            break;
        }

        tokio::select! {
            _ = cancel.cancelled() => break,
            change = next_change(&mut changes) => {
                match change {
                    Some(change) => {
                        info!(paths = change.paths.len(), "New mail detected");
                    }
                    None => {
                        warn!("Mailbox watcher stopped, falling back to polling");
                        changes = None;
                    }
                }
            }
            _ = tokio::time::sleep(interval) => {
                debug!("Poll interval elapsed");
            }
        }
    }

    if let Some(handle) = handle {
        handle.stop().await?;
    }

    Ok(())
}

/// Next watcher notification; pends forever when there is no watcher
async fn next_change(changes: &mut Option<Receiver<MailboxChange>>) -> Option<MailboxChange> {
    match changes {
        Some(rx) => rx.recv().await,
        None => std::future::pending().await,
    }
}

/// Where mail is read from, for display
fn source_label(cfg: &ResolvedConfig) -> String {
    match (cfg.source, &cfg.imap) {
        (SourceKind::Imap, Some(imap)) => {
            format!("imap://{}@{}:{}/{}", imap.login, imap.host, imap.port, imap.mailbox)
        }
        (SourceKind::Imap, None) => "imap (account incomplete)".to_string(),
        (SourceKind::Maildir, _) => cfg.maildir.display().to_string(),
    }
}

fn print_summary(summary: &RunSummary) {
    let state = match summary.state {
        RunState::Running => "running",
        RunState::Completed => "completed",
        RunState::Cancelled => "cancelled",
    };

    println!("[Run {} {}]", summary.id, state);
    println!(
        "  Messages: {} seen, {} processed, {} skipped, {} fetch failed",
        summary.messages_seen,
        summary.messages_processed,
        summary.messages_skipped,
        summary.messages_fetch_failed
    );
    if summary.urls_attempted > 0 {
        println!(
            "  Links:    {} attempted, {} ok, {} ko",
            summary.urls_attempted, summary.urls_succeeded, summary.urls_failed
        );
        println!("  Files:    {} published", summary.files_published);
    }
}

/// Show ledger status without taking the ledger lock
async fn show_status(limit: usize) -> Result<()> {
    let cfg = config::load_config()?;
    let entries = ProcessedLedger::read_entries(&cfg.ledger_path)?;

    println!();
    println!("Ledger Status");
    println!("══════════════════════════════════════════════════════════════");
    println!();
    println!("Ledger:     {}", cfg.ledger_path.display());
    println!("Source:     {}", source_label(&cfg));
    println!("Output:     {}", cfg.output_dir.display());
    println!();
    println!("Processed messages: {}", entries.len());

    if !entries.is_empty() && limit > 0 {
        println!();
        println!("Most recent:");
        for id in entries.iter().rev().take(limit) {
            println!("  {}", id);
        }
    }

    println!();
    match cfg.source {
        SourceKind::Maildir => {
            if cfg.maildir.join("new").is_dir() || cfg.maildir.join("cur").is_dir() {
                println!("✓ Maildir exists");
            } else {
                println!("⚠️  Maildir has no new/ or cur/ folder");
                println!("    Expected: {}", cfg.maildir.display());
            }
        }
        SourceKind::Imap => {
            if cfg.imap.is_some() {
                println!("✓ IMAP account configured");
            } else {
                println!("⚠️  IMAP account incomplete");
                println!("    Set MASH_SMTP_SERVER, MASH_SMTP_LOGIN and MASH_SMTP_PASSWORD");
            }
        }
    }

    Ok(())
}

/// Show resolved configuration
async fn show_config() -> Result<()> {
    let cfg = config::load_config()?;

    println!("╔══════════════════════════════════════════════════════════════╗");
    println!("  mash Configuration");
    println!("╚══════════════════════════════════════════════════════════════╝");
    println!();
    println!(
        "Config file: {}",
        cfg.config_file
            .as_ref()
            .map(|p| p.display().to_string())
            .unwrap_or_else(|| "(none - using defaults)".to_string())
    );
    println!();
    println!("Paths:");
    println!("  Home:     {}", cfg.home.display());
    println!("  Maildir:  {}", cfg.maildir.display());
    println!("  Output:   {}", cfg.output_dir.display());
    println!("  Sandbox:  {}", cfg.sandbox_dir.display());
    println!("  Ledger:   {}", cfg.ledger_path.display());
    println!();
    println!("Mail source: {}", cfg.source);
    match &cfg.imap {
        Some(imap) => {
            println!("  IMAP host:    {}:{}", imap.host, imap.port);
            println!("  IMAP login:   {}", imap.login);
            println!("  IMAP mailbox: {}", imap.mailbox);
        }
        None => println!("  IMAP:         (not configured)"),
    }
    println!();
    println!("Downloader:");
    match &cfg.downloader.binary {
        Some(path) => println!("  Binary:   {}", path.display()),
        None => println!("  Binary:   (discover yt-dlp or youtube-dl on PATH)"),
    }
    println!("  Audio:    {}", cfg.downloader.audio_format);
    println!("  Format:   {}", cfg.downloader.format);
    println!("  Template: {}", cfg.downloader.output_template);
    println!("  Timeout:  {}s", cfg.downloader.timeout_seconds);
    println!();
    println!("Links:");
    println!("  Allowed hosts:  {}", cfg.allowed_hosts.join(", "));
    println!("  Audio patterns: {}", cfg.audio_patterns.join(", "));
    println!();
    println!("Pipeline:");
    println!("  Max concurrent messages: {}", cfg.max_concurrent_messages);
    println!("  Poll interval:           {}s", cfg.poll_interval_seconds);
    if cfg.filter.is_all() {
        println!("  Filter:                  (all messages)");
    } else {
        if let Some(from) = &cfg.filter.from {
            println!("  Filter from:             {}", from);
        }
        if let Some(subject) = &cfg.filter.subject {
            println!("  Filter subject:          {}", subject);
        }
    }

    Ok(())
}
