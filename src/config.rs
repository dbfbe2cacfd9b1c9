//! Configuration for mash paths and runtime settings.
//!
//! Configuration sources (highest priority first):
//! 1. Environment variables (MASH_HOME, MASH_MAILDIR, MASH_OUTPUT_DIR,
//!    MASH_BIN_DIR, MASH_DOWNLOADER, MASH_SOURCE, and the IMAP account in
//!    MASH_SMTP_SERVER, MASH_SMTP_LOGIN, MASH_SMTP_PASSWORD)
//! 2. Config file (.mash/config.yaml)
//! 3. Defaults (~/.mash)
//!
//! Config file discovery:
//! - Searches current directory and parents for .mash/config.yaml
//! - Paths in config file are relative to the directory holding `.mash/`
//!
//! The resolved configuration is an explicit value handed to each component
//! at construction. Nothing here is cached process-wide.

use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use anyhow::{Context, Result};
use serde::Deserialize;

use crate::mailbox::MessageFilter;

/// Raw config file schema (matches YAML structure)
#[derive(Debug, Clone, Deserialize)]
pub struct ConfigFile {
    pub version: String,
    /// Where mail comes from: `maildir` or `imap`
    #[serde(default)]
    pub source: Option<SourceKind>,
    #[serde(default)]
    pub paths: PathsConfig,
    #[serde(default)]
    pub imap: Option<ImapConfig>,
    #[serde(default)]
    pub downloader: Option<DownloaderConfig>,
    #[serde(default)]
    pub links: Option<LinksConfig>,
    #[serde(default)]
    pub pipeline: Option<PipelineConfig>,
    #[serde(default)]
    pub filter: Option<MessageFilter>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct PathsConfig {
    /// Runtime state directory
    pub home: Option<String>,
    /// Maildir holding incoming mail
    pub maildir: Option<String>,
    /// Shared directory receiving published audio
    pub output: Option<String>,
    /// Parent of the per-download working directories
    pub sandbox: Option<String>,
    /// Processed-message ledger file
    pub ledger: Option<String>,
}

/// IMAP account; the password is only ever read from MASH_SMTP_PASSWORD
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ImapConfig {
    pub host: Option<String>,
    pub port: Option<u16>,
    pub login: Option<String>,
    pub mailbox: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct DownloaderConfig {
    pub binary: Option<String>,
    pub audio_format: Option<String>,
    pub format: Option<String>,
    pub output_template: Option<String>,
    pub timeout_seconds: Option<u64>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct LinksConfig {
    pub allowed_hosts: Option<Vec<String>>,
    pub audio_patterns: Option<Vec<String>>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct PipelineConfig {
    pub max_concurrent_messages: Option<usize>,
    pub poll_interval_seconds: Option<u64>,
}

/// Downloader invocation settings
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DownloaderSettings {
    /// Explicit executable; discovered on PATH when unset
    pub binary: Option<PathBuf>,
    pub audio_format: String,
    /// Stream selector passed as `-f`
    pub format: String,
    pub output_template: String,
    pub timeout_seconds: u64,
}

impl DownloaderSettings {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_seconds)
    }
}

impl Default for DownloaderSettings {
    fn default() -> Self {
        Self {
            binary: None,
            audio_format: "mp3".to_string(),
            format: "140".to_string(),
            output_template: "%(title)s-%(id)s.%(ext)s".to_string(),
            timeout_seconds: 600,
        }
    }
}

/// Kind of mailbox the pipeline reads from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceKind {
    Maildir,
    Imap,
}

impl FromStr for SourceKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "maildir" => Ok(Self::Maildir),
            "imap" => Ok(Self::Imap),
            other => Err(format!("unknown mail source '{}' (expected maildir or imap)", other)),
        }
    }
}

impl fmt::Display for SourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Maildir => f.write_str("maildir"),
            Self::Imap => f.write_str("imap"),
        }
    }
}

pub const DEFAULT_IMAP_PORT: u16 = 993;

/// IMAP-over-TLS account settings
#[derive(Clone, PartialEq, Eq)]
pub struct ImapSettings {
    pub host: String,
    pub port: u16,
    pub login: String,
    pub password: String,
    pub mailbox: String,
}

impl fmt::Debug for ImapSettings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ImapSettings")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("login", &self.login)
            .field("password", &"<redacted>")
            .field("mailbox", &self.mailbox)
            .finish()
    }
}

/// Split `host:port`; a bare host gets `default_port`
fn split_host_port(server: &str, default_port: u16) -> (String, u16) {
    match server.rsplit_once(':') {
        Some((host, port)) if !host.is_empty() => match port.parse() {
            Ok(port) => (host.to_string(), port),
            Err(_) => (server.to_string(), default_port),
        },
        _ => (server.to_string(), default_port),
    }
}

/// Resolved configuration with absolute paths
#[derive(Debug, Clone)]
pub struct ResolvedConfig {
    /// Runtime state directory
    pub home: PathBuf,
    pub maildir: PathBuf,
    pub output_dir: PathBuf,
    pub sandbox_dir: PathBuf,
    pub ledger_path: PathBuf,
    /// Path to config file (if found)
    pub config_file: Option<PathBuf>,
    pub source: SourceKind,
    /// Complete IMAP account, when host, login and password are all known
    pub imap: Option<ImapSettings>,
    pub downloader: DownloaderSettings,
    /// Host glob patterns a link must match
    pub allowed_hosts: Vec<String>,
    /// File name glob patterns treated as audio output
    pub audio_patterns: Vec<String>,
    pub max_concurrent_messages: usize,
    pub poll_interval_seconds: u64,
    pub filter: MessageFilter,
}

pub fn default_allowed_hosts() -> Vec<String> {
    ["www.youtube.com", "youtube.com", "m.youtube.com", "youtu.be"]
        .into_iter()
        .map(String::from)
        .collect()
}

pub fn default_audio_patterns() -> Vec<String> {
    ["*.mp3", "*.m4a", "*.opus", "*.ogg"]
        .into_iter()
        .map(String::from)
        .collect()
}

impl ResolvedConfig {
    /// Configuration rooted at `home` with every other setting defaulted
    pub fn with_home(home: PathBuf) -> Self {
        Self {
            maildir: home.join("Maildir"),
            output_dir: home.join("audio"),
            sandbox_dir: home.join("sandbox"),
            ledger_path: home.join("processed.txt"),
            home,
            config_file: None,
            source: SourceKind::Maildir,
            imap: None,
            downloader: DownloaderSettings::default(),
            allowed_hosts: default_allowed_hosts(),
            audio_patterns: default_audio_patterns(),
            max_concurrent_messages: 1,
            poll_interval_seconds: 300,
            filter: MessageFilter::default(),
        }
    }

    /// Create every directory the pipeline writes into
    pub fn ensure_dirs(&self) -> Result<()> {
        for dir in [&self.home, &self.output_dir, &self.sandbox_dir] {
            std::fs::create_dir_all(dir)
                .with_context(|| format!("Failed to create directory: {}", dir.display()))?;
        }
        if let Some(parent) = self.ledger_path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create directory: {}", parent.display()))?;
        }
        Ok(())
    }
}

/// Find config file by searching current directory and parents
fn find_config_file() -> Option<PathBuf> {
    let mut current = std::env::current_dir().ok()?;

    loop {
        let config_path = current.join(".mash").join("config.yaml");
        if config_path.exists() {
            return Some(config_path);
        }

        if !current.pop() {
            break;
        }
    }

    None
}

/// Load and parse config file
fn load_config_file(path: &Path) -> Result<ConfigFile> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    serde_yaml::from_str(&content)
        .with_context(|| format!("Failed to parse config file: {}", path.display()))
}

/// Resolve a path that may be relative to the config file's project root
fn resolve_path(base: &Path, path_str: &str) -> PathBuf {
    let path = PathBuf::from(path_str);
    if path.is_absolute() {
        path
    } else {
        base.join(path)
            .canonicalize()
            .unwrap_or_else(|_| base.join(path_str))
    }
}

/// Merge defaults, an optional config file and environment lookups
fn resolve(
    default_home: PathBuf,
    config: Option<(PathBuf, ConfigFile)>,
    env: impl Fn(&str) -> Option<String>,
) -> ResolvedConfig {
    let (config_file, file) = match config {
        Some((path, file)) => (Some(path), Some(file)),
        None => (None, None),
    };

    // Project root is the parent of .mash/
    let base_dir = config_file
        .as_deref()
        .and_then(|p| p.parent())
        .and_then(|p| p.parent())
        .unwrap_or(Path::new("."))
        .to_path_buf();

    let paths = file.as_ref().map(|f| f.paths.clone()).unwrap_or_default();
    let from_file = |value: &Option<String>| value.as_deref().map(|p| resolve_path(&base_dir, p));

    let home = env("MASH_HOME")
        .map(PathBuf::from)
        .or_else(|| from_file(&paths.home))
        .unwrap_or(default_home);

    let mut resolved = ResolvedConfig::with_home(home);
    resolved.config_file = config_file;

    if let Some(maildir) = env("MASH_MAILDIR")
        .map(PathBuf::from)
        .or_else(|| from_file(&paths.maildir))
    {
        resolved.maildir = maildir;
    }
    if let Some(output) = env("MASH_OUTPUT_DIR")
        .map(PathBuf::from)
        .or_else(|| from_file(&paths.output))
    {
        resolved.output_dir = output;
    }
    if let Some(sandbox) = from_file(&paths.sandbox) {
        resolved.sandbox_dir = sandbox;
    }
    if let Some(ledger) = from_file(&paths.ledger) {
        resolved.ledger_path = ledger;
    }

    let downloader = file
        .as_ref()
        .and_then(|f| f.downloader.clone())
        .unwrap_or_default();
    let defaults = DownloaderSettings::default();
    resolved.downloader = DownloaderSettings {
        binary: env("MASH_DOWNLOADER")
            .map(PathBuf::from)
            .or_else(|| from_file(&downloader.binary))
            .or_else(|| env("MASH_BIN_DIR").map(|dir| PathBuf::from(dir).join("youtube-dl"))),
        audio_format: downloader.audio_format.unwrap_or(defaults.audio_format),
        format: downloader.format.unwrap_or(defaults.format),
        output_template: downloader.output_template.unwrap_or(defaults.output_template),
        timeout_seconds: downloader.timeout_seconds.unwrap_or(defaults.timeout_seconds),
    };

    if let Some(links) = file.as_ref().and_then(|f| f.links.clone()) {
        if let Some(hosts) = links.allowed_hosts {
            resolved.allowed_hosts = hosts;
        }
        if let Some(patterns) = links.audio_patterns {
            resolved.audio_patterns = patterns;
        }
    }

    if let Some(pipeline) = file.as_ref().and_then(|f| f.pipeline.clone()) {
        if let Some(n) = pipeline.max_concurrent_messages {
            resolved.max_concurrent_messages = n.max(1);
        }
        if let Some(secs) = pipeline.poll_interval_seconds {
            resolved.poll_interval_seconds = secs;
        }
    }

    let imap = file.as_ref().and_then(|f| f.imap.clone()).unwrap_or_default();
    let server = env("MASH_SMTP_SERVER").or(imap.host);
    let login = env("MASH_SMTP_LOGIN").or(imap.login);
    let password = env("MASH_SMTP_PASSWORD");
    let imap_requested = server.is_some();
    if let (Some(server), Some(login), Some(password)) = (server, login, password) {
        let (host, port) = split_host_port(&server, imap.port.unwrap_or(DEFAULT_IMAP_PORT));
        resolved.imap = Some(ImapSettings {
            host,
            port,
            login,
            password,
            mailbox: imap.mailbox.unwrap_or_else(|| "INBOX".to_string()),
        });
    }

    let env_source = env("MASH_SOURCE").and_then(|value| match value.parse::<SourceKind>() {
        Ok(kind) => Some(kind),
        Err(e) => {
            tracing::warn!("Ignoring MASH_SOURCE: {}", e);
            None
        }
    });
    resolved.source = env_source
        .or_else(|| file.as_ref().and_then(|f| f.source))
        .unwrap_or(if imap_requested {
            SourceKind::Imap
        } else {
            SourceKind::Maildir
        });

    if let Some(filter) = file.and_then(|f| f.filter) {
        resolved.filter = filter;
    }

    resolved
}

/// Load configuration from all sources
pub fn load_config() -> Result<ResolvedConfig> {
    let default_home = dirs::home_dir()
        .context("Failed to determine home directory")?
        .join(".mash");

    let config = match find_config_file() {
        Some(path) => {
            let file = load_config_file(&path)?;
            Some((path, file))
        }
        None => None,
    };

    Ok(resolve(default_home, config, |key| std::env::var(key).ok()))
}
