//! Video link extraction from message text.
//!
//! Scans for `scheme://host/segment` substrings, where the single path
//! segment never contains `/`, and keeps the ones whose host matches the
//! allow-list. Anything malformed or off-list is dropped silently.

use std::sync::OnceLock;

use glob::{MatchOptions, Pattern, PatternError};
use regex::Regex;

use crate::domain::VideoUrl;

static LINK_PATTERN: OnceLock<Regex> = OnceLock::new();

fn link_pattern() -> &'static Regex {
    LINK_PATTERN.get_or_init(|| {
        Regex::new(r"https?://[^/\s]+/[A-Za-z0-9?=&_\-]+").expect("link pattern is valid")
    })
}

const HOST_MATCH: MatchOptions = MatchOptions {
    case_sensitive: false,
    require_literal_separator: false,
    require_literal_leading_dot: false,
};

/// Stateless link extractor with a host allow-list
#[derive(Debug, Clone)]
pub struct LinkExtractor {
    allowed_hosts: Vec<Pattern>,
}

impl LinkExtractor {
    /// Build from host glob patterns such as `youtu.be` or `*.youtube.com`
    pub fn new<S: AsRef<str>>(allowed_hosts: &[S]) -> Result<Self, PatternError> {
        let allowed_hosts = allowed_hosts
            .iter()
            .map(|h| Pattern::new(h.as_ref()))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self { allowed_hosts })
    }

    /// Check a host against the allow-list
    pub fn is_allowed_host(&self, host: &str) -> bool {
        self.allowed_hosts
            .iter()
            .any(|p| p.matches_with(host, HOST_MATCH))
    }

    /// Lazily yield every qualifying link in `text`, duplicates included,
    /// in order of appearance
    pub fn extract<'a>(&'a self, text: &'a str) -> impl Iterator<Item = VideoUrl> + 'a {
        link_pattern()
            .find_iter(text)
            .filter_map(|m| VideoUrl::parse(m.as_str()).ok())
            .filter(move |url| self.is_allowed_host(url.host()))
    }
}
