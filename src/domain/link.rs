//! Validated video links.

use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use url::Url;

/// Reasons a candidate link is rejected
#[derive(Debug, Error, PartialEq, Eq)]
pub enum LinkError {
    #[error("Malformed URL '{0}'")]
    Malformed(String),

    #[error("Unsupported scheme '{0}'")]
    UnsupportedScheme(String),

    #[error("URL has no host: {0}")]
    MissingHost(String),
}

/// An absolute http(s) URL pointing at a video page.
///
/// Immutable once constructed. The host allow-list is enforced by the
/// extractor, this type only guarantees the URL is absolute and has a host.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct VideoUrl {
    raw: String,
    host: String,
}

impl VideoUrl {
    /// Parse and validate a URL string
    pub fn parse(raw: &str) -> Result<Self, LinkError> {
        let parsed = Url::parse(raw).map_err(|_| LinkError::Malformed(raw.to_string()))?;

        match parsed.scheme() {
            "http" | "https" => {}
            other => return Err(LinkError::UnsupportedScheme(other.to_string())),
        }

        let host = parsed
            .host_str()
            .ok_or_else(|| LinkError::MissingHost(raw.to_string()))?
            .to_ascii_lowercase();

        Ok(Self {
            raw: raw.to_string(),
            host,
        })
    }

    /// The URL exactly as it appeared in the message
    pub fn as_str(&self) -> &str {
        &self.raw
    }

    /// Lower-cased host name
    pub fn host(&self) -> &str {
        &self.host
    }
}

impl fmt::Display for VideoUrl {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.raw)
    }
}

impl TryFrom<String> for VideoUrl {
    type Error = LinkError;

    fn try_from(raw: String) -> Result<Self, Self::Error> {
        Self::parse(&raw)
    }
}

impl From<VideoUrl> for String {
    fn from(url: VideoUrl) -> Self {
        url.raw
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_keeps_raw_text() {
        let url = VideoUrl::parse("https://www.YouTube.com/watch?v=EzKImzjwGyM").unwrap();
        assert_eq!(url.as_str(), "https://www.YouTube.com/watch?v=EzKImzjwGyM");
        assert_eq!(url.host(), "www.youtube.com");
    }

    #[test]
    fn test_rejects_non_http_schemes() {
        assert_eq!(
            VideoUrl::parse("ftp://youtu.be/abc"),
            Err(LinkError::UnsupportedScheme("ftp".to_string()))
        );
        assert!(matches!(
            VideoUrl::parse("not a url"),
            Err(LinkError::Malformed(_))
        ));
    }
}
