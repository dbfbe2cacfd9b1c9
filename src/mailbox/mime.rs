//! Flattening of RFC 5322 / MIME messages into plain text.
//!
//! Links are only searched in `text/plain` content. Every `text/plain` part
//! of a message is decoded and concatenated, in document order, into one
//! string handed to the link extractor.

use std::collections::HashMap;

use base64::Engine;

/// Nesting limit for `multipart/*` bodies
const MAX_DEPTH: usize = 8;

/// Unfolded header fields in their original order
#[derive(Debug, Clone, Default)]
pub struct Headers {
    fields: Vec<(String, String)>,
}

impl Headers {
    /// First value of a header, matched case-insensitively
    pub fn get(&self, name: &str) -> Option<&str> {
        self.fields
            .iter()
            .find(|(key, _)| key.eq_ignore_ascii_case(name))
            .map(|(_, value)| value.as_str())
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }
}

/// Split a raw entity into its headers and body.
///
/// Line endings are normalised to `\n`. Text that does not start with a
/// header block is returned whole as the body.
pub fn split_entity(raw: &str) -> (Headers, String) {
    let normalized = raw.replace("\r\n", "\n");
    let mut headers = Headers::default();

    let first_line = normalized.lines().next().unwrap_or("");
    if !looks_like_header(first_line) {
        return (headers, normalized);
    }

    let (head, body) = match normalized.find("\n\n") {
        Some(pos) => (&normalized[..pos], normalized[pos + 2..].to_string()),
        None => (normalized.as_str(), String::new()),
    };

    for line in head.lines() {
        if line.starts_with([' ', '\t']) {
            // Folded continuation of the previous field
            if let Some((_, value)) = headers.fields.last_mut() {
                value.push(' ');
                value.push_str(line.trim());
            }
        } else if let Some((key, value)) = line.split_once(':') {
            headers
                .fields
                .push((key.trim().to_string(), value.trim().to_string()));
        }
    }

    (headers, body)
}

fn looks_like_header(line: &str) -> bool {
    match line.split_once(':') {
        // "https://..." on the first line is a body, not a field
        Some((key, value)) => {
            !key.is_empty()
                && key.chars().all(|c| c.is_ascii_alphanumeric() || c == '-')
                && !value.starts_with("//")
        }
        None => false,
    }
}

/// Parse a `Content-Type` value into a lower-cased MIME type and parameters
fn parse_content_type(value: &str) -> (String, HashMap<String, String>) {
    let mut pieces = value.split(';');
    let mime = pieces
        .next()
        .unwrap_or("text/plain")
        .trim()
        .to_ascii_lowercase();

    let params = pieces
        .filter_map(|param| param.split_once('='))
        .map(|(k, v)| {
            (
                k.trim().to_ascii_lowercase(),
                v.trim().trim_matches('"').to_string(),
            )
        })
        .collect();

    (mime, params)
}

/// Concatenate the decoded `text/plain` content of a raw message
pub fn flatten_plain_text(raw: &str) -> String {
    let mut out = String::new();
    collect_plain_text(raw, &mut out, 0);
    out
}

fn collect_plain_text(raw: &str, out: &mut String, depth: usize) {
    let (headers, body) = split_entity(raw);

    let (mime, params) = headers
        .get("Content-Type")
        .map(parse_content_type)
        .unwrap_or_else(|| ("text/plain".to_string(), HashMap::new()));

    if mime.starts_with("multipart/") {
        if depth >= MAX_DEPTH {
            tracing::warn!(depth, "MIME nesting too deep, ignoring remaining parts");
            return;
        }
        match params.get("boundary") {
            Some(boundary) => {
                for part in split_multipart(&body, boundary) {
                    collect_plain_text(&part, out, depth + 1);
                }
            }
            None => tracing::debug!("multipart body without boundary, skipping"),
        }
        return;
    }

    if mime != "text/plain" {
        return;
    }

    let encoding = headers
        .get("Content-Transfer-Encoding")
        .map(|e| e.trim().to_ascii_lowercase())
        .unwrap_or_default();

    let text = match encoding.as_str() {
        "quoted-printable" => decode_quoted_printable(&body),
        "base64" => decode_base64(&body).unwrap_or(body),
        _ => body,
    };

    if !out.is_empty() && !out.ends_with('\n') {
        out.push('\n');
    }
    out.push_str(&text);
}

/// Split a multipart body on its boundary, dropping preamble and epilogue
fn split_multipart(body: &str, boundary: &str) -> Vec<String> {
    let delimiter = format!("--{}", boundary);
    let terminator = format!("--{}--", boundary);

    let mut parts = Vec::new();
    let mut current: Option<Vec<&str>> = None;

    for line in body.lines() {
        let trimmed = line.trim_end();
        if trimmed == terminator {
            if let Some(lines) = current.take() {
                parts.push(lines.join("\n"));
            }
            break;
        }
        if trimmed == delimiter {
            if let Some(lines) = current.take() {
                parts.push(lines.join("\n"));
            }
            current = Some(Vec::new());
            continue;
        }
        if let Some(lines) = current.as_mut() {
            lines.push(line);
        }
    }

    // Unterminated final part
    if let Some(lines) = current {
        parts.push(lines.join("\n"));
    }

    parts
}

/// Decode quoted-printable text, rejoining soft line breaks
pub fn decode_quoted_printable(input: &str) -> String {
    let bytes = input.as_bytes();
    let mut decoded = Vec::with_capacity(bytes.len());
    let mut i = 0;

    while i < bytes.len() {
        if bytes[i] != b'=' {
            decoded.push(bytes[i]);
            i += 1;
            continue;
        }

        // Soft line break: "=" followed by optional whitespace and newline
        let mut j = i + 1;
        while j < bytes.len() && (bytes[j] == b' ' || bytes[j] == b'\t') {
            j += 1;
        }
        if j < bytes.len() && bytes[j] == b'\n' {
            i = j + 1;
            continue;
        }
        if j == bytes.len() {
            break;
        }

        let hex = bytes.get(i + 1..i + 3).and_then(|pair| {
            std::str::from_utf8(pair)
                .ok()
                .and_then(|s| u8::from_str_radix(s, 16).ok())
        });
        match hex {
            Some(byte) => {
                decoded.push(byte);
                i += 3;
            }
            None => {
                decoded.push(b'=');
                i += 1;
            }
        }
    }

    String::from_utf8_lossy(&decoded).into_owned()
}

fn decode_base64(input: &str) -> Option<String> {
    let compact: String = input.chars().filter(|c| !c.is_whitespace()).collect();
    let bytes = base64::engine::general_purpose::STANDARD
        .decode(compact)
        .map_err(|e| tracing::debug!("invalid base64 part: {}", e))
        .ok()?;
    Some(String::from_utf8_lossy(&bytes).into_owned())
}
