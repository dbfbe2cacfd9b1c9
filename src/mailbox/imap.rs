//! IMAP-backed message source.
//!
//! Connects over TLS, logs in and selects one mailbox (`INBOX` unless
//! configured otherwise). The session is opened lazily, reused across calls
//! and dropped after any connection-level error so the next call reconnects.
//! The `imap` client is blocking, so every exchange runs on tokio's blocking
//! pool behind a mutex.
//!
//! Message ids are `<uidvalidity>.<uid>`. A UID alone is only stable while
//! the mailbox keeps its UIDVALIDITY, so both go into the ledger.

use std::net::TcpStream;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use native_tls::{TlsConnector, TlsStream};

use super::mime::flatten_plain_text;
use super::{MessageFilter, MessageSource, SourceError};
use crate::config::ImapSettings;
use crate::domain::MessageId;

type Session = imap::Session<TlsStream<TcpStream>>;

/// An authenticated session with the configured mailbox selected
struct Connection {
    session: Session,
    uid_validity: Option<u32>,
}

/// Reads messages from one mailbox on an IMAP server
pub struct ImapSource {
    settings: ImapSettings,
    connection: Arc<Mutex<Option<Connection>>>,
}

impl ImapSource {
    pub fn new(settings: ImapSettings) -> Self {
        Self {
            settings,
            connection: Arc::new(Mutex::new(None)),
        }
    }

    pub fn settings(&self) -> &ImapSettings {
        &self.settings
    }

    /// Ledger id for a UID in a mailbox with the given UIDVALIDITY
    pub fn message_id(uid_validity: Option<u32>, uid: u32) -> MessageId {
        match uid_validity {
            Some(validity) => MessageId::new(format!("{}.{}", validity, uid)),
            None => MessageId::new(uid.to_string()),
        }
    }

    /// Split an id produced by [`ImapSource::message_id`] back into
    /// `(uidvalidity, uid)`
    pub fn parse_id(id: &MessageId) -> Option<(Option<u32>, u32)> {
        match id.as_str().split_once('.') {
            Some((validity, uid)) => Some((Some(validity.parse().ok()?), uid.parse().ok()?)),
            None => Some((None, id.as_str().parse().ok()?)),
        }
    }

    /// `UID SEARCH` criteria for a filter. IMAP's FROM and SUBJECT keys are
    /// case-insensitive substring matches, like [`MessageFilter::matches`].
    pub fn search_query(filter: &MessageFilter) -> String {
        let mut criteria = Vec::new();
        if let Some(from) = &filter.from {
            criteria.push(format!("FROM {}", quote(from)));
        }
        if let Some(subject) = &filter.subject {
            criteria.push(format!("SUBJECT {}", quote(subject)));
        }

        if criteria.is_empty() {
            "ALL".to_string()
        } else {
            criteria.join(" ")
        }
    }

    /// Run `op` against the session on the blocking pool, connecting first
    /// if needed. An `Unavailable` result drops the session.
    async fn with_connection<T, F>(&self, op: F) -> Result<T, SourceError>
    where
        T: Send + 'static,
        F: FnOnce(&mut Connection) -> Result<T, SourceError> + Send + 'static,
    {
        let settings = self.settings.clone();
        let slot = Arc::clone(&self.connection);

        tokio::task::spawn_blocking(move || {
            let mut guard = slot
                .lock()
                .map_err(|_| SourceError::Unavailable("IMAP session lock poisoned".to_string()))?;

            if guard.is_none() {
                *guard = Some(connect(&settings)?);
            }
            let Some(conn) = guard.as_mut() else {
                return Err(SourceError::Unavailable("IMAP session missing".to_string()));
            };

            let result = op(conn);
            if matches!(result, Err(SourceError::Unavailable(_))) {
                tracing::debug!(host = %settings.host, "Dropping IMAP session");
                *guard = None;
            }
            result
        })
        .await
        .map_err(|e| SourceError::Unavailable(format!("IMAP task failed: {}", e)))?
    }
}

impl std::fmt::Debug for ImapSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ImapSource")
            .field("settings", &self.settings)
            .finish()
    }
}

#[async_trait]
impl MessageSource for ImapSource {
    fn name(&self) -> &str {
        "imap"
    }

    async fn list_ids(&self, filter: &MessageFilter) -> Result<Vec<MessageId>, SourceError> {
        let query = Self::search_query(filter);

        self.with_connection(move |conn| {
            let uids = conn.session.uid_search(&query).map_err(|e| {
                SourceError::Unavailable(format!("UID SEARCH {} failed: {}", query, e))
            })?;

            let mut uids: Vec<u32> = uids.into_iter().collect();
            uids.sort_unstable();

            tracing::debug!(count = uids.len(), query = %query, "IMAP search");
            Ok(uids
                .into_iter()
                .map(|uid| Self::message_id(conn.uid_validity, uid))
                .collect())
        })
        .await
    }

    async fn fetch_body(&self, id: &MessageId) -> Result<String, SourceError> {
        let (validity, uid) = Self::parse_id(id).ok_or_else(|| SourceError::FetchFailed {
            id: id.clone(),
            reason: "not an IMAP message id".to_string(),
        })?;
        let id = id.clone();

        self.with_connection(move |conn| {
            if validity != conn.uid_validity {
                return Err(SourceError::FetchFailed {
                    id,
                    reason: "mailbox UIDVALIDITY changed since listing".to_string(),
                });
            }

            let fetches = conn
                .session
                .uid_fetch(uid.to_string(), "RFC822")
                .map_err(|e| fetch_error(&id, e))?;

            match fetches.iter().find_map(|fetch| fetch.body()) {
                Some(raw) => Ok(flatten_plain_text(&String::from_utf8_lossy(raw))),
                None => Err(SourceError::FetchFailed {
                    id,
                    reason: "message no longer on server".to_string(),
                }),
            }
        })
        .await
    }
}

/// Open a TLS connection, log in and select the mailbox
fn connect(settings: &ImapSettings) -> Result<Connection, SourceError> {
    let host = settings.host.as_str();

    let tls = TlsConnector::builder()
        .build()
        .map_err(|e| unavailable("TLS setup for", host, e))?;

    let client = imap::connect((host, settings.port), host, &tls)
        .map_err(|e| unavailable("Cannot connect to", host, e))?;

    let mut session = client
        .login(&settings.login, &settings.password)
        .map_err(|(e, _)| unavailable("Login failed on", host, e))?;

    let mailbox = session
        .select(&settings.mailbox)
        .map_err(|e| unavailable("Cannot select mailbox on", host, e))?;

    tracing::info!(
        host = %host,
        mailbox = %settings.mailbox,
        exists = mailbox.exists,
        "IMAP session opened"
    );

    Ok(Connection {
        session,
        uid_validity: mailbox.uid_validity,
    })
}

fn unavailable(what: &str, host: &str, error: impl std::fmt::Display) -> SourceError {
    SourceError::Unavailable(format!("{} {}: {}", what, host, error))
}

/// A broken connection is fatal to the run; a server refusal only affects
/// the one message
fn fetch_error(id: &MessageId, error: imap::Error) -> SourceError {
    match error {
        imap::Error::Io(_)
        | imap::Error::ConnectionLost
        | imap::Error::Tls(_)
        | imap::Error::TlsHandshake(_) => {
            SourceError::Unavailable(format!("Connection lost fetching {}: {}", id, error))
        }
        other => SourceError::FetchFailed {
            id: id.clone(),
            reason: other.to_string(),
        },
    }
}

/// IMAP quoted string
fn quote(value: &str) -> String {
    let escaped = value.replace('\\', "\\\\").replace('"', "\\\"");
    format!("\"{}\"", escaped)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn settings(host: &str, port: u16) -> ImapSettings {
        ImapSettings {
            host: host.to_string(),
            port,
            login: "me@example.com".to_string(),
            password: "secret".to_string(),
            mailbox: "INBOX".to_string(),
        }
    }

    #[test]
    fn test_uid_maps_to_message_id() {
        assert_eq!(
            ImapSource::message_id(Some(1697040000), 42),
            MessageId::new("1697040000.42")
        );
        assert_eq!(ImapSource::message_id(None, 7), MessageId::new("7"));

        assert_eq!(
            ImapSource::parse_id(&MessageId::new("1697040000.42")),
            Some((Some(1697040000), 42))
        );
        assert_eq!(ImapSource::parse_id(&MessageId::new("7")), Some((None, 7)));
        assert_eq!(ImapSource::parse_id(&MessageId::new("1697040000.M1P2.host")), None);
        assert_eq!(ImapSource::parse_id(&MessageId::new("abc")), None);
    }

    #[test]
    fn test_ids_are_ledger_safe() {
        assert!(ImapSource::message_id(Some(3), 99).is_ledger_safe());
    }

    #[test]
    fn test_search_query_from_filter() {
        assert_eq!(ImapSource::search_query(&MessageFilter::all()), "ALL");

        let filter = MessageFilter {
            from: Some("alice@example.com".to_string()),
            subject: Some("say \"hi\"".to_string()),
        };
        assert_eq!(
            ImapSource::search_query(&filter),
            r#"FROM "alice@example.com" SUBJECT "say \"hi\"""#
        );
    }

    #[test]
    fn test_fetch_error_mapping() {
        let id = MessageId::new("1.2");

        let lost = fetch_error(&id, imap::Error::ConnectionLost);
        assert!(lost.is_fatal());

        let io = fetch_error(
            &id,
            imap::Error::Io(std::io::Error::new(std::io::ErrorKind::BrokenPipe, "pipe")),
        );
        assert!(io.is_fatal());

        let refused = fetch_error(&id, imap::Error::No("no such message".to_string()));
        match refused {
            SourceError::FetchFailed { id: failed, reason } => {
                assert_eq!(failed, id);
                assert!(reason.contains("no such message"));
            }
            other => panic!("expected FetchFailed, got {:?}", other),
        }

        assert!(!fetch_error(&id, imap::Error::Bad("parse".to_string())).is_fatal());
    }

    #[tokio::test]
    async fn test_connect_failure_is_unavailable() {
        // Nothing listens on port 1
        let source = ImapSource::new(settings("127.0.0.1", 1));

        let err = source.list_ids(&MessageFilter::all()).await.unwrap_err();
        assert!(err.is_fatal(), "unexpected error: {}", err);
    }

    #[tokio::test]
    async fn test_foreign_id_fails_without_connecting() {
        let source = ImapSource::new(settings("127.0.0.1", 1));

        let err = source
            .fetch_body(&MessageId::new("1697040000.M1P2.host"))
            .await
            .unwrap_err();
        assert!(matches!(err, SourceError::FetchFailed { .. }));
    }

    #[test]
    fn test_debug_hides_password() {
        let source = ImapSource::new(settings("imap.example.com", 993));
        let debug = format!("{:?}", source);
        assert!(debug.contains("imap.example.com"));
        assert!(!debug.contains("secret"));
    }
}
