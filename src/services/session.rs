//! Protocol session for the active account.
//!
//! The [`ProtocolSession`] owns the live retrieval handle and a cached
//! submission handle. It knows nothing about scheduling: the orchestrator
//! decides when each operation runs and publishes the resulting state.

use std::fmt;
use std::ops::RangeInclusive;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use mail_parser::{MessageParser, MimeHeaders, PartType};

use crate::domain::{file_name, Account, BodyFormat, Draft, Endpoint, Message};
use crate::providers::email::{
    build_message, ConnectError, FetchError, MailConnector, RetrievalClient, SendError,
    SubmissionClient,
};

/// Connection state of the session.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum SessionState {
    /// No session.
    #[default]
    Disconnected,
    /// A connect attempt is running.
    Connecting,
    /// Authenticated and ready to fetch.
    Connected,
    /// The last attempt or operation failed.
    Failed(String),
}

impl SessionState {
    /// Returns true when a retrieval session is usable.
    pub fn is_connected(&self) -> bool {
        matches!(self, SessionState::Connected)
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SessionState::Disconnected => write!(f, "disconnected"),
            SessionState::Connecting => write!(f, "connecting"),
            SessionState::Connected => write!(f, "connected"),
            SessionState::Failed(reason) => write!(f, "failed: {}", reason),
        }
    }
}

/// What an SMTP handle was opened with. A handle is reused only while all
/// of these stay the same.
#[derive(Debug, Clone, PartialEq, Eq)]
struct SubmissionKey {
    endpoint: Endpoint,
    address: String,
    credential: String,
}

impl SubmissionKey {
    fn for_account(account: &Account) -> Self {
        Self {
            endpoint: account.outgoing.clone(),
            address: account.address.clone(),
            credential: account.credential.clone(),
        }
    }
}

struct CachedSubmission {
    key: SubmissionKey,
    client: Box<dyn SubmissionClient>,
}

/// Live protocol handles for one account.
pub struct ProtocolSession<C: MailConnector> {
    connector: Arc<C>,
    account: Option<Account>,
    retrieval: Option<Box<dyn RetrievalClient>>,
    submission: Option<CachedSubmission>,
    state: SessionState,
}

impl<C: MailConnector> ProtocolSession<C> {
    /// Creates a disconnected session.
    pub fn new(connector: Arc<C>) -> Self {
        Self {
            connector,
            account: None,
            retrieval: None,
            submission: None,
            state: SessionState::Disconnected,
        }
    }

    /// Current state.
    pub fn state(&self) -> &SessionState {
        &self.state
    }

    /// Account of the most recent connect attempt.
    pub fn account(&self) -> Option<&Account> {
        self.account.as_ref()
    }

    /// Connects and authenticates to the account's retrieval server,
    /// releasing the previous retrieval handle first. A cached submission
    /// handle is kept; [`submit`](Self::submit) reuses it only while the
    /// outgoing server and credentials stay the same.
    pub async fn connect(&mut self, account: &Account) -> Result<(), ConnectError> {
        if let Some(mut retrieval) = self.retrieval.take() {
            retrieval.logout().await;
        }
        self.account = Some(account.clone());
        self.state = SessionState::Connecting;
        tracing::info!(
            account = %account.address,
            protocol = %account.protocol,
            server = %account.incoming.authority(),
            "connecting"
        );

        match self.connector.open_retrieval(account).await {
            Ok(client) => {
                self.retrieval = Some(client);
                self.state = SessionState::Connected;
                tracing::info!(account = %account.address, "connected");
                Ok(())
            }
            Err(e) => {
                tracing::warn!(account = %account.address, error = %e, "connect failed");
                self.state = SessionState::Failed(e.to_string());
                Err(e)
            }
        }
    }

    /// Fetches up to `max` of the most recent inbox messages, oldest first.
    ///
    /// Messages that fail to fetch or parse are logged and skipped.
    pub async fn list_recent(&mut self, max: u32) -> Result<Vec<Message>, FetchError> {
        let retrieval = self
            .retrieval
            .as_mut()
            .ok_or_else(|| FetchError::ProtocolState("not connected".to_string()))?;

        let total = retrieval.message_count().await?;
        let window = recent_window(total, max);
        tracing::debug!(total, start = window.start(), end = window.end(), "fetching window");

        let mut messages = Vec::new();
        for index in window {
            match retrieval.fetch_raw(index).await {
                Ok(raw) => match parse_message(&raw, index) {
                    Some(message) => messages.push(message),
                    None => tracing::warn!(index, "skipping unparseable message"),
                },
                Err(e) => tracing::warn!(index, error = %e, "skipping message"),
            }
        }
        Ok(messages)
    }

    /// Sends `draft` from the connected account and returns its Sent copy.
    ///
    /// Attachments are read and the whole message is built before any
    /// network I/O, so a missing file never reaches the server.
    pub async fn submit(&mut self, draft: &Draft) -> Result<Message, SendError> {
        let account = self.account.clone().ok_or(SendError::NotConfigured)?;

        let mut files = Vec::with_capacity(draft.attachments.len());
        for path in &draft.attachments {
            let data = tokio::fs::read(path)
                .await
                .map_err(|e| SendError::AttachmentIo {
                    path: path.clone(),
                    reason: e.to_string(),
                })?;
            files.push((file_name(path), data));
        }
        let message = build_message(&account, draft, files)?;

        let key = SubmissionKey::for_account(&account);
        if self.submission.as_ref().map(|cached| &cached.key) != Some(&key) {
            if let Some(mut stale) = self.submission.take() {
                stale.client.close().await;
            }
            let client = self.connector.open_submission(&account).await?;
            self.submission = Some(CachedSubmission { key, client });
        }

        let Some(cached) = self.submission.as_mut() else {
            return Err(SendError::NotConfigured);
        };
        if let Err(e) = cached.client.submit(message).await {
            tracing::warn!(account = %account.address, error = %e, "send failed");
            if let Some(mut broken) = self.submission.take() {
                broken.client.close().await;
            }
            return Err(e);
        }

        tracing::info!(account = %account.address, to = %draft.recipient, "message sent");
        let mut sent = Message::new(
            account.address.clone(),
            draft.subject.clone(),
            draft.body.clone(),
            draft.format,
        )
        .with_attachments(draft.attachment_names());
        sent.is_read = true;
        Ok(sent)
    }

    /// Drops the retrieval handle after a connection-level failure.
    pub fn mark_failed(&mut self, reason: impl Into<String>) {
        self.retrieval = None;
        self.state = SessionState::Failed(reason.into());
    }

    /// Releases all handles. Safe to call repeatedly.
    pub async fn close(&mut self) {
        if let Some(mut retrieval) = self.retrieval.take() {
            retrieval.logout().await;
        }
        if let Some(mut cached) = self.submission.take() {
            cached.client.close().await;
        }
        if self.state != SessionState::Disconnected {
            tracing::debug!("session closed");
        }
        self.state = SessionState::Disconnected;
    }
}

/// Server indices of the `max` most recent messages out of `total`.
pub(crate) fn recent_window(total: u32, max: u32) -> RangeInclusive<u32> {
    if total == 0 || max == 0 {
        return RangeInclusive::new(1, 0);
    }
    let start = total.saturating_sub(max) + 1;
    start..=total
}

/// Turns a raw RFC 5322 message into a [`Message`].
pub(crate) fn parse_message(raw: &[u8], index: u32) -> Option<Message> {
    let parsed = MessageParser::default().parse(raw)?;

    let sender = parsed
        .from()
        .and_then(|from| from.as_list())
        .and_then(|list| list.first())
        .map(|addr| match (addr.name(), addr.address()) {
            (Some(name), Some(address)) => format!("{} <{}>", name, address),
            (None, Some(address)) => address.to_string(),
            (Some(name), None) => name.to_string(),
            (None, None) => String::new(),
        })
        .unwrap_or_default();

    let subject = parsed.subject().unwrap_or_default().to_string();

    let rich = parsed
        .html_body
        .first()
        .and_then(|part| parsed.parts.get(*part))
        .is_some_and(|part| matches!(part.body, PartType::Html(_)));
    let (format, body) = if rich {
        (BodyFormat::Rich, parsed.body_html(0))
    } else {
        (BodyFormat::Plain, parsed.body_text(0))
    };
    let body = body.map(|b| b.into_owned()).unwrap_or_default();

    let attachments = parsed
        .attachments()
        .enumerate()
        .map(|(i, part)| {
            part.attachment_name()
                .map(str::to_string)
                .unwrap_or_else(|| format!("attachment-{}", i + 1))
        })
        .collect();

    let timestamp = parsed
        .date()
        .and_then(|d| DateTime::from_timestamp(d.to_timestamp(), 0))
        .unwrap_or_else(Utc::now);

    let mut message =
        Message::new(sender, subject, body, format).with_attachments(attachments);
    message.timestamp = timestamp;
    Some(message.with_origin(index, parsed.message_id().map(str::to_string)))
}
