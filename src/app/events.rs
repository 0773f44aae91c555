//! Events delivered from background work to the consumer.
//!
//! The orchestrator sends these over one ordered channel; the consumer
//! drains it on a single task, so events are applied in emission order.

use std::fmt;

use crate::domain::Message;
use crate::providers::email::{ConnectError, FetchError, SendError};

/// Category of a reported failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// A connect attempt did not finish within the timeout.
    ConnectTimeout,
    /// The server could not be reached.
    Network,
    /// The server rejected the credentials.
    Auth,
    /// Reading the inbox failed.
    Fetch,
    /// An attachment could not be read.
    Attachment,
    /// The submission server did not answer in time.
    SendTimeout,
    /// The outgoing message could not be built or was rejected.
    Send,
    /// The draft broke a composition rule.
    InvalidDraft,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ErrorKind::ConnectTimeout => "connect timeout",
            ErrorKind::Network => "network error",
            ErrorKind::Auth => "authentication failed",
            ErrorKind::Fetch => "fetch failed",
            ErrorKind::Attachment => "attachment error",
            ErrorKind::SendTimeout => "send timed out",
            ErrorKind::Send => "send failed",
            ErrorKind::InvalidDraft => "invalid draft",
        };
        f.write_str(name)
    }
}

impl From<&ConnectError> for ErrorKind {
    fn from(error: &ConnectError) -> Self {
        match error {
            ConnectError::Network(_) => ErrorKind::Network,
            ConnectError::Auth(_) => ErrorKind::Auth,
            ConnectError::Timeout => ErrorKind::ConnectTimeout,
        }
    }
}

impl From<&FetchError> for ErrorKind {
    fn from(error: &FetchError) -> Self {
        match error {
            FetchError::Network(_) => ErrorKind::Network,
            FetchError::ProtocolState(_) | FetchError::Malformed(_) => ErrorKind::Fetch,
        }
    }
}

impl From<&SendError> for ErrorKind {
    fn from(error: &SendError) -> Self {
        match error {
            SendError::Network(_) => ErrorKind::Network,
            SendError::Auth(_) => ErrorKind::Auth,
            SendError::AttachmentIo { .. } => ErrorKind::Attachment,
            SendError::Timeout => ErrorKind::SendTimeout,
            SendError::InvalidMessage(_) | SendError::NotConfigured => ErrorKind::Send,
        }
    }
}

/// Outcome of background work, in the order it happened.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClientEvent {
    /// The retrieval session came up (`true`) or went away (`false`).
    ConnectionStatusChanged(bool),
    /// One fetched message, in ascending server order within a batch.
    MessageReceived(Message),
    /// A send finished. `sent` is the Sent-partition copy on success.
    SendCompleted {
        success: bool,
        sent: Option<Message>,
    },
    /// A failure to surface to the user.
    Error { kind: ErrorKind, detail: String },
}

impl ClientEvent {
    /// Builds an [`ClientEvent::Error`] from any typed error.
    pub fn error<E>(error: &E) -> Self
    where
        E: fmt::Display,
        for<'a> ErrorKind: From<&'a E>,
    {
        ClientEvent::Error {
            kind: ErrorKind::from(error),
            detail: error.to_string(),
        }
    }
}
