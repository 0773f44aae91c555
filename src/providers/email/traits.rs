//! Protocol client traits and the error taxonomy.
//!
//! The session layer talks to servers only through these traits. A
//! [`MailConnector`] opens authenticated handles; a [`RetrievalClient`] reads
//! the inbox and a [`SubmissionClient`] submits fully built messages.

use std::path::PathBuf;

use async_trait::async_trait;

use crate::domain::Account;

/// Errors from opening and authenticating a retrieval session.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConnectError {
    /// Network, DNS or TLS failure.
    #[error("connection error: {0}")]
    Network(String),

    /// The server rejected the credentials.
    #[error("authentication failed: {0}")]
    Auth(String),

    /// The attempt did not finish in time.
    #[error("connect timed out")]
    Timeout,
}

/// Errors from reading the inbox.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum FetchError {
    /// Network or protocol-level failure talking to the server.
    #[error("connection error: {0}")]
    Network(String),

    /// The operation is not valid in the current session state.
    #[error("invalid session state: {0}")]
    ProtocolState(String),

    /// A single message could not be decoded.
    #[error("malformed message: {0}")]
    Malformed(String),
}

/// Errors from submitting a message.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SendError {
    /// Network, DNS or TLS failure.
    #[error("connection error: {0}")]
    Network(String),

    /// The server rejected the credentials.
    #[error("authentication failed: {0}")]
    Auth(String),

    /// An attachment could not be read.
    #[error("cannot read attachment {}: {reason}", path.display())]
    AttachmentIo {
        /// Attachment path.
        path: PathBuf,
        /// Underlying I/O failure.
        reason: String,
    },

    /// The server did not answer in time.
    #[error("send timed out")]
    Timeout,

    /// The message could not be built (bad address, bad header).
    #[error("invalid message: {0}")]
    InvalidMessage(String),

    /// No account has been connected yet.
    #[error("no account configured for sending")]
    NotConfigured,
}

/// An authenticated retrieval channel (IMAP or POP3).
#[async_trait]
pub trait RetrievalClient: Send {
    /// Returns the number of messages in the inbox, selecting it if needed.
    async fn message_count(&mut self) -> Result<u32, FetchError>;

    /// Fetches message `index` (1-based server order) as raw RFC 5322 bytes.
    async fn fetch_raw(&mut self, index: u32) -> Result<Vec<u8>, FetchError>;

    /// Ends the session. Failures are ignored.
    async fn logout(&mut self);
}

/// An authenticated submission channel (SMTP).
#[async_trait]
pub trait SubmissionClient: Send {
    /// Submits one fully built message.
    async fn submit(&mut self, message: lettre::Message) -> Result<(), SendError>;

    /// Releases the channel. Failures are ignored.
    async fn close(&mut self);
}

/// Opens protocol handles for an account.
#[async_trait]
pub trait MailConnector: Send + Sync + 'static {
    /// Connects and authenticates to the account's retrieval server.
    async fn open_retrieval(
        &self,
        account: &Account,
    ) -> Result<Box<dyn RetrievalClient>, ConnectError>;

    /// Connects and authenticates to the account's submission server.
    async fn open_submission(
        &self,
        account: &Account,
    ) -> Result<Box<dyn SubmissionClient>, SendError>;
}
