//! Mail protocol clients.
//!
//! Retrieval runs over IMAP ([`ImapClient`]) or POP3 ([`Pop3Client`]) and
//! submission over SMTP ([`SmtpClient`]). The session layer sees them only
//! through the traits in this module, opened by a [`MailConnector`]:
//!
//! - [`NetworkConnector`] - real servers over TCP/TLS
//! - [`MemoryConnector`] - an in-process mailbox for demos and tests

mod connector;
mod imap;
mod memory;
mod pop3;
mod smtp;
mod tls;
mod traits;

pub use connector::NetworkConnector;
pub use imap::{ImapClient, ImapStream};
pub use memory::MemoryConnector;
pub use pop3::{Pop3Client, Pop3Stream};
pub use smtp::{build_message, SmtpClient};
pub use traits::{
    ConnectError, FetchError, MailConnector, RetrievalClient, SendError, SubmissionClient,
};
