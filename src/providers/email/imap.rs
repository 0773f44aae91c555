//! IMAP retrieval client.
//!
//! Uses IMAP4rev1 (RFC 3501) via `async-imap` over either implicit TLS or a
//! plaintext socket. Only what the fetch path needs is exposed: select the
//! inbox, read its size, fetch one message by sequence number.

use std::fmt;

use async_imap::types::Fetch;
use async_trait::async_trait;
use futures::TryStreamExt;
use tokio_util::compat::TokioAsyncReadCompatExt;

use super::tls;
use super::{ConnectError, FetchError, RetrievalClient};
use crate::domain::{Encryption, Endpoint};

const INBOX: &str = "INBOX";

/// Byte stream the IMAP session runs over, TLS or plain.
pub trait ImapStream:
    futures::AsyncRead + futures::AsyncWrite + Unpin + Send + fmt::Debug
{
}

impl<T> ImapStream for T where
    T: futures::AsyncRead + futures::AsyncWrite + Unpin + Send + fmt::Debug
{
}

type ImapSession = async_imap::Session<Box<dyn ImapStream>>;

/// An authenticated IMAP session.
pub struct ImapClient {
    session: ImapSession,
}

impl ImapClient {
    /// Connects to `endpoint` and logs in.
    pub async fn connect(
        endpoint: &Endpoint,
        username: &str,
        password: &str,
    ) -> Result<Self, ConnectError> {
        let stream: Box<dyn ImapStream> = match endpoint.encryption {
            Encryption::Tls => Box::new(
                tls::dial_tls(endpoint)
                    .await
                    .map_err(|e| ConnectError::Network(format!("TLS connect failed: {}", e)))?
                    .compat(),
            ),
            Encryption::None => Box::new(
                tls::dial(endpoint)
                    .await
                    .map_err(|e| ConnectError::Network(format!("TCP connect failed: {}", e)))?
                    .compat(),
            ),
        };

        let client = async_imap::Client::new(stream);
        let session = client
            .login(username, password)
            .await
            .map_err(|(e, _client)| login_error(e))?;

        tracing::info!(host = %endpoint.host, user = %username, "IMAP session authenticated");
        Ok(Self { session })
    }

    fn body_of(fetches: &[Fetch], index: u32) -> Result<Vec<u8>, FetchError> {
        fetches
            .iter()
            .find_map(|fetch| fetch.body())
            .map(<[u8]>::to_vec)
            .ok_or_else(|| FetchError::Malformed(format!("message {} returned no body", index)))
    }
}

fn login_error(error: async_imap::error::Error) -> ConnectError {
    match error {
        async_imap::error::Error::Io(e) => ConnectError::Network(format!("IMAP I/O: {}", e)),
        async_imap::error::Error::ConnectionLost => {
            ConnectError::Network("IMAP connection lost".to_string())
        }
        other => ConnectError::Auth(format!("IMAP login failed: {}", other)),
    }
}

#[async_trait]
impl RetrievalClient for ImapClient {
    async fn message_count(&mut self) -> Result<u32, FetchError> {
        let mailbox = self
            .session
            .select(INBOX)
            .await
            .map_err(|e| FetchError::Network(format!("SELECT failed: {}", e)))?;
        Ok(mailbox.exists)
    }

    async fn fetch_raw(&mut self, index: u32) -> Result<Vec<u8>, FetchError> {
        let fetches: Vec<Fetch> = self
            .session
            .fetch(index.to_string(), "BODY.PEEK[]")
            .await
            .map_err(|e| FetchError::Network(format!("FETCH failed: {}", e)))?
            .try_collect()
            .await
            .map_err(|e| FetchError::Network(format!("FETCH stream: {}", e)))?;

        Self::body_of(&fetches, index)
    }

    async fn logout(&mut self) {
        if let Err(e) = self.session.logout().await {
            tracing::debug!("IMAP logout failed: {}", e);
        }
    }
}
