//! POP3 retrieval client (RFC 1939).
//!
//! A small line-protocol client covering the commands the fetch path needs:
//! `USER`/`PASS` authentication, `STAT` for the maildrop size, `RETR` for a
//! single message and `QUIT`. Multi-line responses are dot-unstuffed.

use std::io;

use async_trait::async_trait;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader};

use super::tls;
use super::{ConnectError, FetchError, RetrievalClient};
use crate::domain::{Encryption, Endpoint};

/// Byte stream the POP3 session runs over, TLS or plain.
pub trait Pop3Stream: AsyncRead + AsyncWrite + Unpin + Send {}

impl<T> Pop3Stream for T where T: AsyncRead + AsyncWrite + Unpin + Send {}

/// A single-line server reply.
#[derive(Debug, Clone, PartialEq, Eq)]
enum Reply {
    Ok(String),
    Err(String),
}

impl Reply {
    fn parse(line: &[u8]) -> io::Result<Self> {
        let text = String::from_utf8_lossy(line);
        let text = text.trim_end_matches(['\r', '\n']);
        if let Some(rest) = text.strip_prefix("+OK") {
            Ok(Reply::Ok(rest.trim_start().to_string()))
        } else if let Some(rest) = text.strip_prefix("-ERR") {
            Ok(Reply::Err(rest.trim_start().to_string()))
        } else {
            Err(io::Error::new(
                io::ErrorKind::InvalidData,
                format!("unexpected POP3 reply: {}", text),
            ))
        }
    }
}

/// An authenticated POP3 session.
pub struct Pop3Client<S = Box<dyn Pop3Stream>> {
    stream: BufReader<S>,
}

impl Pop3Client<Box<dyn Pop3Stream>> {
    /// Connects to `endpoint` and authenticates with `USER`/`PASS`.
    pub async fn connect(
        endpoint: &Endpoint,
        username: &str,
        password: &str,
    ) -> Result<Self, ConnectError> {
        let stream: Box<dyn Pop3Stream> = match endpoint.encryption {
            Encryption::Tls => Box::new(
                tls::dial_tls(endpoint)
                    .await
                    .map_err(|e| ConnectError::Network(format!("TLS connect failed: {}", e)))?,
            ),
            Encryption::None => Box::new(
                tls::dial(endpoint)
                    .await
                    .map_err(|e| ConnectError::Network(format!("TCP connect failed: {}", e)))?,
            ),
        };

        let client = Self::handshake(stream, username, password).await?;
        tracing::info!(host = %endpoint.host, user = %username, "POP3 session authenticated");
        Ok(client)
    }
}

impl<S: AsyncRead + AsyncWrite + Unpin + Send> Pop3Client<S> {
    /// Reads the greeting and authenticates over an already open stream.
    pub async fn handshake(stream: S, username: &str, password: &str) -> Result<Self, ConnectError> {
        let mut client = Self {
            stream: BufReader::new(stream),
        };
        let network = |e: io::Error| ConnectError::Network(format!("POP3 I/O: {}", e));

        match client.read_reply().await.map_err(network)? {
            Reply::Ok(_) => {}
            Reply::Err(msg) => {
                return Err(ConnectError::Network(format!("server refused session: {}", msg)))
            }
        }

        if let Reply::Err(msg) = client
            .command(&format!("USER {}", username))
            .await
            .map_err(network)?
        {
            return Err(ConnectError::Auth(format!("USER rejected: {}", msg)));
        }
        if let Reply::Err(msg) = client
            .command(&format!("PASS {}", password))
            .await
            .map_err(network)?
        {
            return Err(ConnectError::Auth(format!("PASS rejected: {}", msg)));
        }

        Ok(client)
    }

    async fn command(&mut self, line: &str) -> io::Result<Reply> {
        let stream = self.stream.get_mut();
        stream.write_all(line.as_bytes()).await?;
        stream.write_all(b"\r\n").await?;
        stream.flush().await?;
        self.read_reply().await
    }

    async fn read_line(&mut self, buf: &mut Vec<u8>) -> io::Result<()> {
        buf.clear();
        let n = self.stream.read_until(b'\n', buf).await?;
        if n == 0 {
            return Err(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                "POP3 server closed the connection",
            ));
        }
        Ok(())
    }

    async fn read_reply(&mut self) -> io::Result<Reply> {
        let mut line = Vec::new();
        self.read_line(&mut line).await?;
        Reply::parse(&line)
    }

    /// Reads a multi-line body up to the terminating `.` line.
    async fn read_multiline(&mut self) -> io::Result<Vec<u8>> {
        let mut body = Vec::new();
        let mut line = Vec::new();
        loop {
            self.read_line(&mut line).await?;
            let content = line
                .strip_suffix(b"\r\n")
                .or_else(|| line.strip_suffix(b"\n"))
                .unwrap_or(&line);
            if content == b"." {
                return Ok(body);
            }
            let content = content.strip_prefix(b".").unwrap_or(content);
            body.extend_from_slice(content);
            body.extend_from_slice(b"\r\n");
        }
    }

    /// `STAT`: number of messages in the maildrop.
    pub async fn stat(&mut self) -> Result<u32, FetchError> {
        match self.command("STAT").await.map_err(fetch_io)? {
            Reply::Ok(text) => text
                .split_whitespace()
                .next()
                .and_then(|n| n.parse().ok())
                .ok_or_else(|| FetchError::Network(format!("malformed STAT reply: {}", text))),
            Reply::Err(msg) => Err(FetchError::Network(format!("STAT rejected: {}", msg))),
        }
    }

    /// `RETR n`: the full message.
    pub async fn retr(&mut self, index: u32) -> Result<Vec<u8>, FetchError> {
        match self
            .command(&format!("RETR {}", index))
            .await
            .map_err(fetch_io)?
        {
            Reply::Ok(_) => self.read_multiline().await.map_err(fetch_io),
            Reply::Err(msg) => Err(FetchError::Malformed(format!(
                "RETR {} rejected: {}",
                index, msg
            ))),
        }
    }

    /// `QUIT`.
    pub async fn quit(&mut self) -> io::Result<()> {
        self.command("QUIT").await.map(|_| ())
    }
}

fn fetch_io(e: io::Error) -> FetchError {
    FetchError::Network(format!("POP3 I/O: {}", e))
}

#[async_trait]
impl<S: AsyncRead + AsyncWrite + Unpin + Send> RetrievalClient for Pop3Client<S> {
    async fn message_count(&mut self) -> Result<u32, FetchError> {
        self.stat().await
    }

    async fn fetch_raw(&mut self, index: u32) -> Result<Vec<u8>, FetchError> {
        self.retr(index).await
    }

    async fn logout(&mut self) {
        if let Err(e) = self.quit().await {
            tracing::debug!("POP3 QUIT failed: {}", e);
        }
    }
}
