//! In-memory mail backend.
//!
//! [`MemoryConnector`] stands in for real servers in demos and tests. It
//! holds a mailbox of raw messages and records everything submitted to it.
//! Clones share the same mailbox, so a test can keep one handle while the
//! client owns another.

use std::collections::HashSet;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;

use super::{
    ConnectError, FetchError, MailConnector, RetrievalClient, SendError, SubmissionClient,
};
use crate::domain::Account;

#[derive(Debug, Default)]
struct MemoryMailbox {
    messages: Vec<Vec<u8>>,
    failing: HashSet<u32>,
    required_credential: Option<String>,
    offline: bool,
    reject_submissions: bool,
    connect_delay: Duration,
    submitted: Vec<Vec<u8>>,
    retrieval_opens: usize,
    submission_opens: usize,
}

/// Shared in-memory mailbox implementing [`MailConnector`].
#[derive(Debug, Clone, Default)]
pub struct MemoryConnector {
    mailbox: Arc<Mutex<MemoryMailbox>>,
}

impl MemoryConnector {
    /// Creates an empty, reachable mailbox accepting any credential.
    pub fn new() -> Self {
        Self::default()
    }

    fn with_mailbox<T>(&self, f: impl FnOnce(&mut MemoryMailbox) -> T) -> T {
        let mut mailbox = self.mailbox.lock().unwrap_or_else(PoisonError::into_inner);
        f(&mut mailbox)
    }

    /// Appends a raw RFC 5322 message to the inbox.
    pub fn deliver(&self, raw: impl Into<Vec<u8>>) {
        let raw = raw.into();
        self.with_mailbox(|m| m.messages.push(raw));
    }

    /// Appends a plain-text message with a unique `Message-ID`.
    pub fn deliver_simple(&self, from: &str, subject: &str, body: &str) {
        self.with_mailbox(|m| {
            let sequence = m.messages.len() + 1;
            let raw = format!(
                "From: {from}\r\nTo: me@example.com\r\nSubject: {subject}\r\n\
                 Message-ID: <{sequence}.{stamp}@memory.invalid>\r\n\
                 Date: {date}\r\nContent-Type: text/plain; charset=utf-8\r\n\r\n{body}\r\n",
                stamp = Utc::now().timestamp_nanos_opt().unwrap_or_default(),
                date = Utc::now().to_rfc2822(),
            );
            m.messages.push(raw.into_bytes());
        });
    }

    /// Makes fetching message `index` fail.
    pub fn fail_fetch(&self, index: u32) {
        self.with_mailbox(|m| {
            m.failing.insert(index);
        });
    }

    /// Rejects logins whose credential differs from `credential`.
    pub fn require_credential(&self, credential: impl Into<String>) {
        let credential = credential.into();
        self.with_mailbox(|m| m.required_credential = Some(credential));
    }

    /// Makes every server operation fail with a network error.
    pub fn set_offline(&self, offline: bool) {
        self.with_mailbox(|m| m.offline = offline);
    }

    /// Makes the submission server refuse messages.
    pub fn reject_submissions(&self, reject: bool) {
        self.with_mailbox(|m| m.reject_submissions = reject);
    }

    /// Delays every open by `delay`.
    pub fn set_connect_delay(&self, delay: Duration) {
        self.with_mailbox(|m| m.connect_delay = delay);
    }

    /// Messages accepted for submission, formatted as sent.
    pub fn submitted(&self) -> Vec<Vec<u8>> {
        self.with_mailbox(|m| m.submitted.clone())
    }

    /// Number of retrieval sessions opened so far.
    pub fn retrieval_opens(&self) -> usize {
        self.with_mailbox(|m| m.retrieval_opens)
    }

    /// Number of submission channels opened so far.
    pub fn submission_opens(&self) -> usize {
        self.with_mailbox(|m| m.submission_opens)
    }

    fn credential_ok(&self, account: &Account) -> bool {
        self.with_mailbox(|m| {
            m.required_credential
                .as_ref()
                .map_or(true, |required| *required == account.credential)
        })
    }
}

#[async_trait]
impl MailConnector for MemoryConnector {
    async fn open_retrieval(
        &self,
        account: &Account,
    ) -> Result<Box<dyn RetrievalClient>, ConnectError> {
        let delay = self.with_mailbox(|m| {
            m.retrieval_opens += 1;
            m.connect_delay
        });
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }

        if self.with_mailbox(|m| m.offline) {
            return Err(ConnectError::Network(format!(
                "{} unreachable",
                account.incoming.authority()
            )));
        }
        if !self.credential_ok(account) {
            return Err(ConnectError::Auth(format!(
                "invalid credentials for {}",
                account.address
            )));
        }

        Ok(Box::new(MemoryRetrieval {
            connector: self.clone(),
        }))
    }

    async fn open_submission(
        &self,
        account: &Account,
    ) -> Result<Box<dyn SubmissionClient>, SendError> {
        let offline = self.with_mailbox(|m| {
            m.submission_opens += 1;
            m.offline
        });
        if offline {
            return Err(SendError::Network(format!(
                "{} unreachable",
                account.outgoing.authority()
            )));
        }
        if !self.credential_ok(account) {
            return Err(SendError::Auth(format!(
                "invalid credentials for {}",
                account.address
            )));
        }

        Ok(Box::new(MemorySubmission {
            connector: self.clone(),
        }))
    }
}

struct MemoryRetrieval {
    connector: MemoryConnector,
}

#[async_trait]
impl RetrievalClient for MemoryRetrieval {
    async fn message_count(&mut self) -> Result<u32, FetchError> {
        self.connector.with_mailbox(|m| {
            if m.offline {
                return Err(FetchError::Network("connection reset".to_string()));
            }
            Ok(u32::try_from(m.messages.len()).unwrap_or(u32::MAX))
        })
    }

    async fn fetch_raw(&mut self, index: u32) -> Result<Vec<u8>, FetchError> {
        self.connector.with_mailbox(|m| {
            if m.offline {
                return Err(FetchError::Network("connection reset".to_string()));
            }
            if m.failing.contains(&index) {
                return Err(FetchError::Malformed(format!("message {} is corrupt", index)));
            }
            index
                .checked_sub(1)
                .and_then(|i| m.messages.get(i as usize))
                .cloned()
                .ok_or_else(|| FetchError::Malformed(format!("no message {}", index)))
        })
    }

    async fn logout(&mut self) {}
}

struct MemorySubmission {
    connector: MemoryConnector,
}

#[async_trait]
impl SubmissionClient for MemorySubmission {
    async fn submit(&mut self, message: lettre::Message) -> Result<(), SendError> {
        self.connector.with_mailbox(|m| {
            if m.offline {
                return Err(SendError::Network("connection reset".to_string()));
            }
            if m.reject_submissions {
                return Err(SendError::Network("554 transaction failed".to_string()));
            }
            m.submitted.push(message.formatted());
            Ok(())
        })
    }

    async fn close(&mut self) {}
}
