//! Outgoing draft composed by the user.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::{BodyFormat, Message};
use crate::config::MAX_ATTACHMENT_BYTES;

/// Reasons a draft is rejected before sending.
#[derive(Debug, Error)]
pub enum DraftError {
    /// A required field is blank.
    #[error("{0} is required")]
    MissingField(&'static str),

    /// Recipient does not look like an address.
    #[error("invalid recipient address: {0}")]
    InvalidRecipient(String),

    /// An attachment could not be inspected.
    #[error("cannot read attachment {path}: {source}")]
    Attachment {
        /// Offending path.
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Combined attachment payload exceeds the cap.
    #[error("attachments total {total} bytes, limit is {limit} bytes")]
    AttachmentsTooLarge {
        /// Combined size of all attachments.
        total: u64,
        /// Allowed maximum.
        limit: u64,
    },
}

/// A message ready to hand to the send path.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Draft {
    /// Recipient address.
    pub recipient: String,
    /// Subject line.
    pub subject: String,
    /// Body content.
    pub body: String,
    /// Body format.
    pub format: BodyFormat,
    /// Files to attach.
    pub attachments: Vec<PathBuf>,
}

impl Draft {
    /// Creates a plain-text draft without attachments.
    pub fn new(
        recipient: impl Into<String>,
        subject: impl Into<String>,
        body: impl Into<String>,
    ) -> Self {
        Self {
            recipient: recipient.into(),
            subject: subject.into(),
            body: body.into(),
            format: BodyFormat::Plain,
            attachments: Vec::new(),
        }
    }

    /// Starts a reply to `message`: addressed to its sender, subject
    /// prefixed with `Re: ` unless it already carries one, and the original
    /// headers quoted below an empty first paragraph.
    pub fn reply_to(message: &Message) -> Self {
        let subject = if has_reply_prefix(&message.subject) {
            message.subject.clone()
        } else {
            format!("{}{}", REPLY_PREFIX, message.subject)
        };
        let body = format!(
            "\n\n{rule}\nOriginal message:\nFrom: {from}\nSubject: {subject}\nDate: {date}\n{rule}\n\n",
            rule = QUOTE_RULE,
            from = message.sender,
            subject = message.subject,
            date = message.timestamp.format("%Y-%m-%d %H:%M:%S"),
        );
        Self::new(reply_address(&message.sender), subject, body)
    }

    /// Switches the body format.
    pub fn with_format(mut self, format: BodyFormat) -> Self {
        self.format = format;
        self
    }

    /// Adds an attachment path.
    pub fn attach(mut self, path: impl Into<PathBuf>) -> Self {
        self.attachments.push(path.into());
        self
    }

    /// Returns the file names of the attachments, in order.
    pub fn attachment_names(&self) -> Vec<String> {
        self.attachments.iter().map(|p| file_name(p)).collect()
    }

    /// Checks the composition rules: required fields, a plausible recipient,
    /// and the total attachment cap.
    pub async fn validate(&self) -> Result<(), DraftError> {
        if self.recipient.trim().is_empty() {
            return Err(DraftError::MissingField("recipient"));
        }
        if self.subject.trim().is_empty() {
            return Err(DraftError::MissingField("subject"));
        }
        if self.body.trim().is_empty() {
            return Err(DraftError::MissingField("body"));
        }

        let recipient = self.recipient.trim();
        if !recipient.contains('@') || !recipient.contains('.') {
            return Err(DraftError::InvalidRecipient(recipient.to_string()));
        }

        let mut total = 0u64;
        for path in &self.attachments {
            let meta = tokio::fs::metadata(path)
                .await
                .map_err(|source| DraftError::Attachment {
                    path: path.clone(),
                    source,
                })?;
            total += meta.len();
        }
        if total > MAX_ATTACHMENT_BYTES {
            return Err(DraftError::AttachmentsTooLarge {
                total,
                limit: MAX_ATTACHMENT_BYTES,
            });
        }

        Ok(())
    }
}

const REPLY_PREFIX: &str = "Re: ";

const QUOTE_RULE: &str = "----------------------------------------";

fn has_reply_prefix(subject: &str) -> bool {
    subject
        .trim_start()
        .get(..3)
        .is_some_and(|head| head.eq_ignore_ascii_case("re:"))
}

/// Bare address out of a `Name <address>` sender, or the sender as is.
fn reply_address(sender: &str) -> String {
    match (sender.rfind('<'), sender.rfind('>')) {
        (Some(open), Some(close)) if open < close => sender[open + 1..close].trim().to_string(),
        _ => sender.trim().to_string(),
    }
}

/// Final path component, or the whole path when it has none.
pub(crate) fn file_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.to_string_lossy().into_owned())
}
