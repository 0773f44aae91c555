//! Message domain types.
//!
//! Represents individual messages and the partitions that hold them.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::MessageId;

/// A retrieved or sent message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    /// Store-assigned identifier. `None` until the message enters the store.
    pub id: Option<MessageId>,
    /// Sender, as rendered from the `From` header.
    pub sender: String,
    /// Subject line.
    pub subject: String,
    /// Body content, plain text or HTML depending on `format`.
    pub body: String,
    /// Body format.
    pub format: BodyFormat,
    /// Attachment file names, in message order.
    pub attachments: Vec<String>,
    /// Received or sent time.
    pub timestamp: DateTime<Utc>,
    /// Whether the message has been opened.
    pub is_read: bool,
    /// Whether the message is favorited.
    pub is_favorite: bool,
    /// Position in the server mailbox when fetched.
    pub server_index: Option<u32>,
    /// `Message-ID` header of server-origin messages.
    pub remote_id: Option<String>,
}

impl Message {
    /// Creates an unread, unfavorited message stamped with the current time.
    pub fn new(
        sender: impl Into<String>,
        subject: impl Into<String>,
        body: impl Into<String>,
        format: BodyFormat,
    ) -> Self {
        Self {
            id: None,
            sender: sender.into(),
            subject: subject.into(),
            body: body.into(),
            format,
            attachments: Vec::new(),
            timestamp: Utc::now(),
            is_read: false,
            is_favorite: false,
            server_index: None,
            remote_id: None,
        }
    }

    /// Sets the attachment names.
    pub fn with_attachments(mut self, attachments: Vec<String>) -> Self {
        self.attachments = attachments;
        self
    }

    /// Records where the message came from on the server.
    pub fn with_origin(mut self, server_index: u32, remote_id: Option<String>) -> Self {
        self.server_index = Some(server_index);
        self.remote_id = remote_id;
        self
    }

    /// Returns a one-line preview for notifications.
    pub fn preview(&self) -> String {
        format!("From: {}\nSubject: {}", self.sender, self.subject)
    }
}

/// Body content format.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BodyFormat {
    /// Plain text.
    #[default]
    Plain,
    /// HTML.
    Rich,
}

/// One of the four message collections.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Partition {
    /// Received mail.
    Inbox,
    /// Mail sent from this client.
    Sent,
    /// Favorited mail. Entries reference messages owned by another partition.
    Favorite,
    /// Mail moved out of Inbox or Sent.
    Trash,
}

impl Partition {
    /// All partitions in sidebar order.
    pub const ALL: [Partition; 4] = [
        Partition::Inbox,
        Partition::Sent,
        Partition::Favorite,
        Partition::Trash,
    ];
}

impl fmt::Display for Partition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Partition::Inbox => "Inbox",
            Partition::Sent => "Sent",
            Partition::Favorite => "Favorite",
            Partition::Trash => "Trash",
        };
        f.write_str(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_message_defaults() {
        let msg = Message::new("a@example.com", "Hi", "Body", BodyFormat::Plain);
        assert!(msg.id.is_none());
        assert!(!msg.is_read);
        assert!(!msg.is_favorite);
        assert!(msg.attachments.is_empty());
        assert!(msg.server_index.is_none());
    }

    #[test]
    fn with_origin_sets_server_fields() {
        let msg = Message::new("a", "b", "c", BodyFormat::Rich)
            .with_origin(7, Some("<x@example.com>".to_string()));
        assert_eq!(msg.server_index, Some(7));
        assert_eq!(msg.remote_id.as_deref(), Some("<x@example.com>"));
    }

    #[test]
    fn preview_mentions_sender_and_subject() {
        let msg = Message::new("alice@example.com", "Lunch", "", BodyFormat::Plain);
        let preview = msg.preview();
        assert!(preview.contains("alice@example.com"));
        assert!(preview.contains("Lunch"));
    }

    #[test]
    fn partition_serialization() {
        let json = serde_json::to_string(&Partition::Favorite).unwrap();
        assert_eq!(json, "\"favorite\"");
        assert_eq!(Partition::Trash.to_string(), "Trash");
    }
}
