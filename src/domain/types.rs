//! Core identifier types for domain entities.
//!
//! These newtype wrappers provide type safety for entity identifiers,
//! preventing accidental mixing of different ID types.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Store-assigned identifier for a message.
///
/// Opaque to the server: ids are minted locally when a message first enters
/// the [`MessageStore`](crate::storage::MessageStore) and stay stable for the
/// lifetime of the process.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct MessageId(pub String);

impl MessageId {
    /// Mints a fresh, process-unique identifier.
    pub fn generate() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }
}

impl fmt::Display for MessageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<String> for MessageId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for MessageId {
    fn from(s: &str) -> Self {
        Self(s.to_owned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn message_id_display() {
        let id = MessageId("msg-1".to_string());
        assert_eq!(id.to_string(), "msg-1");
    }

    #[test]
    fn generated_ids_are_unique() {
        use std::collections::HashSet;
        let ids: HashSet<MessageId> = (0..100).map(|_| MessageId::generate()).collect();
        assert_eq!(ids.len(), 100);
    }

    #[test]
    fn message_id_from_str() {
        let id: MessageId = "abc".into();
        assert_eq!(id, MessageId::from("abc".to_string()));
    }
}
