//! View state owned by the consumer.

use crate::domain::Partition;

use super::ErrorKind;

/// What the user is looking at and the status line beside it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ViewState {
    /// Partition currently shown.
    pub active_partition: Partition,
    /// Whether the retrieval session is up.
    pub connected: bool,
    /// Whether a send is running.
    pub sending: bool,
    /// Most recent failure, cleared on the next success.
    pub last_error: Option<(ErrorKind, String)>,
}

impl Default for ViewState {
    fn default() -> Self {
        Self {
            active_partition: Partition::Inbox,
            connected: false,
            sending: false,
            last_error: None,
        }
    }
}

impl ViewState {
    /// Switches the visible partition.
    pub fn navigate_to(&mut self, partition: Partition) {
        self.active_partition = partition;
    }

    /// Records a failure.
    pub fn record_error(&mut self, kind: ErrorKind, detail: impl Into<String>) {
        self.last_error = Some((kind, detail.into()));
    }

    /// Clears the last failure.
    pub fn clear_error(&mut self) {
        self.last_error = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn starts_on_inbox() {
        let state = ViewState::default();
        assert_eq!(state.active_partition, Partition::Inbox);
        assert!(!state.connected);
        assert!(state.last_error.is_none());
    }

    #[test]
    fn error_roundtrip() {
        let mut state = ViewState::default();
        state.record_error(ErrorKind::Auth, "bad password");
        assert_eq!(
            state.last_error,
            Some((ErrorKind::Auth, "bad password".to_string()))
        );
        state.clear_error();
        assert!(state.last_error.is_none());
    }
}
