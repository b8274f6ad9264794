//! Per-session state published to the display layer

use serde::{Deserialize, Serialize};

use super::message::Message;
use crate::log::{LogAddress, LogEntry};

/// The mutable aggregate of one chat session.
///
/// Held in a [`StateContainer`](crate::state::StateContainer) and replaced,
/// never patched in place, on every reconciliation pass.
#[derive(Debug, Clone, PartialEq)]
pub struct SessionState {
    /// Visible log entries in linear order
    pub entries: Vec<LogEntry>,
    /// Messages derived from `entries`
    pub messages: Vec<Message>,
    /// True until the first reconciliation pass completes
    pub is_loading: bool,
    /// Address of the underlying log once opened
    pub address: Option<LogAddress>,
    /// Error from the most recent failed pass, cleared by the next success
    pub last_error: Option<String>,
}

impl Default for SessionState {
    fn default() -> Self {
        Self {
            entries: Vec::new(),
            messages: Vec::new(),
            is_loading: true,
            address: None,
            last_error: None,
        }
    }
}

impl SessionState {
    /// The part of the state the display layer renders.
    pub fn view(&self) -> ChatView {
        ChatView {
            messages: self.messages.clone(),
            is_loading: self.is_loading,
        }
    }
}

/// Display boundary: the ordered messages plus a loading flag.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatView {
    pub messages: Vec<Message>,
    pub is_loading: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_state_is_loading() {
        let state = SessionState::default();
        assert!(state.is_loading);
        assert!(state.messages.is_empty());
        assert!(state.view().is_loading);
    }
}
