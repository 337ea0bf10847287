//! UI-agnostic chat state
//!
//! The conversation shown on screen. Entries are only ever appended; the
//! history lives as long as the screen that owns it and is never persisted.

use serde::{Deserialize, Serialize};

/// Who produced a chat entry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Origin {
    User,
    Remote,
}

/// One line of conversation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatEntry {
    pub origin: Origin,
    pub text: String,
}

/// Append-only conversation history
#[derive(Debug, Clone, Default)]
pub struct ChatHistory {
    entries: Vec<ChatEntry>,
}

impl ChatHistory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, origin: Origin, text: impl Into<String>) {
        self.entries.push(ChatEntry {
            origin,
            text: text.into(),
        });
    }

    pub fn push_user(&mut self, text: impl Into<String>) {
        self.push(Origin::User, text);
    }

    pub fn push_remote(&mut self, text: impl Into<String>) {
        self.push(Origin::Remote, text);
    }

    pub fn entries(&self) -> &[ChatEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
