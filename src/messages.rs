//! Message types for chat exchanges
//!
//! An [`Exchange`] is one question/answer round-trip: the prior conversation,
//! the new user input and which backend should answer it. [`DocumentReference`]
//! describes a retrieval citation attached to a finished answer.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::config::BackendKind;

/// Message role in the conversation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
    System,
}

impl Role {
    /// Wire name used by chat-completion style APIs
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::User => "user",
            Self::Assistant => "assistant",
            Self::System => "system",
        }
    }
}

/// A single message in the conversation history
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: Role,
    pub content: String,
    pub timestamp: DateTime<Utc>,
}

impl ChatMessage {
    /// Create a new user message
    #[must_use]
    pub fn user(text: impl Into<String>) -> Self {
        Self::new(Role::User, text)
    }

    /// Create a new assistant message
    #[must_use]
    pub fn assistant(text: impl Into<String>) -> Self {
        Self::new(Role::Assistant, text)
    }

    /// Create a new system message
    #[must_use]
    pub fn system(text: impl Into<String>) -> Self {
        Self::new(Role::System, text)
    }

    fn new(role: Role, text: impl Into<String>) -> Self {
        Self {
            role,
            content: text.into(),
            timestamp: Utc::now(),
        }
    }
}

/// One question/answer interaction, immutable once dispatched
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Exchange {
    pub id: Uuid,
    pub history: Vec<ChatMessage>,
    pub input: String,
    pub backend: BackendKind,
    pub stream: bool,

    /// Assistant to address on retrieval backends; first known one when unset
    #[serde(skip_serializing_if = "Option::is_none")]
    pub assistant_id: Option<String>,

    /// Server-side session to continue on retrieval backends
    #[serde(skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
}

impl Exchange {
    /// Create a streaming exchange with no history
    #[must_use]
    pub fn new(backend: BackendKind, input: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            history: Vec::new(),
            input: input.into(),
            backend,
            stream: true,
            assistant_id: None,
            session_id: None,
        }
    }

    #[must_use]
    pub fn with_history(mut self, history: Vec<ChatMessage>) -> Self {
        self.history = history;
        self
    }

    #[must_use]
    pub fn with_stream(mut self, stream: bool) -> Self {
        self.stream = stream;
        self
    }

    #[must_use]
    pub fn with_assistant(mut self, assistant_id: impl Into<String>) -> Self {
        self.assistant_id = Some(assistant_id.into());
        self
    }

    #[must_use]
    pub fn with_session(mut self, session_id: impl Into<String>) -> Self {
        self.session_id = Some(session_id.into());
        self
    }
}

/// Retrieval citation attached to a finished answer
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DocumentReference {
    pub id: String,
    pub name: String,
    #[serde(rename = "type")]
    pub doc_type: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub page: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub score: Option<f64>,
    pub content: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_create_user_message() {
        let msg = ChatMessage::user("Hello");
        assert_eq!(msg.role, Role::User);
        assert_eq!(msg.content, "Hello");
        assert_eq!(msg.role.as_str(), "user");
    }

    #[test]
    fn test_exchange_builder() {
        let exchange = Exchange::new(BackendKind::Retrieval, "What is RAG?")
            .with_history(vec![ChatMessage::user("hi"), ChatMessage::assistant("hello")])
            .with_assistant("asst-1")
            .with_stream(false);

        assert_eq!(exchange.history.len(), 2);
        assert_eq!(exchange.assistant_id.as_deref(), Some("asst-1"));
        assert!(!exchange.stream);
        assert!(exchange.session_id.is_none());
    }

    #[test]
    fn test_exchange_ids_are_unique() {
        let a = Exchange::new(BackendKind::OpenAi, "a");
        let b = Exchange::new(BackendKind::OpenAi, "a");
        assert_ne!(a.id, b.id);
    }
}
