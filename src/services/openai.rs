//! Chat-completion backend wire format
//!
//! Supports:
//! - OpenAI official API
//! - OpenAI-compatible endpoints (Ollama, LM Studio, etc.)

use serde::{Deserialize, Serialize};

use crate::{
    config::BackendProfile,
    error::Result,
    messages::{ChatMessage, Exchange},
};

use super::{streaming::openai_stream::OpenAiErrorBody, HttpRequest};

/// Build the chat-completions request for an exchange
///
/// Prior messages are sent in order, followed by the new user input.
///
/// # Errors
///
/// Returns an error if the request body cannot be serialized
pub fn build_request(
    base_url: &str,
    profile: &BackendProfile,
    exchange: &Exchange,
    bearer_token: Option<String>,
) -> Result<HttpRequest> {
    let messages = exchange
        .history
        .iter()
        .map(OpenAiMessage::from)
        .chain(std::iter::once(OpenAiMessage {
            role: "user".to_string(),
            content: exchange.input.clone(),
        }))
        .collect();

    let request = OpenAiRequest {
        model: profile.effective_model().to_string(),
        messages,
        stream: exchange.stream,
    };

    Ok(HttpRequest {
        url: format!("{base_url}/chat/completions"),
        body: serde_json::to_value(&request)?,
        bearer_token,
    })
}

// OpenAI API types

#[derive(Debug, Clone, Serialize, Deserialize)]
struct OpenAiRequest {
    model: String,
    messages: Vec<OpenAiMessage>,
    stream: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct OpenAiMessage {
    role: String,
    content: String,
}

impl From<&ChatMessage> for OpenAiMessage {
    fn from(message: &ChatMessage) -> Self {
        Self {
            role: message.role.as_str().to_string(),
            content: message.content.clone(),
        }
    }
}

/// Buffered (non-streaming) completion response
#[derive(Debug, Clone, Deserialize)]
pub struct OpenAiCompletion {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub choices: Vec<OpenAiCompletionChoice>,
    #[serde(default)]
    pub error: Option<OpenAiErrorBody>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct OpenAiCompletionChoice {
    pub message: OpenAiCompletionMessage,
    #[serde(default)]
    pub finish_reason: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct OpenAiCompletionMessage {
    #[serde(default)]
    pub role: Option<String>,
    #[serde(default)]
    pub content: Option<String>,
}
