//! Error types for chatstream

use std::path::PathBuf;

use thiserror::Error;

/// Result type alias using [`ChatError`]
pub type Result<T> = std::result::Result<T, ChatError>;

/// Main error type for chatstream
#[derive(Debug, Error)]
pub enum ChatError {
    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Configuration parse error
    #[error("Failed to parse config at {path}: {message}")]
    ConfigParse { path: PathBuf, message: String },

    /// Missing credential, unknown backend, no assistant to dispatch to
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// Connection refused, reset, empty body and similar network failures
    #[error("{0}")]
    Transport(String),

    /// Non-2xx response; `body` is the server's error text verbatim
    #[error("HTTP {status}: {body}")]
    Status { status: u16, body: String },

    /// HTTP request error
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// A single payload that no decoder tier could make sense of
    #[error("Malformed frame: {0}")]
    MalformedFrame(String),

    /// The stream broke after it was opened
    #[error("Stream error: {0}")]
    Stream(String),

    /// JSON serialization/deserialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Generic error with context
    #[error("{0}")]
    Other(String),
}

impl ChatError {
    /// Whether the connection phase may try again after this error.
    ///
    /// Configuration problems are fatal for the exchange; anything the network
    /// or the server produced is worth another attempt.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::Transport(_) | Self::Status { .. } | Self::Http(_) | Self::Io(_)
        )
    }
}

impl From<String> for ChatError {
    fn from(s: String) -> Self {
        ChatError::Other(s)
    }
}

impl From<&str> for ChatError {
    fn from(s: &str) -> Self {
        ChatError::Other(s.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retry_classification() {
        assert!(ChatError::Transport("connection refused".into()).is_retryable());
        assert!(ChatError::Status {
            status: 503,
            body: "busy".into()
        }
        .is_retryable());
        assert!(!ChatError::Configuration("no key".into()).is_retryable());
        assert!(!ChatError::MalformedFrame("x".into()).is_retryable());
    }

    #[test]
    fn test_status_message_carries_body() {
        let err = ChatError::Status {
            status: 500,
            body: r#"{"error":"boom"}"#.into(),
        };
        assert_eq!(err.to_string(), r#"HTTP 500: {"error":"boom"}"#);
    }

    #[test]
    fn test_transport_message_is_verbatim() {
        let err = ChatError::Transport("connection reset by peer".into());
        assert_eq!(err.to_string(), "connection reset by peer");
    }
}
