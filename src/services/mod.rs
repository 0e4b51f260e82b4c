//! Service layer for chat backends
//!
//! This module holds the seams to the outside world and the exchange pipeline
//! built on them:
//! - [`HttpTransport`]: open a streaming POST, or send a buffered one
//! - [`CredentialProvider`]: bearer token lookup per backend
//! - [`AssistantDirectory`]: known assistants of a retrieval backend
//! - [`ChatClient`]: the streaming façade callers use

pub mod chat;
pub mod credentials;
pub mod openai;
pub mod retrieval;
pub mod retry;
pub mod streaming;
pub mod transport;

use async_trait::async_trait;
use bytes::Bytes;
use futures::Stream;
use std::pin::Pin;

use crate::{config::BackendProfile, error::Result};

pub use chat::{ChatClient, SnapshotStream};
pub use credentials::{ConfiguredAssistants, EnvCredentials};
pub use retry::{ConnectionState, RetryContext, RetryDecision, RetryPolicy};
pub use streaming::{AnswerState, AnswerStatus, Fragment};
pub use transport::ReqwestTransport;

/// Raw response body, chunk by chunk
pub type ByteStream = Pin<Box<dyn Stream<Item = Result<Bytes>> + Send>>;

/// A JSON POST to a backend
#[derive(Debug, Clone, PartialEq)]
pub struct HttpRequest {
    pub url: String,
    pub body: serde_json::Value,
    pub bearer_token: Option<String>,
}

/// HTTP capability used by the exchange pipeline
///
/// Implementations report non-2xx responses as
/// [`ChatError::Status`](crate::error::ChatError::Status) with the body text.
#[async_trait]
pub trait HttpTransport: Send + Sync {
    /// Send the request and hand back the response body as it arrives
    async fn open_stream(&self, request: &HttpRequest) -> Result<ByteStream>;

    /// Send the request and return the whole response body
    async fn send(&self, request: &HttpRequest) -> Result<String>;
}

/// Credential lookup
#[async_trait]
pub trait CredentialProvider: Send + Sync {
    /// Bearer token for `profile`, if one is known
    async fn bearer_token(&self, profile: &BackendProfile) -> Option<String>;
}

/// Lists assistants a retrieval backend can dispatch to
#[async_trait]
pub trait AssistantDirectory: Send + Sync {
    async fn list_assistants(&self, profile: &BackendProfile) -> Result<Vec<String>>;
}
