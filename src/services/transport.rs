//! reqwest-backed HTTP transport

use async_trait::async_trait;
use futures::StreamExt;
use reqwest::{header, Client, Response};

use crate::error::{ChatError, Result};

use super::{ByteStream, HttpRequest, HttpTransport};

/// HTTP transport over a shared reqwest client
#[derive(Debug, Clone)]
pub struct ReqwestTransport {
    client: Client,
}

impl ReqwestTransport {
    /// Create a new transport
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be built
    pub fn new() -> Result<Self> {
        let client = Client::builder().build()?;
        Ok(Self { client })
    }

    /// Wrap an existing client
    #[must_use]
    pub fn with_client(client: Client) -> Self {
        Self { client }
    }

    async fn post(&self, request: &HttpRequest, accept: &'static str) -> Result<Response> {
        let mut builder = self
            .client
            .post(&request.url)
            .header(header::ACCEPT, accept)
            .json(&request.body);
        if let Some(token) = &request.bearer_token {
            builder = builder.bearer_auth(token);
        }

        let response = builder.send().await.map_err(|e| {
            if e.is_builder() {
                ChatError::Configuration(format!("invalid request to {}: {e}", request.url))
            } else {
                ChatError::Http(e)
            }
        })?;

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let body = match response.text().await {
                Ok(body) => body,
                Err(e) => {
                    tracing::debug!(status, error = %e, "could not read error body");
                    String::new()
                }
            };
            return Err(ChatError::Status { status, body });
        }

        Ok(response)
    }
}

#[async_trait]
impl HttpTransport for ReqwestTransport {
    async fn open_stream(&self, request: &HttpRequest) -> Result<ByteStream> {
        let response = self.post(request, "text/event-stream").await?;
        let body = response
            .bytes_stream()
            .map(|chunk| chunk.map_err(|e| ChatError::Stream(e.to_string())));
        Ok(Box::pin(body))
    }

    async fn send(&self, request: &HttpRequest) -> Result<String> {
        let response = self.post(request, "application/json").await?;
        Ok(response.text().await?)
    }
}
