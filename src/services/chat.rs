//! Streaming chat façade
//!
//! [`ChatClient::submit`] turns an [`Exchange`] into a lazy sequence of
//! [`AnswerState`] snapshots. The sequence always yields at least one snapshot
//! and always ends with a `Finished` or `Failed` one. Dropping it closes the
//! underlying connection; nothing keeps running in the background.

use std::{pin::Pin, sync::Arc, time::Duration};

use futures::{stream, Stream, StreamExt};

use crate::{
    config::{BackendKind, Config},
    error::{ChatError, Result},
    messages::Exchange,
};

use super::{
    credentials::{ConfiguredAssistants, EnvCredentials},
    openai, retrieval,
    retry::RetryPolicy,
    streaming::{decoder_for, line_stream, Accumulator, AnswerState, FrameReader, LineClass},
    transport::ReqwestTransport,
    AssistantDirectory, ByteStream, CredentialProvider, HttpRequest, HttpTransport,
};

/// Snapshot sequence of one exchange
pub type SnapshotStream = Pin<Box<dyn Stream<Item = AnswerState> + Send>>;

/// Entry point for submitting exchanges
///
/// Cheap to clone; exchanges submitted through the same client are independent
/// and may run concurrently.
#[derive(Clone)]
pub struct ChatClient {
    config: Arc<Config>,
    transport: Arc<dyn HttpTransport>,
    credentials: Arc<dyn CredentialProvider>,
    assistants: Arc<dyn AssistantDirectory>,
}

impl ChatClient {
    /// Create a client from explicit capabilities
    #[must_use]
    pub fn new(
        config: Config,
        transport: Arc<dyn HttpTransport>,
        credentials: Arc<dyn CredentialProvider>,
        assistants: Arc<dyn AssistantDirectory>,
    ) -> Self {
        Self {
            config: Arc::new(config),
            transport,
            credentials,
            assistants,
        }
    }

    /// Create a client using reqwest, environment credentials and configured assistants
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be built
    pub fn from_config(config: Config) -> Result<Self> {
        Ok(Self::new(
            config,
            Arc::new(ReqwestTransport::new()?),
            Arc::new(EnvCredentials),
            Arc::new(ConfiguredAssistants),
        ))
    }

    #[must_use]
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Submit an exchange and observe its answer as it arrives
    #[must_use]
    pub fn submit(&self, exchange: Exchange) -> SnapshotStream {
        let client = self.clone();
        Box::pin(async_stream::stream! {
            tracing::info!(
                exchange = %exchange.id,
                backend = %exchange.backend,
                stream = exchange.stream,
                "submitting exchange"
            );

            let mut accumulator = Accumulator::new();
            let request = match client.prepare_request(&exchange).await {
                Ok(request) => request,
                Err(e) => {
                    tracing::warn!(exchange = %exchange.id, error = %e, "exchange rejected");
                    if let Some(state) = accumulator.fail(e.to_string()) {
                        yield state;
                    }
                    return;
                }
            };

            let policy = RetryPolicy::new(client.config.retry);
            let mut decoder = decoder_for(exchange.backend);

            if !exchange.stream {
                let state = match policy.execute(|_| client.transport.send(&request)).await {
                    Ok(body) => accumulator.apply(decoder.decode_body(&body)),
                    Err(e) => accumulator.fail(e.to_string()),
                };
                if let Some(state) = state.or_else(|| accumulator.finish()) {
                    yield state;
                }
                return;
            }

            let body = match policy.execute(|_| open_body(client.transport.as_ref(), &request)).await {
                Ok(body) => body,
                Err(e) => {
                    tracing::warn!(exchange = %exchange.id, error = %e, "connection failed");
                    if let Some(state) = accumulator.fail(e.to_string()) {
                        yield state;
                    }
                    return;
                }
            };

            let idle_timeout = client.config.idle_timeout();
            let mut lines = Box::pin(line_stream(body));
            let mut reader = FrameReader::new();

            loop {
                let next = match next_line(&mut lines, idle_timeout).await {
                    Ok(next) => next,
                    Err(e) => {
                        if let Some(state) = accumulator.fail(e.to_string()) {
                            yield state;
                        }
                        return;
                    }
                };

                let line = match next {
                    None => break,
                    Some(Ok(line)) => line,
                    Some(Err(e)) => {
                        tracing::warn!(exchange = %exchange.id, error = %e, "stream dropped");
                        if let Some(state) = accumulator.fail(e.to_string()) {
                            yield state;
                        }
                        return;
                    }
                };

                decoder.record_line(&line);
                match reader.classify(&line) {
                    LineClass::Done => break,
                    LineClass::Payload(payload) => {
                        let Some(fragment) = decoder.decode(&payload) else {
                            continue;
                        };
                        if let Some(state) = accumulator.apply(fragment) {
                            let closed = state.is_terminal();
                            yield state;
                            if closed {
                                tracing::info!(exchange = %exchange.id, "exchange closed in-band");
                                return;
                            }
                        }
                    }
                    LineClass::Blank | LineClass::KeepAlive | LineClass::Ignored => {}
                }
            }

            if let Some(fragment) = decoder.finish() {
                if let Some(state) = accumulator.apply(fragment) {
                    yield state;
                }
            }
            if let Some(state) = accumulator.finish() {
                yield state;
            }
            tracing::info!(exchange = %exchange.id, "exchange finished");
        })
    }

    /// Resolve backend, credential and assistant into a concrete request
    async fn prepare_request(&self, exchange: &Exchange) -> Result<HttpRequest> {
        let profile = self.config.backend(exchange.backend)?;

        let token = self.credentials.bearer_token(profile).await;
        if token.is_none() && profile.requires_api_key {
            return Err(ChatError::Configuration(format!(
                "missing credential for backend {}",
                profile.name
            )));
        }

        let base_url = profile.effective_base_url().ok_or_else(|| {
            ChatError::Configuration(format!("no base URL for backend {}", profile.name))
        })?;

        match exchange.backend {
            BackendKind::OpenAi => openai::build_request(&base_url, profile, exchange, token),
            BackendKind::Retrieval => {
                let assistant_id = match &exchange.assistant_id {
                    Some(id) => id.clone(),
                    None => self
                        .assistants
                        .list_assistants(profile)
                        .await?
                        .into_iter()
                        .next()
                        .ok_or_else(|| {
                            ChatError::Configuration(format!(
                                "no assistant available on backend {}",
                                profile.name
                            ))
                        })?,
                };
                retrieval::build_request(&base_url, &assistant_id, exchange, token)
            }
        }
    }
}

/// Open the response body, failing when it ends before the first byte
async fn open_body(transport: &dyn HttpTransport, request: &HttpRequest) -> Result<ByteStream> {
    let mut body = transport.open_stream(request).await?;
    match body.next().await {
        Some(Ok(first)) => Ok(Box::pin(stream::once(async move { Ok(first) }).chain(body))),
        Some(Err(e)) => Err(ChatError::Transport(e.to_string())),
        None => Err(ChatError::Transport("empty response body".to_string())),
    }
}

/// Next line, or an error once `idle_timeout` passes in silence
async fn next_line<S>(lines: &mut S, idle_timeout: Option<Duration>) -> Result<Option<Result<String>>>
where
    S: Stream<Item = Result<String>> + Unpin,
{
    match idle_timeout {
        None => Ok(lines.next().await),
        Some(limit) => tokio::time::timeout(limit, lines.next())
            .await
            .map_err(|_| ChatError::Stream(format!("stream idle for {}s", limit.as_secs()))),
    }
}
