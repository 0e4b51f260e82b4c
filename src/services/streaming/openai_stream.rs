//! Chat-completion stream decoder
//!
//! Each payload is one `chat.completion.chunk` carrying a pure increment in
//! `choices[0].delta.content`. The end of the stream is signaled only by the
//! `[DONE]` line, which the frame reader handles; `finish_reason` is recorded
//! but never ends the exchange by itself.

use serde::Deserialize;

use crate::{config::BackendKind, error::ChatError, services::openai::OpenAiCompletion};

use super::{Fragment, StreamDecoder, TerminalMetadata};

/// OpenAI stream chunk
#[derive(Debug, Clone, Deserialize)]
pub struct OpenAiStreamChunk {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub created: Option<u64>,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub choices: Vec<OpenAiChoice>,
    #[serde(default)]
    pub error: Option<OpenAiErrorBody>,
}

/// OpenAI choice in stream
#[derive(Debug, Clone, Deserialize)]
pub struct OpenAiChoice {
    #[serde(default)]
    pub delta: OpenAiDelta,
    #[serde(default)]
    pub finish_reason: Option<String>,
}

/// OpenAI delta content
#[derive(Debug, Clone, Default, Deserialize)]
pub struct OpenAiDelta {
    #[serde(default)]
    pub role: Option<String>,
    #[serde(default)]
    pub content: Option<String>,
}

/// Error object some compatible servers put in-band
#[derive(Debug, Clone, Deserialize)]
pub struct OpenAiErrorBody {
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default, rename = "type")]
    pub error_type: Option<String>,
}

impl OpenAiErrorBody {
    fn describe(&self) -> String {
        match (&self.error_type, &self.message) {
            (Some(kind), Some(message)) => format!("{kind}: {message}"),
            (None, Some(message)) => message.clone(),
            (Some(kind), None) => kind.clone(),
            (None, None) => "backend reported an error".to_string(),
        }
    }
}

/// Decoder for chat-completion streams
#[derive(Debug, Default)]
pub struct OpenAiStreamDecoder {
    /// Completion ID
    id: Option<String>,

    /// Model name
    model: Option<String>,

    /// Stop reason
    finish_reason: Option<String>,

    /// Payloads that failed to parse
    skipped: usize,
}

impl OpenAiStreamDecoder {
    /// Create a new decoder
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn finish_reason(&self) -> Option<&str> {
        self.finish_reason.as_deref()
    }

    #[must_use]
    pub fn skipped(&self) -> usize {
        self.skipped
    }
}

impl StreamDecoder for OpenAiStreamDecoder {
    fn backend(&self) -> BackendKind {
        BackendKind::OpenAi
    }

    fn decode(&mut self, payload: &str) -> Option<Fragment> {
        let chunk: OpenAiStreamChunk = match serde_json::from_str(payload) {
            Ok(chunk) => chunk,
            Err(e) => {
                self.skipped += 1;
                let error = ChatError::MalformedFrame(e.to_string());
                tracing::warn!(%error, "skipping completion chunk: {payload}");
                return None;
            }
        };

        if let Some(error) = chunk.error {
            return Some(Fragment::ProtocolError {
                message: error.describe(),
            });
        }

        if self.id.is_none() && chunk.id.is_some() {
            self.id = chunk.id;
            self.model = chunk.model;
            tracing::debug!(id = ?self.id, model = ?self.model, "completion stream started");
        }

        let choice = chunk.choices.into_iter().next()?;
        if let Some(reason) = choice.finish_reason {
            self.finish_reason = Some(reason);
        }

        match choice.delta.content {
            Some(content) if !content.is_empty() => Some(Fragment::incremental(content)),
            _ => None,
        }
    }

    fn finish(&mut self) -> Option<Fragment> {
        tracing::debug!(
            finish_reason = ?self.finish_reason,
            skipped = self.skipped,
            "completion stream ended"
        );
        None
    }

    fn decode_body(&mut self, body: &str) -> Fragment {
        match serde_json::from_str::<OpenAiCompletion>(body) {
            Ok(completion) => {
                if let Some(error) = completion.error {
                    return Fragment::ProtocolError {
                        message: error.describe(),
                    };
                }
                let text = completion
                    .choices
                    .into_iter()
                    .next()
                    .and_then(|choice| choice.message.content)
                    .unwrap_or_default();
                Fragment::Terminal {
                    final_text: text,
                    metadata: TerminalMetadata::default(),
                }
            }
            Err(e) => Fragment::ProtocolError {
                message: format!("Failed to parse completion: {e}"),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn chunk(content: &str) -> String {
        format!(
            r#"{{"id":"chatcmpl-123","object":"chat.completion.chunk","created":1234567890,"model":"gpt-4","choices":[{{"index":0,"delta":{{"content":{}}},"finish_reason":null}}]}}"#,
            serde_json::to_string(content).unwrap()
        )
    }

    #[test]
    fn test_simple_text_stream() {
        let mut decoder = OpenAiStreamDecoder::new();

        assert_eq!(decoder.decode(&chunk("Hello")), Some(Fragment::incremental("Hello")));
        assert_eq!(decoder.decode(&chunk(" world")), Some(Fragment::incremental(" world")));

        let stop = r#"{"id":"chatcmpl-123","object":"chat.completion.chunk","created":1234567890,"model":"gpt-4","choices":[{"index":0,"delta":{},"finish_reason":"stop"}]}"#;
        assert_eq!(decoder.decode(stop), None);
        assert_eq!(decoder.finish_reason(), Some("stop"));
        assert_eq!(decoder.finish(), None);
    }

    #[test]
    fn test_role_only_and_empty_content_frames() {
        let mut decoder = OpenAiStreamDecoder::new();
        assert_eq!(
            decoder.decode(r#"{"choices":[{"delta":{"role":"assistant"}}]}"#),
            None
        );
        assert_eq!(decoder.decode(r#"{"choices":[{"delta":{"content":""}}]}"#), None);
        assert_eq!(decoder.decode(r#"{"choices":[]}"#), None);
    }

    #[test]
    fn test_malformed_payload_is_skipped() {
        let mut decoder = OpenAiStreamDecoder::new();
        assert_eq!(decoder.decode("not json at all"), None);
        assert_eq!(decoder.decode(r#"{"choices":[{"delta":{"content":"x"#), None);
        assert_eq!(decoder.decode(r#"{"choices":"nope"}"#), None);
        assert_eq!(decoder.skipped(), 3);

        assert_eq!(decoder.decode(&chunk("ok")), Some(Fragment::incremental("ok")));
    }

    #[test]
    fn test_in_band_error() {
        let mut decoder = OpenAiStreamDecoder::new();
        let fragment =
            decoder.decode(r#"{"error":{"message":"context too long","type":"invalid_request_error"}}"#);
        assert_eq!(
            fragment,
            Some(Fragment::ProtocolError {
                message: "invalid_request_error: context too long".to_string()
            })
        );
    }

    #[test]
    fn test_decode_body() {
        let mut decoder = OpenAiStreamDecoder::new();
        let body = r#"{"id":"chatcmpl-1","object":"chat.completion","created":1,"model":"gpt-4","choices":[{"index":0,"message":{"role":"assistant","content":"Hi there"},"finish_reason":"stop"}]}"#;
        assert_eq!(
            decoder.decode_body(body),
            Fragment::Terminal {
                final_text: "Hi there".to_string(),
                metadata: TerminalMetadata::default(),
            }
        );

        assert!(matches!(
            decoder.decode_body("<html>bad gateway</html>"),
            Fragment::ProtocolError { .. }
        ));
    }
}
