//! Streaming support for chat backend responses
//!
//! Bytes arrive from the transport, the [`frame_reader`] cuts them into lines
//! and classifies them, a per-backend [`StreamDecoder`] turns payloads into
//! [`Fragment`]s and the [`Accumulator`] folds fragments into [`AnswerState`]
//! snapshots for the caller.

pub mod accumulator;
pub mod frame_reader;
pub mod openai_stream;
pub mod retrieval_stream;

pub use accumulator::Accumulator;
pub use frame_reader::{line_stream, FrameReader, LineBuffer, LineClass, DONE_MARKER};
pub use openai_stream::OpenAiStreamDecoder;
pub use retrieval_stream::{RetrievalStreamDecoder, FALLBACK_ANSWER};

use serde::{Deserialize, Serialize};

use crate::{config::BackendKind, messages::DocumentReference};

/// A decoded unit of streaming progress
#[derive(Debug, Clone, PartialEq)]
pub enum Fragment {
    /// New answer text; cumulative text replaces, incremental text appends
    ContentDelta { text: String, is_cumulative: bool },

    /// The backend has no more content
    Terminal {
        final_text: String,
        metadata: TerminalMetadata,
    },

    /// The backend reported a failure in-band, or the stream broke
    ProtocolError { message: String },
}

impl Fragment {
    #[must_use]
    pub fn incremental(text: impl Into<String>) -> Self {
        Self::ContentDelta {
            text: text.into(),
            is_cumulative: false,
        }
    }

    #[must_use]
    pub fn cumulative(text: impl Into<String>) -> Self {
        Self::ContentDelta {
            text: text.into(),
            is_cumulative: true,
        }
    }

    /// Terminal fragment that keeps whatever text was accumulated
    #[must_use]
    pub fn finished() -> Self {
        Self::Terminal {
            final_text: String::new(),
            metadata: TerminalMetadata::default(),
        }
    }
}

/// Trailing metadata delivered with a terminal fragment
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TerminalMetadata {
    pub documents: Vec<DocumentReference>,
    pub session_id: Option<String>,
}

/// Lifecycle of one in-flight answer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AnswerStatus {
    Running,
    Finished,
    Failed,
}

/// Snapshot of an answer as seen by the caller
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnswerState {
    pub text: String,
    pub references: Vec<DocumentReference>,
    pub status: AnswerStatus,

    /// Human-readable failure, set only when `status` is `Failed`
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,

    /// Server-side session the answer belongs to, when the backend has one
    #[serde(skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
}

impl AnswerState {
    #[must_use]
    pub const fn new() -> Self {
        Self {
            text: String::new(),
            references: Vec::new(),
            status: AnswerStatus::Running,
            error: None,
            session_id: None,
        }
    }

    /// No further snapshot follows this one
    #[must_use]
    pub const fn is_terminal(&self) -> bool {
        !matches!(self.status, AnswerStatus::Running)
    }
}

impl Default for AnswerState {
    fn default() -> Self {
        Self::new()
    }
}

/// Per-backend payload decoder
///
/// One decoder lives for exactly one exchange; it may keep state across
/// payloads (fallback counters, transcripts) but never shares it.
pub trait StreamDecoder: Send {
    /// Backend this decoder understands
    fn backend(&self) -> BackendKind;

    /// Observe a raw, non-blank line before classification
    fn record_line(&mut self, _line: &str) {}

    /// Decode one data payload; `None` means nothing to report for it
    fn decode(&mut self, payload: &str) -> Option<Fragment>;

    /// Called once after the source is exhausted
    fn finish(&mut self) -> Option<Fragment> {
        None
    }

    /// Decode a complete buffered (non-streaming) response body
    fn decode_body(&mut self, body: &str) -> Fragment;
}

/// Create the decoder for a backend
#[must_use]
pub fn decoder_for(kind: BackendKind) -> Box<dyn StreamDecoder> {
    match kind {
        BackendKind::OpenAi => Box::new(OpenAiStreamDecoder::new()),
        BackendKind::Retrieval => Box::new(RetrievalStreamDecoder::new()),
    }
}
