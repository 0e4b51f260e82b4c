//! Line-oriented frame reader
//!
//! Both backends send `data:`-prefixed lines, but only loosely: blank lines and
//! keep-alives pad the stream, and the retrieval backend sometimes drops the
//! prefix on its first lines. The reader cuts bytes into lines and classifies
//! them; it never interprets JSON.

use bytes::Bytes;
use futures::{Stream, StreamExt};

use crate::error::Result;

/// Terminal sentinel of chat-completion streams
pub const DONE_MARKER: &str = "[DONE]";

/// Lines that only keep the connection alive
const KEEP_ALIVE_MARKERS: &[&str] = &[
    ":",
    ": ping",
    ":ping",
    ": keep-alive",
    ":keep-alive",
    "ping",
    "heartbeat",
];

/// How many leading lines may omit the `data:` prefix
const UNPREFIXED_GRACE_LINES: usize = 2;

/// Classification of one line
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LineClass {
    Blank,
    KeepAlive,
    /// Data payload candidate, prefix stripped and trimmed
    Payload(String),
    /// `[DONE]`: stop reading
    Done,
    Ignored,
}

/// Classifies lines in stream order
#[derive(Debug, Default)]
pub struct FrameReader {
    /// Non-blank, non-keep-alive lines seen so far
    lines_seen: usize,
}

impl FrameReader {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Classify the next line of the stream
    pub fn classify(&mut self, line: &str) -> LineClass {
        let line = line.trim();
        if line.is_empty() {
            return LineClass::Blank;
        }
        if KEEP_ALIVE_MARKERS.contains(&line) {
            tracing::debug!("keep-alive: {line}");
            return LineClass::KeepAlive;
        }

        self.lines_seen += 1;

        let payload = if let Some(rest) = line.strip_prefix("data:") {
            rest.trim()
        } else if self.lines_seen <= UNPREFIXED_GRACE_LINES {
            line
        } else {
            tracing::debug!("ignoring non-data line: {line}");
            return LineClass::Ignored;
        };

        match payload {
            "" => LineClass::Blank,
            DONE_MARKER => LineClass::Done,
            _ => LineClass::Payload(payload.to_string()),
        }
    }
}

/// Splits a byte stream into lines
///
/// Handles `\n` and `\r\n` endings, lines split across chunks and UTF-8
/// sequences split across chunks.
#[derive(Debug, Default)]
pub struct LineBuffer {
    /// Decoded text not yet terminated by a newline
    line_buffer: String,

    /// Trailing bytes of an unfinished UTF-8 sequence
    incomplete_utf8: Vec<u8>,
}

impl LineBuffer {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a chunk and return every line it completes
    pub fn push(&mut self, chunk: &[u8]) -> Vec<String> {
        let mut bytes = std::mem::take(&mut self.incomplete_utf8);
        bytes.extend_from_slice(chunk);
        self.decode_into_buffer(&bytes);

        let mut lines = Vec::new();
        while let Some(line_end) = self.line_buffer.find('\n') {
            let line = self.line_buffer[..line_end].trim_end_matches('\r').to_string();
            self.line_buffer.drain(..=line_end);
            lines.push(line);
        }
        lines
    }

    /// Return the unterminated last line, if any
    pub fn flush(&mut self) -> Option<String> {
        if !self.incomplete_utf8.is_empty() {
            let rest = std::mem::take(&mut self.incomplete_utf8);
            self.line_buffer.push_str(&String::from_utf8_lossy(&rest));
        }
        if self.line_buffer.is_empty() {
            return None;
        }
        let line = std::mem::take(&mut self.line_buffer);
        Some(line.trim_end_matches('\r').to_string())
    }

    fn decode_into_buffer(&mut self, mut bytes: &[u8]) {
        loop {
            match std::str::from_utf8(bytes) {
                Ok(text) => {
                    self.line_buffer.push_str(text);
                    return;
                }
                Err(e) => {
                    let (valid, rest) = bytes.split_at(e.valid_up_to());
                    // valid_up_to guarantees this prefix is UTF-8
                    self.line_buffer
                        .push_str(std::str::from_utf8(valid).unwrap_or_default());
                    match e.error_len() {
                        None => {
                            self.incomplete_utf8 = rest.to_vec();
                            return;
                        }
                        Some(len) => {
                            tracing::warn!("invalid UTF-8 in stream, replacing {len} byte(s)");
                            self.line_buffer.push(char::REPLACEMENT_CHARACTER);
                            bytes = &rest[len..];
                        }
                    }
                }
            }
        }
    }
}

/// Lazily turn a byte stream into lines
///
/// The sequence ends when the source ends; a source error is passed through
/// and ends the sequence. Dropping the returned stream drops the source.
pub fn line_stream<S>(source: S) -> impl Stream<Item = Result<String>> + Send
where
    S: Stream<Item = Result<Bytes>> + Send + 'static,
{
    async_stream::stream! {
        let mut buffer = LineBuffer::new();
        let mut source = Box::pin(source);

        while let Some(chunk) = source.next().await {
            match chunk {
                Ok(bytes) => {
                    for line in buffer.push(&bytes) {
                        yield Ok(line);
                    }
                }
                Err(e) => {
                    yield Err(e);
                    return;
                }
            }
        }

        if let Some(line) = buffer.flush() {
            yield Ok(line);
        }
    }
}
