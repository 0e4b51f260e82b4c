//! Answer accumulator
//!
//! Owns the evolving answer of one exchange. Decoders say per fragment whether
//! text is cumulative (replace) or incremental (append); the accumulator trusts
//! that flag. Once the answer is finished or failed it no longer changes.

use super::{AnswerState, AnswerStatus, Fragment};

#[derive(Debug, Default)]
pub struct Accumulator {
    state: AnswerState,
}

impl Accumulator {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Current snapshot
    #[must_use]
    pub fn snapshot(&self) -> AnswerState {
        self.state.clone()
    }

    /// Whether a terminal snapshot has been produced
    #[must_use]
    pub const fn is_closed(&self) -> bool {
        self.state.is_terminal()
    }

    /// Apply a fragment and return the resulting snapshot
    ///
    /// Returns `None` once the answer is closed; nothing is mutated then.
    pub fn apply(&mut self, fragment: Fragment) -> Option<AnswerState> {
        if self.is_closed() {
            tracing::debug!("ignoring fragment after answer closed");
            return None;
        }

        match fragment {
            Fragment::ContentDelta {
                text,
                is_cumulative: false,
            } => self.state.text.push_str(&text),

            Fragment::ContentDelta {
                text,
                is_cumulative: true,
            } => {
                if text.is_empty() && !self.state.text.is_empty() {
                    tracing::debug!("ignoring empty cumulative answer");
                } else {
                    if !text.starts_with(&self.state.text) {
                        tracing::debug!(
                            previous_len = self.state.text.len(),
                            new_len = text.len(),
                            "cumulative answer rewrote earlier text"
                        );
                    }
                    self.state.text = text;
                }
            }

            Fragment::Terminal {
                final_text,
                metadata,
            } => {
                if !final_text.is_empty() {
                    self.state.text = final_text;
                }
                self.state.references = metadata.documents;
                if metadata.session_id.is_some() {
                    self.state.session_id = metadata.session_id;
                }
                self.state.status = AnswerStatus::Finished;
            }

            Fragment::ProtocolError { message } => {
                self.state.error = Some(message);
                self.state.status = AnswerStatus::Failed;
            }
        }

        Some(self.snapshot())
    }

    /// Close a still-running answer with what has been accumulated
    ///
    /// Used when the connection ends without an in-band terminal marker.
    pub fn finish(&mut self) -> Option<AnswerState> {
        if self.is_closed() {
            return None;
        }
        self.state.status = AnswerStatus::Finished;
        Some(self.snapshot())
    }

    /// Fail a still-running answer, keeping partial text
    pub fn fail(&mut self, message: impl Into<String>) -> Option<AnswerState> {
        self.apply(Fragment::ProtocolError {
            message: message.into(),
        })
    }
}
