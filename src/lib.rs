//! chatstream: streaming chat client for OpenAI-style and retrieval backends
//!
//! Submit an [`Exchange`](messages::Exchange) through a
//! [`ChatClient`](services::ChatClient) and observe the answer as a sequence of
//! [`AnswerState`](services::AnswerState) snapshots, however the backend chose
//! to frame it.

#![warn(clippy::all, clippy::pedantic)]
#![allow(clippy::module_name_repetitions, clippy::too_many_lines)]

pub mod cli;
pub mod config;
pub mod error;
pub mod messages;
pub mod services;

// Re-exports for convenience
pub use error::{ChatError, Result};
