//! CLI argument parsing and answer rendering

use clap::{Parser, Subcommand};

use crate::config::BackendKind;

/// chatstream: stream answers from chat backends
#[derive(Debug, Parser)]
#[command(name = "chatstream")]
#[command(about = "Stream answers from OpenAI-style and retrieval chat backends", long_about = None)]
#[command(version)]
pub struct Cli {
    /// Enable verbose output
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Subcommand to execute
    #[command(subcommand)]
    pub command: Option<Commands>,
}

/// Available commands
#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Ask a single question and stream the answer
    Ask {
        /// The question to send
        question: String,

        /// Backend to ask (openai or retrieval)
        #[arg(short, long, default_value = "openai", env = "CHATSTREAM_BACKEND")]
        backend: BackendKind,

        /// Retrieval assistant to dispatch to
        #[arg(long)]
        assistant: Option<String>,

        /// Retrieval session to continue
        #[arg(long)]
        session: Option<String>,

        /// Wait for the whole answer instead of streaming it
        #[arg(long)]
        no_stream: bool,
    },

    /// Inspect configuration
    Config {
        /// Print the effective configuration
        #[arg(long)]
        list: bool,

        /// Print the configuration file paths
        #[arg(long)]
        path: bool,
    },

    /// Show version information
    Version,
}

impl Cli {
    /// Parse CLI arguments from environment
    #[must_use]
    pub fn parse_args() -> Self {
        Self::parse()
    }
}

/// What to print for a new snapshot given the text already shown
#[derive(Debug, PartialEq, Eq)]
pub enum TextUpdate<'a> {
    /// Nothing new
    Unchanged,
    /// Print this suffix after what is on screen
    Append(&'a str),
    /// The answer was rewritten; print it again in full
    Replace(&'a str),
}

/// Compare the shown text with a snapshot's text
#[must_use]
pub fn text_update<'a>(shown: &str, current: &'a str) -> TextUpdate<'a> {
    if shown == current {
        TextUpdate::Unchanged
    } else if let Some(suffix) = current.strip_prefix(shown) {
        TextUpdate::Append(suffix)
    } else {
        TextUpdate::Replace(current)
    }
}
