//! Backend profiles and connection settings

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Which wire protocol a backend speaks
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    /// OpenAI-style chat completions emitting incremental token deltas
    #[serde(rename = "openai")]
    OpenAi,
    /// Retrieval assistant emitting cumulative answers with citations
    Retrieval,
}

impl BackendKind {
    /// Get the default base URL for this backend
    #[must_use]
    pub const fn default_base_url(&self) -> Option<&'static str> {
        match self {
            Self::OpenAi => Some("https://api.openai.com/v1"),
            Self::Retrieval => None,
        }
    }

    /// Environment variable consulted when a profile has no inline key
    #[must_use]
    pub const fn default_api_key_env(&self) -> &'static str {
        match self {
            Self::OpenAi => "OPENAI_API_KEY",
            Self::Retrieval => "RETRIEVAL_API_KEY",
        }
    }
}

impl std::fmt::Display for BackendKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::OpenAi => write!(f, "openai"),
            Self::Retrieval => write!(f, "retrieval"),
        }
    }
}

impl std::str::FromStr for BackendKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "openai" | "a" => Ok(Self::OpenAi),
            "retrieval" | "b" => Ok(Self::Retrieval),
            _ => Err(format!("Invalid backend: {s}")),
        }
    }
}

/// Backend profile configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackendProfile {
    /// User-friendly name for the profile
    pub name: String,

    /// Wire protocol
    pub kind: BackendKind,

    /// API endpoint; falls back to the kind's default
    #[serde(skip_serializing_if = "Option::is_none")]
    pub base_url: Option<String>,

    /// Model identifier sent to chat-completion backends
    #[serde(skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,

    /// Inline API key (takes precedence over the environment)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,

    /// Environment variable holding the API key
    #[serde(skip_serializing_if = "Option::is_none")]
    pub api_key_env: Option<String>,

    /// Known assistant identifiers, first one is the default
    #[serde(default)]
    pub assistant_ids: Vec<String>,

    /// Refuse to dispatch without a credential
    #[serde(default = "default_true")]
    pub requires_api_key: bool,
}

fn default_true() -> bool {
    true
}

impl BackendProfile {
    /// Create a new profile with defaults for `kind`
    #[must_use]
    pub fn new(name: impl Into<String>, kind: BackendKind) -> Self {
        Self {
            name: name.into(),
            kind,
            base_url: kind.default_base_url().map(String::from),
            model: None,
            api_key: None,
            api_key_env: None,
            assistant_ids: Vec::new(),
            requires_api_key: true,
        }
    }

    /// Get the effective base URL (custom or default), without trailing slash
    #[must_use]
    pub fn effective_base_url(&self) -> Option<String> {
        self.base_url
            .clone()
            .or_else(|| self.kind.default_base_url().map(String::from))
            .map(|url| url.trim_end_matches('/').to_string())
    }

    /// Environment variable to read the key from
    #[must_use]
    pub fn effective_api_key_env(&self) -> &str {
        self.api_key_env
            .as_deref()
            .unwrap_or_else(|| self.kind.default_api_key_env())
    }

    /// Model name for chat-completion requests
    #[must_use]
    pub fn effective_model(&self) -> &str {
        self.model.as_deref().unwrap_or("gpt-4o-mini")
    }
}

/// Retry budget for the connection phase of an exchange
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetrySettings {
    /// Total attempts, the initial one included
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    /// Delay before the first retry; doubles on each following one
    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,
}

fn default_max_attempts() -> u32 {
    4
}

fn default_base_delay_ms() -> u64 {
    1000
}

impl Default for RetrySettings {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            base_delay_ms: default_base_delay_ms(),
        }
    }
}

impl RetrySettings {
    #[must_use]
    pub const fn base_delay(&self) -> Duration {
        Duration::from_millis(self.base_delay_ms)
    }
}
