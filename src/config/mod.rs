//! Configuration management for chatstream
//!
//! Implements a layered configuration system:
//! 1. Global config (`<config dir>/chatstream/config.json`)
//! 2. Project config (`./.chatstream.json`), replacing the global one when present
//! 3. Environment variables for API keys

pub mod backends;

use std::{
    fs,
    path::{Path, PathBuf},
    time::Duration,
};

use serde::{Deserialize, Serialize};

pub use self::backends::{BackendKind, BackendProfile, RetrySettings};
use crate::error::{ChatError, Result};

/// Main configuration structure
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Configured backends
    #[serde(default)]
    pub backends: Vec<BackendProfile>,

    /// Connection retry budget
    #[serde(default)]
    pub retry: RetrySettings,

    /// Stream responses by default
    #[serde(default = "default_true")]
    pub stream: bool,

    /// Abort an open stream after this many silent seconds
    #[serde(skip_serializing_if = "Option::is_none")]
    pub idle_timeout_secs: Option<u64>,
}

fn default_true() -> bool {
    true
}

impl Default for Config {
    fn default() -> Self {
        Self {
            backends: vec![
                BackendProfile::new("openai", BackendKind::OpenAi),
                BackendProfile::new("retrieval", BackendKind::Retrieval),
            ],
            retry: RetrySettings::default(),
            stream: true,
            idle_timeout_secs: None,
        }
    }
}

impl Config {
    /// Load configuration from the project file, else the global file, else defaults
    ///
    /// # Errors
    ///
    /// Returns an error if a configuration file exists but cannot be read or parsed
    pub fn load() -> Result<Self> {
        let project = Self::project_config_path();
        if project.exists() {
            return Self::load_from_path(&project);
        }
        Self::load_from_path(&Self::global_config_path())
    }

    /// Load configuration from a specific path
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed
    pub fn load_from_path(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }

        let contents = fs::read_to_string(path).map_err(|e| ChatError::ConfigParse {
            path: path.to_path_buf(),
            message: e.to_string(),
        })?;

        serde_json::from_str(&contents).map_err(|e| ChatError::ConfigParse {
            path: path.to_path_buf(),
            message: e.to_string(),
        })
    }

    /// Save configuration to a specific path
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be written
    pub fn save_to_path(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }

        let contents = serde_json::to_string_pretty(self)?;
        fs::write(path, contents)?;
        Ok(())
    }

    /// Get the configuration directory path
    #[must_use]
    pub fn config_dir() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("chatstream")
    }

    /// Get the global config file path
    #[must_use]
    pub fn global_config_path() -> PathBuf {
        Self::config_dir().join("config.json")
    }

    /// Get the project config file path in the current directory
    #[must_use]
    pub fn project_config_path() -> PathBuf {
        PathBuf::from(".chatstream.json")
    }

    /// First profile speaking `kind`
    ///
    /// # Errors
    ///
    /// Returns a configuration error when no such backend is configured
    pub fn backend(&self, kind: BackendKind) -> Result<&BackendProfile> {
        self.backends
            .iter()
            .find(|profile| profile.kind == kind)
            .ok_or_else(|| ChatError::Configuration(format!("backend not configured: {kind}")))
    }

    #[must_use]
    pub fn idle_timeout(&self) -> Option<Duration> {
        self.idle_timeout_secs.map(Duration::from_secs)
    }

    /// Check the configuration for problems that would fail every exchange
    ///
    /// # Errors
    ///
    /// Returns the first problem found
    pub fn validate(&self) -> std::result::Result<(), ValidationError> {
        if self.retry.max_attempts == 0 {
            return Err(ValidationError::InvalidRetry(
                "max_attempts must be at least 1".into(),
            ));
        }
        for profile in &self.backends {
            if profile.effective_base_url().is_none() {
                return Err(ValidationError::MissingBaseUrl(profile.name.clone()));
            }
        }
        Ok(())
    }
}

/// Configuration validation errors
#[derive(Debug)]
pub enum ValidationError {
    MissingBaseUrl(String),
    InvalidRetry(String),
}

impl std::fmt::Display for ValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::MissingBaseUrl(name) => write!(f, "Missing base URL for backend: {name}"),
            Self::InvalidRetry(message) => write!(f, "Invalid retry settings: {message}"),
        }
    }
}

impl std::error::Error for ValidationError {}
