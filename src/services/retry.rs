//! Connection retry with exponential backoff
//!
//! Retries cover only the connection phase of an exchange. Once a response
//! stream is open, later failures are reported through the answer itself and
//! never start a new attempt, since the request is not idempotent.

use std::future::Future;
use std::time::Duration;

use crate::{
    config::RetrySettings,
    error::{ChatError, Result},
};

/// Where a connection attempt stands
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Idle,
    Attempting { attempt: u32 },
    Retrying { attempt: u32, delay: Duration },
    Open,
    Exhausted,
}

/// What to do after a failed attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDecision {
    Retry(Duration),
    GiveUp,
}

/// Per-exchange attempt counter
///
/// Transitions are pure so attempt counts and delays can be checked without I/O.
#[derive(Debug, Clone)]
pub struct RetryContext {
    attempts: u32,
    max_attempts: u32,
    base_delay: Duration,
    state: ConnectionState,
}

impl RetryContext {
    #[must_use]
    pub fn new(settings: RetrySettings) -> Self {
        Self {
            attempts: 0,
            max_attempts: settings.max_attempts.max(1),
            base_delay: settings.base_delay(),
            state: ConnectionState::Idle,
        }
    }

    #[must_use]
    pub const fn attempts(&self) -> u32 {
        self.attempts
    }

    #[must_use]
    pub const fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    #[must_use]
    pub const fn state(&self) -> ConnectionState {
        self.state
    }

    /// `base_delay * 2^(attempt - 1)`, with `attempt` starting at 1
    #[must_use]
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(31);
        self.base_delay.saturating_mul(1 << exponent)
    }

    /// Start the next attempt and return its 1-based index
    pub fn begin_attempt(&mut self) -> u32 {
        self.attempts += 1;
        self.state = ConnectionState::Attempting {
            attempt: self.attempts,
        };
        self.attempts
    }

    /// The current attempt produced an open stream
    pub fn on_open(&mut self) {
        self.state = ConnectionState::Open;
    }

    /// The current attempt failed
    pub fn on_failure(&mut self, retryable: bool) -> RetryDecision {
        if !retryable || self.attempts >= self.max_attempts {
            self.state = ConnectionState::Exhausted;
            return RetryDecision::GiveUp;
        }
        let delay = self.delay_for(self.attempts);
        self.state = ConnectionState::Retrying {
            attempt: self.attempts,
            delay,
        };
        RetryDecision::Retry(delay)
    }
}

/// Retry policy with exponential backoff
#[derive(Debug, Clone, Copy, Default)]
pub struct RetryPolicy {
    settings: RetrySettings,
}

impl RetryPolicy {
    #[must_use]
    pub const fn new(settings: RetrySettings) -> Self {
        Self { settings }
    }

    /// Run `operation` until it succeeds, fails fatally or the budget runs out
    ///
    /// `operation` receives the 1-based attempt index.
    ///
    /// # Errors
    ///
    /// Returns the last error once no further attempt will be made
    pub async fn execute<F, Fut, T>(&self, mut operation: F) -> Result<T>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let mut context = RetryContext::new(self.settings);

        loop {
            let attempt = context.begin_attempt();
            let err: ChatError = match operation(attempt).await {
                Ok(value) => {
                    context.on_open();
                    return Ok(value);
                }
                Err(err) => err,
            };

            match context.on_failure(err.is_retryable()) {
                RetryDecision::Retry(delay) => {
                    tracing::warn!(
                        attempt,
                        max_attempts = context.max_attempts(),
                        delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                        error = %err,
                        "Retrying after error"
                    );
                    tokio::time::sleep(delay).await;
                }
                RetryDecision::GiveUp => {
                    tracing::warn!(attempt, error = %err, "Giving up");
                    return Err(err);
                }
            }
        }
    }
}
