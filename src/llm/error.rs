//! Inference failures and which of them are worth retrying.

use std::time::Duration;

use thiserror::Error;

/// Longest wait between two inference attempts.
const MAX_BACKOFF: Duration = Duration::from_secs(60);

#[derive(Debug, Error)]
pub enum LlmError {
    #[error("rate limited by provider: {body}")]
    RateLimited {
        body: String,
        /// From the `Retry-After` header
        retry_after: Option<Duration>,
    },

    #[error("provider failed with HTTP {status}: {body}")]
    Unavailable { status: u16, body: String },

    #[error("request rejected with HTTP {status}: {body}")]
    Rejected { status: u16, body: String },

    #[error("network error: {0}")]
    Network(String),

    #[error("unexpected response: {0}")]
    Malformed(String),

    #[error("model returned no content")]
    Empty,
}

impl LlmError {
    /// Map a non-success response.
    pub fn from_response(status: u16, body: String, retry_after: Option<Duration>) -> Self {
        match status {
            429 => LlmError::RateLimited { body, retry_after },
            400..=499 => LlmError::Rejected { status, body },
            _ => LlmError::Unavailable { status, body },
        }
    }

    /// Rate limits, 5xx, dropped connections and empty answers clear up on
    /// their own; rejected requests and malformed bodies do not.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            LlmError::RateLimited { .. }
                | LlmError::Unavailable { .. }
                | LlmError::Network(_)
                | LlmError::Empty
        )
    }

    /// Delay before retry number `attempt` (0-based).
    pub fn backoff(&self, attempt: u32) -> Duration {
        let base = match self {
            LlmError::RateLimited {
                retry_after: Some(after),
                ..
            } => return *after,
            LlmError::RateLimited { .. } => Duration::from_secs(5),
            LlmError::Unavailable { .. } => Duration::from_secs(2),
            _ => Duration::from_secs(1),
        };
        base.saturating_mul(2u32.saturating_pow(attempt)).min(MAX_BACKOFF)
    }
}

/// Retry budget for one inference request.
#[derive(Debug, Clone, Copy)]
pub struct RetryConfig {
    pub max_retries: u32,
    /// Total time after which no further attempt starts
    pub deadline: Duration,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            deadline: Duration::from_secs(120),
        }
    }
}

impl RetryConfig {
    /// Delay before the next attempt, or `None` to give up.
    pub fn next_delay(&self, error: &LlmError, attempt: u32, elapsed: Duration) -> Option<Duration> {
        if !error.is_transient() || attempt >= self.max_retries {
            return None;
        }
        let remaining = self.deadline.checked_sub(elapsed)?;
        let delay = error.backoff(attempt);
        (delay < remaining).then_some(delay)
    }
}
