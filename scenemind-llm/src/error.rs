//! LLM error types.

use thiserror::Error;

/// Errors from a chat provider call.
#[derive(Debug, Error)]
pub enum LlmError {
    /// HTTP request failed.
    #[error("LLM request failed: {0}")]
    RequestFailed(String),

    /// Provider answered with a non-success status.
    #[error("LLM provider returned HTTP {status}: {body}")]
    Http {
        /// Status code.
        status: u16,
        /// Response body, possibly truncated.
        body: String,
    },

    /// Response was not in the expected shape.
    #[error("Failed to parse LLM response: {0}")]
    ParseError(String),

    /// Request timed out.
    #[error("LLM request timed out after {0}ms")]
    Timeout(u64),

    /// Provider is unavailable or not configured.
    #[error("LLM provider unavailable: {0}")]
    Unavailable(String),

    /// All retry attempts exhausted.
    #[error("All LLM retry attempts exhausted after {attempts} tries: {last_error}")]
    RetriesExhausted {
        /// Attempts made.
        attempts: u32,
        /// Error from the final attempt.
        last_error: String,
    },

    /// Configuration error.
    #[error("LLM configuration error: {0}")]
    ConfigError(String),
}

impl LlmError {
    /// Whether another attempt could succeed.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::RequestFailed(_) | Self::Timeout(_) | Self::Unavailable(_) => true,
            Self::Http { status, .. } => *status == 429 || *status >= 500,
            Self::ParseError(_) | Self::RetriesExhausted { .. } | Self::ConfigError(_) => false,
        }
    }
}

impl From<reqwest::Error> for LlmError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            LlmError::Timeout(0)
        } else if err.is_connect() {
            LlmError::Unavailable(err.to_string())
        } else {
            LlmError::RequestFailed(err.to_string())
        }
    }
}
