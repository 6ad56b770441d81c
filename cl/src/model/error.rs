//! Model invocation error types

use std::time::Duration;
use thiserror::Error;

/// Errors that can occur while calling a language model
#[derive(Debug, Error)]
pub enum ModelError {
    #[error("Rate limited, retry after {retry_after:?}")]
    RateLimited { retry_after: Duration },

    #[error("API error {status}: {message}")]
    ApiError { status: u16, message: String },

    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),

    #[error("Event stream error: {0}")]
    EventSource(String),

    #[error("Invalid response: {0}")]
    InvalidResponse(String),

    #[error("JSON serialization error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Request cancelled")]
    Cancelled,
}

impl ModelError {
    /// Check if this error is retryable
    pub fn is_retryable(&self) -> bool {
        match self {
            ModelError::RateLimited { .. } => true,
            ModelError::ApiError { status, .. } => *status == 408 || *status >= 500,
            ModelError::Network(_) => true,
            ModelError::EventSource(_) => false,
            ModelError::InvalidResponse(_) => false,
            ModelError::Json(_) => false,
            ModelError::Cancelled => false,
        }
    }

    /// Get the retry duration if this is a rate limit error
    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            ModelError::RateLimited { retry_after } => Some(*retry_after),
            _ => None,
        }
    }
}
