//! Error types for text-completion calls

use std::time::Duration;
use thiserror::Error;

/// Errors raised by providers and the invoker
#[derive(Debug, Clone, PartialEq, Error)]
pub enum AiError {
    /// API key is missing or invalid
    #[error("Authentication failed: {message}")]
    AuthenticationError { message: String },

    #[error("Rate limit exceeded: {message}. Retry after {retry_after:?}")]
    RateLimitExceeded { message: String, retry_after: Option<Duration> },

    #[error("Request timed out after {duration:?}")]
    Timeout { duration: Duration },

    #[error("Network error: {message}")]
    NetworkError { message: String },

    #[error("API error (status {status}): {message}")]
    ApiError { status: u16, message: String },

    /// The provider answered with nothing usable
    #[error("Provider '{provider}' returned an empty response")]
    EmptyResponse { provider: String },

    #[error("Configuration error: {message}")]
    ConfigurationError { message: String },

    #[error("Parsing error: {message}")]
    ParseError { message: String },

    #[error("Provider error ({provider}): {message}")]
    ProviderError { provider: String, message: String },

    /// Primary and fallback both failed; carries the last provider's message
    #[error("All providers failed ({}): {message}", .attempted.join(", "))]
    ProvidersExhausted { attempted: Vec<String>, message: String },
}

impl AiError {
    pub fn auth(message: impl Into<String>) -> Self {
        Self::AuthenticationError { message: message.into() }
    }

    pub fn rate_limit(message: impl Into<String>, retry_after: Option<Duration>) -> Self {
        Self::RateLimitExceeded { message: message.into(), retry_after }
    }

    pub fn timeout(duration: Duration) -> Self {
        Self::Timeout { duration }
    }

    pub fn network(message: impl Into<String>) -> Self {
        Self::NetworkError { message: message.into() }
    }

    pub fn api(status: u16, message: impl Into<String>) -> Self {
        Self::ApiError { status, message: message.into() }
    }

    pub fn empty_response(provider: impl Into<String>) -> Self {
        Self::EmptyResponse { provider: provider.into() }
    }

    pub fn config(message: impl Into<String>) -> Self {
        Self::ConfigurationError { message: message.into() }
    }

    pub fn parse(message: impl Into<String>) -> Self {
        Self::ParseError { message: message.into() }
    }

    pub fn provider(provider: impl Into<String>, message: impl Into<String>) -> Self {
        Self::ProviderError { provider: provider.into(), message: message.into() }
    }

    pub fn exhausted(attempted: Vec<String>, last: &AiError) -> Self {
        Self::ProvidersExhausted { attempted, message: last.to_string() }
    }
}

/// Result type for completion calls
pub type AiResult<T> = Result<T, AiError>;

impl From<serde_json::Error> for AiError {
    fn from(err: serde_json::Error) -> Self {
        Self::ParseError { message: err.to_string() }
    }
}

impl From<reqwest::Error> for AiError {
    fn from(err: reqwest::Error) -> Self {
        match err.status() {
            Some(status) => Self::ApiError { status: status.as_u16(), message: err.to_string() },
            None => Self::NetworkError { message: err.to_string() },
        }
    }
}
