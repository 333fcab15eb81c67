//! Error types for the LLM client.

use thiserror::Error;

/// Result type for LLM client operations.
pub type Result<T> = std::result::Result<T, LlmError>;

/// LLM client errors.
#[derive(Debug, Error)]
pub enum LlmError {
    /// Configuration error (missing API key, invalid settings)
    #[error("configuration error: {0}")]
    Config(String),

    /// Network error (connection failed, timeout)
    #[error("network error: {0}")]
    Network(String),

    /// API error (non-2xx response, rate limit, invalid request)
    #[error("API error: {0}")]
    Api(String),

    /// Parse error (invalid JSON, unexpected response format)
    #[error("parse error: {0}")]
    Parse(String),
}
