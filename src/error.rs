//! Error types for reqs2tests-core.

use thiserror::Error;

/// Result type alias using reqs2tests-core's Error type.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur during test generation.
#[derive(Error, Debug)]
pub enum Error {
    /// Harness command failed
    #[error("Harness error: {message}")]
    Harness {
        message: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// Subprocess communication error
    #[error("Subprocess communication error: {0}")]
    SubprocessComm(String),

    /// Timeout during operation
    #[error("Operation timed out after {duration_ms}ms")]
    Timeout { duration_ms: u64 },

    /// LLM API error
    #[error("LLM API error: {provider} - {message}")]
    LlmApi { provider: String, message: String },

    /// LLM error (simple variant)
    #[error("LLM error: {0}")]
    Llm(String),

    /// The model hit its output length limit before completing the response
    #[error("LLM response truncated at length limit ({output_tokens} output tokens)")]
    LengthLimit {
        input_tokens: u64,
        output_tokens: u64,
    },

    /// Requirement data error
    #[error("Requirements error: {0}")]
    Requirements(String),

    /// Serialization/deserialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Environment catalogue error
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Create a harness error.
    pub fn harness(message: impl Into<String>) -> Self {
        Self::Harness {
            message: message.into(),
            source: None,
        }
    }

    /// Create a harness error with source.
    pub fn harness_with_source(
        message: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self::Harness {
            message: message.into(),
            source: Some(Box::new(source)),
        }
    }

    /// Create an LLM API error.
    pub fn llm_api(provider: impl Into<String>, message: impl Into<String>) -> Self {
        Self::LlmApi {
            provider: provider.into(),
            message: message.into(),
        }
    }

    /// Create a timeout error.
    pub fn timeout(duration_ms: u64) -> Self {
        Self::Timeout { duration_ms }
    }

    /// True for transport-level LLM failures that are worth retrying with
    /// backoff (rate limits, connection drops, API timeouts). Model-level
    /// failures (refusals, schema violations, length limits) are not.
    pub fn is_retryable_transport(&self) -> bool {
        matches!(self, Self::LlmApi { .. } | Self::Timeout { .. })
    }
}
