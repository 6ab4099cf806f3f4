//! Error types for Monoscope
//!
//! None of these ever reach the instrumented application: the interceptor
//! logs them and degrades to reduced telemetry instead.

use thiserror::Error;

/// Errors raised by the telemetry pipeline itself.
#[derive(Debug, Error)]
pub enum MonoscopeError {
    /// A redaction field path could not be parsed.
    #[error("Invalid redaction path `{path}`: {reason}")]
    InvalidRedactionPath {
        /// The offending path expression
        path: String,
        /// What the parser tripped over
        reason: String,
    },

    /// A request or response body could not be read.
    #[error("Body error: {0}")]
    Body(String),

    /// Serialization of a payload (or part of one) failed.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Loading configuration from the environment failed.
    #[cfg(feature = "env")]
    #[error("Configuration error: {0}")]
    Config(#[from] envy::Error),
}

impl MonoscopeError {
    pub(crate) fn invalid_path(path: &str, reason: impl Into<String>) -> Self {
        Self::InvalidRedactionPath {
            path: path.to_string(),
            reason: reason.into(),
        }
    }
}

/// Result type alias for Monoscope operations
pub type Result<T, E = MonoscopeError> = std::result::Result<T, E>;

/// Boxed error used for body and service errors crossing crate boundaries.
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;
