//! Error taxonomy for LLM calls.
//!
//! Classification drives retry behavior in the resilience layer:
//! configuration and cancellation errors are final, backend errors may be
//! retried once per failure category when their text matches a known pattern.

/// Result alias for this crate.
pub type Result<T> = std::result::Result<T, LlmError>;

/// Typed error hierarchy for LLM client operations.
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum LlmError {
    /// Missing or invalid credentials, model, or endpoint. Never retried.
    #[error("configuration error: `{field}` {message}")]
    Configuration {
        /// The offending configuration field.
        field: String,
        /// What is wrong with it.
        message: String,
    },
    /// The backend answered with a non-success status.
    #[error("backend error {status}: {message}")]
    Backend {
        /// HTTP status (0 when not HTTP-derived).
        status: u16,
        /// Message extracted from the backend's error envelope.
        message: String,
    },
    /// The caller's cancellation token fired.
    #[error("cancelled")]
    Cancelled,
    /// The request never produced a status (DNS, TLS, connection reset).
    #[error("network error: {0}")]
    Network(String),
    /// The backend body could not be decoded.
    #[error("decode error: {0}")]
    Decode(String),
}

impl LlmError {
    /// Build a [`LlmError::Configuration`].
    pub fn configuration(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Configuration {
            field: field.into(),
            message: message.into(),
        }
    }

    /// Shorthand for a missing required field.
    pub fn missing(field: impl Into<String>) -> Self {
        Self::configuration(field, "is required")
    }

    /// Build a [`LlmError::Backend`].
    pub fn backend(status: u16, message: impl Into<String>) -> Self {
        Self::Backend {
            status,
            message: message.into(),
        }
    }

    /// Errors that must never be retried.
    pub fn is_final(&self) -> bool {
        matches!(self, Self::Configuration { .. } | Self::Cancelled)
    }

    /// HTTP status, when there is one.
    pub fn status(&self) -> Option<u16> {
        match self {
            Self::Backend { status, .. } => Some(*status),
            _ => None,
        }
    }

    /// Text used for pattern matching (limit, alias, capacity).
    pub fn message(&self) -> String {
        match self {
            Self::Backend { message, .. } => message.clone(),
            other => other.to_string(),
        }
    }

    /// Short classification used in telemetry.
    pub fn error_kind(&self) -> &'static str {
        match self {
            Self::Configuration { .. } => "configuration",
            Self::Backend { .. } => "backend",
            Self::Cancelled => "cancelled",
            Self::Network(_) => "network",
            Self::Decode(_) => "decode",
        }
    }
}

impl From<serde_json::Error> for LlmError {
    fn from(err: serde_json::Error) -> Self {
        Self::Decode(err.to_string())
    }
}
