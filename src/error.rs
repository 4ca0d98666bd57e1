use crate::config::DEFAULT_EXPIRED_MESSAGE;
use crate::embedding::EmbeddingError;
use std::path::PathBuf;
use thiserror::Error;

/// Main error type for the session engine
#[derive(Error, Debug)]
pub enum SimPatientError {
    /// A similarity index was requested over no texts
    #[error("Cannot build collection '{collection}' from an empty corpus")]
    EmptyCorpus { collection: String },

    /// Search against a collection that was never built
    #[error("Unknown collection: {name}")]
    UnknownCollection { name: String },

    /// Scoring against a session key with no rubric loaded
    #[error("No rubric loaded for session key: {key}")]
    UnknownSession { key: String },

    /// The conversation is not (or no longer) active
    #[error("Conversation session expired: {id}")]
    SessionExpired { id: String },

    /// A session already exists, or existed, for this conversation
    #[error("Conversation session already started: {id}")]
    DuplicateSession { id: String },

    /// Embedding computation exceeded its time budget
    #[error("Embedding timed out after {timeout_ms}ms")]
    EmbeddingTimeout { timeout_ms: u64 },

    /// Embedding provider failure
    #[error("Embedding error: {0}")]
    Embedding(#[from] EmbeddingError),

    /// Rejected caller input
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Configuration related errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// Configuration validation errors
    #[error("Configuration validation failed: {errors:?}")]
    ConfigValidation { errors: Vec<ValidationError> },

    /// Configuration file not found
    #[error("Configuration file not found: {path}")]
    ConfigNotFound { path: PathBuf },

    /// Invalid configuration value
    #[error("Invalid configuration value at {path}: {message}")]
    InvalidConfigValue { path: String, message: String },

    /// IO errors
    #[error("IO error: {context}: {source}")]
    Io {
        source: std::io::Error,
        context: String,
    },

    /// TOML deserialization errors
    #[error("TOML error: {0}")]
    Toml(#[from] toml::de::Error),

    /// TOML serialization errors
    #[error("TOML serialization error: {0}")]
    TomlSerialization(#[from] toml::ser::Error),

    /// JSON errors
    #[error("JSON error: {context}: {source}")]
    Json {
        source: serde_json::Error,
        context: String,
    },

    /// Generic errors
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl SimPatientError {
    /// Whether retrying the same request may succeed without caller changes
    pub fn is_retryable(&self) -> bool {
        matches!(self, SimPatientError::EmbeddingTimeout { .. })
    }

    /// Message suitable for showing to the learner
    pub fn user_message(&self) -> String {
        self.user_message_with(DEFAULT_EXPIRED_MESSAGE)
    }

    /// Like [`user_message`](Self::user_message), with a configured text for
    /// expired conversations
    pub fn user_message_with(&self, expired_message: &str) -> String {
        match self {
            SimPatientError::SessionExpired { .. } => expired_message.to_string(),
            SimPatientError::DuplicateSession { .. } => {
                "This conversation has already been started.".to_string()
            }
            SimPatientError::EmbeddingTimeout { .. } => {
                "The patient is taking too long to respond. Please try again.".to_string()
            }
            SimPatientError::InvalidInput(msg) => msg.clone(),
            other => format!("Something went wrong: {}", other),
        }
    }
}

/// Configuration validation error
#[derive(Debug, Clone)]
pub struct ValidationError {
    /// Path to the configuration key that failed validation
    pub path: String,
    /// Error message describing the validation failure
    pub message: String,
}

impl ValidationError {
    pub fn new(path: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            message: message.into(),
        }
    }
}

/// Result type for session engine operations
pub type Result<T> = std::result::Result<T, SimPatientError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_only_timeouts_are_retryable() {
        assert!(SimPatientError::EmbeddingTimeout { timeout_ms: 10 }.is_retryable());
        assert!(!SimPatientError::SessionExpired { id: "1".into() }.is_retryable());
        assert!(!SimPatientError::UnknownSession { key: "k".into() }.is_retryable());
    }

    #[test]
    fn test_expired_session_asks_for_restart() {
        let err = SimPatientError::SessionExpired { id: "42".into() };
        assert!(err.user_message().contains("start a new conversation"));
        assert_eq!(err.user_message_with("Case closed."), "Case closed.");

        let timeout = SimPatientError::EmbeddingTimeout { timeout_ms: 5 };
        assert_eq!(timeout.user_message_with("Case closed."), timeout.user_message());
    }
}
