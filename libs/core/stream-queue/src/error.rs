//! Queue error types and error categorization
//!
//! Errors are categorized to decide whether the retry executor may try again:
//! - **Transient**: store/network failures, retried with exponential backoff
//! - **Permanent**: configuration defects, bad payloads; never retried

use thiserror::Error;

/// Category of error for determining retry behavior
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    /// Temporary failure - retry with exponential backoff
    Transient,
    /// Unrecoverable error - surface immediately
    Permanent,
}

/// Configuration loading errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("Environment variable '{0}' is required but not set")]
    MissingEnvVar(String),

    #[error("Failed to parse environment variable '{key}': {details}")]
    ParseError { key: String, details: String },
}

/// Queue errors
#[derive(Error, Debug)]
pub enum QueueError {
    /// Redis connection or command error
    #[error("Redis error: {0}")]
    Redis(#[from] redis::RedisError),

    /// Error reported by a non-Redis log store
    #[error("Store error: {0}")]
    Store(String),

    /// Payload could not be encoded
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// A delivered entry could not be decoded into the requested type
    #[error("Failed to decode entry {stream_id}: {message}")]
    Decode { stream_id: String, message: String },

    /// Queue or group name missing at call time
    #[error("Precondition failed: {0}")]
    Precondition(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),
}

impl QueueError {
    /// Create a precondition error
    pub fn precondition(message: impl Into<String>) -> Self {
        QueueError::Precondition(message.into())
    }

    /// Get the error category
    pub fn category(&self) -> ErrorCategory {
        match self {
            QueueError::Redis(_) => ErrorCategory::Transient,
            QueueError::Store(_) => ErrorCategory::Transient,
            QueueError::Serialization(_) => ErrorCategory::Permanent,
            QueueError::Decode { .. } => ErrorCategory::Permanent,
            QueueError::Precondition(_) => ErrorCategory::Permanent,
            QueueError::Config(_) => ErrorCategory::Permanent,
        }
    }

    /// Whether the retry executor should try this operation again
    pub fn is_retryable(&self) -> bool {
        self.category() == ErrorCategory::Transient
    }

    /// Consumer group does not exist on the stream
    pub fn is_nogroup(&self) -> bool {
        match self {
            QueueError::Redis(e) => e.to_string().contains("NOGROUP"),
            QueueError::Store(message) => message.contains("NOGROUP"),
            _ => false,
        }
    }
}

impl From<serde_json::Error> for QueueError {
    fn from(err: serde_json::Error) -> Self {
        QueueError::Serialization(err.to_string())
    }
}

/// Result alias for queue operations
pub type QueueResult<T> = Result<T, QueueError>;
