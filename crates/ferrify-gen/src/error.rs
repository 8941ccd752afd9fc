//! Error types for ferrify-gen

use thiserror::Error;

/// Result type alias
pub type Result<T> = std::result::Result<T, Error>;

/// Errors raised while querying a code generator
#[derive(Debug, Error)]
pub enum Error {
    /// Transient failure talking to the backend; retried by the engine
    #[error("Query error: {0}")]
    Query(String),

    /// Permanent backend failure; never retried
    #[error("Backend error: {0}")]
    Backend(String),

    /// Retry policy gave up
    #[error("Generation failed after {attempts} attempts ({elapsed_ms}ms): {last}")]
    RetriesExhausted {
        /// Attempts made
        attempts: u32,
        /// Wall-clock time spent
        elapsed_ms: u64,
        /// Message of the last error seen
        last: String,
    },

    /// IO error
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    /// Serialization error
    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),
}

impl Error {
    /// Whether a retry may succeed where this attempt failed
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Query(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = Error::Query("connection reset".to_string());
        assert_eq!(err.to_string(), "Query error: connection reset");

        let err = Error::RetriesExhausted {
            attempts: 4,
            elapsed_ms: 1200,
            last: "rate limited".to_string(),
        };
        let msg = err.to_string();
        assert!(msg.contains("4 attempts"));
        assert!(msg.contains("rate limited"));
    }

    #[test]
    fn test_retryable() {
        assert!(Error::Query("x".into()).is_retryable());
        assert!(!Error::Backend("x".into()).is_retryable());
        let io = Error::from(std::io::Error::other("disk"));
        assert!(!io.is_retryable());
    }
}
