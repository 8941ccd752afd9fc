//! Error types for ferrify-runner

use std::path::PathBuf;
use thiserror::Error;

/// Result type alias
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur while evaluating and repairing candidates
#[derive(Debug, Error)]
pub enum Error {
    /// An external tool exited non-zero
    #[error("Command failed: {command} (exit code: {exit_code})")]
    CommandFailed {
        /// Command that failed
        command: String,
        /// Exit code
        exit_code: i32,
        /// Standard error output
        stderr: String,
    },

    /// An external tool could not be started
    #[error("Failed to launch {command}: {reason}")]
    Launch {
        /// Command that could not start
        command: String,
        /// Underlying reason
        reason: String,
    },

    /// Command timed out
    #[error("Command timed out after {timeout_ms}ms: {command}")]
    Timeout {
        /// Command that timed out
        command: String,
        /// Timeout in milliseconds
        timeout_ms: u64,
    },

    /// Refusing to overwrite an existing instrumentation target
    #[error("Output already exists: {}", .0.display())]
    OutputExists(PathBuf),

    /// A required input file is missing
    #[error("Missing input: {}", .0.display())]
    MissingInput(PathBuf),

    /// Language tag with no reference-side build
    #[error("Unsupported language: {0}")]
    UnsupportedLanguage(String),

    /// Replay returned a different number of examples than it was given
    #[error("Protocol violation: replayed {actual} examples, expected {expected}")]
    ProtocolViolation {
        /// Examples sent to the harness
        expected: usize,
        /// Examples reported back
        actual: usize,
    },

    /// Operation not valid for the current state
    #[error("Invalid state: {0}")]
    InvalidState(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Code generation failed after its retry policy gave up
    #[error("Generation error: {0}")]
    Generation(#[from] ferrify_gen::Error),

    /// IO error
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    /// Serialization error
    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),

    /// YAML error
    #[error("YAML error: {0}")]
    YamlError(#[from] serde_yaml::Error),
}

impl Error {
    /// Whether the error came from an external tool rather than from us
    ///
    /// Candidate construction turns these into "no evidence".
    #[must_use]
    pub fn is_tool_failure(&self) -> bool {
        matches!(self, Self::CommandFailed { .. } | Self::Timeout { .. })
    }
}
