//! Error types for the codechecker stack and its handlers.

use thiserror::Error;

/// Top-level error type for synthesis and handler operations.
#[derive(Error, Debug)]
pub enum Error {
    /// Stack configuration is missing or invalid.
    #[error("configuration error: {0}")]
    Config(String),

    /// IO error while reading inputs or writing artifacts.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// A CodeCommit call failed or returned something unusable.
    #[error("CodeCommit operation failed: {0}")]
    CodeCommit(String),

    /// The resource graph could not be synthesized.
    #[error("synthesis failed: {0}")]
    Synthesis(String),

    /// An event payload could not be interpreted.
    #[error("invalid event: {0}")]
    Event(String),

    /// A custom resource request could not be handled.
    #[error("custom resource error: {0}")]
    CustomResource(String),

    /// A document could not be serialized or parsed.
    #[error("serialization error: {0}")]
    Serialization(String),
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::Serialization(e.to_string())
    }
}

/// Result type alias for codechecker operations.
pub type Result<T> = std::result::Result<T, Error>;
