//! Error types for genreml-wk

use genreml_common::EnvelopeError;
use thiserror::Error;

/// Main error type for the worker client
#[derive(Error, Debug)]
pub enum WorkerError {
    /// Discovery or network failure reaching a service
    #[error("Upstream unreachable: {0}")]
    UpstreamUnreachable(String),

    /// RUN_LIMIT is not a positive decimal integer
    #[error("Invalid run limit '{0}': expected a positive integer")]
    InvalidRunLimit(String),

    /// Missing or malformed configuration
    #[error("Configuration error: {0}")]
    Config(String),

    /// HTTP request or response decoding failed
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// Token signing or result sealing failed
    #[error("Signature error: {0}")]
    Signature(#[from] EnvelopeError),

    /// Work processor failed on an item
    #[error("Processing error: {0}")]
    Processing(String),
}

impl From<genreml_common::Error> for WorkerError {
    fn from(err: genreml_common::Error) -> Self {
        match err {
            genreml_common::Error::Signature(e) => WorkerError::Signature(e),
            other => WorkerError::Config(other.to_string()),
        }
    }
}

/// Convenience Result type using WorkerError
pub type Result<T> = std::result::Result<T, WorkerError>;
