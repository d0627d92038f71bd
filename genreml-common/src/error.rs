//! Common error types for GenreML

use thiserror::Error;

/// Common result type for GenreML operations
pub type Result<T> = std::result::Result<T, Error>;

/// Common error types shared by the broker and workers
#[derive(Error, Debug)]
pub enum Error {
    /// I/O operation error (wraps std::io::Error)
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Configuration loading or validation error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Token or sealed payload failed verification
    #[error("Signature invalid: {0}")]
    Signature(#[from] crate::envelope::EnvelopeError),

    /// Invalid user input or request parameter
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),
}
