//! Error types for genreml-br
//!
//! Every broker stage returns `Result<_, BrokerError>`. The HTTP layer is the
//! only place where errors become response bodies (see `api`).

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use genreml_common::{EnvelopeError, WorkTier};
use serde_json::json;
use thiserror::Error;

/// Main error type for the broker
#[derive(Error, Debug)]
pub enum BrokerError {
    /// Worker token, session cookie or sealed result failed verification
    #[error("Signature invalid: {0}")]
    SignatureInvalid(#[from] EnvelopeError),

    /// No session cookie on a client request
    #[error("Missing session")]
    MissingSession,

    /// Queue has no room for the submitted items
    #[error("Queue full: {tier} queue has {remaining} free slots, {requested} requested")]
    QueueFull {
        tier: WorkTier,
        remaining: usize,
        requested: usize,
    },

    /// Tier has no queue (clip items are never dispatched to workers)
    #[error("Tier {0} is not served to workers")]
    UnknownTier(WorkTier),

    /// Batch record does not exist (never created or already reaped)
    #[error("Batch not found: {0}")]
    BatchNotFound(String),

    /// Uid is not (or no longer) part of the batch
    #[error("Uid not found: {0}")]
    UidNotFound(String),

    /// Uid already exists in the batch
    #[error("Duplicate uid: {0}")]
    DuplicateUid(String),

    /// Every clip of a submission failed
    #[error("All {} items failed: {}", .0.len(), .0.join("; "))]
    AllItemsFailed(Vec<String>),

    /// Invalid request content
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Artifact file I/O errors
    #[error("Artifact I/O error: {0}")]
    Artifact(#[from] std::io::Error),

    /// Configuration file loading errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// HTTP server errors
    #[error("HTTP server error: {0}")]
    Http(String),

    /// Other errors
    #[error("Internal error: {0}")]
    Internal(String),
}

impl From<genreml_common::Error> for BrokerError {
    fn from(err: genreml_common::Error) -> Self {
        match err {
            genreml_common::Error::Io(e) => BrokerError::Artifact(e),
            genreml_common::Error::Signature(e) => BrokerError::SignatureInvalid(e),
            genreml_common::Error::Config(msg) => BrokerError::Config(msg),
            genreml_common::Error::InvalidInput(msg) => BrokerError::InvalidInput(msg),
            genreml_common::Error::Internal(msg) => BrokerError::Internal(msg),
        }
    }
}

impl BrokerError {
    /// Stable machine-readable code
    pub fn code(&self) -> &'static str {
        match self {
            BrokerError::SignatureInvalid(_) => "SIGNATURE_INVALID",
            BrokerError::MissingSession => "MISSING_SESSION",
            BrokerError::QueueFull { .. } => "QUEUE_FULL",
            BrokerError::UnknownTier(_) => "UNKNOWN_TIER",
            BrokerError::BatchNotFound(_) => "BATCH_NOT_FOUND",
            BrokerError::UidNotFound(_) => "UID_NOT_FOUND",
            BrokerError::DuplicateUid(_) => "DUPLICATE_UID",
            BrokerError::AllItemsFailed(_) => "ALL_ITEMS_FAILED",
            BrokerError::InvalidInput(_) => "INVALID_INPUT",
            BrokerError::Artifact(_) => "ARTIFACT_ERROR",
            BrokerError::Config(_) => "CONFIG_ERROR",
            BrokerError::Http(_) => "HTTP_ERROR",
            BrokerError::Internal(_) => "INTERNAL_ERROR",
        }
    }
}

/// Fallback conversion for errors that escape a handler's own body mapping
///
/// Handlers answer with their tier-specific body (`work:false`,
/// `received:false`, ...) and only reach this for extractor rejections.
impl IntoResponse for BrokerError {
    fn into_response(self) -> Response {
        let status = match self {
            BrokerError::SignatureInvalid(_) | BrokerError::MissingSession => StatusCode::UNAUTHORIZED,
            BrokerError::QueueFull { .. } => StatusCode::SERVICE_UNAVAILABLE,
            BrokerError::UnknownTier(_) | BrokerError::BatchNotFound(_) | BrokerError::UidNotFound(_) => {
                StatusCode::NOT_FOUND
            }
            BrokerError::DuplicateUid(_) | BrokerError::AllItemsFailed(_) | BrokerError::InvalidInput(_) => {
                StatusCode::BAD_REQUEST
            }
            BrokerError::Artifact(_) | BrokerError::Config(_) | BrokerError::Http(_) | BrokerError::Internal(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        };

        let body = Json(json!({
            "error": {
                "code": self.code(),
                "message": self.to_string(),
            }
        }));

        (status, body).into_response()
    }
}

/// Convenience Result type using BrokerError
pub type Result<T> = std::result::Result<T, BrokerError>;
