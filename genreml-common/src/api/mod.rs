//! API module for the broker HTTP interface
//!
//! Request/response shapes shared by the broker (`genreml-br`) and the worker
//! client (`genreml-wk`). The broker answers every request with one of these
//! bodies; callers treat the body as authoritative rather than the status code.

pub mod types;

pub use types::{
    ClipPayload, ClipSampleResponse, ClipSubmission, FinishedWork, HealthResponse,
    PredictionResponse, ReceivedResponse, SafeToRecycleResponse, SessionResponse,
    SpectrogramResponse, SubmissionResponse, WorkItemView, WorkResponse, WorkTier,
};
