//! Shared API request/response types
//!
//! # Architecture
//!
//! These types travel between three parties:
//! - Workers (prediction and spectrogram tiers) polling for work
//! - The broker (genreml-br) queueing and aggregating work
//! - Browser clients polling for results of their batch

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

// ========================================
// Tiers
// ========================================

/// Pool of homogeneous work a clip is fanned out to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WorkTier {
    /// Genre prediction workers
    Prediction,
    /// Spectrogram rendering workers
    Spectrogram,
    /// Playable sample handed back to the client (no worker pool)
    Clip,
}

impl WorkTier {
    /// Tiers served to workers through a queue
    pub const QUEUED: [WorkTier; 2] = [WorkTier::Prediction, WorkTier::Spectrogram];

    /// All tiers, in artifact write order
    pub const ALL: [WorkTier; 3] = [WorkTier::Prediction, WorkTier::Spectrogram, WorkTier::Clip];

    pub fn as_str(&self) -> &'static str {
        match self {
            WorkTier::Prediction => "prediction",
            WorkTier::Spectrogram => "spectrogram",
            WorkTier::Clip => "clip",
        }
    }

    /// Whether workers pull this tier from a queue
    pub fn is_queued(&self) -> bool {
        !matches!(self, WorkTier::Clip)
    }
}

impl std::fmt::Display for WorkTier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// ========================================
// Worker-facing Types
// ========================================

/// Work item as sent to a worker
///
/// `data` carries the clip audio as standard base64.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkItemView {
    pub uid: String,
    pub batch_id: String,
    pub model_hash: String,
    pub ext: String,
    pub filename: String,
    pub source_md5: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<String>,
}

/// Response to a long poll
///
/// # Examples
///
/// ```
/// use genreml_common::api::types::WorkResponse;
///
/// let json = serde_json::to_value(WorkResponse::no_work()).unwrap();
/// assert_eq!(json["work"], false);
/// assert!(json["item"].is_null());
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkResponse {
    pub work: bool,
    pub item: Option<WorkItemView>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub msg: Option<String>,
}

impl WorkResponse {
    pub fn with_item(item: WorkItemView) -> Self {
        Self {
            work: true,
            item: Some(item),
            msg: None,
        }
    }

    pub fn no_work() -> Self {
        Self {
            work: false,
            item: None,
            msg: None,
        }
    }

    pub fn rejected(msg: impl Into<String>) -> Self {
        Self {
            work: false,
            item: None,
            msg: Some(msg.into()),
        }
    }
}

/// Result a worker seals and posts back
///
/// Everything besides `batch_id` and `uid` is kept in `fields` verbatim.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FinishedWork {
    pub batch_id: String,
    pub uid: String,
    #[serde(flatten)]
    pub fields: Map<String, Value>,
}

impl FinishedWork {
    pub fn new(batch_id: impl Into<String>, uid: impl Into<String>) -> Self {
        Self {
            batch_id: batch_id.into(),
            uid: uid.into(),
            fields: Map::new(),
        }
    }

    /// Builder-style field insertion
    pub fn with_field(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.fields.insert(key.into(), value.into());
        self
    }
}

/// Acknowledgement of a result submission
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReceivedResponse {
    pub received: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub msg: Option<String>,
}

/// Answer to a worker asking whether it may exit
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct SafeToRecycleResponse {
    pub safe: bool,
}

// ========================================
// Client-facing Types
// ========================================

/// Session handed to a browser client
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionResponse {
    pub batch_id: String,
}

/// One pre-split clip in a submission
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClipPayload {
    #[serde(default = "default_clip_ext")]
    pub ext: String,
    /// Standard base64 audio bytes
    pub data: String,
}

fn default_clip_ext() -> String {
    "wav".to_string()
}

/// Clips of one uploaded file, produced by the external splitter
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClipSubmission {
    pub filename: String,
    #[serde(default)]
    pub source_md5: Option<String>,
    pub clips: Vec<ClipPayload>,
}

/// Outcome of a clip submission
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubmissionResponse {
    pub batch_id: Option<String>,
    pub accepted: bool,
    #[serde(default)]
    pub uids: Vec<String>,
    #[serde(default)]
    pub failures: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub msg: Option<String>,
}

/// Prediction result for one uid
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PredictionResponse {
    pub batch_id: Option<String>,
    pub uid: String,
    pub ready: bool,
    pub prediction: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub msg: Option<String>,
}

/// Spectrogram images for one uid
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SpectrogramResponse {
    pub batch_id: Option<String>,
    pub uid: String,
    pub ready: bool,
    pub images: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub msg: Option<String>,
}

/// Playable sample of one clip in the batch
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClipSampleResponse {
    pub batch_id: Option<String>,
    pub uid: Option<String>,
    pub ready: bool,
    pub ext: Option<String>,
    pub sample: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub msg: Option<String>,
}

/// Health check response
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub module: String,
    pub version: String,
}

// ========================================
// Tests
// ========================================
