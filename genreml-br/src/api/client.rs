//! Client-facing endpoints
//!
//! All of these are bound to the batch of the caller's session cookie.

use axum::{
    extract::{
        rejection::{JsonRejection, PathRejection},
        Path, State,
    },
    routing::{get, post},
    Json, Router,
};
use genreml_common::api::{
    ClipSampleResponse, ClipSubmission, PredictionResponse, SpectrogramResponse, SubmissionResponse,
};
use genreml_common::WorkTier;
use serde_json::Value;
use tracing::warn;

use crate::api::SessionBatch;
use crate::error::BrokerError;
use crate::poller::{ClipOutcome, PollOutcome};
use crate::AppState;

/// Uid from the request path; an undecodable segment becomes a not-ready reply
fn path_uid(uid: Result<Path<String>, PathRejection>) -> Result<String, BrokerError> {
    uid.map(|Path(uid)| uid)
        .map_err(|e| BrokerError::InvalidInput(e.body_text()))
}

/// GET /getpredictionbyuid/:uid
pub async fn get_prediction_by_uid(
    State(state): State<AppState>,
    uid: Result<Path<String>, PathRejection>,
    session: Result<SessionBatch, BrokerError>,
) -> Json<PredictionResponse> {
    let not_ready = |uid: String, e: BrokerError| PredictionResponse {
        batch_id: None,
        uid,
        ready: false,
        prediction: None,
        msg: Some(e.to_string()),
    };

    let uid = match path_uid(uid) {
        Ok(uid) => uid,
        Err(e) => return Json(not_ready(String::new(), e)),
    };
    let SessionBatch(batch_id) = match session {
        Ok(session) => session,
        Err(e) => return Json(not_ready(uid, e)),
    };

    let broker = &state.broker;
    let outcome = broker
        .poller()
        .await_result(&batch_id, WorkTier::Prediction, &uid, broker.settings().result_wait)
        .await;

    let (ready, prediction, msg) = match outcome {
        PollOutcome::Ready(payload) => (true, Some(Value::Object(payload)), None),
        PollOutcome::NotReady(reason) => (false, None, Some(reason.message().to_string())),
    };
    Json(PredictionResponse {
        batch_id: Some(batch_id),
        uid,
        ready,
        prediction,
        msg,
    })
}

/// GET /getspectrogramsbyuid/:uid
pub async fn get_spectrograms_by_uid(
    State(state): State<AppState>,
    uid: Result<Path<String>, PathRejection>,
    session: Result<SessionBatch, BrokerError>,
) -> Json<SpectrogramResponse> {
    let not_ready = |uid: String, e: BrokerError| SpectrogramResponse {
        batch_id: None,
        uid,
        ready: false,
        images: None,
        msg: Some(e.to_string()),
    };

    let uid = match path_uid(uid) {
        Ok(uid) => uid,
        Err(e) => return Json(not_ready(String::new(), e)),
    };
    let SessionBatch(batch_id) = match session {
        Ok(session) => session,
        Err(e) => return Json(not_ready(uid, e)),
    };

    let broker = &state.broker;
    let outcome = broker
        .poller()
        .await_result(&batch_id, WorkTier::Spectrogram, &uid, broker.settings().result_wait)
        .await;

    let (ready, images, msg) = match outcome {
        PollOutcome::Ready(mut payload) => {
            let images = payload.remove("images").unwrap_or(Value::Object(payload));
            (true, Some(images), None)
        }
        PollOutcome::NotReady(reason) => (false, None, Some(reason.message().to_string())),
    };
    Json(SpectrogramResponse {
        batch_id: Some(batch_id),
        uid,
        ready,
        images,
        msg,
    })
}

/// GET /getaclip
pub async fn get_a_clip(
    State(state): State<AppState>,
    session: Result<SessionBatch, BrokerError>,
) -> Json<ClipSampleResponse> {
    let not_ready = |batch_id: Option<String>, msg: String| ClipSampleResponse {
        batch_id,
        uid: None,
        ready: false,
        ext: None,
        sample: None,
        msg: Some(msg),
    };

    let SessionBatch(batch_id) = match session {
        Ok(session) => session,
        Err(e) => return Json(not_ready(None, e.to_string())),
    };

    let broker = &state.broker;
    match broker.poller().take_clip(&batch_id, broker.settings().result_wait).await {
        ClipOutcome::Ready { uid, ext, sample } => Json(ClipSampleResponse {
            batch_id: Some(batch_id),
            uid: Some(uid),
            ready: true,
            ext: Some(ext),
            sample: Some(sample),
            msg: None,
        }),
        ClipOutcome::NotReady(reason) => Json(not_ready(Some(batch_id), reason.message().to_string())),
    }
}

/// POST /clips
pub async fn submit_clips(
    State(state): State<AppState>,
    session: Result<SessionBatch, BrokerError>,
    submission: Result<Json<ClipSubmission>, JsonRejection>,
) -> Json<SubmissionResponse> {
    let rejected = |batch_id: Option<String>, failures: Vec<String>, msg: String| SubmissionResponse {
        batch_id,
        accepted: false,
        uids: Vec::new(),
        failures,
        msg: Some(msg),
    };

    let SessionBatch(batch_id) = match session {
        Ok(session) => session,
        Err(e) => return Json(rejected(None, Vec::new(), e.to_string())),
    };
    let Json(submission) = match submission {
        Ok(submission) => submission,
        Err(e) => return Json(rejected(Some(batch_id), Vec::new(), e.body_text())),
    };

    match state.broker.producer().submit(&batch_id, submission).await {
        Ok(report) => Json(SubmissionResponse {
            batch_id: Some(report.batch_id),
            accepted: true,
            uids: report.uids,
            failures: report.failures,
            msg: None,
        }),
        Err(e) => {
            warn!(batch_id = %batch_id, error = %e, "Submission rejected");
            let failures = match &e {
                BrokerError::AllItemsFailed(reasons) => reasons.clone(),
                _ => Vec::new(),
            };
            Json(rejected(Some(batch_id), failures, e.to_string()))
        }
    }
}

pub fn client_routes() -> Router<AppState> {
    Router::new()
        .route("/getpredictionbyuid/:uid", get(get_prediction_by_uid))
        .route("/getspectrogramsbyuid/:uid", get(get_spectrograms_by_uid))
        .route("/getaclip", get(get_a_clip))
        .route("/clips", post(submit_clips))
}
