//! Worker-facing endpoints
//!
//! Workers send their signed token (or a sealed result) as the raw request
//! body and always get a 200 with a body describing the outcome.

use axum::{body::Bytes, extract::State, routing::post, Json, Router};
use genreml_common::api::{ReceivedResponse, SafeToRecycleResponse, WorkResponse};
use genreml_common::{EnvelopeError, WorkTier};
use tracing::{debug, warn};

use crate::error::{BrokerError, Result};
use crate::AppState;

/// Worker bodies are text; anything else fails verification
fn body_text(body: &Bytes) -> Result<&str> {
    std::str::from_utf8(body).map_err(|e| BrokerError::SignatureInvalid(EnvelopeError::Decode(e.to_string())))
}

/// Long poll shared by both tiers
async fn poll(state: &AppState, tier: WorkTier, body: &Bytes) -> WorkResponse {
    let broker = &state.broker;
    let polled = match body_text(body) {
        Ok(token) => {
            broker
                .dispatcher()
                .poll(tier, token, broker.settings().poll_window)
                .await
        }
        Err(e) => Err(e),
    };
    match polled {
        Ok(Some(item)) => WorkResponse::with_item(item),
        Ok(None) => WorkResponse::no_work(),
        Err(e) => {
            warn!(tier = %tier, error = %e, "Work poll rejected");
            WorkResponse::rejected(e.to_string())
        }
    }
}

async fn finish(state: &AppState, tier: WorkTier, body: &Bytes) -> ReceivedResponse {
    let submitted = match body_text(body) {
        Ok(sealed) => state.broker.collector().submit(tier, sealed).await,
        Err(e) => Err(e),
    };
    match submitted {
        Ok(outcome) => {
            debug!(tier = %tier, ?outcome, "Result acknowledged");
            ReceivedResponse {
                received: true,
                msg: None,
            }
        }
        Err(e) => {
            warn!(tier = %tier, error = %e, "Result rejected");
            ReceivedResponse {
                received: false,
                msg: Some(e.to_string()),
            }
        }
    }
}

fn safe_to_reboot(state: &AppState, tier: WorkTier, body: &Bytes) -> SafeToRecycleResponse {
    match body_text(body).and_then(|token| state.broker.safe_to_recycle(tier, token)) {
        Ok(safe) => SafeToRecycleResponse { safe },
        Err(e) => {
            warn!(tier = %tier, error = %e, "Safe-to-recycle query rejected");
            SafeToRecycleResponse { safe: false }
        }
    }
}

/// POST /predictions
pub async fn poll_predictions(State(state): State<AppState>, body: Bytes) -> Json<WorkResponse> {
    Json(poll(&state, WorkTier::Prediction, &body).await)
}

/// POST /spectrograms
pub async fn poll_spectrograms(State(state): State<AppState>, body: Bytes) -> Json<WorkResponse> {
    Json(poll(&state, WorkTier::Spectrogram, &body).await)
}

/// POST /finishedpredictions
pub async fn finished_predictions(State(state): State<AppState>, body: Bytes) -> Json<ReceivedResponse> {
    Json(finish(&state, WorkTier::Prediction, &body).await)
}

/// POST /finishedspectrograms
pub async fn finished_spectrograms(State(state): State<AppState>, body: Bytes) -> Json<ReceivedResponse> {
    Json(finish(&state, WorkTier::Spectrogram, &body).await)
}

/// POST /predictsafetoreboot
pub async fn predict_safe_to_reboot(State(state): State<AppState>, body: Bytes) -> Json<SafeToRecycleResponse> {
    Json(safe_to_reboot(&state, WorkTier::Prediction, &body))
}

/// POST /spectrogramsafetoreboot
pub async fn spectrogram_safe_to_reboot(
    State(state): State<AppState>,
    body: Bytes,
) -> Json<SafeToRecycleResponse> {
    Json(safe_to_reboot(&state, WorkTier::Spectrogram, &body))
}

pub fn worker_routes() -> Router<AppState> {
    Router::new()
        .route("/predictions", post(poll_predictions))
        .route("/spectrograms", post(poll_spectrograms))
        .route("/finishedpredictions", post(finished_predictions))
        .route("/finishedspectrograms", post(finished_spectrograms))
        .route("/predictsafetoreboot", post(predict_safe_to_reboot))
        .route("/spectrogramsafetoreboot", post(spectrogram_safe_to_reboot))
}
