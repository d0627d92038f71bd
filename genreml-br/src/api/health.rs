//! Health check endpoints
//!
//! `/test` answers the same as `/health`; workers probe it during discovery.

use axum::{routing::get, Json, Router};
use genreml_common::api::HealthResponse;

use crate::api::get_build_info;
use crate::AppState;

/// GET /health
pub async fn health_check() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        module: "genreml-br".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}

/// Build health check routes
pub fn health_routes() -> Router<AppState> {
    Router::new()
        .route("/health", get(health_check))
        .route("/test", get(health_check))
        .route("/build_info", get(get_build_info))
}
