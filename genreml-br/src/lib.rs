//! genreml-br library - work broker between clients and worker pools
//!
//! Clients submit split audio clips and poll per-uid results. Prediction and
//! spectrogram workers long-poll for work and post sealed results back. All
//! state is in memory and lost on restart.

use axum::extract::DefaultBodyLimit;
use axum::Router;
use std::sync::Arc;
use tower::ServiceBuilder;
use tower_http::trace::TraceLayer;

pub mod api;
pub mod artifact;
pub mod batch;
pub mod broker;
pub mod collector;
pub mod config;
pub mod dispatcher;
pub mod error;
pub mod liveness;
pub mod poller;
pub mod producer;
pub mod queue;
pub mod reaper;

pub use broker::Broker;
pub use error::{BrokerError, Result};

/// Largest accepted request body (clip submissions carry base64 audio)
pub const MAX_BODY_BYTES: usize = 64 * 1024 * 1024;

/// Application state shared across HTTP handlers
#[derive(Clone)]
pub struct AppState {
    pub broker: Arc<Broker>,
}

impl AppState {
    pub fn new(broker: Broker) -> Self {
        Self {
            broker: Arc::new(broker),
        }
    }
}

/// Build application router
pub fn build_router(state: AppState) -> Router {
    Router::new()
        .merge(api::worker_routes())
        .merge(api::client_routes())
        .merge(api::session_routes())
        .merge(api::health_routes())
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(DefaultBodyLimit::max(MAX_BODY_BYTES)),
        )
        .with_state(state)
}
