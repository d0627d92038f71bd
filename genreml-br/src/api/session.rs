//! Client sessions
//!
//! A browser client is bound to one batch through a signed `batchid` cookie.
//! The cookie value is a session-signed batch id; handlers extract the
//! verified id with `SessionBatch`.

use axum::{
    async_trait,
    extract::{FromRequestParts, State},
    http::{header, request::Parts, HeaderMap},
    response::IntoResponse,
    routing::get,
    Json, Router,
};
use genreml_common::api::SessionResponse;
use genreml_common::ids::new_batch_id;
use tracing::info;

use crate::error::BrokerError;
use crate::AppState;

/// Name of the session cookie
pub const SESSION_COOKIE: &str = "batchid";

/// Batch id taken from a verified session cookie
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionBatch(pub String);

#[async_trait]
impl FromRequestParts<AppState> for SessionBatch {
    type Rejection = BrokerError;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, Self::Rejection> {
        let raw = cookie_value(&parts.headers, SESSION_COOKIE).ok_or(BrokerError::MissingSession)?;
        let batch_id = state.broker.session().verify(&raw)?;
        Ok(SessionBatch(batch_id))
    }
}

/// Value of cookie `name`, if any `Cookie` header carries it
pub fn cookie_value(headers: &HeaderMap, name: &str) -> Option<String> {
    headers
        .get_all(header::COOKIE)
        .iter()
        .filter_map(|value| value.to_str().ok())
        .flat_map(|value| value.split(';'))
        .filter_map(|pair| pair.trim().split_once('='))
        .find(|(key, _)| *key == name)
        .map(|(_, value)| value.trim_matches('"').to_string())
}

/// GET /session
///
/// Keeps the batch of a valid existing session, otherwise starts a new one.
pub async fn get_session(
    State(state): State<AppState>,
    existing: Result<SessionBatch, BrokerError>,
) -> impl IntoResponse {
    let batch_id = match existing {
        Ok(SessionBatch(batch_id)) => batch_id,
        Err(_) => {
            let batch_id = new_batch_id();
            info!(batch_id = %batch_id, "New session");
            batch_id
        }
    };

    let cookie = format!(
        "{}={}; Path=/; HttpOnly; SameSite=Lax",
        SESSION_COOKIE,
        state.broker.session().sign(&batch_id)
    );
    ([(header::SET_COOKIE, cookie)], Json(SessionResponse { batch_id }))
}

pub fn session_routes() -> Router<AppState> {
    Router::new().route("/session", get(get_session))
}
