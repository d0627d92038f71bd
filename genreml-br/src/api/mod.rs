//! HTTP API handlers for genreml-br
//!
//! Every handler answers with a body describing the outcome; internal errors
//! are converted here, once, into `work:false`, `received:false`,
//! `ready:false`, `safe:false` or `accepted:false` bodies carrying a `msg`.

pub mod buildinfo;
pub mod client;
pub mod health;
pub mod session;
pub mod worker;

pub use buildinfo::get_build_info;
pub use client::client_routes;
pub use health::health_routes;
pub use session::{session_routes, SessionBatch, SESSION_COOKIE};
pub use worker::worker_routes;
