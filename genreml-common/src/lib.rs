//! # GenreML Common Library
//!
//! Shared code for the GenreML broker and its workers including:
//! - Signed tokens and sealed payloads exchanged with workers
//! - Wire types for the broker HTTP API
//! - Service endpoint and store folder configuration
//! - Identifier generation

pub mod api;
pub mod config;
pub mod envelope;
pub mod error;
pub mod ids;

pub use api::types::WorkTier;
pub use envelope::{EnvelopeError, Signer};
pub use error::{Error, Result};
