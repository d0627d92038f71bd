//! genreml-wk - worker-side client for the GenreML broker
//!
//! Workers cannot be reached by the broker, so they pull: discover the broker,
//! long-poll for items, post sealed results, and after every round ask whether
//! they may exit. A worker cleared to exit can signal sibling services first.

pub mod client;
pub mod config;
pub mod discovery;
pub mod error;
pub mod recycle;
pub mod runner;

pub use client::BrokerClient;
pub use config::WorkerConfig;
pub use discovery::{discover, NoSrv, SrvResolver};
pub use error::{Result, WorkerError};
pub use recycle::{RecycleHook, RestartRequest, RestartSignal};
pub use runner::{RunSummary, Runner, WorkProcessor};

/// Discover the broker and build a client for `config`
pub async fn connect(config: &WorkerConfig, resolver: &dyn SrvResolver, probe: bool) -> Result<BrokerClient> {
    let http = reqwest::Client::builder().timeout(config.request_timeout).build()?;
    let base_url = discover(&config.broker, resolver, &http, probe).await;
    tracing::info!(tier = %config.tier, worker = %config.worker_id, broker = %base_url, "Connected worker");
    Ok(BrokerClient::with_http(http, base_url, config.signer.clone(), config.worker_id.clone()))
}
