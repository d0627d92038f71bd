//! Worker configuration from the environment
//!
//! | Variable | Meaning |
//! |---|---|
//! | `GENREML_FRONTEND_SCHEMA/_ADDRESS/_PORT` | Broker endpoint triple |
//! | `GENREML_SIGNING_TOKEN` | Secret shared with the broker |
//! | `RUN_LIMIT` | Poll cycles per round before asking to recycle |
//! | `GENREML_WORKER_ID` | Worker identity (random if unset) |
//! | `GENREML_FEATURES_*`, `GENREML_SPECTRO_*` | Optional services told to restart on recycle |

use crate::error::{Result, WorkerError};
use genreml_common::config::ServiceEndpoint;
use genreml_common::{Signer, WorkTier};
use std::time::Duration;

/// Prefix of the broker endpoint triple
pub const BROKER_ENDPOINT_PREFIX: &str = "GENREML_FRONTEND";

/// Prefixes of the optional endpoints signalled when the worker recycles
pub const RESTART_TARGET_PREFIXES: &[&str] = &["GENREML_FEATURES", "GENREML_SPECTRO"];

pub const SIGNING_TOKEN_ENV: &str = "GENREML_SIGNING_TOKEN";
pub const RUN_LIMIT_ENV: &str = "RUN_LIMIT";
pub const WORKER_ID_ENV: &str = "GENREML_WORKER_ID";

/// Client-side timeout for one broker request; covers the long-poll window
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(60);

#[derive(Clone)]
pub struct WorkerConfig {
    pub tier: WorkTier,
    pub broker: ServiceEndpoint,
    pub signer: Signer,
    pub worker_id: String,
    pub run_limit: u32,
    pub request_timeout: Duration,
    pub restart_targets: Vec<ServiceEndpoint>,
}

impl std::fmt::Debug for WorkerConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkerConfig")
            .field("tier", &self.tier)
            .field("broker", &self.broker)
            .field("worker_id", &self.worker_id)
            .field("run_limit", &self.run_limit)
            .field("restart_targets", &self.restart_targets)
            .finish_non_exhaustive()
    }
}

impl WorkerConfig {
    /// Load configuration for a worker of `tier` from the process environment
    pub fn from_env(tier: WorkTier) -> Result<Self> {
        Self::from_lookup(tier, |key| std::env::var(key).ok())
    }

    pub fn from_lookup<F>(tier: WorkTier, lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        if !tier.is_queued() {
            return Err(WorkerError::Config(format!("no worker pool for tier {}", tier)));
        }

        let broker = ServiceEndpoint::from_lookup(BROKER_ENDPOINT_PREFIX, &lookup)?;
        let secret = lookup(SIGNING_TOKEN_ENV)
            .filter(|s| !s.trim().is_empty())
            .ok_or_else(|| WorkerError::Config(format!("{} is not set", SIGNING_TOKEN_ENV)))?;
        let run_limit = parse_run_limit(
            &lookup(RUN_LIMIT_ENV).ok_or_else(|| WorkerError::Config(format!("{} is not set", RUN_LIMIT_ENV)))?,
        )?;
        let worker_id = lookup(WORKER_ID_ENV)
            .filter(|s| !s.trim().is_empty())
            .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());

        // A target is configured once its address is set
        let mut restart_targets = Vec::new();
        for prefix in RESTART_TARGET_PREFIXES {
            if lookup(&format!("{}_ADDRESS", prefix)).is_some() {
                restart_targets.push(ServiceEndpoint::from_lookup(prefix, &lookup)?);
            }
        }

        Ok(Self {
            tier,
            broker,
            signer: Signer::new(secret),
            worker_id,
            run_limit,
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
            restart_targets,
        })
    }
}

/// Parse a run limit: decimal digits only, greater than zero
pub fn parse_run_limit(raw: &str) -> Result<u32> {
    if raw.is_empty() || !raw.bytes().all(|b| b.is_ascii_digit()) {
        return Err(WorkerError::InvalidRunLimit(raw.to_string()));
    }
    match raw.parse::<u32>() {
        Ok(limit) if limit > 0 => Ok(limit),
        _ => Err(WorkerError::InvalidRunLimit(raw.to_string())),
    }
}
