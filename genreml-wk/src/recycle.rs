//! Actions taken once the broker clears a worker to exit

use crate::config::WorkerConfig;
use crate::error::Result;
use async_trait::async_trait;
use genreml_common::config::ServiceEndpoint;
use genreml_common::Signer;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{info, warn};

/// Timeout for one restart signal
pub const RESTART_SIGNAL_TIMEOUT: Duration = Duration::from_secs(5);

/// Runs after a `safe: true` answer, before the runner returns
#[async_trait]
pub trait RecycleHook: Send + Sync {
    async fn on_recycle(&self);
}

/// Sealed body of a restart signal
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RestartRequest {
    pub restart: bool,
}

/// Tells sibling services to restart along with this worker
///
/// Each target gets a sealed `{"restart": true}` posted to `/restartsignal`.
/// Failures are logged and skipped.
pub struct RestartSignal {
    http: reqwest::Client,
    signer: Signer,
    targets: Vec<String>,
}

impl RestartSignal {
    pub fn new(http: reqwest::Client, signer: Signer, targets: Vec<String>) -> Self {
        Self {
            http,
            signer,
            targets: targets
                .into_iter()
                .map(|url| url.trim_end_matches('/').to_string())
                .collect(),
        }
    }

    /// Signal the configured restart targets by their literal URLs
    pub fn from_config(config: &WorkerConfig) -> Result<Self> {
        let http = reqwest::Client::builder().timeout(RESTART_SIGNAL_TIMEOUT).build()?;
        let targets = config.restart_targets.iter().map(ServiceEndpoint::literal_url).collect();
        Ok(Self::new(http, config.signer.clone(), targets))
    }

    pub fn targets(&self) -> &[String] {
        &self.targets
    }

    /// Signal every target; returns how many accepted
    pub async fn send(&self) -> usize {
        let body = match self.signer.seal(&RestartRequest { restart: true }) {
            Ok(body) => body,
            Err(e) => {
                warn!(error = %e, "Could not seal restart signal");
                return 0;
            }
        };

        let mut accepted = 0;
        for target in &self.targets {
            let sent = self
                .http
                .post(format!("{}/restartsignal", target))
                .body(body.clone())
                .send()
                .await
                .and_then(|response| response.error_for_status());
            match sent {
                Ok(_) => accepted += 1,
                Err(e) => warn!(target = %target, error = %e, "Restart signal failed"),
            }
        }
        info!(accepted, total = self.targets.len(), "Restart signals sent");
        accepted
    }
}

#[async_trait]
impl RecycleHook for RestartSignal {
    async fn on_recycle(&self) {
        self.send().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_no_targets_sends_nothing() {
        let signal = RestartSignal::new(reqwest::Client::new(), Signer::new("s"), Vec::new());
        assert_eq!(signal.send().await, 0);
    }

    #[test]
    fn test_target_trailing_slash_trimmed() {
        let signal = RestartSignal::new(
            reqwest::Client::new(),
            Signer::new("s"),
            vec!["http://spectro.local:8000/".to_string()],
        );
        assert_eq!(signal.targets(), ["http://spectro.local:8000"]);
    }
}
