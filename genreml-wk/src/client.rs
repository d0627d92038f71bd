//! HTTP client for the broker's worker endpoints

use crate::error::{Result, WorkerError};
use genreml_common::api::{FinishedWork, ReceivedResponse, SafeToRecycleResponse, WorkItemView, WorkResponse};
use genreml_common::{Signer, WorkTier};
use std::time::Duration;
use tracing::debug;

/// Endpoint paths of one worker tier
struct TierPaths {
    poll: &'static str,
    finished: &'static str,
    safe_to_reboot: &'static str,
}

fn tier_paths(tier: WorkTier) -> Result<TierPaths> {
    match tier {
        WorkTier::Prediction => Ok(TierPaths {
            poll: "/predictions",
            finished: "/finishedpredictions",
            safe_to_reboot: "/predictsafetoreboot",
        }),
        WorkTier::Spectrogram => Ok(TierPaths {
            poll: "/spectrograms",
            finished: "/finishedspectrograms",
            safe_to_reboot: "/spectrogramsafetoreboot",
        }),
        WorkTier::Clip => Err(WorkerError::Config(format!("no worker endpoints for tier {}", tier))),
    }
}

/// Broker client bound to one worker identity
#[derive(Clone)]
pub struct BrokerClient {
    http: reqwest::Client,
    base_url: String,
    signer: Signer,
    worker_id: String,
}

impl BrokerClient {
    pub fn new(
        base_url: impl Into<String>,
        signer: Signer,
        worker_id: impl Into<String>,
        timeout: Duration,
    ) -> Result<Self> {
        let http = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self::with_http(http, base_url, signer, worker_id))
    }

    pub fn with_http(
        http: reqwest::Client,
        base_url: impl Into<String>,
        signer: Signer,
        worker_id: impl Into<String>,
    ) -> Self {
        Self {
            http,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            signer,
            worker_id: worker_id.into(),
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub fn worker_id(&self) -> &str {
        &self.worker_id
    }

    async fn post_text<T: serde::de::DeserializeOwned>(&self, path: &str, body: String) -> Result<T> {
        let response = self
            .http
            .post(format!("{}{}", self.base_url, path))
            .body(body)
            .send()
            .await?
            .error_for_status()?;
        Ok(response.json::<T>().await?)
    }

    /// Long-poll for the next item of `tier`
    pub async fn poll(&self, tier: WorkTier) -> Result<Option<WorkItemView>> {
        let paths = tier_paths(tier)?;
        let response: WorkResponse = self.post_text(paths.poll, self.signer.sign(&self.worker_id)).await?;
        if let Some(msg) = &response.msg {
            debug!(tier = %tier, msg = %msg, "Broker note on poll");
        }
        Ok(if response.work { response.item } else { None })
    }

    /// Seal and post a result; returns the broker's `received` flag
    pub async fn submit(&self, tier: WorkTier, finished: &FinishedWork) -> Result<bool> {
        let paths = tier_paths(tier)?;
        let sealed = self.signer.seal(finished)?;
        let response: ReceivedResponse = self.post_text(paths.finished, sealed).await?;
        if let Some(msg) = &response.msg {
            debug!(tier = %tier, msg = %msg, "Broker note on result");
        }
        Ok(response.received)
    }

    /// Ask whether this worker may exit
    pub async fn safe_to_recycle(&self, tier: WorkTier) -> Result<bool> {
        let paths = tier_paths(tier)?;
        let response: SafeToRecycleResponse = self
            .post_text(paths.safe_to_reboot, self.signer.sign(&self.worker_id))
            .await?;
        Ok(response.safe)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_clip_tier_has_no_endpoints() {
        assert!(tier_paths(WorkTier::Clip).is_err());
        assert_eq!(tier_paths(WorkTier::Spectrogram).unwrap().poll, "/spectrograms");
    }

    #[test]
    fn test_base_url_trailing_slash_trimmed() {
        let client = BrokerClient::with_http(reqwest::Client::new(), "http://broker:5731/", Signer::new("s"), "w1");
        assert_eq!(client.base_url(), "http://broker:5731");
    }
}
