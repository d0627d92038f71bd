//! Broker discovery
//!
//! The configured address may name an SRV record. When a resolver is
//! available it maps the address to a target host, and the resulting URL can
//! be probed through `/test`. Any failure falls back to the literal configured
//! URL, which is logged but never escalated.

use crate::error::{Result, WorkerError};
use async_trait::async_trait;
use genreml_common::config::ServiceEndpoint;
use std::time::Duration;
use tracing::{debug, warn};

/// Timeout for the discovery probe
pub const PROBE_TIMEOUT: Duration = Duration::from_secs(5);

/// SRV lookup capability
#[async_trait]
pub trait SrvResolver: Send + Sync {
    /// Target host for an SRV name
    async fn resolve(&self, name: &str) -> Result<String>;
}

/// Resolver for deployments without SRV records; every lookup fails
#[derive(Debug, Default, Clone, Copy)]
pub struct NoSrv;

#[async_trait]
impl SrvResolver for NoSrv {
    async fn resolve(&self, name: &str) -> Result<String> {
        Err(WorkerError::UpstreamUnreachable(format!("no SRV resolver for {}", name)))
    }
}

/// URL of the service behind `endpoint`
///
/// With `probe` set, the discovered URL must answer `GET /test` with a
/// success status to be used.
pub async fn discover(
    endpoint: &ServiceEndpoint,
    resolver: &dyn SrvResolver,
    http: &reqwest::Client,
    probe: bool,
) -> String {
    match try_discover(endpoint, resolver, http, probe).await {
        Ok(url) => {
            debug!(url = %url, "Discovered service");
            url
        }
        Err(e) => {
            let url = endpoint.literal_url();
            warn!(address = %endpoint.address, error = %e, fallback = %url, "Discovery failed, using configured address");
            url
        }
    }
}

async fn try_discover(
    endpoint: &ServiceEndpoint,
    resolver: &dyn SrvResolver,
    http: &reqwest::Client,
    probe: bool,
) -> Result<String> {
    let host = resolver.resolve(&endpoint.address).await?;
    let host = host.trim_end_matches('.');
    let url = endpoint.url_for_host(host);

    if probe {
        http.get(format!("{}/test", url))
            .timeout(PROBE_TIMEOUT)
            .send()
            .await
            .and_then(|response| response.error_for_status())
            .map_err(|e| WorkerError::UpstreamUnreachable(format!("probe of {} failed: {}", url, e)))?;
    }
    Ok(url)
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Fixed(&'static str);

    #[async_trait]
    impl SrvResolver for Fixed {
        async fn resolve(&self, _name: &str) -> Result<String> {
            Ok(self.0.to_string())
        }
    }

    #[tokio::test]
    async fn test_no_srv_falls_back_to_literal() {
        let endpoint = ServiceEndpoint::new("http", "frontend.local", Some(5731));
        let url = discover(&endpoint, &NoSrv, &reqwest::Client::new(), false).await;
        assert_eq!(url, "http://frontend.local:5731");
    }

    #[tokio::test]
    async fn test_resolved_host_used_without_probe() {
        let endpoint = ServiceEndpoint::new("http", "_frontend._tcp.local", Some(5731));
        let url = discover(&endpoint, &Fixed("node-3.local."), &reqwest::Client::new(), false).await;
        assert_eq!(url, "http://node-3.local:5731");
    }
}
