//! Run-limited worker loop with the safe-to-recycle gate
//!
//! A round is `run_limit` poll cycles: poll, process, submit. After each
//! round the worker asks the broker whether it may exit. The broker says yes
//! only while sibling workers of the tier are still polling, so the last
//! worker of a tier keeps running.

use crate::client::BrokerClient;
use crate::error::Result;
use crate::recycle::RecycleHook;
use async_trait::async_trait;
use genreml_common::api::{FinishedWork, WorkItemView};
use genreml_common::WorkTier;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Attempts at delivering one result before giving up on it
pub const SUBMIT_ATTEMPTS: u32 = 5;

/// Pause after a failed poll
pub const POLL_ERROR_BACKOFF: Duration = Duration::from_millis(500);

/// Turns a work item into a result
#[async_trait]
pub trait WorkProcessor: Send + Sync {
    /// Process one item; `Ok(None)` drops the item without a result
    async fn process(&self, item: WorkItemView) -> Result<Option<FinishedWork>>;
}

/// Counters of a finished run
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RunSummary {
    pub rounds: u32,
    pub processed: u32,
    pub submitted: u32,
    pub failed: u32,
}

pub struct Runner<P> {
    client: BrokerClient,
    tier: WorkTier,
    run_limit: u32,
    processor: P,
    poll_error_backoff: Duration,
    recycle_hook: Option<Box<dyn RecycleHook>>,
}

impl<P: WorkProcessor> Runner<P> {
    pub fn new(client: BrokerClient, tier: WorkTier, run_limit: u32, processor: P) -> Self {
        Self {
            client,
            tier,
            run_limit,
            processor,
            poll_error_backoff: POLL_ERROR_BACKOFF,
            recycle_hook: None,
        }
    }

    pub fn with_poll_error_backoff(mut self, backoff: Duration) -> Self {
        self.poll_error_backoff = backoff;
        self
    }

    /// Run `hook` once the broker clears this worker to exit
    pub fn with_recycle_hook(mut self, hook: impl RecycleHook + 'static) -> Self {
        self.recycle_hook = Some(Box::new(hook));
        self
    }

    /// Run rounds until the broker reports it is safe to exit
    ///
    /// A failed gate query counts as "not safe".
    pub async fn run(&self) -> RunSummary {
        let mut summary = RunSummary::default();
        loop {
            self.run_round(&mut summary).await;
            summary.rounds += 1;

            match self.client.safe_to_recycle(self.tier).await {
                Ok(true) => {
                    info!(tier = %self.tier, worker = self.client.worker_id(), ?summary, "Safe to recycle, exiting");
                    if let Some(hook) = &self.recycle_hook {
                        hook.on_recycle().await;
                    }
                    return summary;
                }
                Ok(false) => debug!(tier = %self.tier, "Last poller of tier, starting another round"),
                Err(e) => warn!(tier = %self.tier, error = %e, "Safe-to-recycle query failed, starting another round"),
            }
        }
    }

    /// One round of `run_limit` poll cycles
    pub async fn run_round(&self, summary: &mut RunSummary) {
        for _ in 0..self.run_limit {
            let item = match self.client.poll(self.tier).await {
                Ok(Some(item)) => item,
                Ok(None) => continue,
                Err(e) => {
                    warn!(tier = %self.tier, error = %e, "Poll failed");
                    tokio::time::sleep(self.poll_error_backoff).await;
                    continue;
                }
            };

            let uid = item.uid.clone();
            let finished = match self.processor.process(item).await {
                Ok(Some(finished)) => finished,
                Ok(None) => continue,
                Err(e) => {
                    warn!(tier = %self.tier, uid = %uid, error = %e, "Processing failed");
                    summary.failed += 1;
                    continue;
                }
            };
            summary.processed += 1;

            if self.submit_with_retry(&finished).await {
                summary.submitted += 1;
            } else {
                summary.failed += 1;
            }
        }
    }

    /// Post a result until the broker acknowledges it
    async fn submit_with_retry(&self, finished: &FinishedWork) -> bool {
        for attempt in 1..=SUBMIT_ATTEMPTS {
            match self.client.submit(self.tier, finished).await {
                Ok(true) => return true,
                Ok(false) => warn!(uid = %finished.uid, attempt, "Result not received"),
                Err(e) => warn!(uid = %finished.uid, attempt, error = %e, "Result submission failed"),
            }
        }
        warn!(uid = %finished.uid, "Giving up on result after {} attempts", SUBMIT_ATTEMPTS);
        false
    }
}
