//! Long-poll dispatch of queued work to workers
//!
//! A worker call blocks until an item is available or the window closes.
//! While it blocks, the worker is registered in the liveness tracker. The
//! artifact is embedded in the reply and deleted, so the broker keeps no copy
//! of dispatched audio.

use crate::artifact::ArtifactStore;
use crate::batch::{BatchRegistry, QueuedWork};
use crate::error::Result;
use crate::liveness::LivenessTracker;
use crate::queue::TierQueues;
use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use genreml_common::api::WorkItemView;
use genreml_common::{Signer, WorkTier};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, info, warn};

/// Default long-poll window
pub const DEFAULT_POLL_WINDOW: Duration = Duration::from_secs(30);

#[derive(Clone)]
pub struct LongPollDispatcher {
    signer: Signer,
    registry: Arc<BatchRegistry>,
    queues: Arc<TierQueues<QueuedWork>>,
    liveness: Arc<LivenessTracker>,
    artifacts: ArtifactStore,
}

impl LongPollDispatcher {
    pub fn new(
        signer: Signer,
        registry: Arc<BatchRegistry>,
        queues: Arc<TierQueues<QueuedWork>>,
        liveness: Arc<LivenessTracker>,
        artifacts: ArtifactStore,
    ) -> Self {
        Self {
            signer,
            registry,
            queues,
            liveness,
            artifacts,
        }
    }

    /// Wait up to `max_wait` for the next item of `tier`
    ///
    /// Returns `Ok(None)` when the window closes with nothing to hand out.
    pub async fn poll(
        &self,
        tier: WorkTier,
        worker_token: &str,
        max_wait: Duration,
    ) -> Result<Option<WorkItemView>> {
        let worker_id = self.signer.verify(worker_token)?;
        let queue = self.queues.get(tier)?;
        let _guard = self.liveness.register(tier, &worker_id);

        let deadline = Instant::now() + max_wait;
        loop {
            let Some(work) = queue.dequeue_until(deadline).await else {
                debug!(tier = %tier, worker = %worker_id, "Poll window closed without work");
                return Ok(None);
            };

            if !self.registry.is_dispatchable(&work) {
                info!(
                    tier = %tier,
                    batch_id = %work.batch_id,
                    uid = %work.uid,
                    "Skipping stale queue reference"
                );
                continue;
            }

            // Until the reply is built, a dropped request returns the item to the head
            let pending = queue.requeue_on_drop(work.clone());
            let bytes = match self.artifacts.read(&work.artifact).await {
                Ok(bytes) => bytes,
                Err(e) => {
                    pending.disarm();
                    warn!(
                        tier = %tier,
                        uid = %work.uid,
                        path = %work.artifact.display(),
                        error = %e,
                        "Artifact unreadable, skipping"
                    );
                    continue;
                }
            };
            pending.disarm();
            self.artifacts.remove_detached(work.artifact.clone());

            info!(tier = %tier, worker = %worker_id, batch_id = %work.batch_id, uid = %work.uid, "Dispatched work");
            return Ok(Some(WorkItemView {
                filename: work.filename(),
                uid: work.uid,
                batch_id: work.batch_id,
                model_hash: work.model_hash,
                ext: work.ext,
                source_md5: work.source_md5,
                data: Some(STANDARD.encode(bytes)),
            }));
        }
    }
}
