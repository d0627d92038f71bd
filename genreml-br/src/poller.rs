//! Client-side result polling
//!
//! Clients ask for one uid at a time. A call blocks on the registry change
//! notifier until the result is ready or the wait runs out. A ready result is
//! removed as it is handed out, so each result reaches the client once.

use crate::artifact::ArtifactStore;
use crate::batch::{BatchRegistry, Payload, ResultLookup};
use crate::error::BrokerError;
use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use genreml_common::WorkTier;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, warn};

/// Default wait for a client result poll
pub const DEFAULT_RESULT_WAIT: Duration = Duration::from_secs(15);

/// First precondition that was still failing when the wait ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NotReadyReason {
    BatchNotFound,
    UidNotFound,
    Pending,
    NoClip,
}

impl NotReadyReason {
    pub fn message(&self) -> &'static str {
        match self {
            NotReadyReason::BatchNotFound => "batch id not found",
            NotReadyReason::UidNotFound => "uid not found",
            NotReadyReason::Pending => "result not ready",
            NotReadyReason::NoClip => "no clip available",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum PollOutcome {
    Ready(Payload),
    NotReady(NotReadyReason),
}

#[derive(Debug, Clone, PartialEq)]
pub enum ClipOutcome {
    Ready { uid: String, ext: String, sample: String },
    NotReady(NotReadyReason),
}

#[derive(Clone)]
pub struct ResultPoller {
    registry: Arc<BatchRegistry>,
    artifacts: ArtifactStore,
}

impl ResultPoller {
    pub fn new(registry: Arc<BatchRegistry>, artifacts: ArtifactStore) -> Self {
        Self { registry, artifacts }
    }

    /// Wait up to `max_wait` for the result of `uid`, consuming it when ready
    pub async fn await_result(
        &self,
        batch_id: &str,
        tier: WorkTier,
        uid: &str,
        max_wait: Duration,
    ) -> PollOutcome {
        let deadline = Instant::now() + max_wait;
        loop {
            let changed = self.registry.notified();
            tokio::pin!(changed);
            changed.as_mut().enable();

            let reason = match self.registry.take_result(batch_id, tier, uid) {
                ResultLookup::Ready(payload) => {
                    debug!(batch_id, tier = %tier, uid, "Result handed out");
                    return PollOutcome::Ready(payload);
                }
                ResultLookup::BatchNotFound => NotReadyReason::BatchNotFound,
                ResultLookup::UidNotFound => NotReadyReason::UidNotFound,
                ResultLookup::Pending => NotReadyReason::Pending,
            };

            if tokio::time::timeout_at(deadline, changed).await.is_err() {
                return PollOutcome::NotReady(reason);
            }
        }
    }

    /// Wait up to `max_wait` for a playable clip of the batch and hand it out
    ///
    /// Clips are handed out in submission order, each once.
    pub async fn take_clip(&self, batch_id: &str, max_wait: Duration) -> ClipOutcome {
        let deadline = Instant::now() + max_wait;
        loop {
            let changed = self.registry.notified();
            tokio::pin!(changed);
            changed.as_mut().enable();

            let reason = match self.registry.first_clip(batch_id) {
                Ok(Some(clip)) => {
                    // Read before claiming so a dropped request leaves the clip in place
                    let read = self.artifacts.read(&clip.artifact).await;
                    if self.registry.remove_item(batch_id, WorkTier::Clip, &clip.uid).is_none() {
                        // Taken by a concurrent request or reaped meanwhile
                        continue;
                    }
                    match read {
                        Ok(bytes) => {
                            self.artifacts.remove_detached(clip.artifact);
                            debug!(batch_id, uid = %clip.uid, "Clip sample handed out");
                            return ClipOutcome::Ready {
                                uid: clip.uid,
                                ext: clip.ext,
                                sample: STANDARD.encode(bytes),
                            };
                        }
                        Err(e) => {
                            warn!(batch_id, uid = %clip.uid, error = %e, "Clip artifact unreadable, dropping clip");
                            continue;
                        }
                    }
                }
                Ok(None) => NotReadyReason::NoClip,
                Err(BrokerError::BatchNotFound(_)) => NotReadyReason::BatchNotFound,
                Err(e) => {
                    warn!(batch_id, error = %e, "Clip lookup failed");
                    NotReadyReason::NoClip
                }
            };

            if tokio::time::timeout_at(deadline, changed).await.is_err() {
                return ClipOutcome::NotReady(reason);
            }
        }
    }
}
