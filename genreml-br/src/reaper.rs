//! Stale batch reaper
//!
//! One task per batch, spawned when the batch is created. It sleeps the TTL
//! once, then deletes the batch if it is drained or old enough. The TTL does
//! not renew on partial progress.

use crate::artifact::ArtifactStore;
use crate::batch::{BatchRegistry, ReapOutcome};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Default batch lifetime
pub const DEFAULT_BATCH_TTL: Duration = Duration::from_secs(600);

#[derive(Clone)]
pub struct StaleTaskReaper {
    registry: Arc<BatchRegistry>,
    artifacts: ArtifactStore,
    ttl: Duration,
}

impl StaleTaskReaper {
    pub fn new(registry: Arc<BatchRegistry>, artifacts: ArtifactStore, ttl: Duration) -> Self {
        Self {
            registry,
            artifacts,
            ttl,
        }
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Start the reaper task for a freshly created batch
    pub fn spawn(&self, batch_id: String) -> JoinHandle<ReapOutcome> {
        let reaper = self.clone();
        tokio::spawn(async move {
            tokio::time::sleep(reaper.ttl).await;
            reaper.reap(&batch_id).await
        })
    }

    /// Apply the reaper rule to one batch now
    pub async fn reap(&self, batch_id: &str) -> ReapOutcome {
        let outcome = self.registry.reap(batch_id, self.ttl);
        match &outcome {
            ReapOutcome::Missing => debug!(batch_id, "Batch already gone"),
            ReapOutcome::Drained => info!(batch_id, "Reaped drained batch"),
            ReapOutcome::Expired { pending, artifacts } => {
                info!(batch_id, pending, "Reaped expired batch with pending items");
                self.artifacts.remove_all_best_effort(artifacts).await;
            }
            ReapOutcome::Retained { age } => {
                warn!(batch_id, age_ms = age.as_millis() as u64, "Reaper fired before TTL, keeping batch");
            }
        }
        outcome
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::batch::WorkItem;
    use genreml_common::WorkTier;

    fn reaper(ttl: Duration) -> (Arc<BatchRegistry>, StaleTaskReaper) {
        let registry = Arc::new(BatchRegistry::new());
        let reaper = StaleTaskReaper::new(
            Arc::clone(&registry),
            ArtifactStore::new(std::env::temp_dir().join("genreml-reaper-tests")),
            ttl,
        );
        (registry, reaper)
    }

    fn pending_item(batch_id: &str) -> WorkItem {
        WorkItem {
            uid: "u1".to_string(),
            batch_id: batch_id.to_string(),
            tier: WorkTier::Prediction,
            source_md5: String::new(),
            model_hash: "model".to_string(),
            ext: "wav".to_string(),
            clip_index: 0,
            artifact: std::env::temp_dir().join("genreml-reaper-tests").join("missing.wav"),
            result: None,
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_pending_batch_expires_after_ttl() {
        let (registry, reaper) = reaper(Duration::from_secs(600));
        registry.create("b1", "model");
        registry.insert_item(pending_item("b1")).unwrap();

        let handle = reaper.spawn("b1".to_string());

        tokio::time::sleep(Duration::from_secs(599)).await;
        assert!(registry.contains("b1"));

        let outcome = handle.await.unwrap();
        assert!(matches!(outcome, ReapOutcome::Expired { pending: 1, .. }));
        assert!(!registry.contains("b1"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_drained_batch_deleted() {
        let (registry, reaper) = reaper(Duration::from_secs(60));
        registry.create("b1", "model");

        let outcome = reaper.spawn("b1".to_string()).await.unwrap();
        assert_eq!(outcome, ReapOutcome::Drained);
        assert!(registry.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_missing_batch_is_quiet() {
        let (registry, reaper) = reaper(Duration::from_secs(60));
        registry.create("b1", "model");
        registry.remove_batch("b1");

        assert_eq!(reaper.spawn("b1".to_string()).await.unwrap(), ReapOutcome::Missing);
    }

    #[tokio::test(start_paused = true)]
    async fn test_early_reap_keeps_young_batch() {
        let (registry, reaper) = reaper(Duration::from_secs(600));
        registry.create("b1", "model");
        registry.insert_item(pending_item("b1")).unwrap();

        assert!(matches!(reaper.reap("b1").await, ReapOutcome::Retained { .. }));
        assert!(registry.contains("b1"));
    }
}
