//! Batch production from split clips
//!
//! The producer is the entry point for new work. A submission carries the
//! clips of one uploaded file, already split by an external stage. Each clip
//! becomes one work item per tier, backed by one artifact file per tier, and
//! its prediction and spectrogram references go onto their queues.

use crate::artifact::ArtifactStore;
use crate::batch::{BatchRegistry, QueuedWork, WorkItem};
use crate::error::{BrokerError, Result};
use crate::queue::TierQueues;
use crate::reaper::StaleTaskReaper;
use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use genreml_common::api::{ClipPayload, ClipSubmission};
use genreml_common::ids::new_uid;
use genreml_common::WorkTier;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{info, warn};

/// Result of a partially or fully accepted submission
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubmissionReport {
    pub batch_id: String,
    /// Uids of accepted clips, in clip order
    pub uids: Vec<String>,
    /// One reason per rejected clip
    pub failures: Vec<String>,
}

pub struct BatchProducer {
    registry: Arc<BatchRegistry>,
    queues: Arc<TierQueues<QueuedWork>>,
    artifacts: ArtifactStore,
    reaper: StaleTaskReaper,
    model_hash: String,
    submissions: Mutex<()>,
}

impl BatchProducer {
    pub fn new(
        registry: Arc<BatchRegistry>,
        queues: Arc<TierQueues<QueuedWork>>,
        artifacts: ArtifactStore,
        reaper: StaleTaskReaper,
        model_hash: impl Into<String>,
    ) -> Self {
        Self {
            registry,
            queues,
            artifacts,
            reaper,
            model_hash: model_hash.into(),
            submissions: Mutex::new(()),
        }
    }

    /// Turn a clip submission into work items of `batch_id`
    ///
    /// Clips that fail are skipped and reported. The submission fails only
    /// when no clip is accepted, or when the queues cannot hold every clip.
    pub async fn submit(&self, batch_id: &str, submission: ClipSubmission) -> Result<SubmissionReport> {
        if submission.clips.is_empty() {
            return Err(BrokerError::InvalidInput("submission has no clips".to_string()));
        }

        // Serializes capacity checks with enqueues; dequeues only free room.
        let _submitting = self.submissions.lock().await;
        self.queues.check_room(submission.clips.len())?;

        if self.registry.create(batch_id, &self.model_hash) {
            info!(batch_id, ttl_secs = self.reaper.ttl().as_secs(), "Batch created");
            self.reaper.spawn(batch_id.to_string());
        }

        let source_md5 = submission.source_md5.clone().unwrap_or_default();
        let first_index = self
            .registry
            .with_batch(batch_id, |record| {
                WorkTier::ALL
                    .iter()
                    .flat_map(|tier| record.items(*tier).values())
                    .map(|item| item.clip_index + 1)
                    .max()
                    .unwrap_or(0)
            })
            .unwrap_or(0);

        let mut uids = Vec::new();
        let mut failures = Vec::new();
        let mut prediction_refs = Vec::new();
        let mut spectrogram_refs = Vec::new();

        for (offset, clip) in submission.clips.iter().enumerate() {
            let clip_index = first_index + offset;
            match self.add_clip(batch_id, &source_md5, clip_index, clip).await {
                Ok(items) => {
                    uids.push(items[0].uid.clone());
                    for item in items {
                        match item.tier {
                            WorkTier::Prediction => prediction_refs.push(item.queue_ref()),
                            WorkTier::Spectrogram => spectrogram_refs.push(item.queue_ref()),
                            WorkTier::Clip => {}
                        }
                    }
                }
                Err(e) => {
                    warn!(batch_id, clip_index, error = %e, "Clip rejected");
                    failures.push(format!("clip {}: {}", offset, e));
                }
            }
        }

        if uids.is_empty() {
            return Err(BrokerError::AllItemsFailed(failures));
        }

        self.queues.get(WorkTier::Prediction)?.enqueue_all(prediction_refs)?;
        self.queues.get(WorkTier::Spectrogram)?.enqueue_all(spectrogram_refs)?;

        info!(
            batch_id,
            filename = %submission.filename,
            accepted = uids.len(),
            failed = failures.len(),
            "Clips queued"
        );
        Ok(SubmissionReport {
            batch_id: batch_id.to_string(),
            uids,
            failures,
        })
    }

    /// Write the artifacts of one clip and insert its items
    ///
    /// On failure nothing of the clip is left behind.
    async fn add_clip(
        &self,
        batch_id: &str,
        source_md5: &str,
        clip_index: usize,
        clip: &ClipPayload,
    ) -> Result<Vec<WorkItem>> {
        if clip.ext.is_empty() || !clip.ext.chars().all(|c| c.is_ascii_alphanumeric()) {
            return Err(BrokerError::InvalidInput(format!("invalid extension '{}'", clip.ext)));
        }
        let bytes = STANDARD
            .decode(clip.data.trim())
            .map_err(|e| BrokerError::InvalidInput(format!("bad base64: {}", e)))?;
        if bytes.is_empty() {
            return Err(BrokerError::InvalidInput("empty clip".to_string()));
        }

        let uid = new_uid();
        let mut written: Vec<PathBuf> = Vec::new();
        for tier in WorkTier::ALL {
            match self.artifacts.write(tier, &uid, &clip.ext, &bytes).await {
                Ok(path) => written.push(path),
                Err(e) => {
                    self.artifacts.remove_all_best_effort(&written).await;
                    return Err(e);
                }
            }
        }

        let items: Vec<WorkItem> = WorkTier::ALL
            .iter()
            .zip(written.iter())
            .map(|(tier, artifact)| WorkItem {
                uid: uid.clone(),
                batch_id: batch_id.to_string(),
                tier: *tier,
                source_md5: source_md5.to_string(),
                model_hash: self.model_hash.clone(),
                ext: clip.ext.clone(),
                clip_index,
                artifact: artifact.clone(),
                result: None,
            })
            .collect();

        for (inserted, item) in items.iter().enumerate() {
            if let Err(e) = self.registry.insert_item(item.clone()) {
                for done in &items[..inserted] {
                    self.registry.remove_item(batch_id, done.tier, &done.uid);
                }
                self.artifacts.remove_all_best_effort(&written).await;
                return Err(e);
            }
        }

        Ok(items)
    }
}
