//! Batch records and the registry that owns them
//!
//! A batch is one client submission. Each clip of the submission becomes one
//! `WorkItem` per tier (prediction, spectrogram, clip), all sharing the same
//! uid. Items leave a batch one at a time when their result is handed to the
//! client; whole batches leave only through the reaper.
//!
//! All check-then-mutate sequences run inside one critical section of the
//! registry mutex, which is never held across an `.await`. Every mutation
//! wakes the waiters parked on `BatchRegistry::notified`.

use crate::error::{BrokerError, Result};
use chrono::{DateTime, Utc};
use genreml_common::WorkTier;
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::sync::futures::Notified;
use tokio::sync::Notify;
use tokio::time::Instant;

/// Result fields reported by a worker
pub type Payload = Map<String, Value>;

/// One unit of work for one tier
#[derive(Debug, Clone, PartialEq)]
pub struct WorkItem {
    pub uid: String,
    pub batch_id: String,
    pub tier: WorkTier,
    pub source_md5: String,
    pub model_hash: String,
    pub ext: String,
    /// Position of the clip within its source file
    pub clip_index: usize,
    /// Transient file holding the clip audio for this tier
    pub artifact: PathBuf,
    /// Unset until a worker reports back; never cleared once set
    pub result: Option<Payload>,
}

impl WorkItem {
    pub fn filename(&self) -> String {
        format!("{}.{}", self.uid, self.ext)
    }

    /// Descriptor pushed onto the tier queue
    pub fn queue_ref(&self) -> QueuedWork {
        QueuedWork {
            uid: self.uid.clone(),
            batch_id: self.batch_id.clone(),
            tier: self.tier,
            source_md5: self.source_md5.clone(),
            model_hash: self.model_hash.clone(),
            ext: self.ext.clone(),
            artifact: self.artifact.clone(),
        }
    }
}

/// Reference to a work item as held by a queue
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueuedWork {
    pub uid: String,
    pub batch_id: String,
    pub tier: WorkTier,
    pub source_md5: String,
    pub model_hash: String,
    pub ext: String,
    pub artifact: PathBuf,
}

impl QueuedWork {
    pub fn filename(&self) -> String {
        format!("{}.{}", self.uid, self.ext)
    }
}

/// Aggregation record of one batch
#[derive(Debug)]
pub struct BatchRecord {
    pub batch_id: String,
    /// Wall-clock creation time, for logs and diagnostics
    pub created_at: DateTime<Utc>,
    /// Monotonic creation time, used for TTL decisions
    pub created: Instant,
    pub model_hash: String,
    pub predictions: HashMap<String, WorkItem>,
    pub spectrograms: HashMap<String, WorkItem>,
    pub clips: HashMap<String, WorkItem>,
}

impl BatchRecord {
    pub fn new(batch_id: impl Into<String>, model_hash: impl Into<String>) -> Self {
        Self {
            batch_id: batch_id.into(),
            created_at: Utc::now(),
            created: Instant::now(),
            model_hash: model_hash.into(),
            predictions: HashMap::new(),
            spectrograms: HashMap::new(),
            clips: HashMap::new(),
        }
    }

    pub fn items(&self, tier: WorkTier) -> &HashMap<String, WorkItem> {
        match tier {
            WorkTier::Prediction => &self.predictions,
            WorkTier::Spectrogram => &self.spectrograms,
            WorkTier::Clip => &self.clips,
        }
    }

    pub fn items_mut(&mut self, tier: WorkTier) -> &mut HashMap<String, WorkItem> {
        match tier {
            WorkTier::Prediction => &mut self.predictions,
            WorkTier::Spectrogram => &mut self.spectrograms,
            WorkTier::Clip => &mut self.clips,
        }
    }

    /// Items still held across all tiers
    pub fn pending(&self) -> usize {
        self.predictions.len() + self.spectrograms.len() + self.clips.len()
    }

    /// Whether every tier map is empty
    pub fn is_drained(&self) -> bool {
        self.pending() == 0
    }

    pub fn age(&self) -> Duration {
        self.created.elapsed()
    }

    /// Artifact paths of every item still held
    pub fn artifacts(&self) -> Vec<PathBuf> {
        WorkTier::ALL
            .iter()
            .flat_map(|tier| self.items(*tier).values())
            .map(|item| item.artifact.clone())
            .collect()
    }
}

/// Outcome of attaching a worker result
#[derive(Debug, Clone, PartialEq)]
pub enum AttachOutcome {
    /// Result stored; the artifact is no longer needed
    Stored { artifact: PathBuf },
    /// Item already carries a result; the new one was dropped
    AlreadySet { artifact: PathBuf },
    BatchNotFound,
    UidNotFound,
}

/// Outcome of reading (and consuming) a result
#[derive(Debug, Clone, PartialEq)]
pub enum ResultLookup {
    Ready(Payload),
    Pending,
    UidNotFound,
    BatchNotFound,
}

/// Outcome of a reaper pass over one batch
#[derive(Debug, Clone, PartialEq)]
pub enum ReapOutcome {
    /// Batch was already gone
    Missing,
    /// Batch had no items left and was deleted
    Drained,
    /// Batch outlived its TTL and was deleted with items still pending
    Expired { pending: usize, artifacts: Vec<PathBuf> },
    /// Batch is younger than the TTL and was kept
    Retained { age: Duration },
}

/// Owner of all batch records, keyed by batch id
#[derive(Default)]
pub struct BatchRegistry {
    batches: Mutex<HashMap<String, BatchRecord>>,
    changed: Notify,
}

impl BatchRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Future resolving on the next registry mutation
    ///
    /// Call `enable()` on the pinned future before checking state to avoid
    /// missing a mutation that lands between the check and the wait.
    pub fn notified(&self) -> Notified<'_> {
        self.changed.notified()
    }

    /// Create an empty batch; returns false if it already exists
    pub fn create(&self, batch_id: &str, model_hash: &str) -> bool {
        let created = {
            let mut batches = self.lock();
            if batches.contains_key(batch_id) {
                false
            } else {
                batches.insert(batch_id.to_string(), BatchRecord::new(batch_id, model_hash));
                true
            }
        };
        if created {
            self.changed.notify_waiters();
        }
        created
    }

    pub fn contains(&self, batch_id: &str) -> bool {
        self.lock().contains_key(batch_id)
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    /// Run `f` against a batch, if present
    pub fn with_batch<R>(&self, batch_id: &str, f: impl FnOnce(&BatchRecord) -> R) -> Option<R> {
        self.lock().get(batch_id).map(f)
    }

    /// Insert a work item into its batch and tier map
    pub fn insert_item(&self, item: WorkItem) -> Result<()> {
        {
            let mut batches = self.lock();
            let record = batches
                .get_mut(&item.batch_id)
                .ok_or_else(|| BrokerError::BatchNotFound(item.batch_id.clone()))?;
            let items = record.items_mut(item.tier);
            if items.contains_key(&item.uid) {
                return Err(BrokerError::DuplicateUid(item.uid));
            }
            items.insert(item.uid.clone(), item);
        }
        self.changed.notify_waiters();
        Ok(())
    }

    /// Whether a queued reference still points at an item awaiting a worker
    pub fn is_dispatchable(&self, work: &QueuedWork) -> bool {
        self.lock()
            .get(&work.batch_id)
            .and_then(|record| record.items(work.tier).get(&work.uid))
            .is_some_and(|item| item.result.is_none())
    }

    /// Store a worker result on its item, at most once
    pub fn attach_result(
        &self,
        tier: WorkTier,
        batch_id: &str,
        uid: &str,
        payload: Payload,
    ) -> AttachOutcome {
        let outcome = {
            let mut batches = self.lock();
            let Some(record) = batches.get_mut(batch_id) else {
                return AttachOutcome::BatchNotFound;
            };
            let Some(item) = record.items_mut(tier).get_mut(uid) else {
                return AttachOutcome::UidNotFound;
            };
            if item.result.is_some() {
                return AttachOutcome::AlreadySet {
                    artifact: item.artifact.clone(),
                };
            }
            item.result = Some(payload);
            AttachOutcome::Stored {
                artifact: item.artifact.clone(),
            }
        };
        self.changed.notify_waiters();
        outcome
    }

    /// Check an item's result, removing the item when the result is ready
    pub fn take_result(&self, batch_id: &str, tier: WorkTier, uid: &str) -> ResultLookup {
        let payload = {
            let mut batches = self.lock();
            let Some(record) = batches.get_mut(batch_id) else {
                return ResultLookup::BatchNotFound;
            };
            let items = record.items_mut(tier);
            match items.get(uid) {
                None => return ResultLookup::UidNotFound,
                Some(item) if item.result.is_none() => return ResultLookup::Pending,
                Some(_) => items.remove(uid).and_then(|item| item.result),
            }
        };
        self.changed.notify_waiters();
        payload.map_or(ResultLookup::Pending, ResultLookup::Ready)
    }

    /// The lowest-index clip item of a batch, left in place
    ///
    /// Callers claim it with `remove_item` once they can hand it out.
    pub fn first_clip(&self, batch_id: &str) -> Result<Option<WorkItem>> {
        let batches = self.lock();
        let record = batches
            .get(batch_id)
            .ok_or_else(|| BrokerError::BatchNotFound(batch_id.to_string()))?;
        Ok(record.clips.values().min_by_key(|item| item.clip_index).cloned())
    }

    /// Remove one item from a batch
    pub fn remove_item(&self, batch_id: &str, tier: WorkTier, uid: &str) -> Option<WorkItem> {
        let removed = self
            .lock()
            .get_mut(batch_id)
            .and_then(|record| record.items_mut(tier).remove(uid));
        if removed.is_some() {
            self.changed.notify_waiters();
        }
        removed
    }

    /// Remove a whole batch
    pub fn remove_batch(&self, batch_id: &str) -> Option<BatchRecord> {
        let removed = self.lock().remove(batch_id);
        if removed.is_some() {
            self.changed.notify_waiters();
        }
        removed
    }

    /// Apply the reaper rule to one batch
    ///
    /// Drained batches are deleted; batches at least `ttl` old are deleted
    /// with whatever is still pending; younger batches are kept.
    pub fn reap(&self, batch_id: &str, ttl: Duration) -> ReapOutcome {
        let outcome = {
            let mut batches = self.lock();
            let Some(record) = batches.get(batch_id) else {
                return ReapOutcome::Missing;
            };

            if record.is_drained() {
                batches.remove(batch_id);
                ReapOutcome::Drained
            } else if record.age() >= ttl {
                let pending = record.pending();
                let artifacts = record.artifacts();
                batches.remove(batch_id);
                ReapOutcome::Expired { pending, artifacts }
            } else {
                return ReapOutcome::Retained { age: record.age() };
            }
        };
        self.changed.notify_waiters();
        outcome
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, BatchRecord>> {
        self.batches.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn item(batch_id: &str, tier: WorkTier, uid: &str, clip_index: usize) -> WorkItem {
        WorkItem {
            uid: uid.to_string(),
            batch_id: batch_id.to_string(),
            tier,
            source_md5: "md5".to_string(),
            model_hash: "model".to_string(),
            ext: "wav".to_string(),
            clip_index,
            artifact: PathBuf::from(format!("/tmp/{}/{}.wav", tier, uid)),
            result: None,
        }
    }

    fn payload(value: Value) -> Payload {
        value.as_object().cloned().unwrap_or_default()
    }

    fn registry_with(batch_id: &str, uids: &[&str]) -> BatchRegistry {
        let registry = BatchRegistry::new();
        assert!(registry.create(batch_id, "model"));
        for (index, uid) in uids.iter().enumerate() {
            for tier in WorkTier::ALL {
                registry.insert_item(item(batch_id, tier, uid, index)).unwrap();
            }
        }
        registry
    }

    #[test]
    fn test_create_is_idempotent() {
        let registry = BatchRegistry::new();
        assert!(registry.create("b1", "model"));
        assert!(!registry.create("b1", "model"));
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_insert_into_unknown_batch_fails() {
        let registry = BatchRegistry::new();
        let err = registry.insert_item(item("nope", WorkTier::Prediction, "u1", 0)).unwrap_err();
        assert!(matches!(err, BrokerError::BatchNotFound(id) if id == "nope"));
    }

    #[test]
    fn test_duplicate_uid_rejected() {
        let registry = registry_with("b1", &["u1"]);
        let err = registry.insert_item(item("b1", WorkTier::Prediction, "u1", 0)).unwrap_err();
        assert!(matches!(err, BrokerError::DuplicateUid(_)));
    }

    #[test]
    fn test_result_is_set_once() {
        let registry = registry_with("b1", &["u1"]);

        let first = registry.attach_result(WorkTier::Prediction, "b1", "u1", payload(json!({"predictions": "Rock"})));
        assert!(matches!(first, AttachOutcome::Stored { .. }));

        let second = registry.attach_result(WorkTier::Prediction, "b1", "u1", payload(json!({"predictions": "Jazz"})));
        assert!(matches!(second, AttachOutcome::AlreadySet { .. }));

        match registry.take_result("b1", WorkTier::Prediction, "u1") {
            ResultLookup::Ready(result) => assert_eq!(result["predictions"], "Rock"),
            other => panic!("expected ready result, got {:?}", other),
        }
    }

    #[test]
    fn test_attach_to_unknown_targets() {
        let registry = registry_with("b1", &["u1"]);
        assert_eq!(
            registry.attach_result(WorkTier::Prediction, "b2", "u1", Payload::new()),
            AttachOutcome::BatchNotFound
        );
        assert_eq!(
            registry.attach_result(WorkTier::Prediction, "b1", "u9", Payload::new()),
            AttachOutcome::UidNotFound
        );
    }

    #[test]
    fn test_take_result_consumes_once() {
        let registry = registry_with("b1", &["u1"]);
        assert_eq!(registry.take_result("b1", WorkTier::Spectrogram, "u1"), ResultLookup::Pending);

        registry.attach_result(WorkTier::Spectrogram, "b1", "u1", payload(json!({"images": {}})));
        assert!(matches!(
            registry.take_result("b1", WorkTier::Spectrogram, "u1"),
            ResultLookup::Ready(_)
        ));
        assert_eq!(
            registry.take_result("b1", WorkTier::Spectrogram, "u1"),
            ResultLookup::UidNotFound
        );
        assert_eq!(
            registry.take_result("b9", WorkTier::Spectrogram, "u1"),
            ResultLookup::BatchNotFound
        );

        // Other tiers keep their item
        assert_eq!(registry.with_batch("b1", |b| b.pending()), Some(2));
    }

    #[test]
    fn test_dispatchable_only_while_unanswered() {
        let registry = registry_with("b1", &["u1"]);
        let work = item("b1", WorkTier::Prediction, "u1", 0).queue_ref();
        assert!(registry.is_dispatchable(&work));

        registry.attach_result(WorkTier::Prediction, "b1", "u1", Payload::new());
        assert!(!registry.is_dispatchable(&work));

        registry.remove_batch("b1");
        assert!(!registry.is_dispatchable(&work));
    }

    #[test]
    fn test_first_clip_in_index_order() {
        let registry = registry_with("b1", &["u1", "u2", "u3"]);

        let first = registry.first_clip("b1").unwrap().unwrap();
        assert_eq!(registry.first_clip("b1").unwrap(), Some(first.clone()));

        let uids: Vec<String> = std::iter::from_fn(|| registry.first_clip("b1").unwrap())
            .filter_map(|clip| registry.remove_item("b1", WorkTier::Clip, &clip.uid))
            .map(|clip| clip.uid)
            .collect();
        assert_eq!(uids, vec!["u1", "u2", "u3"]);
        assert!(registry.first_clip("missing").is_err());
    }

    #[test]
    fn test_reap_drained_batch() {
        let registry = registry_with("b1", &[]);
        assert_eq!(registry.reap("b1", Duration::from_secs(600)), ReapOutcome::Drained);
        assert!(!registry.contains("b1"));
        assert_eq!(registry.reap("b1", Duration::from_secs(600)), ReapOutcome::Missing);
    }

    #[test]
    fn test_reap_keeps_young_batch_with_items() {
        let registry = registry_with("b1", &["u1"]);
        assert!(matches!(
            registry.reap("b1", Duration::from_secs(600)),
            ReapOutcome::Retained { .. }
        ));
        assert!(registry.contains("b1"));
    }

    #[test]
    fn test_reap_expired_batch_reports_artifacts() {
        let registry = registry_with("b1", &["u1", "u2"]);
        match registry.reap("b1", Duration::ZERO) {
            ReapOutcome::Expired { pending, artifacts } => {
                assert_eq!(pending, 6);
                assert_eq!(artifacts.len(), 6);
            }
            other => panic!("expected expiry, got {:?}", other),
        }
        assert!(registry.is_empty());
    }
}
