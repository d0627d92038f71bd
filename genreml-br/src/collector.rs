//! Collection of worker results
//!
//! Results arrive sealed, are attached to their work item at most once, and
//! release the item's artifact. Results for unknown items are acknowledged
//! without touching the registry; the sender cannot do anything useful with a
//! rejection for a batch that has already been reaped.

use crate::artifact::ArtifactStore;
use crate::batch::{AttachOutcome, BatchRegistry, Payload};
use crate::error::{BrokerError, Result};
use genreml_common::api::FinishedWork;
use genreml_common::{Signer, WorkTier};
use serde_json::Value;
use std::sync::Arc;
use tracing::{debug, info};

/// Prefix of the fields kept from a prediction result
const PREDICTION_FIELD_PREFIX: &str = "predict";

/// What happened to a submitted result
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubmitOutcome {
    /// Result attached to its item
    Stored,
    /// Item already had a result; this one was dropped
    Duplicate,
    /// Batch or uid unknown; acknowledged and dropped
    Unknown,
}

#[derive(Clone)]
pub struct ResultCollector {
    signer: Signer,
    registry: Arc<BatchRegistry>,
    artifacts: ArtifactStore,
}

impl ResultCollector {
    pub fn new(signer: Signer, registry: Arc<BatchRegistry>, artifacts: ArtifactStore) -> Self {
        Self {
            signer,
            registry,
            artifacts,
        }
    }

    /// Unseal a result and attach it to its work item
    pub async fn submit(&self, tier: WorkTier, sealed: &str) -> Result<SubmitOutcome> {
        if !tier.is_queued() {
            return Err(BrokerError::UnknownTier(tier));
        }
        let finished: FinishedWork = self.signer.unseal(sealed)?;
        let payload = result_fields(tier, &finished);

        match self
            .registry
            .attach_result(tier, &finished.batch_id, &finished.uid, payload)
        {
            AttachOutcome::Stored { artifact } => {
                info!(tier = %tier, batch_id = %finished.batch_id, uid = %finished.uid, "Result stored");
                self.artifacts.remove_best_effort(&artifact).await;
                Ok(SubmitOutcome::Stored)
            }
            AttachOutcome::AlreadySet { artifact } => {
                info!(
                    tier = %tier,
                    batch_id = %finished.batch_id,
                    uid = %finished.uid,
                    "Result already set, ignoring resubmission"
                );
                self.artifacts.remove_best_effort(&artifact).await;
                Ok(SubmitOutcome::Duplicate)
            }
            AttachOutcome::BatchNotFound | AttachOutcome::UidNotFound => {
                debug!(tier = %tier, batch_id = %finished.batch_id, uid = %finished.uid, "Result for unknown item");
                Ok(SubmitOutcome::Unknown)
            }
        }
    }
}

/// Fields of a finished result that get stored for the client
///
/// Predictions keep the `predict*` fields. Spectrograms keep the whole
/// submitted object.
fn result_fields(tier: WorkTier, finished: &FinishedWork) -> Payload {
    match tier {
        WorkTier::Prediction => finished
            .fields
            .iter()
            .filter(|(key, _)| key.starts_with(PREDICTION_FIELD_PREFIX))
            .map(|(key, value)| (key.clone(), value.clone()))
            .collect(),
        _ => {
            let mut payload = finished.fields.clone();
            payload.insert("batch_id".to_string(), Value::String(finished.batch_id.clone()));
            payload.insert("uid".to_string(), Value::String(finished.uid.clone()));
            payload
        }
    }
}
