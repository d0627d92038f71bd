//! Broker context
//!
//! Built once at startup and shared with every handler through `AppState`.
//! Owns the registry, the tier queues, the liveness tracker, the artifact
//! store and the stages operating on them.

use crate::artifact::ArtifactStore;
use crate::batch::{BatchRegistry, QueuedWork};
use crate::collector::ResultCollector;
use crate::config::BrokerSettings;
use crate::dispatcher::LongPollDispatcher;
use crate::error::Result;
use crate::liveness::LivenessTracker;
use crate::poller::ResultPoller;
use crate::producer::BatchProducer;
use crate::queue::TierQueues;
use crate::reaper::StaleTaskReaper;
use genreml_common::{Signer, WorkTier};
use std::sync::Arc;
use tracing::info;

pub struct Broker {
    settings: BrokerSettings,
    workers: Signer,
    session: Signer,
    registry: Arc<BatchRegistry>,
    queues: Arc<TierQueues<QueuedWork>>,
    liveness: Arc<LivenessTracker>,
    artifacts: ArtifactStore,
    dispatcher: LongPollDispatcher,
    collector: ResultCollector,
    poller: ResultPoller,
    producer: BatchProducer,
}

impl Broker {
    /// Wire up every component
    ///
    /// `workers` verifies worker tokens and sealed results; `session` signs
    /// client session cookies.
    pub fn new(settings: BrokerSettings, workers: Signer, session: Signer) -> Self {
        let registry = Arc::new(BatchRegistry::new());
        let queues = Arc::new(TierQueues::new(settings.queue_capacity));
        let liveness = Arc::new(LivenessTracker::new());
        let artifacts = ArtifactStore::new(&settings.store_root);

        let dispatcher = LongPollDispatcher::new(
            workers.clone(),
            Arc::clone(&registry),
            Arc::clone(&queues),
            Arc::clone(&liveness),
            artifacts.clone(),
        );
        let collector = ResultCollector::new(workers.clone(), Arc::clone(&registry), artifacts.clone());
        let poller = ResultPoller::new(Arc::clone(&registry), artifacts.clone());
        let reaper = StaleTaskReaper::new(Arc::clone(&registry), artifacts.clone(), settings.batch_ttl);
        let producer = BatchProducer::new(
            Arc::clone(&registry),
            Arc::clone(&queues),
            artifacts.clone(),
            reaper,
            settings.model_hash.clone(),
        );

        Self {
            settings,
            workers,
            session,
            registry,
            queues,
            liveness,
            artifacts,
            dispatcher,
            collector,
            poller,
            producer,
        }
    }

    /// Create the artifact folders
    pub async fn init(&self) -> Result<()> {
        self.artifacts.ensure_dirs().await?;
        info!(store_root = %self.artifacts.root().display(), "Artifact store ready");
        Ok(())
    }

    /// Answer a worker asking whether it may exit
    ///
    /// Removes the caller from the tier's liveness set; `true` when other
    /// workers of the tier are still polling.
    pub fn safe_to_recycle(&self, tier: WorkTier, worker_token: &str) -> Result<bool> {
        let worker_id = self.workers.verify(worker_token)?;
        self.queues.get(tier)?;
        let safe = self.liveness.query_safe_to_recycle(tier, &worker_id);
        info!(tier = %tier, worker = %worker_id, safe, "Safe-to-recycle answered");
        Ok(safe)
    }

    pub fn settings(&self) -> &BrokerSettings {
        &self.settings
    }

    pub fn session(&self) -> &Signer {
        &self.session
    }

    pub fn registry(&self) -> &BatchRegistry {
        &self.registry
    }

    pub fn queues(&self) -> &TierQueues<QueuedWork> {
        &self.queues
    }

    pub fn liveness(&self) -> &Arc<LivenessTracker> {
        &self.liveness
    }

    pub fn artifacts(&self) -> &ArtifactStore {
        &self.artifacts
    }

    pub fn dispatcher(&self) -> &LongPollDispatcher {
        &self.dispatcher
    }

    pub fn collector(&self) -> &ResultCollector {
        &self.collector
    }

    pub fn poller(&self) -> &ResultPoller {
        &self.poller
    }

    pub fn producer(&self) -> &BatchProducer {
        &self.producer
    }
}
