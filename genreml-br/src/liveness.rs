//! Worker liveness tracking for the safe-to-recycle gate
//!
//! A worker id is registered for exactly as long as one of its long polls is
//! in flight. Registration is held by a `LivenessGuard`, so deregistration
//! happens on every exit path, including a dropped HTTP future.

use genreml_common::WorkTier;
use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tracing::debug;

/// Live registrations keyed by a per-poll handle
#[derive(Debug, Default)]
struct Registrations {
    next: u64,
    tiers: HashMap<WorkTier, BTreeMap<u64, String>>,
}

/// Per-tier multiset of worker ids currently inside a long poll
#[derive(Debug, Default)]
pub struct LivenessTracker {
    inner: Mutex<Registrations>,
}

impl LivenessTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `id` for the lifetime of the returned guard
    pub fn register(self: &Arc<Self>, tier: WorkTier, id: &str) -> LivenessGuard {
        let handle = {
            let mut inner = self.lock();
            let handle = inner.next;
            inner.next += 1;
            inner.tiers.entry(tier).or_default().insert(handle, id.to_string());
            handle
        };
        debug!(tier = %tier, worker = id, handle, "Worker registered");
        LivenessGuard {
            tracker: Arc::clone(self),
            tier,
            handle,
        }
    }

    /// Drop the oldest registration of `id`
    pub fn deregister(&self, tier: WorkTier, id: &str) {
        let mut inner = self.lock();
        if let Some(workers) = inner.tiers.get_mut(&tier) {
            let oldest = workers
                .iter()
                .find(|(_, worker)| worker.as_str() == id)
                .map(|(handle, _)| *handle);
            if let Some(handle) = oldest {
                workers.remove(&handle);
            }
        }
    }

    /// Drop the registration behind one guard; a no-op once it is gone
    fn release(&self, tier: WorkTier, handle: u64) -> Option<String> {
        self.lock().tiers.get_mut(&tier)?.remove(&handle)
    }

    /// Remove the registrations `calling_id` holds right now, then report
    /// whether any other worker of the tier is still polling
    ///
    /// `true` means siblings are still draining the queue, so the caller may
    /// exit. `false` means the caller is the last poller and should keep
    /// working. Polls the caller starts after the query stay registered.
    pub fn query_safe_to_recycle(&self, tier: WorkTier, calling_id: &str) -> bool {
        let mut inner = self.lock();
        let workers = inner.tiers.entry(tier).or_default();
        workers.retain(|_, worker| worker.as_str() != calling_id);
        let remaining = workers.len();
        debug!(tier = %tier, worker = calling_id, remaining, "Safe-to-recycle query");
        remaining > 0
    }

    /// Total registrations in the tier
    pub fn connections(&self, tier: WorkTier) -> usize {
        self.lock().tiers.get(&tier).map_or(0, BTreeMap::len)
    }

    pub fn is_registered(&self, tier: WorkTier, id: &str) -> bool {
        self.lock()
            .tiers
            .get(&tier)
            .is_some_and(|workers| workers.values().any(|worker| worker == id))
    }

    fn lock(&self) -> MutexGuard<'_, Registrations> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Scoped liveness registration; deregisters on drop
///
/// The guard owns one registration handle, so it never touches a later
/// registration of the same worker id.
#[derive(Debug)]
pub struct LivenessGuard {
    tracker: Arc<LivenessTracker>,
    tier: WorkTier,
    handle: u64,
}

impl Drop for LivenessGuard {
    fn drop(&mut self) {
        if let Some(worker) = self.tracker.release(self.tier, self.handle) {
            debug!(tier = %self.tier, worker = %worker, "Worker deregistered");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_guard_registers_until_dropped() {
        let tracker = Arc::new(LivenessTracker::new());
        let guard = tracker.register(WorkTier::Prediction, "w1");
        assert!(tracker.is_registered(WorkTier::Prediction, "w1"));
        assert!(!tracker.is_registered(WorkTier::Spectrogram, "w1"));

        drop(guard);
        assert!(!tracker.is_registered(WorkTier::Prediction, "w1"));
        assert_eq!(tracker.connections(WorkTier::Prediction), 0);
    }

    #[test]
    fn test_same_worker_counted_per_poll() {
        let tracker = Arc::new(LivenessTracker::new());
        let a = tracker.register(WorkTier::Prediction, "w1");
        let b = tracker.register(WorkTier::Prediction, "w1");
        assert_eq!(tracker.connections(WorkTier::Prediction), 2);

        drop(a);
        assert!(tracker.is_registered(WorkTier::Prediction, "w1"));
        drop(b);
        assert!(!tracker.is_registered(WorkTier::Prediction, "w1"));
    }

    #[test]
    fn test_safe_only_with_siblings() {
        let tracker = Arc::new(LivenessTracker::new());
        let _w1 = tracker.register(WorkTier::Spectrogram, "w1");
        let _w2 = tracker.register(WorkTier::Spectrogram, "w2");

        // w2 leaves while w1 still polls
        assert!(tracker.query_safe_to_recycle(WorkTier::Spectrogram, "w2"));
        assert!(!tracker.is_registered(WorkTier::Spectrogram, "w2"));

        // w1 is now the last poller
        assert!(!tracker.query_safe_to_recycle(WorkTier::Spectrogram, "w1"));
    }

    #[test]
    fn test_query_on_empty_tier() {
        let tracker = LivenessTracker::new();
        assert!(!tracker.query_safe_to_recycle(WorkTier::Prediction, "ghost"));
    }

    #[test]
    fn test_guard_drop_after_query_is_harmless() {
        let tracker = Arc::new(LivenessTracker::new());
        let guard = tracker.register(WorkTier::Prediction, "w1");
        let _other = tracker.register(WorkTier::Prediction, "w2");

        assert!(tracker.query_safe_to_recycle(WorkTier::Prediction, "w1"));
        drop(guard);
        assert_eq!(tracker.connections(WorkTier::Prediction), 1);
        assert!(tracker.is_registered(WorkTier::Prediction, "w2"));
    }

    #[test]
    fn test_stale_guard_spares_newer_poll() {
        let tracker = Arc::new(LivenessTracker::new());
        // Client gave up on this poll while the server side is still waiting
        let abandoned = tracker.register(WorkTier::Prediction, "w1");
        assert!(!tracker.query_safe_to_recycle(WorkTier::Prediction, "w1"));

        // Next round starts before the abandoned poll unwinds
        let current = tracker.register(WorkTier::Prediction, "w1");
        drop(abandoned);
        assert!(tracker.is_registered(WorkTier::Prediction, "w1"));
        assert_eq!(tracker.connections(WorkTier::Prediction), 1);

        // A sibling now sees w1 still polling
        let _w2 = tracker.register(WorkTier::Prediction, "w2");
        assert!(tracker.query_safe_to_recycle(WorkTier::Prediction, "w2"));

        drop(current);
        assert_eq!(tracker.connections(WorkTier::Prediction), 0);
    }

    #[test]
    fn test_deregister_drops_one_registration() {
        let tracker = Arc::new(LivenessTracker::new());
        let _a = tracker.register(WorkTier::Spectrogram, "w1");
        let _b = tracker.register(WorkTier::Spectrogram, "w1");

        tracker.deregister(WorkTier::Spectrogram, "w1");
        assert_eq!(tracker.connections(WorkTier::Spectrogram), 1);
        tracker.deregister(WorkTier::Spectrogram, "ghost");
        assert_eq!(tracker.connections(WorkTier::Spectrogram), 1);
    }
}
