//! Bounded FIFO work queue with deadline-bounded dequeue
//!
//! One queue exists per worker tier. Producers push references to work items;
//! long-polling workers pop them. Waiting consumers are parked on a `Notify`
//! instead of sleeping in slices, so an enqueue wakes exactly one waiter.
//!
//! The queue is bounded: an enqueue that does not fit is rejected with
//! `BrokerError::QueueFull` and leaves the queue untouched.

use crate::error::{BrokerError, Result};
use genreml_common::WorkTier;
use std::collections::VecDeque;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::sync::Notify;
use tokio::time::Instant;

/// Default capacity per tier
pub const DEFAULT_QUEUE_CAPACITY: usize = 10_000;

/// FIFO queue of work references for one tier
pub struct WorkQueue<T> {
    tier: WorkTier,
    capacity: usize,
    items: Mutex<VecDeque<T>>,
    available: Notify,
}

impl<T> WorkQueue<T> {
    /// Create an empty queue holding at most `capacity` items
    pub fn new(tier: WorkTier, capacity: usize) -> Self {
        Self {
            tier,
            capacity,
            items: Mutex::new(VecDeque::new()),
            available: Notify::new(),
        }
    }

    pub fn tier(&self) -> WorkTier {
        self.tier
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    /// Free slots left before enqueue is rejected
    pub fn remaining_capacity(&self) -> usize {
        self.capacity.saturating_sub(self.lock().len())
    }

    /// Append one item to the tail
    pub fn enqueue(&self, item: T) -> Result<()> {
        self.enqueue_all(vec![item])
    }

    /// Append all items to the tail, or none of them if they do not fit
    pub fn enqueue_all(&self, items: Vec<T>) -> Result<()> {
        let count = items.len();
        {
            let mut queue = self.lock();
            let remaining = self.capacity.saturating_sub(queue.len());
            if count > remaining {
                return Err(BrokerError::QueueFull {
                    tier: self.tier,
                    remaining,
                    requested: count,
                });
            }
            queue.extend(items);
        }

        for _ in 0..count {
            self.available.notify_one();
        }
        Ok(())
    }

    /// Pop the head without waiting
    pub fn try_dequeue(&self) -> Option<T> {
        self.lock().pop_front()
    }

    /// Pop the head, waiting up to `timeout` for one to arrive
    pub async fn dequeue_within(&self, timeout: Duration) -> Option<T> {
        self.dequeue_until(Instant::now() + timeout).await
    }

    /// Pop the head, waiting until `deadline` for one to arrive
    ///
    /// Returns `None` once the deadline passes with the queue still empty.
    pub async fn dequeue_until(&self, deadline: Instant) -> Option<T> {
        loop {
            // Register interest before checking so an enqueue between the
            // check and the wait is not missed.
            let notified = self.available.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            if let Some(item) = self.try_dequeue() {
                return Some(item);
            }

            if tokio::time::timeout_at(deadline, notified).await.is_err() {
                return self.try_dequeue();
            }
        }
    }

    /// Guard that puts `item` back at the head unless disarmed
    ///
    /// Hold it across the awaits between popping an item and handing it out,
    /// so a cancelled consumer does not lose the item.
    pub fn requeue_on_drop(&self, item: T) -> RequeueGuard<'_, T> {
        RequeueGuard {
            queue: self,
            item: Some(item),
        }
    }

    /// Put an item back at the head; it may briefly exceed capacity
    fn requeue_front(&self, item: T) {
        self.lock().push_front(item);
        self.available.notify_one();
    }

    fn lock(&self) -> MutexGuard<'_, VecDeque<T>> {
        self.items.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Returns a popped item to the head of its queue when dropped armed
pub struct RequeueGuard<'a, T> {
    queue: &'a WorkQueue<T>,
    item: Option<T>,
}

impl<T> RequeueGuard<'_, T> {
    /// The item was handed out or discarded; nothing goes back
    pub fn disarm(mut self) {
        self.item = None;
    }
}

impl<T> Drop for RequeueGuard<'_, T> {
    fn drop(&mut self) {
        if let Some(item) = self.item.take() {
            self.queue.requeue_front(item);
        }
    }
}

/// One queue per tier that has a worker pool
pub struct TierQueues<T> {
    prediction: WorkQueue<T>,
    spectrogram: WorkQueue<T>,
}

impl<T> TierQueues<T> {
    pub fn new(capacity: usize) -> Self {
        Self {
            prediction: WorkQueue::new(WorkTier::Prediction, capacity),
            spectrogram: WorkQueue::new(WorkTier::Spectrogram, capacity),
        }
    }

    /// Queue serving `tier`; clip items have none
    pub fn get(&self, tier: WorkTier) -> Result<&WorkQueue<T>> {
        match tier {
            WorkTier::Prediction => Ok(&self.prediction),
            WorkTier::Spectrogram => Ok(&self.spectrogram),
            WorkTier::Clip => Err(BrokerError::UnknownTier(tier)),
        }
    }

    /// Reject with `QueueFull` unless every queue has room for `count` items
    pub fn check_room(&self, count: usize) -> Result<()> {
        for queue in [&self.prediction, &self.spectrogram] {
            let remaining = queue.remaining_capacity();
            if count > remaining {
                return Err(BrokerError::QueueFull {
                    tier: queue.tier(),
                    remaining,
                    requested: count,
                });
            }
        }
        Ok(())
    }
}
