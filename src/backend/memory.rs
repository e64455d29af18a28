// SPDX-License-Identifier: MIT OR Apache-2.0

//! In-process reference backend.
//!
//! [`MemoryQueue`] keeps ready items in FIFO order, withholds delayed items
//! until their availability time, and tracks in-flight reservations by
//! receipt. [`MemoryErrorQueue`] is keyed by `error.id`; its `pop` does not
//! remove, so an error item can only disappear through `complete`.
//!
//! Useful for tests and single-process deployments; distributed workers need
//! a shared backend behind the same [`Queue`] contract.

use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::time::sleep;
use tracing::{debug, warn};
use uuid::Uuid;

use super::{queue_name, Backend, BackendFactory, Envelope, Queue, QueueCapabilities, QueueStats};
use crate::error::{DeferrableError, Result};
use crate::item::{ErrorInfo, Item};
use crate::runtime::{Clock, SystemClock};

/// How often a waiting `pop` re-checks the queue.
const POP_POLL_INTERVAL: Duration = Duration::from_millis(20);

/// FIFO, delay-capable in-process queue.
pub struct MemoryQueue {
    name: String,
    clock: Arc<dyn Clock>,
    wait_time: Duration,
    state: Mutex<MemoryQueueState>,
}

#[derive(Default)]
struct MemoryQueueState {
    ready: VecDeque<Item>,
    delayed: Vec<DelayedItem>,
    in_flight: HashMap<String, Item>,
    push_seq: u64,
}

struct DelayedItem {
    ready_at: f64,
    seq: u64,
    item: Item,
}

impl MemoryQueue {
    /// Create a queue on the system clock.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self::with_clock(name, Arc::new(SystemClock::new()))
    }

    /// Create a queue on an explicit clock.
    #[must_use]
    pub fn with_clock(name: impl Into<String>, clock: Arc<dyn Clock>) -> Self {
        Self {
            name: name.into(),
            clock,
            wait_time: Duration::ZERO,
            state: Mutex::new(MemoryQueueState::default()),
        }
    }

    /// Let `pop` block up to `wait_time` for an item to become available.
    #[must_use]
    pub fn with_wait_time(mut self, wait_time: Duration) -> Self {
        self.wait_time = wait_time;
        self
    }

    /// The queue name this instance serves.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    fn try_pop(&self) -> Option<(Envelope, Item)> {
        let now = self.clock.now();
        let mut state = self.state.lock();
        Self::promote_due(&mut state, now);
        let item = state.ready.pop_front()?;
        let receipt = Uuid::new_v4().to_string();
        state.in_flight.insert(receipt.clone(), item.clone());
        debug!(target: "deferrable::backend", queue = %self.name, %receipt, "pop {}", item.describe());
        let envelope = Envelope {
            receipt,
            item: item.clone(),
        };
        Some((envelope, item))
    }

    /// Move delayed items whose availability time has passed into the ready
    /// lane, preserving availability order.
    fn promote_due(state: &mut MemoryQueueState, now: f64) {
        if state.delayed.is_empty() {
            return;
        }
        let mut due: Vec<DelayedItem> = Vec::new();
        let mut still_delayed: Vec<DelayedItem> = Vec::new();
        for entry in state.delayed.drain(..) {
            if entry.ready_at <= now {
                due.push(entry);
            } else {
                still_delayed.push(entry);
            }
        }
        due.sort_by(|a, b| {
            a.ready_at
                .partial_cmp(&b.ready_at)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then(a.seq.cmp(&b.seq))
        });
        state.ready.extend(due.into_iter().map(|entry| entry.item));
        state.delayed = still_delayed;
    }
}

#[async_trait]
impl Queue for MemoryQueue {
    fn capabilities(&self) -> QueueCapabilities {
        QueueCapabilities {
            fifo: true,
            supports_delay: true,
            reclaims_to_back_of_queue: false,
        }
    }

    async fn push(&self, item: Item) -> Result<()> {
        let now = self.clock.now();
        let mut state = self.state.lock();
        debug!(target: "deferrable::backend", queue = %self.name, "push {}", item.describe());
        match item.delay {
            Some(delay) if delay > 0.0 => {
                state.push_seq += 1;
                let entry = DelayedItem {
                    ready_at: now + delay,
                    seq: state.push_seq,
                    item,
                };
                state.delayed.push(entry);
            }
            _ => state.ready.push_back(item),
        }
        Ok(())
    }

    async fn pop(&self) -> Result<Option<(Envelope, Item)>> {
        let deadline = Instant::now() + self.wait_time;
        loop {
            if let Some(popped) = self.try_pop() {
                return Ok(Some(popped));
            }
            let now = Instant::now();
            if now >= deadline {
                return Ok(None);
            }
            sleep(POP_POLL_INTERVAL.min(deadline - now)).await;
        }
    }

    /// In-process reservations have no visibility timeout to extend.
    async fn touch(&self, _envelope: &Envelope, _seconds: u64) -> Result<()> {
        Ok(())
    }

    async fn complete(&self, envelope: &Envelope) -> Result<()> {
        let mut state = self.state.lock();
        if state.in_flight.remove(&envelope.receipt).is_none() {
            return Err(DeferrableError::Backend(format!(
                "unknown receipt: {}",
                envelope.receipt
            )));
        }
        Ok(())
    }

    async fn flush(&self) -> Result<()> {
        let mut state = self.state.lock();
        state.ready.clear();
        state.delayed.clear();
        Ok(())
    }

    async fn stats(&self) -> Result<QueueStats> {
        let now = self.clock.now();
        let mut state = self.state.lock();
        Self::promote_due(&mut state, now);
        Ok(QueueStats {
            available: state.ready.len(),
            in_flight: state.in_flight.len(),
            delayed: state.delayed.len(),
        })
    }
}

/// Unordered in-process error queue keyed by `error.id`.
pub struct MemoryErrorQueue {
    state: Mutex<BTreeMap<String, Item>>,
}

impl MemoryErrorQueue {
    /// Create an empty error queue.
    #[must_use]
    pub fn new() -> Self {
        Self {
            state: Mutex::new(BTreeMap::new()),
        }
    }
}

impl Default for MemoryErrorQueue {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Queue for MemoryErrorQueue {
    fn capabilities(&self) -> QueueCapabilities {
        QueueCapabilities {
            fifo: false,
            supports_delay: false,
            reclaims_to_back_of_queue: false,
        }
    }

    async fn push(&self, mut item: Item) -> Result<()> {
        let error_id = match item.error.as_ref().map(|error| error.id.clone()) {
            Some(id) if !id.is_empty() => id,
            _ => {
                warn!(
                    target: "deferrable::backend",
                    "no error id found for item, generating one: {}",
                    item.describe()
                );
                let id = Uuid::new_v4().to_string();
                match item.error.as_mut() {
                    Some(error) => error.id = id.clone(),
                    None => {
                        item.error = Some(ErrorInfo {
                            error_type: String::new(),
                            error_text: String::new(),
                            traceback: String::new(),
                            hostname: String::new(),
                            ts: 0.0,
                            id: id.clone(),
                        });
                    }
                }
                id
            }
        };
        self.state.lock().insert(error_id, item);
        Ok(())
    }

    /// Non-destructive: returns the first error item without removing it.
    /// Removal happens only on [`Queue::complete`], so a crashed consumer
    /// never loses an error item.
    async fn pop(&self) -> Result<Option<(Envelope, Item)>> {
        let state = self.state.lock();
        let Some((id, item)) = state.iter().next() else {
            return Ok(None);
        };
        let envelope = Envelope {
            receipt: id.clone(),
            item: item.clone(),
        };
        Ok(Some((envelope, item.clone())))
    }

    async fn touch(&self, _envelope: &Envelope, _seconds: u64) -> Result<()> {
        Ok(())
    }

    async fn complete(&self, envelope: &Envelope) -> Result<()> {
        let error_id = envelope
            .item
            .error
            .as_ref()
            .map(|error| error.id.as_str())
            .filter(|id| !id.is_empty())
            .ok_or_else(|| {
                DeferrableError::Backend(format!(
                    "error item has no id field: {}",
                    envelope.item.describe()
                ))
            })?;
        self.state.lock().remove(error_id);
        Ok(())
    }

    async fn flush(&self) -> Result<()> {
        self.state.lock().clear();
        Ok(())
    }

    async fn stats(&self) -> Result<QueueStats> {
        Ok(QueueStats {
            available: self.state.lock().len(),
            in_flight: 0,
            delayed: 0,
        })
    }
}

/// Factory wiring a [`MemoryQueue`] and [`MemoryErrorQueue`] per group.
pub struct MemoryBackendFactory {
    clock: Arc<dyn Clock>,
}

impl MemoryBackendFactory {
    /// Create a factory on the system clock.
    #[must_use]
    pub fn new() -> Self {
        Self::with_clock(Arc::new(SystemClock::new()))
    }

    /// Create a factory whose queues share an explicit clock.
    #[must_use]
    pub fn with_clock(clock: Arc<dyn Clock>) -> Self {
        Self { clock }
    }
}

impl Default for MemoryBackendFactory {
    fn default() -> Self {
        Self::new()
    }
}

impl BackendFactory for MemoryBackendFactory {
    fn create_backend_for_group(&self, group: &str) -> Result<Backend> {
        let queue = MemoryQueue::with_clock(queue_name(group), self.clock.clone());
        Ok(Backend::new(
            group,
            Arc::new(queue),
            Arc::new(MemoryErrorQueue::new()),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testkit::{blank_item, MockClock};

    fn queue_at(start: f64) -> (Arc<MockClock>, MemoryQueue) {
        let clock = Arc::new(MockClock::new(start));
        let queue = MemoryQueue::with_clock("deferrable", clock.clone());
        (clock, queue)
    }

    #[tokio::test]
    async fn test_push_pop_complete() {
        let (_, queue) = queue_at(1000.0);
        queue.push(blank_item("t.one")).await.unwrap();

        let (envelope, item) = queue.pop().await.unwrap().unwrap();
        assert_eq!(item.method_path, "t.one");
        assert_eq!(queue.stats().await.unwrap().in_flight, 1);

        queue.complete(&envelope).await.unwrap();
        assert_eq!(queue.stats().await.unwrap(), QueueStats::default());
    }

    #[tokio::test]
    async fn test_fifo_order_for_undelayed_items() {
        let (_, queue) = queue_at(1000.0);
        for name in ["t.a", "t.b", "t.c"] {
            queue.push(blank_item(name)).await.unwrap();
        }
        for expected in ["t.a", "t.b", "t.c"] {
            let (_, item) = queue.pop().await.unwrap().unwrap();
            assert_eq!(item.method_path, expected);
        }
    }

    #[tokio::test]
    async fn test_delayed_item_is_withheld_until_due() {
        let (clock, queue) = queue_at(1000.0);
        let mut item = blank_item("t.later");
        item.delay = Some(5.0);
        queue.push(item).await.unwrap();

        assert!(queue.pop().await.unwrap().is_none());
        assert_eq!(queue.stats().await.unwrap().delayed, 1);

        clock.advance(5.0);
        let (_, item) = queue.pop().await.unwrap().unwrap();
        assert_eq!(item.method_path, "t.later");
    }

    #[tokio::test]
    async fn test_due_items_surface_in_availability_order() {
        let (clock, queue) = queue_at(1000.0);
        let mut slow = blank_item("t.slow");
        slow.delay = Some(10.0);
        let mut fast = blank_item("t.fast");
        fast.delay = Some(2.0);
        queue.push(slow).await.unwrap();
        queue.push(fast).await.unwrap();

        clock.advance(20.0);
        let (_, first) = queue.pop().await.unwrap().unwrap();
        let (_, second) = queue.pop().await.unwrap().unwrap();
        assert_eq!(first.method_path, "t.fast");
        assert_eq!(second.method_path, "t.slow");
    }

    #[tokio::test]
    async fn test_zero_delay_means_immediate() {
        let (_, queue) = queue_at(1000.0);
        let mut item = blank_item("t.now");
        item.delay = Some(0.0);
        queue.push(item).await.unwrap();
        assert!(queue.pop().await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_pop_waits_for_a_concurrent_push() {
        let clock = Arc::new(MockClock::new(1000.0));
        let queue = Arc::new(
            MemoryQueue::with_clock("deferrable", clock.clone())
                .with_wait_time(Duration::from_millis(500)),
        );

        let producer_queue = queue.clone();
        let producer = tokio::spawn(async move {
            sleep(Duration::from_millis(50)).await;
            producer_queue.push(blank_item("t.late")).await.unwrap();
        });

        let (_, item) = queue.pop().await.unwrap().unwrap();
        assert_eq!(item.method_path, "t.late");
        producer.await.unwrap();
    }

    #[tokio::test]
    async fn test_pop_returns_none_after_the_wait_window() {
        let clock = Arc::new(MockClock::new(1000.0));
        let queue = MemoryQueue::with_clock("deferrable", clock)
            .with_wait_time(Duration::from_millis(40));
        assert!(queue.pop().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_complete_with_unknown_receipt_fails() {
        let (_, queue) = queue_at(1000.0);
        let envelope = Envelope {
            receipt: "bogus".to_string(),
            item: blank_item("t.fn"),
        };
        assert!(queue.complete(&envelope).await.is_err());
    }

    #[tokio::test]
    async fn test_flush_drains_ready_and_delayed() {
        let (_, queue) = queue_at(1000.0);
        queue.push(blank_item("t.a")).await.unwrap();
        let mut delayed = blank_item("t.b");
        delayed.delay = Some(30.0);
        queue.push(delayed).await.unwrap();

        queue.flush().await.unwrap();
        assert_eq!(queue.stats().await.unwrap(), QueueStats::default());
    }

    #[tokio::test]
    async fn test_push_batch_reports_per_item_success() {
        let (_, queue) = queue_at(1000.0);
        let results = queue
            .push_batch(vec![blank_item("t.a"), blank_item("t.b")])
            .await
            .unwrap();
        assert!(results.iter().all(|(_, ok)| *ok));
        assert_eq!(queue.stats().await.unwrap().available, 2);
    }

    #[tokio::test]
    async fn test_pop_batch_stops_at_empty() {
        let (_, queue) = queue_at(1000.0);
        queue.push(blank_item("t.a")).await.unwrap();
        queue.push(blank_item("t.b")).await.unwrap();
        let batch = queue.pop_batch(10).await.unwrap();
        assert_eq!(batch.len(), 2);
    }

    #[tokio::test]
    async fn test_complete_batch_reports_per_envelope_success() {
        let (_, queue) = queue_at(1000.0);
        queue.push(blank_item("t.a")).await.unwrap();
        let (envelope, _) = queue.pop().await.unwrap().unwrap();
        let stale = Envelope {
            receipt: "gone".to_string(),
            item: blank_item("t.a"),
        };

        let results = queue.complete_batch(vec![envelope, stale]).await.unwrap();
        assert!(results[0].1);
        assert!(!results[1].1);
    }

    fn failed_item(id: &str) -> Item {
        let mut item = blank_item("t.failed");
        item.error = Some(ErrorInfo {
            error_type: "NetErr".to_string(),
            error_text: "boom".to_string(),
            traceback: String::new(),
            hostname: "worker-1".to_string(),
            ts: 0.0,
            id: id.to_string(),
        });
        item
    }

    #[tokio::test]
    async fn test_error_queue_pop_is_non_destructive() {
        let queue = MemoryErrorQueue::new();
        queue.push(failed_item("e-1")).await.unwrap();

        let first = queue.pop().await.unwrap().unwrap();
        let second = queue.pop().await.unwrap().unwrap();
        assert_eq!(first.1.error.as_ref().unwrap().id, "e-1");
        assert_eq!(second.1.error.as_ref().unwrap().id, "e-1");
        assert_eq!(queue.stats().await.unwrap().available, 1);
    }

    #[tokio::test]
    async fn test_error_queue_complete_removes() {
        let queue = MemoryErrorQueue::new();
        queue.push(failed_item("e-1")).await.unwrap();
        let (envelope, _) = queue.pop().await.unwrap().unwrap();
        queue.complete(&envelope).await.unwrap();
        assert!(queue.pop().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_error_queue_backfills_missing_id() {
        let queue = MemoryErrorQueue::new();
        queue.push(blank_item("t.failed")).await.unwrap();

        let (_, item) = queue.pop().await.unwrap().unwrap();
        let id = item.error.unwrap().id;
        assert!(!id.is_empty());
    }

    #[tokio::test]
    async fn test_error_queue_flush_empties_it() {
        let queue = MemoryErrorQueue::new();
        queue.push(failed_item("e-1")).await.unwrap();
        queue.push(failed_item("e-2")).await.unwrap();
        queue.flush().await.unwrap();
        assert_eq!(queue.stats().await.unwrap().available, 0);
    }

    #[tokio::test]
    async fn test_error_queue_complete_requires_id() {
        let queue = MemoryErrorQueue::new();
        let envelope = Envelope {
            receipt: "e-1".to_string(),
            item: blank_item("t.failed"),
        };
        assert!(queue.complete(&envelope).await.is_err());
    }

    #[tokio::test]
    async fn test_factory_names_queues_by_group() {
        let factory = MemoryBackendFactory::new();
        let backend = factory.create_backend_for_group("emails").unwrap();
        assert_eq!(backend.group, "emails");
        assert!(backend.queue.capabilities().fifo);
        assert!(!backend.error_queue.capabilities().fifo);
    }
}
