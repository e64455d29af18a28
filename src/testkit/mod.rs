// SPDX-License-Identifier: MIT OR Apache-2.0

//! Test doubles and a wired in-memory harness.
//!
//! Everything here is plain library code so downstream crates can use it in
//! their own tests: a controllable [`MockClock`], a [`RecordingObserver`]
//! capturing the emitted event sequence, and [`memory_harness`] assembling a
//! dispatcher over the in-memory backend and store on a shared mock clock.

use std::collections::BTreeMap;
use std::sync::Arc;

use parking_lot::Mutex;

use crate::backend::memory::MemoryBackendFactory;
use crate::backend::{BackendFactory, Queue, QueueStats};
use crate::coordination::MemoryStore;
use crate::dispatcher::Dispatcher;
use crate::events::{Event, EventObserver};
use crate::item::Item;
use crate::runtime::Clock;

/// Controllable clock for tests.
pub struct MockClock {
    now: Mutex<f64>,
}

impl MockClock {
    /// Create a clock frozen at `start` unix seconds.
    #[must_use]
    pub fn new(start: f64) -> Self {
        Self {
            now: Mutex::new(start),
        }
    }

    /// Advance the clock by `seconds`.
    pub fn advance(&self, seconds: f64) {
        *self.now.lock() += seconds;
    }

    /// Jump the clock to an absolute time.
    pub fn set(&self, now: f64) {
        *self.now.lock() = now;
    }
}

impl Clock for MockClock {
    fn now(&self) -> f64 {
        *self.now.lock()
    }
}

/// Observer recording every event in emission order.
#[derive(Default)]
pub struct RecordingObserver {
    records: Mutex<Vec<(Event, Option<Item>)>>,
}

impl RecordingObserver {
    /// Create an empty recorder.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// The events seen so far, in order.
    #[must_use]
    pub fn events(&self) -> Vec<Event> {
        self.records.lock().iter().map(|(event, _)| *event).collect()
    }

    /// The events with the item each was emitted for.
    #[must_use]
    pub fn records(&self) -> Vec<(Event, Option<Item>)> {
        self.records.lock().clone()
    }

    /// The items attached to every occurrence of `event`.
    #[must_use]
    pub fn items_for(&self, event: Event) -> Vec<Item> {
        self.records
            .lock()
            .iter()
            .filter(|(seen, _)| *seen == event)
            .filter_map(|(_, item)| item.clone())
            .collect()
    }

    /// Number of times `event` was seen.
    #[must_use]
    pub fn count(&self, event: Event) -> usize {
        self.records
            .lock()
            .iter()
            .filter(|(seen, _)| *seen == event)
            .count()
    }

    /// Forget everything recorded so far.
    pub fn clear(&self) {
        self.records.lock().clear();
    }

    fn record(&self, event: Event, item: Option<&Item>) {
        self.records.lock().push((event, item.cloned()));
    }
}

impl EventObserver for RecordingObserver {
    fn on_push(&self, item: &Item) {
        self.record(Event::Push, Some(item));
    }
    fn on_pop(&self, item: &Item) {
        self.record(Event::Pop, Some(item));
    }
    fn on_empty(&self, item: Option<&Item>) {
        self.record(Event::Empty, item);
    }
    fn on_complete(&self, item: &Item) {
        self.record(Event::Complete, Some(item));
    }
    fn on_expire(&self, item: &Item) {
        self.record(Event::Expire, Some(item));
    }
    fn on_retry(&self, item: &Item) {
        self.record(Event::Retry, Some(item));
    }
    fn on_error(&self, item: &Item) {
        self.record(Event::Error, Some(item));
    }
    fn on_debounce_hit(&self, item: &Item) {
        self.record(Event::DebounceHit, Some(item));
    }
    fn on_debounce_miss(&self, item: &Item) {
        self.record(Event::DebounceMiss, Some(item));
    }
    fn on_debounce_error(&self, item: &Item) {
        self.record(Event::DebounceError, Some(item));
    }
}

/// A dispatcher wired to the in-memory backend and store on a shared
/// [`MockClock`], with a [`RecordingObserver`] already registered.
pub struct MemoryHarness {
    pub clock: Arc<MockClock>,
    pub store: Arc<MemoryStore>,
    pub dispatcher: Arc<Dispatcher>,
    pub observer: Arc<RecordingObserver>,
}

impl MemoryHarness {
    /// Stats of the primary queue.
    pub async fn queue_stats(&self) -> QueueStats {
        self.dispatcher
            .backend()
            .queue
            .stats()
            .await
            .expect("memory queue stats are infallible")
    }

    /// Stats of the error queue.
    pub async fn error_stats(&self) -> QueueStats {
        self.dispatcher
            .backend()
            .error_queue
            .stats()
            .await
            .expect("memory queue stats are infallible")
    }
}

/// Build a [`MemoryHarness`] with the clock frozen at an arbitrary fixed
/// time.
#[must_use]
pub fn memory_harness() -> MemoryHarness {
    memory_harness_at(1_700_000_000.0)
}

/// Build a [`MemoryHarness`] with the clock frozen at `start`.
#[must_use]
pub fn memory_harness_at(start: f64) -> MemoryHarness {
    let clock = Arc::new(MockClock::new(start));
    let store = Arc::new(MemoryStore::with_clock(clock.clone()));
    let backend = MemoryBackendFactory::with_clock(clock.clone())
        .create_backend_for_group("")
        .expect("memory backend creation is infallible");
    let dispatcher = Arc::new(
        Dispatcher::builder(backend)
            .with_store(store.clone())
            .with_clock(clock.clone())
            .build(),
    );
    let observer = Arc::new(RecordingObserver::new());
    dispatcher.register_event_observer(observer.clone());
    MemoryHarness {
        clock,
        store,
        dispatcher,
        observer,
    }
}

/// A minimal item for policy-level tests.
#[must_use]
pub fn blank_item(method_path: &str) -> Item {
    Item {
        method_path: method_path.to_string(),
        args_blob: "[]".to_string(),
        kwargs_blob: "{}".to_string(),
        error_classes: "null".to_string(),
        group: String::new(),
        attempts: 0,
        max_attempts: 5,
        first_push_time: 0.0,
        last_push_time: 0.0,
        original_delay_seconds: 0.0,
        original_debounce_seconds: 0.0,
        original_debounce_always_delay: false,
        original_delay: None,
        delay: None,
        use_exponential_backoff: true,
        ttl_seconds: None,
        item_queued_timestamp: None,
        debounce_skip: false,
        error: None,
        metadata: BTreeMap::new(),
    }
}
