// SPDX-License-Identifier: MIT OR Apache-2.0

//! Backend abstraction: the queue contract the dispatcher runs against.
//!
//! A [`Backend`] bundles a routing group with a primary queue and an error
//! queue. Both sides implement the one [`Queue`] trait; what differs is the
//! capabilities they advertise. The primary queue is FIFO-ish and can
//! withhold delayed items from consumers; the error queue is an unordered
//! set whose `pop` is non-destructive, so error items survive a crashed
//! consumer (duplicate delivery is acceptable, silent drops are not).
//!
//! Concrete distributed backends live outside this crate; [`memory`]
//! provides the in-process reference implementation.

pub mod memory;

use async_trait::async_trait;
use std::sync::Arc;
use tracing::error;

use crate::error::Result;
use crate::item::Item;

/// Base name for every queue; groups are appended as a suffix.
const QUEUE_NAME_BASE: &str = "deferrable";

/// The queue name a backend should use for a routing group.
#[must_use]
pub fn queue_name(group: &str) -> String {
    if group.is_empty() {
        QUEUE_NAME_BASE.to_string()
    } else {
        format!("{QUEUE_NAME_BASE}:{group}")
    }
}

/// Capabilities a queue advertises to its consumers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QueueCapabilities {
    /// Push order is preserved for undelayed items.
    pub fifo: bool,
    /// A `delay` field on a pushed item withholds it from consumers.
    pub supports_delay: bool,
    /// Reclaimed in-flight items re-enter at the back of the queue.
    pub reclaims_to_back_of_queue: bool,
}

/// Point-in-time queue counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct QueueStats {
    /// Items ready for consumption.
    pub available: usize,
    /// Items popped but not yet completed.
    pub in_flight: usize,
    /// Items withheld by a delay.
    pub delayed: usize,
}

/// Backend-specific handle wrapping an item while it is in flight.
///
/// Required by `complete` and `touch`; the receipt identifies the in-flight
/// reservation, while the wrapped item lets set-shaped queues (the error
/// queue) address entries by content.
#[derive(Debug, Clone)]
pub struct Envelope {
    /// Opaque reservation token issued by the queue on pop.
    pub receipt: String,
    /// The item as it was when popped.
    pub item: Item,
}

/// A FIFO-ish, delay-capable queue of items.
///
/// Batch operations default to looping the singular operation and recording
/// per-item success, which matches what most backends can promise anyway.
#[async_trait]
pub trait Queue: Send + Sync {
    /// Capability flags for this queue.
    fn capabilities(&self) -> QueueCapabilities;

    /// Enqueue one item. A non-zero `delay` field withholds the item from
    /// consumers for that many seconds, when the queue supports delays.
    async fn push(&self, item: Item) -> Result<()>;

    /// Reserve and return the next available item, or `None` when empty.
    async fn pop(&self) -> Result<Option<(Envelope, Item)>>;

    /// Extend the visibility of an in-flight envelope by `seconds`.
    async fn touch(&self, envelope: &Envelope, seconds: u64) -> Result<()>;

    /// Release an in-flight envelope for good.
    async fn complete(&self, envelope: &Envelope) -> Result<()>;

    /// Remove every item from the queue.
    async fn flush(&self) -> Result<()>;

    /// Current counters.
    async fn stats(&self) -> Result<QueueStats>;

    /// Enqueue a batch, returning per-item success.
    async fn push_batch(&self, items: Vec<Item>) -> Result<Vec<(Item, bool)>> {
        let mut results = Vec::with_capacity(items.len());
        for item in items {
            match self.push(item.clone()).await {
                Ok(()) => results.push((item, true)),
                Err(err) => {
                    error!(target: "deferrable::backend", "error pushing item {}: {err}", item.describe());
                    results.push((item, false));
                }
            }
        }
        Ok(results)
    }

    /// Pop up to `batch_size` items, stopping early when the queue is empty.
    async fn pop_batch(&self, batch_size: usize) -> Result<Vec<(Envelope, Item)>> {
        let mut batch = Vec::new();
        for _ in 0..batch_size {
            match self.pop().await? {
                Some(popped) => batch.push(popped),
                None => break,
            }
        }
        Ok(batch)
    }

    /// Complete a batch of envelopes, returning per-envelope success.
    async fn complete_batch(&self, envelopes: Vec<Envelope>) -> Result<Vec<(Envelope, bool)>> {
        let mut results = Vec::with_capacity(envelopes.len());
        for envelope in envelopes {
            let ok = match self.complete(&envelope).await {
                Ok(()) => true,
                Err(err) => {
                    error!(target: "deferrable::backend", "error completing envelope {}: {err}", envelope.receipt);
                    false
                }
            };
            results.push((envelope, ok));
        }
        Ok(results)
    }
}

/// A routing group bound to its primary and error queues.
#[derive(Clone)]
pub struct Backend {
    /// Logical routing label; selects the queue name.
    pub group: String,
    /// Queue of items awaiting execution.
    pub queue: Arc<dyn Queue>,
    /// Unordered store of items that exhausted retries or failed fatally.
    pub error_queue: Arc<dyn Queue>,
}

impl Backend {
    /// Bundle a group with its queues.
    #[must_use]
    pub fn new(group: impl Into<String>, queue: Arc<dyn Queue>, error_queue: Arc<dyn Queue>) -> Self {
        Self {
            group: group.into(),
            queue,
            error_queue,
        }
    }
}

/// Factory producing a [`Backend`] per routing group.
pub trait BackendFactory {
    /// Create a backend whose queues serve [`queue_name`]`(group)`.
    fn create_backend_for_group(&self, group: &str) -> Result<Backend>;
}
