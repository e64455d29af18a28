// SPDX-License-Identifier: MIT OR Apache-2.0

//! The item: the serialized invocation record that travels through queues.
//!
//! An [`Item`] is built by the dispatcher on `later(...)`, mutated only on the
//! retry and error-routing paths, and destroyed when its envelope is completed
//! or its error-queue entry deleted. Backends treat it as an opaque serde
//! document; the dispatcher is the only component that interprets its fields.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// A single deferred invocation.
///
/// Timestamps are unix seconds. `last_push_time` is future-dated by any
/// applied delay so response-time metrics exclude intentional waiting.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Item {
    /// Fully qualified identifier of the target, resolvable by any worker.
    pub method_path: String,
    /// Codec-encoded positional arguments.
    pub args_blob: String,
    /// Codec-encoded named arguments.
    pub kwargs_blob: String,
    /// Codec-encoded optional list of retriable error tags.
    pub error_classes: String,
    /// Routing label used by the backend to choose a queue name.
    pub group: String,
    /// 0-indexed count of attempts already completed unsuccessfully.
    pub attempts: u32,
    /// Upper bound on attempts before error-queue routing.
    pub max_attempts: u32,
    pub first_push_time: f64,
    pub last_push_time: f64,
    /// User-configured intent, preserved across retries.
    pub original_delay_seconds: f64,
    pub original_debounce_seconds: f64,
    pub original_debounce_always_delay: bool,
    /// Snapshot of the delay applied to the first push.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub original_delay: Option<f64>,
    /// Delay in seconds applied to the current push; absent means immediate.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub delay: Option<f64>,
    pub use_exponential_backoff: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ttl_seconds: Option<f64>,
    /// Wall-time anchor at which the TTL budget began. Retries inherit it.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub item_queued_timestamp: Option<f64>,
    /// Transient enqueue-path flag: the item must not be pushed.
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub debounce_skip: bool,
    /// Populated only on the failure path.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorInfo>,
    /// Extension fields, one entry per extension namespace.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub metadata: BTreeMap<String, serde_json::Value>,
}

impl Item {
    /// Human-readable one-liner for log records.
    #[must_use]
    pub fn describe(&self) -> String {
        format!(
            "{}(args={}, kwargs={})",
            self.method_path, self.args_blob, self.kwargs_blob
        )
    }
}

/// Error record attached to an item routed to the error queue.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ErrorInfo {
    /// Tag of the failure, e.g. the `TaskError` class.
    pub error_type: String,
    pub error_text: String,
    pub traceback: String,
    /// Hostname of the worker that recorded the failure.
    pub hostname: String,
    /// Unix seconds at which the failure was recorded.
    pub ts: f64,
    /// Unique identifier of the item on the error queue.
    pub id: String,
}
