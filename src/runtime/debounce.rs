// SPDX-License-Identifier: MIT OR Apache-2.0

//! Debounce decision engine.
//!
//! Debouncing coalesces bursts of identical invocations, where identity is
//! the `(method_path, args, kwargs)` triple. Two keys in the coordination
//! store drive the decision:
//!
//! - the **debounce key** marks "an instance of this invocation is already
//!   scheduled"; while it lives, new requests are skipped;
//! - the **last push key** holds the wall time at which this invocation was
//!   most recently available for consumption, and decides whether a new push
//!   must be delayed to spread invocations apart.
//!
//! The engine only classifies; the enqueue path is responsible for applying
//! the matching side effects with [`mark_push_now`] / [`mark_push_delayed`].
//! Races against concurrent producers are tolerated: the worst outcomes are
//! an extra delayed push or an occasional double execution, never a silent
//! drop.

use crate::coordination::CoordinationStore;
use crate::error::{DeferrableError, Result};
use crate::item::Item;

/// Classification of a pending enqueue.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DebounceDecision {
    /// Push immediately.
    PushNow,
    /// Push with the returned delay to spread invocations apart.
    PushDelayed,
    /// Do not push; an equivalent invocation is already scheduled.
    Skip,
}

fn debounce_key(item: &Item) -> String {
    format!(
        "debounce.{}.{}.{}",
        item.method_path, item.args_blob, item.kwargs_blob
    )
}

fn last_push_key(item: &Item) -> String {
    format!(
        "last_push.{}.{}.{}",
        item.method_path, item.args_blob, item.kwargs_blob
    )
}

/// Classify a pending enqueue, returning the decision and the delay in
/// seconds to apply (0 unless the decision is [`DebounceDecision::PushDelayed`]).
pub async fn decide(
    store: &dyn CoordinationStore,
    item: &Item,
    debounce_seconds: f64,
    debounce_always_delay: bool,
    now: f64,
) -> Result<(DebounceDecision, f64)> {
    if store.get(&debounce_key(item)).await?.is_some() {
        return Ok((DebounceDecision::Skip, 0.0));
    }

    if debounce_always_delay {
        return Ok((DebounceDecision::PushDelayed, debounce_seconds));
    }

    let Some(raw) = store.get(&last_push_key(item)).await? else {
        return Ok((DebounceDecision::PushNow, 0.0));
    };
    let last_push_time: f64 = raw
        .parse()
        .map_err(|_| DeferrableError::Store(format!("bad last-push value: {raw:?}")))?;

    let seconds_since_last_push = now - last_push_time;
    if seconds_since_last_push > debounce_seconds {
        return Ok((DebounceDecision::PushNow, 0.0));
    }
    Ok((
        DebounceDecision::PushDelayed,
        debounce_seconds - seconds_since_last_push,
    ))
}

/// Record the wall time at which this invocation became available.
///
/// The key expires after twice the debounce window, so it is already stale
/// by the time the store reaps it.
async fn set_last_push_time(
    store: &dyn CoordinationStore,
    item: &Item,
    time_to_set: f64,
    debounce_seconds: f64,
) -> Result<()> {
    let expiry_ms = (2_000.0 * debounce_seconds) as u64;
    store
        .set(&last_push_key(item), &time_to_set.to_string(), expiry_ms)
        .await
}

/// Side effects for a [`DebounceDecision::PushNow`] decision.
pub async fn mark_push_now(
    store: &dyn CoordinationStore,
    item: &Item,
    debounce_seconds: f64,
    now: f64,
) -> Result<()> {
    set_last_push_time(store, item, now, debounce_seconds).await
}

/// Side effects for a [`DebounceDecision::PushDelayed`] decision: record the
/// future availability time and block further enqueues for the window.
pub async fn mark_push_delayed(
    store: &dyn CoordinationStore,
    item: &Item,
    delay_seconds: f64,
    debounce_seconds: f64,
    now: f64,
) -> Result<()> {
    set_last_push_time(store, item, now + delay_seconds, debounce_seconds).await?;
    let expiry_ms = (debounce_seconds * 1_000.0) as u64;
    store.set(&debounce_key(item), "_", expiry_ms).await
}
