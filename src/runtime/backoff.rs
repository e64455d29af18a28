// SPDX-License-Identifier: MIT OR Apache-2.0

//! Exponential backoff applied when re-pushing items after a retriable
//! failure.
//!
//! The delay for attempt `n` (0-indexed) is
//! `min(BACKOFF_CONSTANT + BACKOFF_BASE^n, MAXIMUM_DELAY_SECONDS)`.
//! Items that opt out of backoff are re-pushed for immediate availability.

use crate::item::Item;
use crate::MAXIMUM_DELAY_SECONDS;

/// Constant added to every backoff delay.
pub const BACKOFF_CONSTANT: f64 = 2.0;

/// Base of the exponential term.
pub const BACKOFF_BASE: f64 = 2.0;

/// Delay in seconds before the next attempt, capped at
/// [`MAXIMUM_DELAY_SECONDS`].
///
/// `attempt` is the 0-indexed number of attempts already completed.
#[must_use]
pub fn compute_delay(attempt: u32) -> f64 {
    (BACKOFF_CONSTANT + BACKOFF_BASE.powi(attempt as i32)).min(MAXIMUM_DELAY_SECONDS)
}

/// Record the backoff policy flag on a freshly built item.
pub fn apply_backoff_options(item: &mut Item, use_exponential_backoff: bool) {
    item.use_exponential_backoff = use_exponential_backoff;
}

/// Apply the backoff policy to an item about to be re-pushed.
///
/// Without exponential backoff the delay is cleared and the push timestamp
/// reset, making the item immediately available again. With it, the push
/// timestamp is future-dated by the delay so that response-time metrics
/// exclude the intentional wait.
pub fn apply_backoff_delay(item: &mut Item, now: f64) {
    if !item.use_exponential_backoff {
        item.last_push_time = now;
        item.delay = None;
        return;
    }

    let delay_seconds = compute_delay(item.attempts);
    item.last_push_time = now + delay_seconds;
    item.delay = Some(delay_seconds);
}
