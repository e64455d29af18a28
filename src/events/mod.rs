// SPDX-License-Identifier: MIT OR Apache-2.0

//! Lifecycle events and the observer protocol.
//!
//! The dispatcher emits a named event after each lifecycle action has taken
//! place. Observers implement any subset of the hooks on [`EventObserver`]
//! and are notified synchronously, in registration order.
//!
//! # Example
//!
//! ```
//! use deferrable::{EventObserver, Item};
//!
//! struct PushCounter(std::sync::atomic::AtomicU64);
//!
//! impl EventObserver for PushCounter {
//!     fn on_push(&self, _item: &Item) {
//!         self.0.fetch_add(1, std::sync::atomic::Ordering::Relaxed);
//!     }
//! }
//! ```

use std::fmt;

use crate::item::Item;

/// A lifecycle event emitted by the dispatcher.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Event {
    /// Item pushed to the primary queue.
    Push,
    /// Pop was attempted and returned an item.
    Pop,
    /// Pop was attempted but did not return an item.
    Empty,
    /// The popped envelope was completed on the primary queue.
    Complete,
    /// Item dropped at pop time with an exceeded TTL.
    Expire,
    /// Item execution failed but will be retried.
    Retry,
    /// Item execution failed and was pushed to the error queue.
    Error,
    /// Item was not queued subject to debounce constraints.
    DebounceHit,
    /// Item is configured for debounce but was queued.
    DebounceMiss,
    /// Debounce processing failed; the item was queued anyway.
    DebounceError,
}

impl Event {
    /// All events, in a stable order.
    pub const ALL: [Event; 10] = [
        Event::Push,
        Event::Pop,
        Event::Empty,
        Event::Complete,
        Event::Expire,
        Event::Retry,
        Event::Error,
        Event::DebounceHit,
        Event::DebounceMiss,
        Event::DebounceError,
    ];

    /// Stable wire name of the event.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Event::Push => "push",
            Event::Pop => "pop",
            Event::Empty => "empty",
            Event::Complete => "complete",
            Event::Expire => "expire",
            Event::Retry => "retry",
            Event::Error => "error",
            Event::DebounceHit => "debounce_hit",
            Event::DebounceMiss => "debounce_miss",
            Event::DebounceError => "debounce_error",
        }
    }
}

impl fmt::Display for Event {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Observer of dispatcher lifecycle events.
///
/// Hooks run on the dispatcher thread handling the envelope, after the action
/// they describe. Panics are not isolated: a panicking observer unwinds
/// through the current envelope's lifecycle, so observers must be
/// well-behaved.
#[allow(unused_variables)]
pub trait EventObserver: Send + Sync {
    fn on_push(&self, item: &Item) {}
    fn on_pop(&self, item: &Item) {}
    /// A pop returned nothing. There is usually no item to report.
    fn on_empty(&self, item: Option<&Item>) {}
    fn on_complete(&self, item: &Item) {}
    fn on_expire(&self, item: &Item) {}
    fn on_retry(&self, item: &Item) {}
    fn on_error(&self, item: &Item) {}
    fn on_debounce_hit(&self, item: &Item) {}
    fn on_debounce_miss(&self, item: &Item) {}
    fn on_debounce_error(&self, item: &Item) {}
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_names_are_stable() {
        let names: Vec<&str> = Event::ALL.iter().map(Event::as_str).collect();
        assert_eq!(
            names,
            vec![
                "push",
                "pop",
                "empty",
                "complete",
                "expire",
                "retry",
                "error",
                "debounce_hit",
                "debounce_miss",
                "debounce_error",
            ]
        );
    }

    #[test]
    fn test_event_display_matches_as_str() {
        for event in Event::ALL {
            assert_eq!(event.to_string(), event.as_str());
        }
    }
}
