// SPDX-License-Identifier: MIT OR Apache-2.0

//! Lifecycle policies: backoff, TTL, debounce, and the clock they share.
//!
//! These are the pure rules the dispatcher applies; none of them touch the
//! backend directly. Everything time-dependent reads the injectable
//! [`Clock`] so tests can drive time.

pub mod backoff;
mod clock;
pub mod debounce;
pub mod ttl;

pub use clock::{Clock, SystemClock};
pub use debounce::DebounceDecision;
