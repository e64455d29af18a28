// SPDX-License-Identifier: MIT OR Apache-2.0

//! Wall clock abstraction.
//!
//! Every time-dependent policy (backoff, TTL, debounce, queue delays) reads
//! the clock through this trait so tests can drive time explicitly.

use std::time::{SystemTime, UNIX_EPOCH};

/// Source of wall-clock time in unix seconds.
pub trait Clock: Send + Sync {
    /// Current unix time in seconds.
    fn now(&self) -> f64;
}

/// The system wall clock.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl SystemClock {
    /// Create a new system clock.
    #[must_use]
    pub fn new() -> Self {
        Self
    }
}

impl Clock for SystemClock {
    fn now(&self) -> f64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_secs_f64()
    }
}
