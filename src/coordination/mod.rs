// SPDX-License-Identifier: MIT OR Apache-2.0

//! Coordination store: a string-keyed, TTL-aware key/value service.
//!
//! The debounce engine is the only consumer. The contract is deliberately
//! tiny (independent single-key reads and writes, expiry mandatory on every
//! write) so any external store with per-key TTLs can back it.
//! [`MemoryStore`] is the in-process implementation used by tests and
//! single-node deployments.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;

use crate::error::Result;
use crate::runtime::{Clock, SystemClock};

/// String-keyed key/value store with mandatory per-key expiry.
#[async_trait]
pub trait CoordinationStore: Send + Sync {
    /// Write `value` under `key`, expiring after `expiry_ms` milliseconds.
    async fn set(&self, key: &str, value: &str, expiry_ms: u64) -> Result<()>;

    /// Read the live value under `key`, if any.
    async fn get(&self, key: &str) -> Result<Option<String>>;
}

/// In-process coordination store with clock-driven expiry.
pub struct MemoryStore {
    clock: Arc<dyn Clock>,
    entries: Mutex<HashMap<String, StoreEntry>>,
}

struct StoreEntry {
    value: String,
    expires_at: f64,
}

impl MemoryStore {
    /// Create a store on the system clock.
    #[must_use]
    pub fn new() -> Self {
        Self::with_clock(Arc::new(SystemClock::new()))
    }

    /// Create a store on an explicit clock.
    #[must_use]
    pub fn with_clock(clock: Arc<dyn Clock>) -> Self {
        Self {
            clock,
            entries: Mutex::new(HashMap::new()),
        }
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl CoordinationStore for MemoryStore {
    async fn set(&self, key: &str, value: &str, expiry_ms: u64) -> Result<()> {
        let expires_at = self.clock.now() + expiry_ms as f64 / 1_000.0;
        self.entries.lock().insert(
            key.to_string(),
            StoreEntry {
                value: value.to_string(),
                expires_at,
            },
        );
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Option<String>> {
        let mut entries = self.entries.lock();
        match entries.get(key) {
            Some(entry) if entry.expires_at > self.clock.now() => Ok(Some(entry.value.clone())),
            Some(_) => {
                entries.remove(key);
                Ok(None)
            }
            None => Ok(None),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testkit::MockClock;

    #[tokio::test]
    async fn test_set_then_get() {
        let store = MemoryStore::new();
        store.set("k", "v", 60_000).await.unwrap();
        assert_eq!(store.get("k").await.unwrap().as_deref(), Some("v"));
    }

    #[tokio::test]
    async fn test_missing_key_is_none() {
        let store = MemoryStore::new();
        assert_eq!(store.get("nope").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_expiry_reaps_the_key() {
        let clock = Arc::new(MockClock::new(1000.0));
        let store = MemoryStore::with_clock(clock.clone());
        store.set("k", "v", 5_000).await.unwrap();

        clock.advance(4.9);
        assert!(store.get("k").await.unwrap().is_some());
        clock.advance(0.2);
        assert!(store.get("k").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_overwrite_refreshes_expiry() {
        let clock = Arc::new(MockClock::new(1000.0));
        let store = MemoryStore::with_clock(clock.clone());
        store.set("k", "old", 1_000).await.unwrap();
        clock.advance(0.9);
        store.set("k", "new", 1_000).await.unwrap();
        clock.advance(0.5);
        assert_eq!(store.get("k").await.unwrap().as_deref(), Some("new"));
    }
}
