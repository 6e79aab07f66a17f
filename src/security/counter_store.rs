//! Shared counter store for fixed-window rate limiting.
//!
//! The store is the only shared mutable state on the request path. Its one
//! operation increments a key's counter for a given window and returns the
//! new count as a single atomic step, so two concurrent callers can never both
//! observe the same count.

use async_trait::async_trait;
use dashmap::DashMap;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum CounterStoreError {
    #[error("counter store unavailable: {0}")]
    Unavailable(String),

    #[error("counter store returned an invalid reply: {0}")]
    InvalidReply(String),
}

#[async_trait]
pub trait CounterStore: Send + Sync {
    /// Atomically increment `key` within the window starting at
    /// `window_start_ms` and lasting `window_ms`, starting from zero when the
    /// stored window is older. Returns the post-increment count.
    async fn increment(
        &self,
        key: &str,
        window_start_ms: i64,
        window_ms: i64,
    ) -> Result<u64, CounterStoreError>;

    /// Drop counters whose window ended at or before `now_ms`. Stores with
    /// native expiry return 0.
    fn evict_expired(&self, _now_ms: i64) -> usize {
        0
    }
}

#[derive(Debug, Clone, Copy)]
struct WindowCounter {
    window_start_ms: i64,
    expires_at_ms: i64,
    count: u64,
}

/// Process-local store. The `DashMap` entry guard serialises increments per
/// key.
#[derive(Debug, Default)]
pub struct InMemoryCounterStore {
    counters: DashMap<String, WindowCounter>,
}

impl InMemoryCounterStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.counters.len()
    }

    pub fn is_empty(&self) -> bool {
        self.counters.is_empty()
    }
}

#[async_trait]
impl CounterStore for InMemoryCounterStore {
    async fn increment(
        &self,
        key: &str,
        window_start_ms: i64,
        window_ms: i64,
    ) -> Result<u64, CounterStoreError> {
        if window_ms <= 0 {
            return Err(CounterStoreError::InvalidReply(format!(
                "window length must be positive, got {window_ms}ms"
            )));
        }

        let mut entry = self
            .counters
            .entry(key.to_string())
            .or_insert(WindowCounter {
                window_start_ms,
                expires_at_ms: window_start_ms + window_ms,
                count: 0,
            });

        // A caller with a slightly lagging clock keeps counting into the
        // newer window rather than resetting it.
        if window_start_ms > entry.window_start_ms {
            *entry = WindowCounter {
                window_start_ms,
                expires_at_ms: window_start_ms + window_ms,
                count: 0,
            };
        }

        entry.count += 1;
        Ok(entry.count)
    }

    fn evict_expired(&self, now_ms: i64) -> usize {
        let before = self.counters.len();
        self.counters.retain(|_, c| c.expires_at_ms > now_ms);
        before.saturating_sub(self.counters.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[tokio::test]
    async fn test_counts_within_window_and_resets() {
        let store = InMemoryCounterStore::new();
        assert_eq!(store.increment("k", 0, 60_000).await.unwrap(), 1);
        assert_eq!(store.increment("k", 0, 60_000).await.unwrap(), 2);
        assert_eq!(store.increment("other", 0, 60_000).await.unwrap(), 1);

        assert_eq!(store.increment("k", 60_000, 60_000).await.unwrap(), 1);
        // An older window never resets the newer one.
        assert_eq!(store.increment("k", 0, 60_000).await.unwrap(), 2);
    }

    #[tokio::test]
    async fn test_evict_expired() {
        let store = InMemoryCounterStore::new();
        store.increment("a", 0, 1_000).await.unwrap();
        store.increment("b", 5_000, 1_000).await.unwrap();

        assert_eq!(store.evict_expired(1_000), 1);
        assert_eq!(store.len(), 1);
        assert_eq!(store.evict_expired(10_000), 1);
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn test_rejects_empty_window() {
        let store = InMemoryCounterStore::new();
        assert!(store.increment("k", 0, 0).await.is_err());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_increments_are_atomic() {
        let store = Arc::new(InMemoryCounterStore::new());
        let mut handles = Vec::new();
        for _ in 0..200 {
            let store = store.clone();
            handles.push(tokio::spawn(async move {
                store.increment("hot", 0, 60_000).await.unwrap()
            }));
        }

        let mut seen = Vec::new();
        for h in handles {
            seen.push(h.await.unwrap());
        }
        seen.sort_unstable();
        assert_eq!(seen, (1..=200).collect::<Vec<u64>>());
    }
}
