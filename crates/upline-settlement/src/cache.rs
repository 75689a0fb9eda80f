//! In-process idempotency cache with per-entry TTL.
//!
//! Expired entries are dropped when read, and `set` sweeps the whole map
//! once it grows past a threshold that doubles with the live entry count.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use tokio::sync::RwLock;
use tracing::debug;
use upline_core::SettlementSummary;

use crate::error::SettleResult;
use crate::ports::IdempotencyCache;

/// Map size that triggers the first sweep.
pub const DEFAULT_SWEEP_THRESHOLD: usize = 1024;

/// Settled summaries kept in memory until their TTL passes.
#[derive(Debug)]
pub struct InMemoryIdempotencyCache {
    state: RwLock<State>,
    sweep_threshold: usize,
}

#[derive(Debug)]
struct State {
    entries: HashMap<String, Entry>,
    next_sweep: usize,
}

#[derive(Debug, Clone)]
struct Entry {
    summary: SettlementSummary,
    expires_at: Instant,
}

impl Default for InMemoryIdempotencyCache {
    fn default() -> Self {
        Self::with_sweep_threshold(DEFAULT_SWEEP_THRESHOLD)
    }
}

impl InMemoryIdempotencyCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_sweep_threshold(threshold: usize) -> Self {
        let threshold = threshold.max(1);
        InMemoryIdempotencyCache {
            state: RwLock::new(State {
                entries: HashMap::new(),
                next_sweep: threshold,
            }),
            sweep_threshold: threshold,
        }
    }

    /// Drops expired entries, returning how many were removed.
    pub async fn purge_expired(&self) -> usize {
        let mut state = self.state.write().await;
        self.sweep(&mut state)
    }

    /// Removes one entry.
    pub async fn invalidate(&self, key: &str) {
        self.state.write().await.entries.remove(key);
    }

    /// Entries currently held, expired or not.
    pub async fn len(&self) -> usize {
        self.state.read().await.entries.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    fn sweep(&self, state: &mut State) -> usize {
        let now = Instant::now();
        let before = state.entries.len();
        state.entries.retain(|_, e| e.expires_at > now);
        state.next_sweep = self.sweep_threshold.max(state.entries.len() * 2);
        before - state.entries.len()
    }
}

#[async_trait]
impl IdempotencyCache for InMemoryIdempotencyCache {
    async fn get(&self, key: &str) -> SettleResult<Option<SettlementSummary>> {
        {
            let state = self.state.read().await;
            match state.entries.get(key) {
                None => return Ok(None),
                Some(e) if e.expires_at > Instant::now() => return Ok(Some(e.summary.clone())),
                Some(_) => {}
            }
        }

        // Expired; re-check under the write lock since a writer may have
        // refreshed it in between
        let mut state = self.state.write().await;
        let now = Instant::now();
        match state.entries.get(key) {
            Some(e) if e.expires_at > now => Ok(Some(e.summary.clone())),
            Some(_) => {
                state.entries.remove(key);
                Ok(None)
            }
            None => Ok(None),
        }
    }

    async fn set(&self, key: &str, summary: &SettlementSummary, ttl: Duration) -> SettleResult<()> {
        let mut state = self.state.write().await;
        state.entries.insert(
            key.to_string(),
            Entry {
                summary: summary.clone(),
                expires_at: Instant::now() + ttl,
            },
        );

        if state.entries.len() >= state.next_sweep {
            let removed = self.sweep(&mut state);
            debug!(removed, live = state.entries.len(), "Swept idempotency cache");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn summary(tx: &str) -> SettlementSummary {
        SettlementSummary {
            tenant_id: "t1".to_string(),
            transaction_id: tx.to_string(),
            total_commissions_calculated: 2,
            inserted_count: 2,
            commission_records: Vec::new(),
            truncated_upline: false,
            settled_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn test_hit_and_miss() {
        let cache = InMemoryIdempotencyCache::new();
        assert!(cache.get("a").await.unwrap().is_none());

        cache.set("a", &summary("tx-1"), Duration::from_secs(60)).await.unwrap();
        let hit = cache.get("a").await.unwrap().unwrap();
        assert_eq!(hit.transaction_id, "tx-1");

        cache.invalidate("a").await;
        assert!(cache.get("a").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_entries_expire() {
        let cache = InMemoryIdempotencyCache::new();
        cache.set("a", &summary("tx-1"), Duration::from_millis(10)).await.unwrap();
        cache.set("b", &summary("tx-2"), Duration::from_secs(60)).await.unwrap();

        tokio::time::sleep(Duration::from_millis(30)).await;

        assert_eq!(cache.purge_expired().await, 1);
        assert!(cache.get("a").await.unwrap().is_none());
        assert!(cache.get("b").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_expired_entry_is_dropped_on_read() {
        let cache = InMemoryIdempotencyCache::new();
        cache.set("a", &summary("tx-1"), Duration::from_millis(10)).await.unwrap();
        assert_eq!(cache.len().await, 1);

        tokio::time::sleep(Duration::from_millis(30)).await;

        assert!(cache.get("a").await.unwrap().is_none());
        assert!(cache.is_empty().await);
    }

    #[tokio::test]
    async fn test_set_sweeps_past_threshold() {
        let cache = InMemoryIdempotencyCache::with_sweep_threshold(3);
        cache.set("a", &summary("tx-1"), Duration::from_millis(10)).await.unwrap();
        cache.set("b", &summary("tx-2"), Duration::from_millis(10)).await.unwrap();

        tokio::time::sleep(Duration::from_millis(30)).await;

        // Third insert reaches the threshold; only the live entry survives
        cache.set("c", &summary("tx-3"), Duration::from_secs(60)).await.unwrap();
        assert_eq!(cache.len().await, 1);
        assert!(cache.get("c").await.unwrap().is_some());

        // Never-read entries do not accumulate
        for i in 0..100 {
            let key = format!("k{i}");
            cache.set(&key, &summary(&key), Duration::from_millis(1)).await.unwrap();
            tokio::time::sleep(Duration::from_millis(2)).await;
        }
        assert!(cache.len().await <= 4);
    }
}
