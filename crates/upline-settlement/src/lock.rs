//! # Settlement Locks
//!
//! Per-key mutual exclusion with a lease, plus the bounded wait loop the
//! coordinator runs around it.
//!
//! ## Wait Loop
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  try_acquire ──► Some(token) ──► run critical section ──► release       │
//! │       │                                                                 │
//! │       └──► None ──► waited ≥ wait_timeout ? ──► LockBusy (retryable)    │
//! │                          │                                              │
//! │                          └──► sleep(next backoff) ──► try_acquire       │
//! │                                                                         │
//! │  backoff: initial_backoff × 2ⁿ with jitter, capped at max_backoff       │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! The lock is released on success and on failure. A holder that dies
//! without releasing loses the lock when its lease runs out.

use std::collections::HashMap;
use std::future::Future;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use backoff::backoff::Backoff;
use backoff::ExponentialBackoff;
use tokio::sync::Mutex;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::error::{SettleResult, SettlementError};
use crate::ports::{LockService, LockToken};

// =============================================================================
// Wait Policy
// =============================================================================

/// Lease and wait policy for one settlement lock.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LockWait {
    /// Lifetime of a lock whose holder never releases it.
    pub lease: Duration,
    /// Total time spent waiting before giving up.
    pub wait_timeout: Duration,
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
}

impl Default for LockWait {
    fn default() -> Self {
        LockWait {
            lease: Duration::from_secs(30),
            wait_timeout: Duration::from_secs(5),
            initial_backoff: Duration::from_millis(20),
            max_backoff: Duration::from_millis(500),
        }
    }
}

impl LockWait {
    fn create_backoff(&self) -> ExponentialBackoff {
        ExponentialBackoff {
            initial_interval: self.initial_backoff,
            max_interval: self.max_backoff,
            multiplier: 2.0,
            max_elapsed_time: None, // bounded by wait_timeout instead
            ..Default::default()
        }
    }
}

/// Runs `critical` while holding the lock for `key`.
///
/// ## Errors
/// - `SettlementError::LockBusy` when the lock stays taken for
///   `wait.wait_timeout`
/// - whatever the lock backend or `critical` returns
pub async fn with_lock<F, Fut, T>(
    locks: &dyn LockService,
    key: &str,
    wait: &LockWait,
    critical: F,
) -> SettleResult<T>
where
    F: FnOnce() -> Fut,
    Fut: Future<Output = SettleResult<T>>,
{
    let token = acquire(locks, key, wait).await?;

    let result = critical().await;

    if let Err(e) = locks.release(&token).await {
        // The lease frees the key eventually
        warn!(key = %key, error = %e, "Failed to release settlement lock");
    }

    result
}

async fn acquire(locks: &dyn LockService, key: &str, wait: &LockWait) -> SettleResult<LockToken> {
    let started = Instant::now();
    let mut backoff = wait.create_backoff();
    let mut attempt = 0u32;

    loop {
        attempt += 1;
        if let Some(token) = locks.try_acquire(key, wait.lease).await? {
            debug!(key = %key, attempt, "Settlement lock acquired");
            return Ok(token);
        }

        let waited = started.elapsed();
        if waited >= wait.wait_timeout {
            return Err(SettlementError::LockBusy {
                key: key.to_string(),
                waited_ms: waited.as_millis() as u64,
            });
        }

        let delay = backoff
            .next_backoff()
            .unwrap_or(wait.max_backoff)
            .min(wait.wait_timeout - waited);
        debug!(key = %key, attempt, ?delay, "Settlement lock busy, waiting");
        tokio::time::sleep(delay).await;
    }
}

// =============================================================================
// In-Process Lock Service
// =============================================================================

/// Lock table for a single process.
///
/// Correct only when every settling invocation shares this instance; use
/// the Redis backend across processes.
#[derive(Debug, Default)]
pub struct InMemoryLockService {
    held: Mutex<HashMap<String, Held>>,
}

#[derive(Debug)]
struct Held {
    token: String,
    expires_at: Instant,
}

impl InMemoryLockService {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of unexpired locks.
    pub async fn held_count(&self) -> usize {
        let now = Instant::now();
        self.held
            .lock()
            .await
            .values()
            .filter(|h| h.expires_at > now)
            .count()
    }
}

#[async_trait]
impl LockService for InMemoryLockService {
    async fn try_acquire(&self, key: &str, lease: Duration) -> SettleResult<Option<LockToken>> {
        let now = Instant::now();
        let mut held = self.held.lock().await;

        if let Some(current) = held.get(key) {
            if current.expires_at > now {
                return Ok(None);
            }
            debug!(key = %key, "Taking over expired settlement lock");
        }

        let token = Uuid::new_v4().to_string();
        held.insert(
            key.to_string(),
            Held {
                token: token.clone(),
                expires_at: now + lease,
            },
        );

        Ok(Some(LockToken {
            key: key.to_string(),
            token,
        }))
    }

    async fn release(&self, token: &LockToken) -> SettleResult<()> {
        let mut held = self.held.lock().await;
        match held.get(&token.key) {
            Some(current) if current.token == token.token => {
                held.remove(&token.key);
            }
            _ => debug!(key = %token.key, "Lock no longer owned, nothing to release"),
        }
        Ok(())
    }
}
