//! # Collaborator Interfaces
//!
//! The coordinator talks to the outside world only through these traits.
//!
//! ```text
//! ┌──────────────────────┐   ┌──────────────────────┐
//! │  PartnerDirectory    │   │  LedgerStore         │
//! │  SqliteDirectory     │   │  SqliteLedger        │
//! └──────────────────────┘   └──────────────────────┘
//! ┌──────────────────────┐   ┌──────────────────────┐
//! │  LockService         │   │  IdempotencyCache    │
//! │  InMemoryLockService │   │  InMemoryCache       │
//! │  RedisStore          │   │  RedisStore          │
//! └──────────────────────┘   └──────────────────────┘
//! ```

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use upline_core::{CommissionRecord, Partner, PartnerTier, SettlementSummary, Upline};

use crate::error::SettleResult;

/// Read access to the partner hierarchy.
#[async_trait]
pub trait PartnerDirectory: Send + Sync {
    /// Tenant-scoped partner lookup.
    async fn get_partner(&self, tenant_id: &str, partner_id: &str) -> SettleResult<Option<Partner>>;

    /// Ancestors of `partner_id`, nearest first, at most `max_depth` of them.
    async fn get_upline(&self, tenant_id: &str, partner_id: &str, max_depth: u32) -> SettleResult<Upline>;

    /// Tiers by primary key, whatever tenant owns them.
    async fn get_tiers(&self, tier_ids: &[String]) -> SettleResult<Vec<PartnerTier>>;

    /// partner id → owning tenant id. Unknown ids are absent.
    async fn partner_owners(&self, partner_ids: &[String]) -> SettleResult<HashMap<String, String>>;
}

/// Append-only commission ledger.
#[async_trait]
pub trait LedgerStore: Send + Sync {
    /// Inserts the records that do not exist yet, all or nothing.
    /// Returns how many rows this call inserted.
    async fn insert_if_absent(&self, records: &[CommissionRecord]) -> SettleResult<usize>;

    async fn count_for_transaction(&self, tenant_id: &str, transaction_id: &str) -> SettleResult<usize>;

    /// Stored rows, nearest beneficiary first.
    async fn records_for_transaction(
        &self,
        tenant_id: &str,
        transaction_id: &str,
    ) -> SettleResult<Vec<CommissionRecord>>;
}

/// Proof of lock ownership. Only the holder of the token can release.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LockToken {
    pub key: String,
    pub token: String,
}

/// Mutual exclusion per settlement key, with a lease.
#[async_trait]
pub trait LockService: Send + Sync {
    /// One attempt. `None` when someone else holds an unexpired lease.
    async fn try_acquire(&self, key: &str, lease: Duration) -> SettleResult<Option<LockToken>>;

    /// Releases the lock if `token` still owns it.
    async fn release(&self, token: &LockToken) -> SettleResult<()>;
}

/// Settled summaries by idempotency key.
#[async_trait]
pub trait IdempotencyCache: Send + Sync {
    async fn get(&self, key: &str) -> SettleResult<Option<SettlementSummary>>;

    async fn set(&self, key: &str, summary: &SettlementSummary, ttl: Duration) -> SettleResult<()>;
}
