//! # Settlement Coordinator
//!
//! Settles one transaction exactly once, however often and however
//! concurrently it is submitted.
//!
//! ## State Machine
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                                                                         │
//! │  START ──► VALIDATE ──► CACHE_CHECK ──hit──────────────────────► DONE   │
//! │              │              │                                      ▲    │
//! │              │             miss                                    │    │
//! │              │              ▼                                      │    │
//! │              │          LOCK_WAIT ──timeout──► FAILED(retryable)   │    │
//! │              │              │                                      │    │
//! │              │              ▼                                      │    │
//! │              │      RECOMPUTE_OR_SKIP ──cached meanwhile───────────┤    │
//! │              │              │                                      │    │
//! │              │              ├──unknown / foreign source──► FAILED  │    │
//! │              │              ▼                                      │    │
//! │              │            GUARD ──violation──► FAILED(fatal)       │    │
//! │              │              │                                      │    │
//! │              │              ▼                                      │    │
//! │              │           PERSIST ──error──► FAILED (rolled back)   │    │
//! │              │              │                                      │    │
//! │              │              ▼                                      │    │
//! │              │         CACHE_WRITE ────────────────────────────────┘    │
//! │              │                                                          │
//! │              └──bad input──► FAILED(fatal)                              │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Duplicate Prevention
//! Three layers, each sufficient on its own for its failure mode:
//! - the idempotency cache answers repeats without touching the ledger
//! - the per-key lock keeps concurrent duplicates out of the critical section
//! - the ledger's unique index skips rows that already exist
//!
//! Failures are never cached; a retry with the same transaction id starts
//! from CACHE_CHECK again. A cached summary is only returned for the exact
//! `(tenant_id, transaction_id)` it was stored under.

use std::collections::{BTreeSet, HashMap};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tracing::{debug, error, info, warn};
use upline_core::{
    calculate_commissions, check_tenant_isolation, validate_transaction, CalculatorSettings,
    CommissionRecord, IdempotencyKey, Ownership, PartnerTier, ReferenceKind, SettlementResult,
    SettlementSummary, TenantViolation, Transaction,
};
use upline_db::Database;

use crate::adapters::{SqliteDirectory, SqliteLedger};
use crate::cache::InMemoryIdempotencyCache;
use crate::config::SettlementConfig;
use crate::error::{SettleResult, SettlementError};
use crate::lock::{with_lock, InMemoryLockService, LockWait};
use crate::ports::{IdempotencyCache, LedgerStore, LockService, PartnerDirectory};

/// Tracing target for security events.
pub const SECURITY_TARGET: &str = "upline::security";

// =============================================================================
// Stages
// =============================================================================

/// Where a settlement currently is. Logged on every transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SettlementStage {
    Start,
    Validate,
    CacheCheck,
    LockWait,
    RecomputeOrSkip,
    Guard,
    Persist,
    CacheWrite,
    Done,
    Failed,
}

impl fmt::Display for SettlementStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SettlementStage::Start => write!(f, "start"),
            SettlementStage::Validate => write!(f, "validate"),
            SettlementStage::CacheCheck => write!(f, "cache_check"),
            SettlementStage::LockWait => write!(f, "lock_wait"),
            SettlementStage::RecomputeOrSkip => write!(f, "recompute_or_skip"),
            SettlementStage::Guard => write!(f, "guard"),
            SettlementStage::Persist => write!(f, "persist"),
            SettlementStage::CacheWrite => write!(f, "cache_write"),
            SettlementStage::Done => write!(f, "done"),
            SettlementStage::Failed => write!(f, "failed"),
        }
    }
}

fn enter(key: &IdempotencyKey, stage: SettlementStage) {
    debug!(
        tenant_id = %key.tenant_id,
        transaction_id = %key.transaction_id,
        stage = %stage,
        "Settlement stage"
    );
}

// =============================================================================
// Settings
// =============================================================================

/// Runtime knobs of the coordinator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CoordinatorSettings {
    pub calculator: CalculatorSettings,
    pub lock: LockWait,
    pub cache_ttl: Duration,
}

impl Default for CoordinatorSettings {
    fn default() -> Self {
        CoordinatorSettings {
            calculator: CalculatorSettings::default(),
            lock: LockWait::default(),
            cache_ttl: Duration::from_secs(3600),
        }
    }
}

impl From<&SettlementConfig> for CoordinatorSettings {
    fn from(config: &SettlementConfig) -> Self {
        CoordinatorSettings {
            calculator: config.calculator_settings(),
            lock: config.lock_wait(),
            cache_ttl: config.cache_ttl(),
        }
    }
}

// =============================================================================
// Coordinator
// =============================================================================

/// Idempotent settlement entry point.
///
/// Cheap to clone; share one instance (or clones of it) between all callers
/// so the in-process lock and cache see every invocation.
#[derive(Clone)]
pub struct SettlementCoordinator {
    directory: Arc<dyn PartnerDirectory>,
    ledger: Arc<dyn LedgerStore>,
    locks: Arc<dyn LockService>,
    cache: Arc<dyn IdempotencyCache>,
    settings: CoordinatorSettings,
}

impl SettlementCoordinator {
    pub fn new(
        directory: Arc<dyn PartnerDirectory>,
        ledger: Arc<dyn LedgerStore>,
        locks: Arc<dyn LockService>,
        cache: Arc<dyn IdempotencyCache>,
        settings: CoordinatorSettings,
    ) -> Self {
        SettlementCoordinator {
            directory,
            ledger,
            locks,
            cache,
            settings,
        }
    }

    /// SQLite directory and ledger with the given lock and cache backends.
    pub fn with_sqlite(
        db: &Database,
        locks: Arc<dyn LockService>,
        cache: Arc<dyn IdempotencyCache>,
        settings: CoordinatorSettings,
    ) -> Self {
        Self::new(
            Arc::new(SqliteDirectory::new(db)),
            Arc::new(SqliteLedger::new(db)),
            locks,
            cache,
            settings,
        )
    }

    /// SQLite plus in-process lock and cache. Single-process deployments
    /// and tests.
    pub fn in_process(db: &Database, settings: CoordinatorSettings) -> Self {
        Self::with_sqlite(
            db,
            Arc::new(InMemoryLockService::new()),
            Arc::new(InMemoryIdempotencyCache::new()),
            settings,
        )
    }

    pub fn settings(&self) -> &CoordinatorSettings {
        &self.settings
    }

    /// Settles `tx` and reports the outcome in an envelope. Never fails;
    /// errors are carried in `SettlementResult::error`.
    pub async fn process_commission_settlement(&self, tx: &Transaction) -> SettlementResult {
        match self.settle(tx).await {
            Ok(summary) => SettlementResult::settled(summary),
            Err(err) => SettlementResult::failed(err.kind(), err.to_string()),
        }
    }

    /// Settles `tx`, returning the summary of the ledger rows for it.
    ///
    /// ## Errors
    /// - Validation kinds: malformed transaction, unknown source partner,
    ///   unusable tier rate. Nothing was written.
    /// - `CrossTenant`: a reference crossed the tenant boundary. Nothing was
    ///   written; logged on the security target.
    /// - `LockBusy`, `StoreUnavailable`, `CoordinationUnavailable`,
    ///   `PersistFailed`: retry with the same transaction id.
    pub async fn settle(&self, tx: &Transaction) -> SettleResult<SettlementSummary> {
        let key = tx.idempotency_key();
        enter(&key, SettlementStage::Start);

        let result = self.run(tx, &key).await;

        match &result {
            Ok(summary) => {
                enter(&key, SettlementStage::Done);
                info!(
                    tenant_id = %key.tenant_id,
                    transaction_id = %key.transaction_id,
                    total = summary.total_commissions_calculated,
                    inserted = summary.inserted_count,
                    truncated_upline = summary.truncated_upline,
                    "Transaction settled"
                );
            }
            Err(err) => {
                enter(&key, SettlementStage::Failed);
                if err.is_security_violation() {
                    error!(
                        target: SECURITY_TARGET,
                        tenant_id = %key.tenant_id,
                        transaction_id = %key.transaction_id,
                        source_partner_id = %tx.source_partner_id,
                        error = %err,
                        "Cross-tenant reference rejected, batch aborted"
                    );
                } else {
                    warn!(
                        tenant_id = %key.tenant_id,
                        transaction_id = %key.transaction_id,
                        kind = %err.kind(),
                        retryable = err.is_retryable(),
                        error = %err,
                        "Settlement failed"
                    );
                }
            }
        }

        result
    }

    async fn run(&self, tx: &Transaction, key: &IdempotencyKey) -> SettleResult<SettlementSummary> {
        enter(key, SettlementStage::Validate);
        validate_transaction(tx)?;

        enter(key, SettlementStage::CacheCheck);
        let cache_key = key.cache_key();
        if let Some(summary) = self.cached(key, &cache_key).await? {
            debug!(transaction_id = %key.transaction_id, "Idempotency cache hit");
            return Ok(summary);
        }

        enter(key, SettlementStage::LockWait);
        with_lock(self.locks.as_ref(), &key.lock_key(), &self.settings.lock, || {
            self.settle_locked(tx, key, &cache_key)
        })
        .await
    }

    /// Cached summary for `key`, if any. An entry stored for a different
    /// pair is treated as a miss and overwritten by this settlement.
    async fn cached(
        &self,
        key: &IdempotencyKey,
        cache_key: &str,
    ) -> SettleResult<Option<SettlementSummary>> {
        match self.cache.get(cache_key).await? {
            Some(summary)
                if summary.tenant_id == key.tenant_id
                    && summary.transaction_id == key.transaction_id =>
            {
                Ok(Some(summary))
            }
            Some(summary) => {
                error!(
                    target: SECURITY_TARGET,
                    tenant_id = %key.tenant_id,
                    transaction_id = %key.transaction_id,
                    cached_tenant_id = %summary.tenant_id,
                    cached_transaction_id = %summary.transaction_id,
                    "Cached settlement belongs to another transaction, ignoring it"
                );
                Ok(None)
            }
            None => Ok(None),
        }
    }

    /// The source partner must exist in the transaction's tenant. Existing
    /// elsewhere is a tenant violation, not a typo.
    async fn verify_source(&self, tx: &Transaction) -> SettleResult<()> {
        if self
            .directory
            .get_partner(&tx.tenant_id, &tx.source_partner_id)
            .await?
            .is_some()
        {
            return Ok(());
        }

        let owners = self
            .directory
            .partner_owners(std::slice::from_ref(&tx.source_partner_id))
            .await?;

        match owners.get(&tx.source_partner_id) {
            Some(owner) => Err(SettlementError::CrossTenant(
                TenantViolation {
                    reference: ReferenceKind::SourcePartner,
                    entity_id: tx.source_partner_id.clone(),
                    expected_tenant: tx.tenant_id.clone(),
                    actual_tenant: Some(owner.clone()),
                }
                .to_string(),
            )),
            None => Err(SettlementError::UnknownSourcePartner {
                tenant_id: tx.tenant_id.clone(),
                partner_id: tx.source_partner_id.clone(),
            }),
        }
    }

    async fn settle_locked(
        &self,
        tx: &Transaction,
        key: &IdempotencyKey,
        cache_key: &str,
    ) -> SettleResult<SettlementSummary> {
        enter(key, SettlementStage::RecomputeOrSkip);
        if let Some(summary) = self.cached(key, cache_key).await? {
            debug!(transaction_id = %key.transaction_id, "Settled while waiting for the lock");
            return Ok(summary);
        }
        self.verify_source(tx).await?;

        let upline = self
            .directory
            .get_upline(&tx.tenant_id, &tx.source_partner_id, self.settings.calculator.max_depth)
            .await?;
        if upline.is_truncated() {
            warn!(
                tenant_id = %key.tenant_id,
                transaction_id = %key.transaction_id,
                resolved = upline.len(),
                "Partial upline, settling the resolvable prefix"
            );
        }

        let tier_ids: Vec<String> = upline
            .entries
            .iter()
            .map(|e| e.tier_id.clone())
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect();
        let tiers: HashMap<String, PartnerTier> = self
            .directory
            .get_tiers(&tier_ids)
            .await?
            .into_iter()
            .map(|tier| (tier.id.clone(), tier))
            .collect();

        let plan = calculate_commissions(tx, &upline, &tiers, &self.settings.calculator, Utc::now())?;
        debug!(
            transaction_id = %key.transaction_id,
            candidates = plan.records.len(),
            ineligible = plan.ineligible,
            total_minor = plan.total().minor(),
            "Commission plan computed"
        );

        enter(key, SettlementStage::Guard);
        let ownership = self.resolve_ownership(tx, &plan.records, &tiers).await?;
        check_tenant_isolation(&tx.tenant_id, &tx.source_partner_id, &plan.records, &ownership)?;

        enter(key, SettlementStage::Persist);
        let inserted = self.ledger.insert_if_absent(&plan.records).await?;
        let records = self
            .ledger
            .records_for_transaction(&tx.tenant_id, &tx.transaction_id)
            .await?;

        let summary = SettlementSummary {
            tenant_id: tx.tenant_id.clone(),
            transaction_id: tx.transaction_id.clone(),
            total_commissions_calculated: records.len(),
            inserted_count: inserted,
            commission_records: records,
            truncated_upline: plan.truncated_upline,
            settled_at: Utc::now(),
        };

        enter(key, SettlementStage::CacheWrite);
        if let Err(e) = self.cache.set(cache_key, &summary, self.settings.cache_ttl).await {
            // The ledger is committed; a retry re-reads it
            warn!(transaction_id = %key.transaction_id, error = %e, "Failed to cache settlement");
        }

        Ok(summary)
    }

    /// Ground-truth owners of every partner and tier the batch references.
    async fn resolve_ownership(
        &self,
        tx: &Transaction,
        records: &[CommissionRecord],
        tiers: &HashMap<String, PartnerTier>,
    ) -> SettleResult<Ownership> {
        let (partner_ids, tier_ids) = Ownership::referenced_ids(&tx.source_partner_id, records);
        let partners = self.directory.partner_owners(&partner_ids).await?;

        let tiers = tier_ids
            .into_iter()
            .filter_map(|id| tiers.get(&id).map(|tier| (id, tier.tenant_id.clone())))
            .collect();

        Ok(Ownership { partners, tiers })
    }
}
