//! # Domain Types
//!
//! Core domain types of the partner commission engine.
//!
//! ## Type Hierarchy
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                         Domain Types                                    │
//! │                                                                         │
//! │  ┌─────────────────┐   ┌─────────────────┐   ┌─────────────────┐       │
//! │  │    Partner      │   │  PartnerTier    │   │   Transaction   │       │
//! │  │  ─────────────  │   │  ─────────────  │   │  ─────────────  │       │
//! │  │  id (UUID)      │   │  id (UUID)      │   │  transaction_id │       │
//! │  │  tenant_id      │   │  tenant_id      │   │  tenant_id      │       │
//! │  │  code           │   │  default rate   │   │  source partner │       │
//! │  │  tier_id ───────┼──►│  max depth      │   │  amount/currency│       │
//! │  └─────────────────┘   └─────────────────┘   └────────┬────────┘       │
//! │                                                       │ settle          │
//! │  ┌─────────────────┐                         ┌────────▼────────┐       │
//! │  │    Upline       │    calculator + guard   │CommissionRecord │       │
//! │  │  [UplineEntry]  │ ──────────────────────► │  one per        │       │
//! │  │  nearest first  │                         │  (tx, partner,  │       │
//! │  └─────────────────┘                         │   depth)        │       │
//! │                                              └─────────────────┘       │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Tenant Scoping
//! Every entity carries a `tenant_id`. A commission record is only valid
//! when all entities it references carry the record's `tenant_id`.

use std::fmt;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use ts_rs::TS;
use uuid::Uuid;

use crate::money::Money;
use crate::COMMISSION_RECORD_NAMESPACE;

// =============================================================================
// Tenant & Partner
// =============================================================================

/// Isolation boundary of the platform.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Tenant {
    pub id: String,
    pub name: String,
    pub created_at: DateTime<Utc>,
}

/// A participant of the referral program.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Partner {
    /// Unique identifier (UUID v4).
    pub id: String,

    /// Tenant this partner belongs to.
    pub tenant_id: String,

    /// Human-readable referral code.
    pub code: String,

    /// Current tier. May change over time; records snapshot it.
    pub tier_id: String,

    /// Inactive partners stay in the hierarchy but are kept for history.
    pub is_active: bool,

    pub created_at: DateTime<Utc>,
}

/// A partner level carrying a default commission rate and a depth cap.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PartnerTier {
    pub id: String,
    pub tenant_id: String,

    /// Stable machine code, e.g. `GOLD`.
    pub level_code: String,

    /// Display name, snapshotted into commission records.
    pub name: String,

    /// Position among the tenant's tiers (lower = entry level).
    pub sort_order: i32,

    /// Fraction in `[0, 1]`; `0.10` = 10%.
    pub default_commission_rate: Decimal,

    /// How many levels below a partner of this tier may still pay it.
    pub max_referral_depth: u32,
}

// =============================================================================
// Upline
// =============================================================================

/// One ancestor of the transacting partner.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UplineEntry {
    pub partner_id: String,
    pub tier_id: String,
    /// 1 = direct sponsor.
    pub depth: u32,
}

/// Ancestors of a partner, nearest first.
///
/// `complete` is false when the stored chain was broken and only a prefix
/// could be resolved. A short upline is valid input, not an error.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Upline {
    pub entries: Vec<UplineEntry>,
    pub complete: bool,
}

impl Upline {
    /// A fully resolved chain.
    pub fn complete(entries: Vec<UplineEntry>) -> Self {
        Upline {
            entries,
            complete: true,
        }
    }

    /// A resolvable prefix of a broken chain.
    pub fn truncated(entries: Vec<UplineEntry>) -> Self {
        Upline {
            entries,
            complete: false,
        }
    }

    pub fn is_truncated(&self) -> bool {
        !self.complete
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

// =============================================================================
// Transaction
// =============================================================================

/// What kind of completed transaction triggered settlement.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, TS)]
#[ts(export)]
#[serde(rename_all = "snake_case")]
pub enum TransactionType {
    /// In-store POS sale.
    #[default]
    Sale,
    /// E-commerce order.
    OnlineOrder,
    /// Recurring subscription charge.
    Subscription,
    /// Service booking.
    Service,
}

impl fmt::Display for TransactionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TransactionType::Sale => write!(f, "sale"),
            TransactionType::OnlineOrder => write!(f, "online_order"),
            TransactionType::Subscription => write!(f, "subscription"),
            TransactionType::Service => write!(f, "service"),
        }
    }
}

/// A completed transaction handed over by the order-completion workflow.
///
/// `transaction_id` is caller-supplied and must stay stable across retries:
/// together with `tenant_id` it is the idempotency key.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Transaction {
    pub tenant_id: String,
    pub transaction_id: String,
    pub source_partner_id: String,

    /// Major units (e.g. `1000.00`).
    pub amount: Decimal,

    /// ISO-4217 code.
    pub currency: String,

    #[serde(default)]
    pub transaction_type: TransactionType,

    pub occurred_at: DateTime<Utc>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<serde_json::Value>,
}

impl Transaction {
    pub fn idempotency_key(&self) -> IdempotencyKey {
        IdempotencyKey::new(&self.tenant_id, &self.transaction_id)
    }
}

/// `(tenant_id, transaction_id)`: collapses repeated and concurrent
/// settlement requests into one outcome.
///
/// Both ids are caller-chosen and may contain `:`, so the rendered form
/// length-prefixes the tenant: `{len(tenant)}:{tenant}:{transaction}`.
/// Distinct pairs never render to the same string.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct IdempotencyKey {
    pub tenant_id: String,
    pub transaction_id: String,
}

impl IdempotencyKey {
    pub fn new(tenant_id: &str, transaction_id: &str) -> Self {
        IdempotencyKey {
            tenant_id: tenant_id.to_string(),
            transaction_id: transaction_id.to_string(),
        }
    }

    /// Key of the cached settlement summary.
    pub fn cache_key(&self) -> String {
        format!("commission:settled:{}", self)
    }

    /// Key of the settlement lock.
    pub fn lock_key(&self) -> String {
        format!("commission:lock:{}", self)
    }
}

impl fmt::Display for IdempotencyKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}:{}:{}",
            self.tenant_id.len(),
            self.tenant_id,
            self.transaction_id
        )
    }
}

// =============================================================================
// Commission Record
// =============================================================================

/// One commission entitlement in the ledger.
///
/// ## Snapshot Pattern
/// `beneficiary_tier_name` is copied at calculation time, so renaming a tier
/// later never rewrites history. Records are never updated or deleted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct CommissionRecord {
    /// Deterministic UUID v5 of the uniqueness tuple.
    pub id: String,
    pub tenant_id: String,
    pub transaction_id: String,
    pub beneficiary_partner_id: String,
    pub beneficiary_tier_id: String,
    pub beneficiary_tier_name: String,
    pub source_partner_id: String,

    /// 1 = immediate upline.
    pub levels_from_source: u32,

    #[ts(type = "string")]
    pub percentage: Decimal,

    /// Minor units of `currency`.
    pub amount: Money,
    pub currency: String,
    pub engine_version: String,

    #[ts(as = "String")]
    pub created_at: DateTime<Utc>,
}

impl CommissionRecord {
    /// Derives the record id from `(tenant, transaction, beneficiary, depth)`.
    ///
    /// The same entitlement always gets the same id, whichever attempt
    /// computed it.
    pub fn record_id(
        tenant_id: &str,
        transaction_id: &str,
        beneficiary_partner_id: &str,
        levels_from_source: u32,
    ) -> String {
        let name = format!(
            "{}\u{1f}{}\u{1f}{}\u{1f}{}",
            tenant_id, transaction_id, beneficiary_partner_id, levels_from_source
        );
        Uuid::new_v5(&COMMISSION_RECORD_NAMESPACE, name.as_bytes()).to_string()
    }
}

// =============================================================================
// Settlement Outcome
// =============================================================================

/// The settled state of one transaction, as cached under its idempotency key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct SettlementSummary {
    pub tenant_id: String,
    pub transaction_id: String,

    /// Ledger rows that exist for this transaction after the commit.
    pub total_commissions_calculated: usize,

    /// Rows the computing invocation actually inserted.
    pub inserted_count: usize,

    pub commission_records: Vec<CommissionRecord>,
    pub truncated_upline: bool,

    #[ts(as = "String")]
    pub settled_at: DateTime<Utc>,
}

/// Error classification surfaced to callers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// Bad input or rate data. Do not retry.
    Validation,
    /// Another invocation holds the settlement lock. Retry.
    Contention,
    /// Store or cache unavailable. Retry.
    Transient,
    /// Security violation. Do not retry; investigate.
    CrossTenantViolation,
    /// Ledger write failed and was rolled back. Retry.
    Persistence,
}

impl ErrorKind {
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            ErrorKind::Contention | ErrorKind::Transient | ErrorKind::Persistence
        )
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ErrorKind::Validation => write!(f, "validation"),
            ErrorKind::Contention => write!(f, "contention"),
            ErrorKind::Transient => write!(f, "transient"),
            ErrorKind::CrossTenantViolation => write!(f, "cross_tenant_violation"),
            ErrorKind::Persistence => write!(f, "persistence"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct SettlementErrorInfo {
    pub kind: ErrorKind,
    pub message: String,
    pub retryable: bool,
}

/// Envelope returned by `process_commission_settlement`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct SettlementResult {
    pub success: bool,
    pub total_commissions_calculated: usize,
    pub inserted_count: usize,
    pub commission_records: Vec<CommissionRecord>,
    pub truncated_upline: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<SettlementErrorInfo>,
}

impl SettlementResult {
    pub fn settled(summary: SettlementSummary) -> Self {
        SettlementResult {
            success: true,
            total_commissions_calculated: summary.total_commissions_calculated,
            inserted_count: summary.inserted_count,
            commission_records: summary.commission_records,
            truncated_upline: summary.truncated_upline,
            error: None,
        }
    }

    pub fn failed(kind: ErrorKind, message: impl Into<String>) -> Self {
        SettlementResult {
            success: false,
            total_commissions_calculated: 0,
            inserted_count: 0,
            commission_records: Vec::new(),
            truncated_upline: false,
            error: Some(SettlementErrorInfo {
                kind,
                message: message.into(),
                retryable: kind.is_retryable(),
            }),
        }
    }
}

// =============================================================================
// Unit Tests
// =============================================================================
