//! # upline-core: Pure Commission Logic for Upline
//!
//! This crate is the **heart** of the partner commission settlement engine.
//! It contains all business logic as pure functions with zero I/O
//! dependencies.
//!
//! ## Architecture Position
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                        Upline Architecture                              │
//! │                                                                         │
//! │  ┌─────────────────────────────────────────────────────────────────┐   │
//! │  │              Order-completion workflow (caller)                 │   │
//! │  └─────────────────────────────┬───────────────────────────────────┘   │
//! │                                │ Transaction                            │
//! │  ┌─────────────────────────────▼───────────────────────────────────┐   │
//! │  │          upline-settlement (coordinator, locks, cache)          │   │
//! │  └─────────────────────────────┬───────────────────────────────────┘   │
//! │                                │                                        │
//! │  ┌─────────────────────────────▼───────────────────────────────────┐   │
//! │  │               ★ upline-core (THIS CRATE) ★                      │   │
//! │  │                                                                 │   │
//! │  │   ┌─────────┐  ┌─────────┐  ┌────────────┐  ┌──────────────┐   │   │
//! │  │   │  money  │  │  rates  │  │ calculator │  │    guard     │   │   │
//! │  │   │ Money   │  │ Resolve │  │ Candidates │  │ Tenant       │   │   │
//! │  │   │ Currency│  │ eligib. │  │ per upline │  │ isolation    │   │   │
//! │  │   └─────────┘  └─────────┘  └────────────┘  └──────────────┘   │   │
//! │  │                                                                 │   │
//! │  │   NO I/O • NO DATABASE • NO NETWORK • PURE FUNCTIONS           │   │
//! │  └─────────────────────────────────────────────────────────────────┘   │
//! │                                │                                        │
//! │  ┌─────────────────────────────▼───────────────────────────────────┐   │
//! │  │                upline-db (Database Layer)                       │   │
//! │  │        partners, closure table, commission ledger               │   │
//! │  └─────────────────────────────────────────────────────────────────┘   │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Modules
//!
//! - [`money`] - Minor-unit money, currencies, the canonical rounding rule
//! - [`types`] - Domain types (Partner, PartnerTier, Transaction, CommissionRecord)
//! - [`rates`] - Commission rate resolution per tier and depth
//! - [`calculator`] - Candidate commission records for one transaction
//! - [`guard`] - Tenant isolation checks before persistence
//! - [`validation`] - Transaction input validation
//! - [`order_number`] - Order number formatting for the counter service
//! - [`error`] - Domain error types
//!
//! ## Example Usage
//!
//! ```rust
//! use rust_decimal::Decimal;
//! use upline_core::money::{to_minor_units, Currency};
//! use upline_core::CommissionRate;
//!
//! let usd = Currency::from_code("USD").unwrap();
//! let amount = to_minor_units(Decimal::new(100000, 2), &usd).unwrap(); // 1000.00
//!
//! let rate = CommissionRate::new(Decimal::new(10, 2)).unwrap(); // 10%
//! assert_eq!(amount.apply_rate(rate).minor(), 10000); // 100.00
//! ```

// =============================================================================
// Module Declarations
// =============================================================================

pub mod calculator;
pub mod error;
pub mod guard;
pub mod money;
pub mod order_number;
pub mod rates;
pub mod types;
pub mod validation;

// =============================================================================
// Re-exports for Convenience
// =============================================================================

pub use calculator::{calculate_commissions, CalculatorSettings, CommissionPlan};
pub use error::{CoreError, CoreResult, ReferenceKind, TenantViolation, ValidationError};
pub use guard::{check_tenant_isolation, find_violations, Ownership};
pub use money::{CommissionRate, Currency, Money};
pub use rates::{resolve_rate, RateDecision};
pub use validation::{validate_transaction, ValidatedTransaction};
pub use types::*;

// =============================================================================
// Crate-Level Constants
// =============================================================================

/// Default ceiling for upline traversal.
///
/// Tiers can only be more restrictive than this value, never less.
/// Deployments override it through `[engine] max_upline_depth`.
pub const GLOBAL_MAX_DEPTH: u32 = 10;

/// Version stamp written into every commission record.
pub const ENGINE_VERSION: &str = concat!("upline-", env!("CARGO_PKG_VERSION"));

/// Namespace for deterministic commission record ids (UUID v5).
pub const COMMISSION_RECORD_NAMESPACE: uuid::Uuid =
    uuid::Uuid::from_u128(0x6c1f_3a52_8d4e_4b7a_9e21_5f0c_7d3b_a914);
