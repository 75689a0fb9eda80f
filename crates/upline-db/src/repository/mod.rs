//! # Repository Module
//!
//! Database repository implementations for Upline.
//!
//! ## Repository Pattern
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  SettlementCoordinator                                                  │
//! │       │                                                                 │
//! │       │  PartnerDirectory / LedgerStore ports (upline-settlement)      │
//! │       ▼                                                                 │
//! │  PartnerRepository                  LedgerRepository                    │
//! │  ├── get_partner(tenant, id)        ├── insert_if_absent(records)       │
//! │  ├── get_upline(tenant, id, depth)  ├── count_for_transaction(..)       │
//! │  ├── get_tiers(ids)                 └── records_for_transaction(..)     │
//! │  ├── partner_owners(ids)                                                │
//! │  └── onboarding: tenants, tiers,    SequenceRepository                  │
//! │      partners, sponsors             └── next_value(tenant, scope, ..)   │
//! │       │                                                                 │
//! │       │  SQL Query                                                      │
//! │       ▼                                                                 │
//! │  SQLite Database                                                       │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Available Repositories
//!
//! - [`PartnerRepository`](partner::PartnerRepository) - Tenants, tiers, partners, closure table
//! - [`LedgerRepository`](ledger::LedgerRepository) - Append-only commission ledger
//! - [`SequenceRepository`](sequence::SequenceRepository) - Atomic per-tenant counters

pub mod ledger;
pub mod partner;
pub mod sequence;

/// `?1, ?2, ... ?n` for an `IN (...)` list.
pub(crate) fn placeholders(count: usize) -> String {
    (1..=count)
        .map(|i| format!("?{}", i))
        .collect::<Vec<_>>()
        .join(", ")
}
