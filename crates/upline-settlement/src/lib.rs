//! # upline-settlement: Idempotent Commission Settlement
//!
//! Turns a completed transaction into commission ledger rows for every
//! eligible partner in the source partner's upline, exactly once.
//!
//! ## Architecture Overview
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                     SettlementCoordinator                               │
//! │                                                                         │
//! │  validate ─► cache ─► lock ─► calculate ─► guard ─► persist ─► cache    │
//! │                 │        │         │          │         │               │
//! │                 ▼        ▼         ▼          ▼         ▼               │
//! │  ┌────────────────┐ ┌─────────┐ ┌─────────────────┐ ┌──────────────┐   │
//! │  │IdempotencyCache│ │  Lock   │ │  upline-core    │ │ LedgerStore  │   │
//! │  │ memory / Redis │ │ Service │ │  (pure)         │ │ SQLite       │   │
//! │  └────────────────┘ └─────────┘ └─────────────────┘ └──────────────┘   │
//! │                                        ▲                                │
//! │                              ┌─────────┴────────┐                       │
//! │                              │ PartnerDirectory │                       │
//! │                              │ SQLite closure   │                       │
//! │                              └──────────────────┘                       │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Module Organization
//! - [`coordinator`] - `SettlementCoordinator` and its state machine
//! - [`ports`] - collaborator traits
//! - [`adapters`] - SQLite directory and ledger
//! - [`lock`] - in-process lock, bounded wait with backoff
//! - [`cache`] - in-process idempotency cache
//! - [`redis_store`] - Redis lock and cache for multi-process deployments
//! - [`config`] - `settlement.toml` + environment overrides
//! - [`error`] - settlement error types
//!
//! ## Usage
//!
//! ```rust,ignore
//! use upline_settlement::{CoordinatorSettings, SettlementConfig, SettlementCoordinator};
//! use upline_db::Database;
//!
//! let config = SettlementConfig::load_or_default(None);
//! let db = Database::new(config.db_config()).await?;
//! let coordinator = SettlementCoordinator::in_process(&db, CoordinatorSettings::from(&config));
//!
//! let result = coordinator.process_commission_settlement(&transaction).await;
//! if let Some(err) = &result.error {
//!     if err.retryable { /* resubmit with the same transaction_id */ }
//! }
//! ```

pub mod adapters;
pub mod cache;
pub mod config;
pub mod coordinator;
pub mod error;
pub mod lock;
pub mod ports;
pub mod redis_store;

// =============================================================================
// Re-exports
// =============================================================================

pub use adapters::{SqliteDirectory, SqliteLedger};
pub use cache::InMemoryIdempotencyCache;
pub use config::SettlementConfig;
pub use coordinator::{CoordinatorSettings, SettlementCoordinator, SettlementStage, SECURITY_TARGET};
pub use error::{SettleResult, SettlementError};
pub use lock::{with_lock, InMemoryLockService, LockWait};
pub use ports::{IdempotencyCache, LedgerStore, LockService, LockToken, PartnerDirectory};
pub use redis_store::RedisStore;
