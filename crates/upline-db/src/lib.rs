//! # upline-db: Database Layer for Upline
//!
//! This crate provides database access for the commission engine.
//! It uses SQLite for storage with sqlx for async operations.
//!
//! ## Architecture Position
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                        Upline Data Flow                                 │
//! │                                                                         │
//! │  SettlementCoordinator (upline-settlement)                             │
//! │       │  via PartnerDirectory / LedgerStore adapters                   │
//! │       ▼                                                                 │
//! │  ┌─────────────────────────────────────────────────────────────────┐   │
//! │  │                     upline-db (THIS CRATE)                      │   │
//! │  │                                                                 │   │
//! │  │   ┌───────────────┐    ┌────────────────┐   ┌──────────────┐   │   │
//! │  │   │   Database    │    │  Repositories  │   │  Migrations  │   │   │
//! │  │   │   (pool.rs)   │    │                │   │  (embedded)  │   │   │
//! │  │   │               │    │ PartnerRepo    │   │ 001_partner  │   │   │
//! │  │   │ SqlitePool    │◄───│ LedgerRepo     │   │ 002_ledger   │   │   │
//! │  │   │               │    │ SequenceRepo   │   │ 003_sequence │   │   │
//! │  │   └───────────────┘    └────────────────┘   └──────────────┘   │   │
//! │  │                                                                 │   │
//! │  └─────────────────────────────────────────────────────────────────┘   │
//! │       │                                                                 │
//! │       ▼                                                                 │
//! │  ┌─────────────────────────────────────────────────────────────────┐   │
//! │  │                     SQLite Database                             │   │
//! │  │   closure table • append-only ledger • tenant-guard trigger     │   │
//! │  └─────────────────────────────────────────────────────────────────┘   │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Module Organization
//!
//! - [`pool`] - Connection pool creation and configuration
//! - [`migrations`] - Embedded database migrations
//! - [`error`] - Database error types
//! - [`repository`] - Repository implementations (partner, ledger, sequence)
//!
//! ## Usage
//!
//! ```rust,ignore
//! use upline_db::{Database, DbConfig};
//!
//! let db = Database::new(DbConfig::new("path/to/upline.db")).await?;
//!
//! let upline = db.partners().get_upline("tenant-1", "partner-7", 10).await?;
//! let inserted = db.ledger().insert_if_absent(&records).await?;
//! ```

// =============================================================================
// Module Declarations
// =============================================================================

pub mod error;
pub mod migrations;
pub mod pool;
pub mod repository;

// =============================================================================
// Re-exports
// =============================================================================

pub use error::{DbError, DbResult};
pub use pool::{Database, DbConfig};

// Repository re-exports for convenience
pub use repository::ledger::LedgerRepository;
pub use repository::partner::{NewTier, PartnerRepository};
pub use repository::sequence::SequenceRepository;
