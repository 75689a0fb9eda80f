//! # Settlement Error Types
//!
//! Error types for settlement operations.
//!
//! ## Error Hierarchy
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                     Settlement Error Categories                         │
//! │                                                                         │
//! │  ┌─────────────────┐  ┌─────────────────┐  ┌─────────────────────────┐ │
//! │  │  Configuration  │  │   Validation    │  │     Security            │ │
//! │  │                 │  │                 │  │                         │ │
//! │  │  InvalidConfig  │  │  Invalid        │  │  CrossTenant            │ │
//! │  │  ConfigLoad     │  │  Transaction    │  │  (never retried)        │ │
//! │  │  ConfigSave     │  │  UnknownSource  │  │                         │ │
//! │  │                 │  │  InvalidRate    │  │                         │ │
//! │  └─────────────────┘  └─────────────────┘  └─────────────────────────┘ │
//! │                                                                         │
//! │  ┌─────────────────┐  ┌─────────────────┐  ┌─────────────────────────┐ │
//! │  │   Contention    │  │   Transient     │  │     Persistence         │ │
//! │  │                 │  │                 │  │                         │ │
//! │  │  LockBusy       │  │  Store / Coord. │  │  PersistFailed          │ │
//! │  │                 │  │  Unavailable    │  │  (batch rolled back)    │ │
//! │  └─────────────────┘  └─────────────────┘  └─────────────────────────┘ │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Every variant maps onto one [`ErrorKind`], which is what callers see in
//! the [`upline_core::SettlementResult`] envelope.

use thiserror::Error;
use upline_core::{CoreError, ErrorKind, ValidationError};
use upline_db::DbError;

/// Result type alias for settlement operations.
pub type SettleResult<T> = Result<T, SettlementError>;

/// Settlement error type covering every way a settlement can fail.
#[derive(Debug, Error)]
pub enum SettlementError {
    // =========================================================================
    // Configuration Errors
    // =========================================================================
    /// Invalid settlement configuration.
    #[error("Invalid settlement configuration: {0}")]
    InvalidConfig(String),

    /// Failed to load config file.
    #[error("Failed to load config: {0}")]
    ConfigLoadFailed(String),

    /// Failed to save config file.
    #[error("Failed to save config: {0}")]
    ConfigSaveFailed(String),

    // =========================================================================
    // Validation Errors
    // =========================================================================
    /// The transaction is malformed.
    #[error("Invalid transaction: {0}")]
    InvalidTransaction(String),

    /// The source partner does not exist anywhere.
    #[error("Source partner {partner_id} not found in tenant {tenant_id}")]
    UnknownSourcePartner { tenant_id: String, partner_id: String },

    /// Tier data yields an unusable commission rate.
    #[error("Invalid commission rate: {0}")]
    InvalidRate(String),

    // =========================================================================
    // Security Errors
    // =========================================================================
    /// A reference crosses the tenant boundary.
    #[error("Cross-tenant violation: {0}")]
    CrossTenant(String),

    // =========================================================================
    // Contention Errors
    // =========================================================================
    /// Another invocation kept the settlement lock past the wait budget.
    #[error("Settlement lock {key} busy after {waited_ms} ms")]
    LockBusy { key: String, waited_ms: u64 },

    // =========================================================================
    // Transient Errors
    // =========================================================================
    /// Partner directory or ledger reads failed.
    #[error("Store unavailable: {0}")]
    StoreUnavailable(String),

    /// Lock or cache backend failed.
    #[error("Coordination backend unavailable: {0}")]
    CoordinationUnavailable(String),

    /// Cached payload could not be encoded or decoded.
    #[error("Serialization failed: {0}")]
    SerializationFailed(String),

    // =========================================================================
    // Persistence Errors
    // =========================================================================
    /// The ledger batch failed and was rolled back.
    #[error("Ledger write failed: {0}")]
    PersistFailed(String),
}

// =============================================================================
// Error Conversions
// =============================================================================

impl From<ValidationError> for SettlementError {
    fn from(err: ValidationError) -> Self {
        SettlementError::InvalidTransaction(err.to_string())
    }
}

impl From<CoreError> for SettlementError {
    fn from(err: CoreError) -> Self {
        match err {
            CoreError::Validation(e) => SettlementError::InvalidTransaction(e.to_string()),
            CoreError::CrossTenant(v) => SettlementError::CrossTenant(v.to_string()),
            other @ (CoreError::RateOutOfRange { .. } | CoreError::RateTooPrecise { .. }) => {
                SettlementError::InvalidRate(other.to_string())
            }
        }
    }
}

/// Store errors on the read path. The ledger adapter classifies write
/// failures itself (see [`SettlementError::from_ledger_write`]).
impl From<DbError> for SettlementError {
    fn from(err: DbError) -> Self {
        match err {
            DbError::CrossTenantReference { message } => SettlementError::CrossTenant(message),
            other => SettlementError::StoreUnavailable(other.to_string()),
        }
    }
}

impl From<redis::RedisError> for SettlementError {
    fn from(err: redis::RedisError) -> Self {
        SettlementError::CoordinationUnavailable(err.to_string())
    }
}

impl From<serde_json::Error> for SettlementError {
    fn from(err: serde_json::Error) -> Self {
        SettlementError::SerializationFailed(err.to_string())
    }
}

impl From<std::io::Error> for SettlementError {
    fn from(err: std::io::Error) -> Self {
        SettlementError::ConfigLoadFailed(err.to_string())
    }
}

impl From<toml::de::Error> for SettlementError {
    fn from(err: toml::de::Error) -> Self {
        SettlementError::ConfigLoadFailed(err.to_string())
    }
}

impl From<toml::ser::Error> for SettlementError {
    fn from(err: toml::ser::Error) -> Self {
        SettlementError::ConfigSaveFailed(err.to_string())
    }
}

// =============================================================================
// Error Categorization
// =============================================================================

impl SettlementError {
    /// Maps a failed ledger batch: trigger rejections stay security errors,
    /// everything else is a rolled-back write.
    pub fn from_ledger_write(err: DbError) -> Self {
        match err {
            DbError::CrossTenantReference { message } => SettlementError::CrossTenant(message),
            other => SettlementError::PersistFailed(other.to_string()),
        }
    }

    /// Caller-facing classification.
    pub fn kind(&self) -> ErrorKind {
        match self {
            SettlementError::InvalidConfig(_)
            | SettlementError::ConfigLoadFailed(_)
            | SettlementError::ConfigSaveFailed(_)
            | SettlementError::InvalidTransaction(_)
            | SettlementError::UnknownSourcePartner { .. }
            | SettlementError::InvalidRate(_) => ErrorKind::Validation,
            SettlementError::CrossTenant(_) => ErrorKind::CrossTenantViolation,
            SettlementError::LockBusy { .. } => ErrorKind::Contention,
            SettlementError::StoreUnavailable(_)
            | SettlementError::CoordinationUnavailable(_)
            | SettlementError::SerializationFailed(_) => ErrorKind::Transient,
            SettlementError::PersistFailed(_) => ErrorKind::Persistence,
        }
    }

    /// Returns true if the caller may retry with the same transaction id.
    pub fn is_retryable(&self) -> bool {
        self.kind().is_retryable()
    }

    /// Returns true if this error must be reported as a security event.
    pub fn is_security_violation(&self) -> bool {
        matches!(self, SettlementError::CrossTenant(_))
    }

    /// Returns true if this error indicates a configuration problem.
    pub fn is_config_error(&self) -> bool {
        matches!(
            self,
            SettlementError::InvalidConfig(_)
                | SettlementError::ConfigLoadFailed(_)
                | SettlementError::ConfigSaveFailed(_)
        )
    }
}
