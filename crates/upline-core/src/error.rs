//! # Error Types
//!
//! Domain-specific error types for upline-core.
//!
//! ## Error Hierarchy
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                         Error Types                                     │
//! │                                                                         │
//! │  upline-core errors (this file)                                        │
//! │  ├── CoreError        - Rate and tenant rule violations                │
//! │  ├── ValidationError  - Input validation failures                      │
//! │  └── TenantViolation  - Details of a cross-tenant reference            │
//! │                                                                         │
//! │  upline-db errors (separate crate)                                     │
//! │  └── DbError          - Database operation failures                    │
//! │                                                                         │
//! │  upline-settlement errors                                              │
//! │  └── SettlementError  - What the caller sees (kind + retryable)        │
//! │                                                                         │
//! │  Flow: ValidationError → CoreError → SettlementError → caller          │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use std::fmt;

use thiserror::Error;

// =============================================================================
// Core Error
// =============================================================================

/// Core business logic errors.
#[derive(Debug, Error)]
pub enum CoreError {
    /// Validation error (wraps ValidationError).
    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),

    /// A tier carries a commission rate outside `[0, 1]`.
    ///
    /// ## When This Occurs
    /// - Tier data was edited outside the onboarding tooling
    /// - A caller-side override produced a negative or >100% rate
    ///
    /// Rejects the whole transaction; retrying cannot fix it.
    #[error("Commission rate {rate} of tier {tier_id} is outside [0, 1]")]
    RateOutOfRange { tier_id: String, rate: String },

    /// A tier rate carries more decimal places than the engine multiplies
    /// exactly.
    #[error("Commission rate {rate} of tier {tier_id} has more than {max_scale} decimal places")]
    RateTooPrecise {
        tier_id: String,
        rate: String,
        max_scale: u32,
    },

    /// A candidate record references an entity owned by another tenant.
    #[error("Cross-tenant reference: {0}")]
    CrossTenant(TenantViolation),
}

// =============================================================================
// Validation Error
// =============================================================================

/// Input validation errors.
///
/// These errors occur when a transaction handed to the engine doesn't meet
/// requirements. Raised before any hierarchy lookup.
#[derive(Debug, Error)]
pub enum ValidationError {
    /// A required field is missing or empty.
    #[error("{field} is required")]
    Required { field: String },

    /// Field value is too long.
    #[error("{field} must be at most {max} characters")]
    TooLong { field: String, max: usize },

    /// Value must be positive.
    #[error("{field} must be positive")]
    MustBePositive { field: String },

    /// Invalid format (e.g., bad currency code).
    #[error("{field} has invalid format: {reason}")]
    InvalidFormat { field: String, reason: String },

    /// Value does not fit in the minor-unit representation.
    #[error("{field} is too large to settle")]
    Overflow { field: String },

    /// A referenced entity does not exist.
    #[error("{field} '{id}' does not exist")]
    UnknownReference { field: String, id: String },
}

// =============================================================================
// Tenant Violation
// =============================================================================

/// Which reference of a commission record broke tenant isolation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReferenceKind {
    SourcePartner,
    BeneficiaryPartner,
    BeneficiaryTier,
}

impl fmt::Display for ReferenceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ReferenceKind::SourcePartner => write!(f, "source_partner"),
            ReferenceKind::BeneficiaryPartner => write!(f, "beneficiary_partner"),
            ReferenceKind::BeneficiaryTier => write!(f, "beneficiary_tier"),
        }
    }
}

/// Details of a cross-tenant reference found by the guard.
///
/// `actual_tenant` is `None` when the referenced entity could not be
/// resolved at all; ownership that cannot be proven counts as a violation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TenantViolation {
    pub reference: ReferenceKind,
    pub entity_id: String,
    pub expected_tenant: String,
    pub actual_tenant: Option<String>,
}

impl fmt::Display for TenantViolation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.actual_tenant {
            Some(actual) => write!(
                f,
                "{} {} belongs to tenant {}, expected {}",
                self.reference, self.entity_id, actual, self.expected_tenant
            ),
            None => write!(
                f,
                "{} {} has no resolvable owner, expected {}",
                self.reference, self.entity_id, self.expected_tenant
            ),
        }
    }
}

// =============================================================================
// Result Type Alias
// =============================================================================

/// Convenience type alias for Results with CoreError.
pub type CoreResult<T> = Result<T, CoreError>;

// =============================================================================
// Unit Tests
// =============================================================================
