//! # Commission Rate Resolution
//!
//! Decides whether a beneficiary is still eligible at a given distance from
//! the transacting partner, and at which rate.
//!
//! ## Resolution Order
//! ```text
//! levels_from_source > tier.max_referral_depth ──► Ineligible (skip, no record)
//!                 │
//!                 ▼
//! tier.default_commission_rate ──► [0, 1]? ──no──► CoreError::RateOutOfRange
//!                 │
//!                 ▼ yes
//!          Eligible(rate)
//! ```
//!
//! Per-transaction overrides are not applied here; callers that negotiate
//! special rates adjust the tier data they hand in.

use crate::error::{CoreError, CoreResult};
use crate::money::{CommissionRate, RateError, MAX_RATE_SCALE};
use crate::types::PartnerTier;

/// Outcome of resolving one upline entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RateDecision {
    /// The beneficiary earns `rate` of the transaction amount.
    Eligible(CommissionRate),
    /// The entry lies beyond the tier's referral depth.
    Ineligible,
}

impl RateDecision {
    pub fn is_eligible(&self) -> bool {
        matches!(self, RateDecision::Eligible(_))
    }
}

/// Resolves the commission rate for a beneficiary of `tier` sitting
/// `levels_from_source` levels above the transacting partner.
///
/// ## Errors
/// A rate outside `[0, 1]` rejects the whole transaction. The depth check
/// runs first, so an out-of-range rate on an ineligible entry is not
/// reported.
pub fn resolve_rate(tier: &PartnerTier, levels_from_source: u32) -> CoreResult<RateDecision> {
    if levels_from_source > tier.max_referral_depth {
        return Ok(RateDecision::Ineligible);
    }

    match CommissionRate::new(tier.default_commission_rate) {
        Ok(rate) => Ok(RateDecision::Eligible(rate)),
        Err(RateError::OutOfRange) => Err(CoreError::RateOutOfRange {
            tier_id: tier.id.clone(),
            rate: tier.default_commission_rate.to_string(),
        }),
        Err(RateError::TooPrecise) => Err(CoreError::RateTooPrecise {
            tier_id: tier.id.clone(),
            rate: tier.default_commission_rate.to_string(),
            max_scale: MAX_RATE_SCALE,
        }),
    }
}
