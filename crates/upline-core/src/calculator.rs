//! # Commission Calculator
//!
//! Turns one transaction and its resolved upline into candidate commission
//! records. Pure: no lookups happen here, the caller hands in everything.
//!
//! ## Calculation Flow
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                    calculate_commissions                                │
//! │                                                                         │
//! │  Transaction ──► validate ──► amount in minor units (once)              │
//! │                                     │                                   │
//! │  Upline [d1, d2, ... dn] ───────────┤ cut at max_depth                  │
//! │                                     ▼                                   │
//! │        ┌───────────────── for each entry ─────────────────┐             │
//! │        │ tier unknown?      → stop, truncated             │             │
//! │        │ resolve_rate       → Ineligible: skip            │             │
//! │        │ round_half_up(amount × rate), clamp to remainder │             │
//! │        │ zero?              → skip                        │             │
//! │        │ candidate record (tier name snapshotted)         │             │
//! │        └──────────────────────────────────────────────────┘             │
//! │                                     │                                   │
//! │                                     ▼                                   │
//! │                  CommissionPlan { records, truncated_upline }           │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Conservation
//! Rounding every row half-up can push the sum one minor unit per row past
//! the amount. The remaining budget is tracked and each commission is
//! clamped to it, so the total never exceeds the transaction amount.

use std::collections::HashMap;

use chrono::{DateTime, Utc};

use crate::error::CoreResult;
use crate::money::{Currency, Money};
use crate::rates::{resolve_rate, RateDecision};
use crate::types::{CommissionRecord, PartnerTier, Transaction, Upline};
use crate::validation::validate_transaction;
use crate::{ENGINE_VERSION, GLOBAL_MAX_DEPTH};

// =============================================================================
// Settings & Plan
// =============================================================================

/// Engine knobs the calculator needs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CalculatorSettings {
    /// Ceiling for upline traversal. Tiers can only be more restrictive.
    pub max_depth: u32,
    /// Stamped into every record.
    pub engine_version: String,
}

impl Default for CalculatorSettings {
    fn default() -> Self {
        CalculatorSettings {
            max_depth: GLOBAL_MAX_DEPTH,
            engine_version: ENGINE_VERSION.to_string(),
        }
    }
}

/// Candidate records for one transaction, nearest beneficiary first.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommissionPlan {
    pub records: Vec<CommissionRecord>,

    /// The upline ended early: broken chain or unresolvable tier.
    pub truncated_upline: bool,

    /// Transaction amount in minor units.
    pub amount: Money,
    pub currency: Currency,

    /// Entries skipped because they lay beyond their tier's depth.
    pub ineligible: usize,
}

impl CommissionPlan {
    /// Sum of all candidate commissions.
    pub fn total(&self) -> Money {
        self.records
            .iter()
            .fold(Money::zero(), |acc, record| acc + record.amount)
    }
}

// =============================================================================
// Calculation
// =============================================================================

/// Computes candidate commission records for a transaction.
///
/// `tiers` maps tier id to tier; it should contain the tier of every upline
/// entry. `now` becomes `created_at` of each record.
///
/// ## Errors
/// - `CoreError::Validation` for a malformed transaction
/// - `CoreError::RateOutOfRange` / `RateTooPrecise` for bad tier data on an
///   eligible entry; the whole transaction is rejected
pub fn calculate_commissions(
    tx: &Transaction,
    upline: &Upline,
    tiers: &HashMap<String, PartnerTier>,
    settings: &CalculatorSettings,
    now: DateTime<Utc>,
) -> CoreResult<CommissionPlan> {
    let validated = validate_transaction(tx)?;
    let amount = validated.amount;

    let mut records = Vec::new();
    let mut truncated = upline.is_truncated();
    let mut ineligible = 0;
    let mut remaining = amount;

    for entry in upline.entries.iter() {
        if entry.depth > settings.max_depth {
            break;
        }

        let Some(tier) = tiers.get(&entry.tier_id) else {
            truncated = true;
            break;
        };

        let rate = match resolve_rate(tier, entry.depth)? {
            RateDecision::Eligible(rate) => rate,
            RateDecision::Ineligible => {
                ineligible += 1;
                continue;
            }
        };

        let mut commission = amount.apply_rate(rate);
        if commission > remaining {
            commission = remaining;
        }
        if commission.is_zero() {
            continue;
        }
        remaining -= commission;

        records.push(CommissionRecord {
            id: CommissionRecord::record_id(
                &tx.tenant_id,
                &tx.transaction_id,
                &entry.partner_id,
                entry.depth,
            ),
            tenant_id: tx.tenant_id.clone(),
            transaction_id: tx.transaction_id.clone(),
            beneficiary_partner_id: entry.partner_id.clone(),
            beneficiary_tier_id: tier.id.clone(),
            beneficiary_tier_name: tier.name.clone(),
            source_partner_id: tx.source_partner_id.clone(),
            levels_from_source: entry.depth,
            percentage: rate.value(),
            amount: commission,
            currency: validated.currency.code().to_string(),
            engine_version: settings.engine_version.clone(),
            created_at: now,
        });
    }

    Ok(CommissionPlan {
        records,
        truncated_upline: truncated,
        amount,
        currency: validated.currency,
        ineligible,
    })
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};
    use rust_decimal::Decimal;

    use crate::error::CoreError;
    use crate::types::{TransactionType, UplineEntry};

    fn tx(amount: Decimal) -> Transaction {
        Transaction {
            tenant_id: "t1".to_string(),
            transaction_id: "tx-1".to_string(),
            source_partner_id: "p0".to_string(),
            amount,
            currency: "USD".to_string(),
            transaction_type: TransactionType::Sale,
            occurred_at: Utc::now(),
            metadata: None,
        }
    }

    fn tier(id: &str, rate: Decimal, max_depth: u32) -> PartnerTier {
        PartnerTier {
            id: id.to_string(),
            tenant_id: "t1".to_string(),
            level_code: id.to_uppercase(),
            name: format!("Tier {}", id),
            sort_order: 1,
            default_commission_rate: rate,
            max_referral_depth: max_depth,
        }
    }

    fn entry(partner: &str, tier: &str, depth: u32) -> UplineEntry {
        UplineEntry {
            partner_id: partner.to_string(),
            tier_id: tier.to_string(),
            depth,
        }
    }

    fn tier_map(tiers: Vec<PartnerTier>) -> HashMap<String, PartnerTier> {
        tiers.into_iter().map(|t| (t.id.clone(), t)).collect()
    }

    #[test]
    fn test_two_level_split() {
        let upline = Upline::complete(vec![entry("p1", "gold", 1), entry("p2", "silver", 2)]);
        let tiers = tier_map(vec![
            tier("gold", Decimal::new(10, 2), 5),
            tier("silver", Decimal::new(5, 2), 5),
        ]);

        let plan = calculate_commissions(
            &tx(Decimal::new(100000, 2)),
            &upline,
            &tiers,
            &CalculatorSettings::default(),
            Utc::now(),
        )
        .unwrap();

        assert_eq!(plan.records.len(), 2);
        assert_eq!(plan.records[0].beneficiary_partner_id, "p1");
        assert_eq!(plan.records[0].amount.minor(), 10000);
        assert_eq!(plan.records[0].levels_from_source, 1);
        assert_eq!(plan.records[1].beneficiary_partner_id, "p2");
        assert_eq!(plan.records[1].amount.minor(), 5000);
        assert_eq!(plan.records[1].beneficiary_tier_name, "Tier silver");
        assert!(!plan.truncated_upline);
        assert_eq!(plan.total().minor(), 15000);
    }

    #[test]
    fn test_zero_depth_tier_earns_nothing() {
        let upline = Upline::complete(vec![entry("p1", "entry", 1), entry("p2", "gold", 2)]);
        let tiers = tier_map(vec![
            tier("entry", Decimal::new(10, 2), 0),
            tier("gold", Decimal::new(5, 2), 5),
        ]);

        let plan = calculate_commissions(
            &tx(Decimal::new(100000, 2)),
            &upline,
            &tiers,
            &CalculatorSettings::default(),
            Utc::now(),
        )
        .unwrap();

        assert_eq!(plan.records.len(), 1);
        assert_eq!(plan.records[0].beneficiary_partner_id, "p2");
        assert_eq!(plan.ineligible, 1);
    }

    #[test]
    fn test_unknown_tier_truncates() {
        let upline = Upline::complete(vec![
            entry("p1", "gold", 1),
            entry("p2", "ghost", 2),
            entry("p3", "gold", 3),
        ]);
        let tiers = tier_map(vec![tier("gold", Decimal::new(10, 2), 5)]);

        let plan = calculate_commissions(
            &tx(Decimal::new(100000, 2)),
            &upline,
            &tiers,
            &CalculatorSettings::default(),
            Utc::now(),
        )
        .unwrap();

        assert_eq!(plan.records.len(), 1);
        assert!(plan.truncated_upline);
    }

    #[test]
    fn test_truncated_upline_flag_propagates() {
        let upline = Upline::truncated(vec![entry("p1", "gold", 1)]);
        let tiers = tier_map(vec![tier("gold", Decimal::new(10, 2), 5)]);

        let plan = calculate_commissions(
            &tx(Decimal::new(100000, 2)),
            &upline,
            &tiers,
            &CalculatorSettings::default(),
            Utc::now(),
        )
        .unwrap();

        assert_eq!(plan.records.len(), 1);
        assert!(plan.truncated_upline);
    }

    #[test]
    fn test_empty_upline_yields_no_records() {
        let plan = calculate_commissions(
            &tx(Decimal::new(100000, 2)),
            &Upline::complete(Vec::new()),
            &HashMap::new(),
            &CalculatorSettings::default(),
            Utc::now(),
        )
        .unwrap();

        assert!(plan.records.is_empty());
        assert!(!plan.truncated_upline);
    }

    #[test]
    fn test_max_depth_cuts_upline() {
        let upline = Upline::complete((1..=4).map(|d| entry(&format!("p{}", d), "gold", d)).collect());
        let tiers = tier_map(vec![tier("gold", Decimal::new(1, 2), 10)]);
        let settings = CalculatorSettings {
            max_depth: 2,
            ..CalculatorSettings::default()
        };

        let plan = calculate_commissions(
            &tx(Decimal::new(100000, 2)),
            &upline,
            &tiers,
            &settings,
            Utc::now(),
        )
        .unwrap();

        assert_eq!(plan.records.len(), 2);
        assert!(plan.records.iter().all(|r| r.levels_from_source <= 2));
    }

    #[test]
    fn test_zero_commission_skipped() {
        // 0.01 USD at 10% rounds to 0 cents
        let upline = Upline::complete(vec![entry("p1", "gold", 1), entry("p2", "free", 2)]);
        let tiers = tier_map(vec![
            tier("gold", Decimal::new(10, 2), 5),
            tier("free", Decimal::ZERO, 5),
        ]);

        let plan = calculate_commissions(
            &tx(Decimal::new(1, 2)),
            &upline,
            &tiers,
            &CalculatorSettings::default(),
            Utc::now(),
        )
        .unwrap();

        assert!(plan.records.is_empty());
    }

    #[test]
    fn test_total_clamped_to_amount() {
        let upline = Upline::complete(vec![entry("p1", "big", 1), entry("p2", "big", 2)]);
        let tiers = tier_map(vec![tier("big", Decimal::new(6, 1), 5)]);

        let plan = calculate_commissions(
            &tx(Decimal::new(100, 2)),
            &upline,
            &tiers,
            &CalculatorSettings::default(),
            Utc::now(),
        )
        .unwrap();

        assert_eq!(plan.records[0].amount.minor(), 60);
        assert_eq!(plan.records[1].amount.minor(), 40);
        assert_eq!(plan.total(), plan.amount);
    }

    #[test]
    fn test_out_of_range_rate_rejects_transaction() {
        let upline = Upline::complete(vec![entry("p1", "bad", 1)]);
        let tiers = tier_map(vec![tier("bad", Decimal::new(2, 0), 5)]);

        let result = calculate_commissions(
            &tx(Decimal::new(100000, 2)),
            &upline,
            &tiers,
            &CalculatorSettings::default(),
            Utc::now(),
        );

        assert!(matches!(result, Err(CoreError::RateOutOfRange { .. })));
    }

    #[test]
    fn test_invalid_transaction_rejected() {
        let result = calculate_commissions(
            &tx(Decimal::ZERO),
            &Upline::complete(Vec::new()),
            &HashMap::new(),
            &CalculatorSettings::default(),
            Utc::now(),
        );

        assert!(matches!(result, Err(CoreError::Validation(_))));
    }

    #[test]
    fn test_record_ids_stable_across_runs() {
        let upline = Upline::complete(vec![entry("p1", "gold", 1)]);
        let tiers = tier_map(vec![tier("gold", Decimal::new(10, 2), 5)]);
        let t = tx(Decimal::new(100000, 2));
        let settings = CalculatorSettings::default();

        let first = calculate_commissions(&t, &upline, &tiers, &settings, Utc::now()).unwrap();
        let second = calculate_commissions(&t, &upline, &tiers, &settings, Utc::now()).unwrap();

        assert_eq!(first.records[0].id, second.records[0].id);
    }

    #[test]
    fn test_randomized_conservation_and_depth() {
        let mut rng = StdRng::seed_from_u64(0x5eed);

        for _ in 0..500 {
            let tier_count = rng.gen_range(1..=4);
            let tiers: Vec<PartnerTier> = (0..tier_count)
                .map(|i| {
                    tier(
                        &format!("tier{}", i),
                        Decimal::new(rng.gen_range(0..=250), 3),
                        rng.gen_range(0..=10),
                    )
                })
                .collect();

            let depth = rng.gen_range(0..=12);
            let upline = Upline::complete(
                (1..=depth)
                    .map(|d| {
                        let t = rng.gen_range(0..tier_count);
                        entry(&format!("p{}", d), &format!("tier{}", t), d)
                    })
                    .collect(),
            );
            let tiers = tier_map(tiers);

            let amount = Decimal::new(rng.gen_range(1..=10_000_000), 2);
            let plan = calculate_commissions(
                &tx(amount),
                &upline,
                &tiers,
                &CalculatorSettings::default(),
                Utc::now(),
            )
            .unwrap();

            assert!(plan.total() <= plan.amount);
            for record in &plan.records {
                let tier = &tiers[&record.beneficiary_tier_id];
                assert!(record.levels_from_source <= tier.max_referral_depth);
                assert!(record.levels_from_source <= GLOBAL_MAX_DEPTH);
                assert!(record.amount.is_positive());
            }
        }
    }
}
