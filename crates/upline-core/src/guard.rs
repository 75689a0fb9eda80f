//! # Tenant Isolation Guard
//!
//! Last check before the ledger: every entity a candidate record references
//! must belong to the transaction's tenant.
//!
//! ## What Is Checked
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  transaction.tenant_id = T                                              │
//! │                                                                         │
//! │  source partner              owner == T ?                               │
//! │  for each candidate record:                                             │
//! │    record.tenant_id          == T ?                                     │
//! │    beneficiary partner       owner == T ?                               │
//! │    source partner            owner == T ?                               │
//! │    beneficiary tier          owner == T ?                               │
//! │                                                                         │
//! │  any "no" or unknown owner ──► CoreError::CrossTenant (whole batch)     │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Ownership comes from ground-truth lookups (partner id → tenant id,
//! tier id → tenant id), never from the tenant-scoped queries that produced
//! the candidates. The ledger's insert trigger repeats the check in SQL.

use std::collections::{BTreeSet, HashMap};

use crate::error::{CoreError, CoreResult, ReferenceKind, TenantViolation};
use crate::types::CommissionRecord;

/// Resolved owners of the entities referenced by a batch.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Ownership {
    /// partner id → tenant id
    pub partners: HashMap<String, String>,
    /// tier id → tenant id
    pub tiers: HashMap<String, String>,
}

impl Ownership {
    /// Partner and tier ids the guard will need owners for, deduplicated.
    pub fn referenced_ids(
        source_partner_id: &str,
        records: &[CommissionRecord],
    ) -> (Vec<String>, Vec<String>) {
        let mut partners = BTreeSet::new();
        let mut tiers = BTreeSet::new();

        partners.insert(source_partner_id.to_string());
        for record in records {
            partners.insert(record.beneficiary_partner_id.clone());
            partners.insert(record.source_partner_id.clone());
            tiers.insert(record.beneficiary_tier_id.clone());
        }

        (partners.into_iter().collect(), tiers.into_iter().collect())
    }

    fn check(
        &self,
        reference: ReferenceKind,
        entity_id: &str,
        expected_tenant: &str,
    ) -> Option<TenantViolation> {
        let owners = match reference {
            ReferenceKind::BeneficiaryTier => &self.tiers,
            ReferenceKind::SourcePartner | ReferenceKind::BeneficiaryPartner => &self.partners,
        };

        match owners.get(entity_id) {
            Some(owner) if owner == expected_tenant => None,
            owner => Some(TenantViolation {
                reference,
                entity_id: entity_id.to_string(),
                expected_tenant: expected_tenant.to_string(),
                actual_tenant: owner.cloned(),
            }),
        }
    }
}

/// Collects every tenant violation in a batch.
pub fn find_violations(
    tenant_id: &str,
    source_partner_id: &str,
    records: &[CommissionRecord],
    ownership: &Ownership,
) -> Vec<TenantViolation> {
    let mut violations = Vec::new();

    violations.extend(ownership.check(ReferenceKind::SourcePartner, source_partner_id, tenant_id));

    for record in records {
        if record.tenant_id != tenant_id {
            violations.push(TenantViolation {
                reference: ReferenceKind::BeneficiaryPartner,
                entity_id: record.beneficiary_partner_id.clone(),
                expected_tenant: tenant_id.to_string(),
                actual_tenant: Some(record.tenant_id.clone()),
            });
            continue;
        }

        violations.extend(ownership.check(
            ReferenceKind::BeneficiaryPartner,
            &record.beneficiary_partner_id,
            tenant_id,
        ));
        if record.source_partner_id != source_partner_id {
            violations.extend(ownership.check(
                ReferenceKind::SourcePartner,
                &record.source_partner_id,
                tenant_id,
            ));
        }
        violations.extend(ownership.check(
            ReferenceKind::BeneficiaryTier,
            &record.beneficiary_tier_id,
            tenant_id,
        ));
    }

    violations
}

/// Rejects the batch on the first tenant violation.
///
/// The source partner is checked even when there are no candidates.
///
/// ## Errors
/// `CoreError::CrossTenant` carrying the first violation found.
pub fn check_tenant_isolation(
    tenant_id: &str,
    source_partner_id: &str,
    records: &[CommissionRecord],
    ownership: &Ownership,
) -> CoreResult<()> {
    match find_violations(tenant_id, source_partner_id, records, ownership)
        .into_iter()
        .next()
    {
        Some(violation) => Err(CoreError::CrossTenant(violation)),
        None => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use rust_decimal::Decimal;

    use crate::money::Money;

    fn record(beneficiary: &str, tier: &str, depth: u32) -> CommissionRecord {
        CommissionRecord {
            id: CommissionRecord::record_id("t1", "tx-1", beneficiary, depth),
            tenant_id: "t1".to_string(),
            transaction_id: "tx-1".to_string(),
            beneficiary_partner_id: beneficiary.to_string(),
            beneficiary_tier_id: tier.to_string(),
            beneficiary_tier_name: "Gold".to_string(),
            source_partner_id: "p0".to_string(),
            levels_from_source: depth,
            percentage: Decimal::new(10, 2),
            amount: Money::from_minor(100),
            currency: "USD".to_string(),
            engine_version: "test".to_string(),
            created_at: Utc::now(),
        }
    }

    fn ownership(partners: &[(&str, &str)], tiers: &[(&str, &str)]) -> Ownership {
        Ownership {
            partners: partners
                .iter()
                .map(|(id, t)| (id.to_string(), t.to_string()))
                .collect(),
            tiers: tiers
                .iter()
                .map(|(id, t)| (id.to_string(), t.to_string()))
                .collect(),
        }
    }

    #[test]
    fn test_same_tenant_passes() {
        let records = vec![record("p1", "gold", 1), record("p2", "gold", 2)];
        let owners = ownership(&[("p0", "t1"), ("p1", "t1"), ("p2", "t1")], &[("gold", "t1")]);

        assert!(check_tenant_isolation("t1", "p0", &records, &owners).is_ok());
    }

    #[test]
    fn test_foreign_beneficiary_rejected() {
        let records = vec![record("p1", "gold", 1)];
        let owners = ownership(&[("p0", "t1"), ("p1", "t2")], &[("gold", "t1")]);

        let err = check_tenant_isolation("t1", "p0", &records, &owners).unwrap_err();
        match err {
            CoreError::CrossTenant(v) => {
                assert_eq!(v.reference, ReferenceKind::BeneficiaryPartner);
                assert_eq!(v.actual_tenant.as_deref(), Some("t2"));
            }
            other => panic!("unexpected error: {:?}", other),
        }
    }

    #[test]
    fn test_foreign_tier_rejected() {
        let records = vec![record("p1", "gold", 1)];
        let owners = ownership(&[("p0", "t1"), ("p1", "t1")], &[("gold", "t2")]);

        let violations = find_violations("t1", "p0", &records, &owners);
        assert_eq!(violations.len(), 1);
        assert_eq!(violations[0].reference, ReferenceKind::BeneficiaryTier);
    }

    #[test]
    fn test_foreign_source_rejected_without_candidates() {
        let owners = ownership(&[("p0", "t2")], &[]);

        let err = check_tenant_isolation("t1", "p0", &[], &owners).unwrap_err();
        assert!(matches!(
            err,
            CoreError::CrossTenant(TenantViolation {
                reference: ReferenceKind::SourcePartner,
                ..
            })
        ));
    }

    #[test]
    fn test_unresolvable_owner_is_violation() {
        let records = vec![record("p1", "gold", 1)];
        let owners = ownership(&[("p0", "t1")], &[("gold", "t1")]);

        let violations = find_violations("t1", "p0", &records, &owners);
        assert_eq!(violations.len(), 1);
        assert!(violations[0].actual_tenant.is_none());
    }

    #[test]
    fn test_record_tenant_mismatch_rejected() {
        let mut foreign = record("p1", "gold", 1);
        foreign.tenant_id = "t2".to_string();
        let owners = ownership(&[("p0", "t1"), ("p1", "t1")], &[("gold", "t1")]);

        assert!(check_tenant_isolation("t1", "p0", &[foreign], &owners).is_err());
    }

    #[test]
    fn test_referenced_ids_deduplicated() {
        let records = vec![record("p1", "gold", 1), record("p2", "gold", 2)];
        let (partners, tiers) = Ownership::referenced_ids("p0", &records);

        assert_eq!(partners, vec!["p0", "p1", "p2"]);
        assert_eq!(tiers, vec!["gold"]);
    }
}
