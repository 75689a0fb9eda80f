//! # Transaction Validation
//!
//! Shape checks on a [`Transaction`] before any hierarchy lookup.
//!
//! ## Validation Rules
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  Field               │  Rules                                           │
//! ├──────────────────────┼──────────────────────────────────────────────────┤
//! │  tenant_id           │  Required, max 64 chars                          │
//! │  transaction_id      │  Required, max 128 chars                         │
//! │  source_partner_id   │  Required, max 64 chars                          │
//! │  currency            │  ISO-4217 code (3 ASCII letters)                 │
//! │  amount              │  > 0 after conversion to minor units             │
//! └──────────────────────┴──────────────────────────────────────────────────┘
//! ```
//!
//! Whether the source partner exists is a directory question and is checked
//! by the coordinator, not here.

use crate::error::ValidationError;
use crate::money::{to_minor_units, Currency, Money};
use crate::types::Transaction;

pub const MAX_TENANT_ID_LENGTH: usize = 64;
pub const MAX_TRANSACTION_ID_LENGTH: usize = 128;
pub const MAX_PARTNER_ID_LENGTH: usize = 64;

/// A transaction that passed shape validation, with its amount converted
/// once into minor units.
#[derive(Debug, Clone)]
pub struct ValidatedTransaction<'a> {
    pub transaction: &'a Transaction,
    pub currency: Currency,
    pub amount: Money,
}

/// Validates a transaction and converts its amount.
///
/// ## Errors
/// The first rule that fails, in the order of the table above.
pub fn validate_transaction(tx: &Transaction) -> Result<ValidatedTransaction<'_>, ValidationError> {
    validate_id("tenant_id", &tx.tenant_id, MAX_TENANT_ID_LENGTH)?;
    validate_id("transaction_id", &tx.transaction_id, MAX_TRANSACTION_ID_LENGTH)?;
    validate_id("source_partner_id", &tx.source_partner_id, MAX_PARTNER_ID_LENGTH)?;

    let currency = Currency::from_code(&tx.currency)?;
    let amount = to_minor_units(tx.amount, &currency)?;
    if !amount.is_positive() {
        return Err(ValidationError::MustBePositive {
            field: "amount".to_string(),
        });
    }

    Ok(ValidatedTransaction {
        transaction: tx,
        currency,
        amount,
    })
}

/// Validates an identifier field: non-blank and bounded.
pub fn validate_id(field: &str, value: &str, max: usize) -> Result<(), ValidationError> {
    if value.trim().is_empty() {
        return Err(ValidationError::Required {
            field: field.to_string(),
        });
    }

    if value.len() > max {
        return Err(ValidationError::TooLong {
            field: field.to_string(),
            max,
        });
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use rust_decimal::Decimal;

    use crate::types::TransactionType;

    fn tx(amount: Decimal, currency: &str) -> Transaction {
        Transaction {
            tenant_id: "t1".to_string(),
            transaction_id: "tx-1".to_string(),
            source_partner_id: "p0".to_string(),
            amount,
            currency: currency.to_string(),
            transaction_type: TransactionType::Sale,
            occurred_at: Utc::now(),
            metadata: None,
        }
    }

    #[test]
    fn test_valid_transaction() {
        let t = tx(Decimal::new(100000, 2), "USD");
        let validated = validate_transaction(&t).unwrap();
        assert_eq!(validated.amount.minor(), 100000);
        assert_eq!(validated.currency.code(), "USD");
    }

    #[test]
    fn test_non_positive_amount_rejected() {
        for amount in [Decimal::ZERO, Decimal::new(-500, 2)] {
            let t = tx(amount, "USD");
            assert!(matches!(
                validate_transaction(&t),
                Err(ValidationError::MustBePositive { .. })
            ));
        }
    }

    #[test]
    fn test_amount_rounding_to_zero_rejected() {
        // 0.004 USD is 0 cents
        let t = tx(Decimal::new(4, 3), "USD");
        assert!(matches!(
            validate_transaction(&t),
            Err(ValidationError::MustBePositive { .. })
        ));
    }

    #[test]
    fn test_missing_ids_rejected() {
        let mut t = tx(Decimal::ONE, "USD");
        t.source_partner_id = "  ".to_string();
        let err = validate_transaction(&t).unwrap_err();
        assert_eq!(err.to_string(), "source_partner_id is required");

        let mut t = tx(Decimal::ONE, "USD");
        t.tenant_id = String::new();
        assert!(matches!(
            validate_transaction(&t),
            Err(ValidationError::Required { .. })
        ));
    }

    #[test]
    fn test_overlong_transaction_id_rejected() {
        let mut t = tx(Decimal::ONE, "USD");
        t.transaction_id = "x".repeat(MAX_TRANSACTION_ID_LENGTH + 1);
        assert!(matches!(
            validate_transaction(&t),
            Err(ValidationError::TooLong { max: 128, .. })
        ));
    }

    #[test]
    fn test_bad_currency_rejected() {
        let t = tx(Decimal::ONE, "DOLLAR");
        assert!(matches!(
            validate_transaction(&t),
            Err(ValidationError::InvalidFormat { .. })
        ));
    }
}
