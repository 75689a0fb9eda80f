//! # Ledger Repository
//!
//! Append-only storage for commission records.
//!
//! ## Insert-or-Skip Batch
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                   SINGLE TRANSACTION                                    │
//! │                                                                         │
//! │  for each record:                                                       │
//! │    INSERT ... ON CONFLICT DO NOTHING                                    │
//! │      ├── tenant-guard trigger ──► ABORT 'cross_tenant_reference'        │
//! │      ├── entitlement exists   ──► 0 rows (skipped)                      │
//! │      └── new                  ──► 1 row  (inserted)                     │
//! │                                                                         │
//! │  COMMIT ← all rows or none                                              │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Any error drops the transaction before commit, which rolls back every
//! row of the batch.

use std::str::FromStr;

use rust_decimal::Decimal;
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqlitePool};
use tracing::{debug, warn};

use crate::error::{DbError, DbResult};
use upline_core::{CommissionRecord, Money};

/// Repository for the commission ledger.
#[derive(Debug, Clone)]
pub struct LedgerRepository {
    pool: SqlitePool,
}

impl LedgerRepository {
    /// Creates a new LedgerRepository.
    pub fn new(pool: SqlitePool) -> Self {
        LedgerRepository { pool }
    }

    /// Inserts every record that does not exist yet, atomically.
    ///
    /// ## Returns
    /// Number of rows this call actually inserted. Rows already present under
    /// the same `(tenant, transaction, beneficiary, depth)` are skipped.
    ///
    /// ## Errors
    /// `DbError::CrossTenantReference` when the ledger trigger rejects a row;
    /// nothing of the batch is written.
    pub async fn insert_if_absent(&self, records: &[CommissionRecord]) -> DbResult<usize> {
        if records.is_empty() {
            return Ok(0);
        }

        let mut tx = self.pool.begin().await?;
        let mut inserted = 0usize;

        for record in records {
            let result = sqlx::query(
                r#"
                INSERT INTO commission_records (
                    id, tenant_id, transaction_id,
                    beneficiary_partner_id, beneficiary_tier_id, beneficiary_tier_name,
                    source_partner_id, levels_from_source,
                    percentage, amount_minor, currency, engine_version, created_at
                ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13)
                ON CONFLICT DO NOTHING
                "#,
            )
            .bind(&record.id)
            .bind(&record.tenant_id)
            .bind(&record.transaction_id)
            .bind(&record.beneficiary_partner_id)
            .bind(&record.beneficiary_tier_id)
            .bind(&record.beneficiary_tier_name)
            .bind(&record.source_partner_id)
            .bind(i64::from(record.levels_from_source))
            .bind(record.percentage.to_string())
            .bind(record.amount.minor())
            .bind(&record.currency)
            .bind(&record.engine_version)
            .bind(record.created_at)
            .execute(&mut *tx)
            .await;

            match result {
                Ok(done) => inserted += done.rows_affected() as usize,
                Err(err) => {
                    let err = DbError::from(err);
                    warn!(
                        tenant_id = %record.tenant_id,
                        transaction_id = %record.transaction_id,
                        record_id = %record.id,
                        error = %err,
                        "Ledger batch rolled back"
                    );
                    return Err(err);
                }
            }
        }

        tx.commit().await?;

        debug!(
            batch = records.len(),
            inserted = inserted,
            "Ledger batch committed"
        );
        Ok(inserted)
    }

    /// Number of ledger rows for one transaction.
    pub async fn count_for_transaction(&self, tenant_id: &str, transaction_id: &str) -> DbResult<usize> {
        let count: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM commission_records WHERE tenant_id = ?1 AND transaction_id = ?2",
        )
        .bind(tenant_id)
        .bind(transaction_id)
        .fetch_one(&self.pool)
        .await?;

        Ok(count as usize)
    }

    /// Ledger rows for one transaction, nearest beneficiary first.
    pub async fn records_for_transaction(
        &self,
        tenant_id: &str,
        transaction_id: &str,
    ) -> DbResult<Vec<CommissionRecord>> {
        let rows = sqlx::query(
            r#"
            SELECT id, tenant_id, transaction_id,
                   beneficiary_partner_id, beneficiary_tier_id, beneficiary_tier_name,
                   source_partner_id, levels_from_source,
                   percentage, amount_minor, currency, engine_version, created_at
            FROM commission_records
            WHERE tenant_id = ?1 AND transaction_id = ?2
            ORDER BY levels_from_source ASC, beneficiary_partner_id ASC
            "#,
        )
        .bind(tenant_id)
        .bind(transaction_id)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(map_record).collect()
    }

    /// Total commission earned by a partner in one currency.
    pub async fn total_for_beneficiary(
        &self,
        tenant_id: &str,
        partner_id: &str,
        currency: &str,
    ) -> DbResult<Money> {
        let total: i64 = sqlx::query_scalar(
            r#"
            SELECT COALESCE(SUM(amount_minor), 0) FROM commission_records
            WHERE tenant_id = ?1 AND beneficiary_partner_id = ?2 AND currency = ?3
            "#,
        )
        .bind(tenant_id)
        .bind(partner_id)
        .bind(currency)
        .fetch_one(&self.pool)
        .await?;

        Ok(Money::from_minor(total))
    }
}

fn map_record(row: &SqliteRow) -> DbResult<CommissionRecord> {
    let percentage: String = row.try_get("percentage")?;
    let levels: i64 = row.try_get("levels_from_source")?;

    Ok(CommissionRecord {
        id: row.try_get("id")?,
        tenant_id: row.try_get("tenant_id")?,
        transaction_id: row.try_get("transaction_id")?,
        beneficiary_partner_id: row.try_get("beneficiary_partner_id")?,
        beneficiary_tier_id: row.try_get("beneficiary_tier_id")?,
        beneficiary_tier_name: row.try_get("beneficiary_tier_name")?,
        source_partner_id: row.try_get("source_partner_id")?,
        levels_from_source: u32::try_from(levels)
            .map_err(|e| DbError::corrupt("levels_from_source", e))?,
        percentage: Decimal::from_str(&percentage).map_err(|e| DbError::corrupt("percentage", e))?,
        amount: Money::from_minor(row.try_get("amount_minor")?),
        currency: row.try_get("currency")?,
        engine_version: row.try_get("engine_version")?,
        created_at: row.try_get("created_at")?,
    })
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    use crate::repository::partner::NewTier;
    use crate::{Database, DbConfig};
    use upline_core::{Partner, PartnerTier};

    struct Fixture {
        db: Database,
        tier: PartnerTier,
        source: Partner,
        sponsor: Partner,
    }

    async fn setup() -> Fixture {
        let db = Database::new(DbConfig::in_memory()).await.unwrap();
        let repo = db.partners();
        repo.create_tenant("t1", "Tenant One").await.unwrap();
        let tier = repo
            .create_tier(NewTier {
                tenant_id: "t1".to_string(),
                level_code: "GOLD".to_string(),
                name: "Gold".to_string(),
                sort_order: 1,
                default_commission_rate: Decimal::new(10, 2),
                max_referral_depth: 5,
            })
            .await
            .unwrap();
        let sponsor = repo.create_partner("t1", "SPONSOR", &tier.id, None).await.unwrap();
        let source = repo
            .create_partner("t1", "SOURCE", &tier.id, Some(&sponsor.id))
            .await
            .unwrap();

        Fixture {
            db,
            tier,
            source,
            sponsor,
        }
    }

    fn record(f: &Fixture, transaction_id: &str, amount: i64) -> CommissionRecord {
        CommissionRecord {
            id: CommissionRecord::record_id("t1", transaction_id, &f.sponsor.id, 1),
            tenant_id: "t1".to_string(),
            transaction_id: transaction_id.to_string(),
            beneficiary_partner_id: f.sponsor.id.clone(),
            beneficiary_tier_id: f.tier.id.clone(),
            beneficiary_tier_name: f.tier.name.clone(),
            source_partner_id: f.source.id.clone(),
            levels_from_source: 1,
            percentage: Decimal::new(10, 2),
            amount: Money::from_minor(amount),
            currency: "USD".to_string(),
            engine_version: "test".to_string(),
            created_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn test_insert_then_skip() {
        let f = setup().await;
        let ledger = f.db.ledger();
        let rec = record(&f, "tx-1", 10000);

        assert_eq!(ledger.insert_if_absent(&[rec.clone()]).await.unwrap(), 1);
        assert_eq!(ledger.insert_if_absent(&[rec]).await.unwrap(), 0);
        assert_eq!(ledger.count_for_transaction("t1", "tx-1").await.unwrap(), 1);

        let stored = ledger.records_for_transaction("t1", "tx-1").await.unwrap();
        assert_eq!(stored.len(), 1);
        assert_eq!(stored[0].amount.minor(), 10000);
        assert_eq!(stored[0].percentage, Decimal::new(10, 2));
        assert_eq!(stored[0].beneficiary_tier_name, "Gold");
    }

    #[tokio::test]
    async fn test_cross_tenant_row_rolls_back_batch() {
        let f = setup().await;
        let ledger = f.db.ledger();

        let good = record(&f, "tx-2", 500);
        let mut foreign = record(&f, "tx-2", 500);
        foreign.beneficiary_partner_id = "partner-of-nobody".to_string();
        foreign.levels_from_source = 2;
        foreign.id = CommissionRecord::record_id("t1", "tx-2", "partner-of-nobody", 2);

        let err = ledger.insert_if_absent(&[good, foreign]).await.unwrap_err();
        assert!(matches!(err, DbError::CrossTenantReference { .. }));
        assert_eq!(ledger.count_for_transaction("t1", "tx-2").await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_ledger_is_append_only() {
        let f = setup().await;
        let ledger = f.db.ledger();
        ledger.insert_if_absent(&[record(&f, "tx-3", 100)]).await.unwrap();

        let update = sqlx::query("UPDATE commission_records SET amount_minor = 1")
            .execute(f.db.pool())
            .await
            .unwrap_err();
        assert!(matches!(DbError::from(update), DbError::ImmutableLedger));

        let delete = sqlx::query("DELETE FROM commission_records")
            .execute(f.db.pool())
            .await
            .unwrap_err();
        assert!(matches!(DbError::from(delete), DbError::ImmutableLedger));
    }

    #[tokio::test]
    async fn test_total_for_beneficiary() {
        let f = setup().await;
        let ledger = f.db.ledger();
        ledger.insert_if_absent(&[record(&f, "tx-a", 150)]).await.unwrap();
        ledger.insert_if_absent(&[record(&f, "tx-b", 250)]).await.unwrap();

        let total = ledger
            .total_for_beneficiary("t1", &f.sponsor.id, "USD")
            .await
            .unwrap();
        assert_eq!(total.minor(), 400);
    }
}
