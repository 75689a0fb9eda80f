//! SQLite implementations of [`PartnerDirectory`] and [`LedgerStore`].

use std::collections::HashMap;

use async_trait::async_trait;
use upline_core::{CommissionRecord, Partner, PartnerTier, Upline};
use upline_db::{Database, LedgerRepository, PartnerRepository};

use crate::error::{SettleResult, SettlementError};
use crate::ports::{LedgerStore, PartnerDirectory};

/// Partner hierarchy backed by the closure table.
#[derive(Debug, Clone)]
pub struct SqliteDirectory {
    partners: PartnerRepository,
}

impl SqliteDirectory {
    pub fn new(db: &Database) -> Self {
        SqliteDirectory {
            partners: db.partners(),
        }
    }
}

#[async_trait]
impl PartnerDirectory for SqliteDirectory {
    async fn get_partner(&self, tenant_id: &str, partner_id: &str) -> SettleResult<Option<Partner>> {
        Ok(self.partners.get_partner(tenant_id, partner_id).await?)
    }

    async fn get_upline(&self, tenant_id: &str, partner_id: &str, max_depth: u32) -> SettleResult<Upline> {
        Ok(self.partners.get_upline(tenant_id, partner_id, max_depth).await?)
    }

    async fn get_tiers(&self, tier_ids: &[String]) -> SettleResult<Vec<PartnerTier>> {
        Ok(self.partners.get_tiers(tier_ids).await?)
    }

    async fn partner_owners(&self, partner_ids: &[String]) -> SettleResult<HashMap<String, String>> {
        Ok(self.partners.partner_owners(partner_ids).await?)
    }
}

/// Commission ledger in SQLite.
#[derive(Debug, Clone)]
pub struct SqliteLedger {
    ledger: LedgerRepository,
}

impl SqliteLedger {
    pub fn new(db: &Database) -> Self {
        SqliteLedger { ledger: db.ledger() }
    }
}

#[async_trait]
impl LedgerStore for SqliteLedger {
    async fn insert_if_absent(&self, records: &[CommissionRecord]) -> SettleResult<usize> {
        self.ledger
            .insert_if_absent(records)
            .await
            .map_err(SettlementError::from_ledger_write)
    }

    async fn count_for_transaction(&self, tenant_id: &str, transaction_id: &str) -> SettleResult<usize> {
        Ok(self.ledger.count_for_transaction(tenant_id, transaction_id).await?)
    }

    async fn records_for_transaction(
        &self,
        tenant_id: &str,
        transaction_id: &str,
    ) -> SettleResult<Vec<CommissionRecord>> {
        Ok(self.ledger.records_for_transaction(tenant_id, transaction_id).await?)
    }
}
