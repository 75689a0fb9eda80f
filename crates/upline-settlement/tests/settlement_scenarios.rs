//! End-to-end settlement against SQLite, in memory unless a test needs
//! several connections.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rust_decimal::Decimal;

use upline_core::{ErrorKind, Partner, PartnerTier, Transaction, TransactionType, Upline};
use upline_db::{Database, DbConfig, NewTier};
use upline_settlement::{
    CoordinatorSettings, InMemoryIdempotencyCache, InMemoryLockService, LockService, LockWait,
    PartnerDirectory, SettleResult, SettlementCoordinator, SettlementError, SqliteDirectory,
    SqliteLedger,
};

// =============================================================================
// Fixtures
// =============================================================================

async fn database() -> Database {
    Database::new(DbConfig::in_memory()).await.unwrap()
}

async fn tier(db: &Database, tenant: &str, code: &str, rate_bps: i64, max_depth: u32) -> PartnerTier {
    db.partners()
        .create_tier(NewTier {
            tenant_id: tenant.to_string(),
            level_code: code.to_string(),
            name: code.to_string(),
            sort_order: 0,
            default_commission_rate: Decimal::new(rate_bps, 4),
            max_referral_depth: max_depth,
        })
        .await
        .unwrap()
}

async fn partner(db: &Database, tenant: &str, code: &str, tier: &PartnerTier, sponsor: Option<&Partner>) -> Partner {
    db.partners()
        .create_partner(tenant, code, &tier.id, sponsor.map(|s| s.id.as_str()))
        .await
        .unwrap()
}

fn transaction(tenant: &str, tx_id: &str, source: &Partner, amount_minor: i64) -> Transaction {
    Transaction {
        tenant_id: tenant.to_string(),
        transaction_id: tx_id.to_string(),
        source_partner_id: source.id.clone(),
        amount: Decimal::new(amount_minor, 2),
        currency: "USD".to_string(),
        transaction_type: TransactionType::OnlineOrder,
        occurred_at: Utc::now(),
        metadata: Some(serde_json::json!({ "channel": "web" })),
    }
}

/// Adds a closure row directly, the way a buggy import would.
async fn plant_relation(db: &Database, tenant: &str, parent: &str, child: &str, depth: i64, path: &str) {
    sqlx::query(
        r#"
        INSERT INTO partner_relations (tenant_id, parent_partner_id, child_partner_id, depth, path, created_at)
        VALUES (?1, ?2, ?3, ?4, ?5, ?6)
        "#,
    )
    .bind(tenant)
    .bind(parent)
    .bind(child)
    .bind(depth)
    .bind(path)
    .bind(Utc::now())
    .execute(db.pool())
    .await
    .unwrap();
}

/// Scenario A hierarchy: P2 (5%) ─► P1 (10%) ─► SRC
struct Chain {
    db: Database,
    p1: Partner,
    p2: Partner,
    source: Partner,
}

async fn chain_a(p1_max_depth: u32) -> Chain {
    chain_a_on(database().await, p1_max_depth).await
}

async fn chain_a_on(db: Database, p1_max_depth: u32) -> Chain {
    db.partners().create_tenant("t1", "Tenant One").await.unwrap();
    let ten = tier(&db, "t1", "TEN", 1000, p1_max_depth).await;
    let five = tier(&db, "t1", "FIVE", 500, 5).await;
    let entry = tier(&db, "t1", "ENTRY", 0, 0).await;

    let p2 = partner(&db, "t1", "P2", &five, None).await;
    let p1 = partner(&db, "t1", "P1", &ten, Some(&p2)).await;
    let source = partner(&db, "t1", "SRC", &entry, Some(&p1)).await;

    Chain { db, p1, p2, source }
}

fn amounts_by_beneficiary(records: &[upline_core::CommissionRecord]) -> HashMap<String, i64> {
    records
        .iter()
        .map(|r| (r.beneficiary_partner_id.clone(), r.amount.minor()))
        .collect()
}

// =============================================================================
// Scenarios
// =============================================================================

#[tokio::test]
async fn scenario_a_two_level_upline() {
    let c = chain_a(5).await;
    let coordinator = SettlementCoordinator::in_process(&c.db, CoordinatorSettings::default());

    let result = coordinator
        .process_commission_settlement(&transaction("t1", "order-a", &c.source, 100000))
        .await;

    assert!(result.success, "{:?}", result.error);
    assert_eq!(result.total_commissions_calculated, 2);
    assert_eq!(result.inserted_count, 2);
    assert!(!result.truncated_upline);

    let amounts = amounts_by_beneficiary(&result.commission_records);
    assert_eq!(amounts[&c.p1.id], 10000);
    assert_eq!(amounts[&c.p2.id], 5000);

    let p1_record = &result.commission_records[0];
    assert_eq!(p1_record.levels_from_source, 1);
    assert_eq!(p1_record.beneficiary_tier_name, "TEN");
    assert_eq!(p1_record.percentage, Decimal::new(1000, 4));
}

#[tokio::test]
async fn scenario_b_concurrent_duplicates_settle_once() {
    let c = chain_a(5).await;
    let coordinator = SettlementCoordinator::in_process(&c.db, CoordinatorSettings::default());
    let tx = transaction("t1", "order-b", &c.source, 100000);

    let mut handles = Vec::new();
    for _ in 0..3 {
        let coordinator = coordinator.clone();
        let tx = tx.clone();
        handles.push(tokio::spawn(async move {
            coordinator.process_commission_settlement(&tx).await
        }));
    }

    let mut inserted = 0;
    for handle in handles {
        let result = handle.await.unwrap();
        assert!(result.success, "{:?}", result.error);
        assert_eq!(result.total_commissions_calculated, 2);
        inserted += result.inserted_count;
    }

    // Cache hits replay the computing call's count
    assert!(inserted >= 2);
    assert_eq!(c.db.ledger().count_for_transaction("t1", "order-b").await.unwrap(), 2);
}

#[tokio::test]
async fn scenario_c_beneficiary_in_other_tenant() {
    let db = database().await;
    let repo = db.partners();
    repo.create_tenant("t1", "Tenant One").await.unwrap();
    repo.create_tenant("t2", "Tenant Two").await.unwrap();

    let t1_tier = tier(&db, "t1", "GOLD", 1000, 5).await;
    let t2_tier = tier(&db, "t2", "GOLD", 1000, 5).await;
    let source = partner(&db, "t1", "SRC", &t1_tier, None).await;
    let foreign = partner(&db, "t2", "P1", &t2_tier, None).await;
    plant_relation(&db, "t1", &foreign.id, &source.id, 1, &foreign.id).await;

    let coordinator = SettlementCoordinator::in_process(&db, CoordinatorSettings::default());
    let err = coordinator
        .settle(&transaction("t1", "order-c", &source, 100000))
        .await
        .unwrap_err();

    assert!(err.is_security_violation());
    assert_eq!(err.kind(), ErrorKind::CrossTenantViolation);
    assert!(!err.is_retryable());
    assert_eq!(db.ledger().count_for_transaction("t1", "order-c").await.unwrap(), 0);
}

#[tokio::test]
async fn scenario_d_tier_depth_zero_earns_nothing() {
    let c = chain_a(0).await;
    let coordinator = SettlementCoordinator::in_process(&c.db, CoordinatorSettings::default());

    let summary = coordinator
        .settle(&transaction("t1", "order-d", &c.source, 100000))
        .await
        .unwrap();

    assert_eq!(summary.total_commissions_calculated, 1);
    assert_eq!(summary.commission_records[0].beneficiary_partner_id, c.p2.id);
    assert!(summary
        .commission_records
        .iter()
        .all(|r| r.beneficiary_partner_id != c.p1.id));
}

// =============================================================================
// Idempotence & Failures
// =============================================================================

#[tokio::test(flavor = "multi_thread", worker_threads = 3)]
async fn independent_coordinators_converge_on_the_ledger() {
    let path = std::env::temp_dir().join(format!("upline-{}.db", uuid::Uuid::new_v4()));
    let db = Database::new(DbConfig::new(path.clone()).max_connections(5)).await.unwrap();
    let c = chain_a_on(db, 5).await;
    let tx = transaction("t1", "order-race", &c.source, 100000);

    // No shared lock or cache; only the unique index stands between them
    let mut handles = Vec::new();
    for _ in 0..3 {
        let coordinator = SettlementCoordinator::in_process(&c.db, CoordinatorSettings::default());
        let tx = tx.clone();
        handles.push(tokio::spawn(async move {
            for _ in 0..5 {
                match coordinator.settle(&tx).await {
                    Err(err) if err.is_retryable() => {
                        tokio::time::sleep(Duration::from_millis(20)).await;
                    }
                    other => return other,
                }
            }
            coordinator.settle(&tx).await
        }));
    }

    let mut inserted = 0;
    for handle in handles {
        let summary = handle.await.unwrap().unwrap();
        assert_eq!(summary.total_commissions_calculated, 2);
        inserted += summary.inserted_count;
    }

    // A retried attempt may report 0 for rows its own earlier try committed
    assert!(inserted <= 2);
    assert_eq!(c.db.ledger().count_for_transaction("t1", "order-race").await.unwrap(), 2);

    c.db.close().await;
    for suffix in ["", "-wal", "-shm"] {
        let _ = std::fs::remove_file(format!("{}{}", path.display(), suffix));
    }
}

#[tokio::test]
async fn tenant_ids_containing_the_separator_stay_apart() {
    let db = database().await;
    let repo = db.partners();
    let mut sources = Vec::new();
    for tenant in ["acme:eu", "acme"] {
        repo.create_tenant(tenant, tenant).await.unwrap();
        let ten = tier(&db, tenant, "TEN", 1000, 5).await;
        let sponsor = partner(&db, tenant, "SPONSOR", &ten, None).await;
        sources.push(partner(&db, tenant, "SRC", &ten, Some(&sponsor)).await);
    }
    let coordinator = SettlementCoordinator::in_process(&db, CoordinatorSettings::default());

    let first = coordinator
        .settle(&transaction("acme:eu", "order-1", &sources[0], 100000))
        .await
        .unwrap();
    let second = coordinator
        .settle(&transaction("acme", "eu:order-1", &sources[1], 100000))
        .await
        .unwrap();

    assert_eq!(first.tenant_id, "acme:eu");
    assert_eq!(second.tenant_id, "acme");
    assert_eq!(second.transaction_id, "eu:order-1");
    assert_eq!(second.inserted_count, 1);
    assert!(second.commission_records.iter().all(|r| r.tenant_id == "acme"));
    assert_eq!(db.ledger().count_for_transaction("acme", "eu:order-1").await.unwrap(), 1);
}

#[tokio::test]
async fn sequential_resubmission_is_a_no_op() {
    let c = chain_a(5).await;
    let tx = transaction("t1", "order-seq", &c.source, 12345);

    // Separate coordinators share nothing but the ledger
    for attempt in 0..3 {
        let coordinator = SettlementCoordinator::in_process(&c.db, CoordinatorSettings::default());
        let summary = coordinator.settle(&tx).await.unwrap();
        assert_eq!(summary.total_commissions_calculated, 2);
        assert_eq!(summary.inserted_count, if attempt == 0 { 2 } else { 0 });
    }

    let total = c
        .db
        .ledger()
        .total_for_beneficiary("t1", &c.p1.id, "USD")
        .await
        .unwrap();
    assert_eq!(total.minor(), 1235); // 123.45 × 10% = 12.345 → 12.35
}

#[tokio::test]
async fn invalid_transaction_is_rejected_before_anything_is_written() {
    let c = chain_a(5).await;
    let coordinator = SettlementCoordinator::in_process(&c.db, CoordinatorSettings::default());
    let mut tx = transaction("t1", "order-neg", &c.source, -500);

    let result = coordinator.process_commission_settlement(&tx).await;
    let info = result.error.unwrap();
    assert_eq!(info.kind, ErrorKind::Validation);
    assert!(!info.retryable);

    tx.amount = Decimal::new(500, 2);
    tx.currency = "DOLLAR".to_string();
    let result = coordinator.process_commission_settlement(&tx).await;
    assert_eq!(result.error.unwrap().kind, ErrorKind::Validation);

    assert_eq!(c.db.ledger().count_for_transaction("t1", "order-neg").await.unwrap(), 0);
}

#[tokio::test]
async fn held_lock_reports_contention() {
    let c = chain_a(5).await;
    let locks = Arc::new(InMemoryLockService::new());
    let settings = CoordinatorSettings {
        lock: LockWait {
            lease: Duration::from_secs(30),
            wait_timeout: Duration::from_millis(80),
            initial_backoff: Duration::from_millis(5),
            max_backoff: Duration::from_millis(20),
        },
        ..CoordinatorSettings::default()
    };
    let coordinator = SettlementCoordinator::with_sqlite(
        &c.db,
        locks.clone(),
        Arc::new(InMemoryIdempotencyCache::new()),
        settings,
    );
    let tx = transaction("t1", "order-busy", &c.source, 100000);

    let holder = locks
        .try_acquire(&tx.idempotency_key().lock_key(), Duration::from_secs(30))
        .await
        .unwrap()
        .unwrap();

    let result = coordinator.process_commission_settlement(&tx).await;
    let info = result.error.unwrap();
    assert_eq!(info.kind, ErrorKind::Contention);
    assert!(info.retryable);

    locks.release(&holder).await.unwrap();
    let result = coordinator.process_commission_settlement(&tx).await;
    assert!(result.success);
    assert_eq!(result.inserted_count, 2);
}

#[tokio::test]
async fn source_partner_of_other_tenant_is_a_violation() {
    let c = chain_a(5).await;
    c.db.partners().create_tenant("t2", "Tenant Two").await.unwrap();
    let coordinator = SettlementCoordinator::in_process(&c.db, CoordinatorSettings::default());

    let err = coordinator
        .settle(&transaction("t2", "order-x", &c.source, 100000))
        .await
        .unwrap_err();

    assert!(matches!(err, SettlementError::CrossTenant(_)));
}

#[tokio::test]
async fn broken_chain_settles_resolvable_prefix() {
    let c = chain_a(5).await;
    sqlx::query("DELETE FROM partner_relations WHERE child_partner_id = ?1 AND depth = 2")
        .bind(&c.source.id)
        .execute(c.db.pool())
        .await
        .unwrap();

    let coordinator = SettlementCoordinator::in_process(&c.db, CoordinatorSettings::default());
    let summary = coordinator
        .settle(&transaction("t1", "order-broken", &c.source, 100000))
        .await
        .unwrap();

    assert!(summary.truncated_upline);
    assert_eq!(summary.total_commissions_calculated, 1);
    assert_eq!(summary.commission_records[0].beneficiary_partner_id, c.p1.id);
}

// =============================================================================
// Ledger Trigger (second isolation layer)
// =============================================================================

/// Reports every partner and tier as owned by `tenant`, so the guard is
/// blind and only the ledger trigger stands in the way.
struct LyingDirectory {
    inner: SqliteDirectory,
    tenant: String,
}

#[async_trait]
impl PartnerDirectory for LyingDirectory {
    async fn get_partner(&self, tenant_id: &str, partner_id: &str) -> SettleResult<Option<Partner>> {
        self.inner.get_partner(tenant_id, partner_id).await
    }

    async fn get_upline(&self, tenant_id: &str, partner_id: &str, max_depth: u32) -> SettleResult<Upline> {
        self.inner.get_upline(tenant_id, partner_id, max_depth).await
    }

    async fn get_tiers(&self, tier_ids: &[String]) -> SettleResult<Vec<PartnerTier>> {
        let mut tiers = self.inner.get_tiers(tier_ids).await?;
        for tier in &mut tiers {
            tier.tenant_id = self.tenant.clone();
        }
        Ok(tiers)
    }

    async fn partner_owners(&self, partner_ids: &[String]) -> SettleResult<HashMap<String, String>> {
        Ok(partner_ids
            .iter()
            .map(|id| (id.clone(), self.tenant.clone()))
            .collect())
    }
}

#[tokio::test]
async fn ledger_trigger_rejects_what_the_guard_missed() {
    let c = chain_a(5).await;
    c.db.partners().create_tenant("t2", "Tenant Two").await.unwrap();
    let t2_tier = tier(&c.db, "t2", "GOLD", 500, 5).await;
    let foreign = partner(&c.db, "t2", "FOREIGN", &t2_tier, None).await;

    // SRC ─► P1 (t1) ─► FOREIGN (t2) at depth 2; P2's row moves to depth 3
    sqlx::query("DELETE FROM partner_relations WHERE child_partner_id = ?1 AND depth = 2")
        .bind(&c.source.id)
        .execute(c.db.pool())
        .await
        .unwrap();
    let path = format!("{}/{}", foreign.id, c.p1.id);
    plant_relation(&c.db, "t1", &foreign.id, &c.source.id, 2, &path).await;

    let coordinator = SettlementCoordinator::new(
        Arc::new(LyingDirectory {
            inner: SqliteDirectory::new(&c.db),
            tenant: "t1".to_string(),
        }),
        Arc::new(SqliteLedger::new(&c.db)),
        Arc::new(InMemoryLockService::new()),
        Arc::new(InMemoryIdempotencyCache::new()),
        CoordinatorSettings::default(),
    );

    let err = coordinator
        .settle(&transaction("t1", "order-bypass", &c.source, 100000))
        .await
        .unwrap_err();

    assert!(err.is_security_violation());
    // P1's valid row went down with the batch
    assert_eq!(c.db.ledger().count_for_transaction("t1", "order-bypass").await.unwrap(), 0);
}

// =============================================================================
// Randomized Properties
// =============================================================================

#[tokio::test]
async fn seeded_hierarchies_conserve_amount_and_respect_depth() {
    let db = database().await;
    let mut rng = StdRng::seed_from_u64(0x0051_7713);

    for round in 0..25 {
        let tenant = format!("prop-{}", round);
        db.partners().create_tenant(&tenant, "Property").await.unwrap();

        let levels: usize = rng.gen_range(1..=8);
        let per_level_cap = 10_000 / levels as i64;

        // Root first
        let mut max_depth_of: HashMap<String, u32> = HashMap::new();
        let mut sponsor: Option<Partner> = None;
        for level in 0..levels {
            let t = tier(
                &db,
                &tenant,
                &format!("L{}", level),
                rng.gen_range(0..=per_level_cap),
                rng.gen_range(0..=10),
            )
            .await;
            let p = partner(&db, &tenant, &format!("P{}", level), &t, sponsor.as_ref()).await;
            max_depth_of.insert(p.id.clone(), t.max_referral_depth);
            sponsor = Some(p);
        }

        let entry = tier(&db, &tenant, "ENTRY", 0, 0).await;
        let source = partner(&db, &tenant, "SRC", &entry, sponsor.as_ref()).await;
        let amount_minor: i64 = rng.gen_range(1..=10_000_000);
        let tx = transaction(&tenant, &format!("tx-{}", round), &source, amount_minor);

        let coordinator = SettlementCoordinator::in_process(&db, CoordinatorSettings::default());
        let first = coordinator.settle(&tx).await.unwrap();

        let total: i64 = first.commission_records.iter().map(|r| r.amount.minor()).sum();
        assert!(total <= amount_minor, "round {}: {} > {}", round, total, amount_minor);

        for record in &first.commission_records {
            assert!(record.amount.is_positive());
            assert!(record.levels_from_source <= max_depth_of[&record.beneficiary_partner_id]);
        }

        // A fresh coordinator (empty cache) converges on the same rows
        let again = SettlementCoordinator::in_process(&db, CoordinatorSettings::default())
            .settle(&tx)
            .await
            .unwrap();
        assert_eq!(again.inserted_count, 0);
        assert_eq!(again.commission_records, first.commission_records);
    }
}
