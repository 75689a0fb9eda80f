//! # Partner Repository
//!
//! Tenants, tiers, partners and the partner hierarchy.
//!
//! ## Closure Table
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  Tree:          ROOT                                                    │
//! │                  │                                                      │
//! │                  A                                                      │
//! │                  │                                                      │
//! │                  B                                                      │
//! │                                                                         │
//! │  partner_relations:                                                     │
//! │  parent │ child │ depth │ path                                          │
//! │  ───────┼───────┼───────┼──────────                                     │
//! │  ROOT   │ A     │ 1     │ ROOT                                          │
//! │  A      │ B     │ 1     │ ROOT/A                                        │
//! │  ROOT   │ B     │ 2     │ ROOT/A                                        │
//! │                                                                         │
//! │  Upline of B = rows WHERE child = B ORDER BY depth                      │
//! │             = [A (1), ROOT (2)]                                         │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! The upline query is one flat, depth-ordered read. Corrupted rows (a
//! missing depth, a vanished partner, a repeated ancestor) end the chain at
//! the last good entry and mark the result incomplete.

use std::collections::{HashMap, HashSet};
use std::str::FromStr;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqliteConnection, SqlitePool};
use tracing::{debug, warn};
use uuid::Uuid;

use super::placeholders;
use crate::error::{DbError, DbResult};
use upline_core::{Partner, PartnerTier, Tenant, Upline, UplineEntry};

/// Input for [`PartnerRepository::create_tier`].
#[derive(Debug, Clone)]
pub struct NewTier {
    pub tenant_id: String,
    pub level_code: String,
    pub name: String,
    pub sort_order: i32,
    pub default_commission_rate: Decimal,
    pub max_referral_depth: u32,
}

/// Repository for the partner hierarchy.
#[derive(Debug, Clone)]
pub struct PartnerRepository {
    pool: SqlitePool,
}

impl PartnerRepository {
    /// Creates a new PartnerRepository.
    pub fn new(pool: SqlitePool) -> Self {
        PartnerRepository { pool }
    }

    // =========================================================================
    // Onboarding
    // =========================================================================

    /// Creates a tenant with a caller-chosen id.
    pub async fn create_tenant(&self, id: &str, name: &str) -> DbResult<Tenant> {
        let now = Utc::now();
        debug!(tenant_id = %id, "Creating tenant");

        sqlx::query("INSERT INTO tenants (id, name, created_at) VALUES (?1, ?2, ?3)")
            .bind(id)
            .bind(name)
            .bind(now)
            .execute(&self.pool)
            .await?;

        Ok(Tenant {
            id: id.to_string(),
            name: name.to_string(),
            created_at: now,
        })
    }

    /// Creates a partner tier.
    ///
    /// The rate is stored as given; an out-of-range rate is rejected at
    /// settlement time by the rate resolver.
    pub async fn create_tier(&self, tier: NewTier) -> DbResult<PartnerTier> {
        let id = Uuid::new_v4().to_string();
        let now = Utc::now();
        debug!(id = %id, tenant_id = %tier.tenant_id, level_code = %tier.level_code, "Creating tier");

        sqlx::query(
            r#"
            INSERT INTO partner_tiers (
                id, tenant_id, level_code, name, sort_order,
                default_commission_rate, max_referral_depth, created_at, updated_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?8)
            "#,
        )
        .bind(&id)
        .bind(&tier.tenant_id)
        .bind(&tier.level_code)
        .bind(&tier.name)
        .bind(tier.sort_order)
        .bind(tier.default_commission_rate.to_string())
        .bind(i64::from(tier.max_referral_depth))
        .bind(now)
        .execute(&self.pool)
        .await?;

        Ok(PartnerTier {
            id,
            tenant_id: tier.tenant_id,
            level_code: tier.level_code,
            name: tier.name,
            sort_order: tier.sort_order,
            default_commission_rate: tier.default_commission_rate,
            max_referral_depth: tier.max_referral_depth,
        })
    }

    /// Creates a partner, optionally directly under a sponsor.
    ///
    /// Partner row and closure rows are written in one transaction.
    ///
    /// ## Errors
    /// - `DbError::NotFound` if the tier is not a tier of this tenant
    /// - `DbError::InvalidHierarchy` if the sponsor belongs to another tenant
    pub async fn create_partner(
        &self,
        tenant_id: &str,
        code: &str,
        tier_id: &str,
        sponsor_id: Option<&str>,
    ) -> DbResult<Partner> {
        let id = Uuid::new_v4().to_string();
        let now = Utc::now();
        debug!(id = %id, tenant_id = %tenant_id, code = %code, sponsor_id = ?sponsor_id, "Creating partner");

        let mut tx = self.pool.begin().await?;

        let tier_tenant: Option<String> =
            sqlx::query_scalar("SELECT tenant_id FROM partner_tiers WHERE id = ?1")
                .bind(tier_id)
                .fetch_optional(&mut *tx)
                .await?;
        if tier_tenant.as_deref() != Some(tenant_id) {
            return Err(DbError::not_found("PartnerTier", tier_id));
        }

        sqlx::query(
            r#"
            INSERT INTO partners (id, tenant_id, code, tier_id, is_active, created_at, updated_at)
            VALUES (?1, ?2, ?3, ?4, 1, ?5, ?5)
            "#,
        )
        .bind(&id)
        .bind(tenant_id)
        .bind(code)
        .bind(tier_id)
        .bind(now)
        .execute(&mut *tx)
        .await?;

        if let Some(sponsor_id) = sponsor_id {
            attach(&mut *tx, tenant_id, &id, sponsor_id, now).await?;
        }

        tx.commit().await?;

        Ok(Partner {
            id,
            tenant_id: tenant_id.to_string(),
            code: code.to_string(),
            tier_id: tier_id.to_string(),
            is_active: true,
            created_at: now,
        })
    }

    /// Places a partner without sponsor (and its whole subtree) under
    /// `sponsor_id`.
    ///
    /// ## Errors
    /// `DbError::InvalidHierarchy` when the partner already has a sponsor,
    /// the sponsor lives in another tenant, or the move would create a cycle.
    pub async fn attach_to_sponsor(
        &self,
        tenant_id: &str,
        partner_id: &str,
        sponsor_id: &str,
    ) -> DbResult<()> {
        let mut tx = self.pool.begin().await?;
        attach(&mut *tx, tenant_id, partner_id, sponsor_id, Utc::now()).await?;
        tx.commit().await?;
        Ok(())
    }

    /// Moves a partner to another tier of the same tenant.
    ///
    /// Existing commission records keep the tier they were computed with.
    pub async fn change_tier(&self, tenant_id: &str, partner_id: &str, tier_id: &str) -> DbResult<()> {
        let result = sqlx::query(
            r#"
            UPDATE partners SET tier_id = ?3, updated_at = ?4
            WHERE id = ?1 AND tenant_id = ?2
              AND EXISTS (SELECT 1 FROM partner_tiers WHERE id = ?3 AND tenant_id = ?2)
            "#,
        )
        .bind(partner_id)
        .bind(tenant_id)
        .bind(tier_id)
        .bind(Utc::now())
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(DbError::not_found("Partner or tier", format!("{}/{}", partner_id, tier_id)));
        }

        debug!(partner_id = %partner_id, tier_id = %tier_id, "Partner tier changed");
        Ok(())
    }

    /// Renames a tier. Ledger snapshots are not touched.
    pub async fn rename_tier(&self, tenant_id: &str, tier_id: &str, name: &str) -> DbResult<()> {
        let result = sqlx::query(
            "UPDATE partner_tiers SET name = ?3, updated_at = ?4 WHERE id = ?1 AND tenant_id = ?2",
        )
        .bind(tier_id)
        .bind(tenant_id)
        .bind(name)
        .bind(Utc::now())
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(DbError::not_found("PartnerTier", tier_id));
        }
        Ok(())
    }

    // =========================================================================
    // Lookups
    // =========================================================================

    /// Gets a partner by id, scoped to a tenant.
    pub async fn get_partner(&self, tenant_id: &str, id: &str) -> DbResult<Option<Partner>> {
        let row = sqlx::query(
            r#"
            SELECT id, tenant_id, code, tier_id, is_active, created_at
            FROM partners
            WHERE id = ?1 AND tenant_id = ?2
            "#,
        )
        .bind(id)
        .bind(tenant_id)
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(map_partner).transpose()
    }

    /// Gets a partner by referral code, scoped to a tenant.
    pub async fn get_partner_by_code(&self, tenant_id: &str, code: &str) -> DbResult<Option<Partner>> {
        let row = sqlx::query(
            r#"
            SELECT id, tenant_id, code, tier_id, is_active, created_at
            FROM partners
            WHERE code = ?1 AND tenant_id = ?2
            "#,
        )
        .bind(code)
        .bind(tenant_id)
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(map_partner).transpose()
    }

    /// Counts the partners of a tenant.
    pub async fn count_partners(&self, tenant_id: &str) -> DbResult<i64> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM partners WHERE tenant_id = ?1")
            .bind(tenant_id)
            .fetch_one(&self.pool)
            .await?;
        Ok(count)
    }

    /// Ancestors of `partner_id`, nearest first, at most `max_depth` of them.
    ///
    /// ## Truncation
    /// The walk stops at the first depth gap, missing partner or repeated
    /// ancestor. It also reports an incomplete chain when fewer rows exist
    /// than the stored ancestry path promises.
    pub async fn get_upline(&self, tenant_id: &str, partner_id: &str, max_depth: u32) -> DbResult<Upline> {
        let rows = sqlx::query(
            r#"
            SELECT r.parent_partner_id, r.depth, r.path, p.id AS partner_id, p.tier_id
            FROM partner_relations r
            LEFT JOIN partners p ON p.id = r.parent_partner_id
            WHERE r.tenant_id = ?1 AND r.child_partner_id = ?2 AND r.depth <= ?3
            ORDER BY r.depth ASC
            "#,
        )
        .bind(tenant_id)
        .bind(partner_id)
        .bind(i64::from(max_depth))
        .fetch_all(&self.pool)
        .await?;

        let mut entries = Vec::with_capacity(rows.len());
        let mut seen: HashSet<String> = HashSet::new();
        seen.insert(partner_id.to_string());
        let mut broken = false;
        let mut promised: usize = 0;

        for row in &rows {
            let path: String = row.try_get("path")?;
            promised = promised.max(path_len(&path));

            let depth: i64 = row.try_get("depth")?;
            let parent: String = row.try_get("parent_partner_id")?;
            let resolved: Option<String> = row.try_get("partner_id")?;
            let tier_id: Option<String> = row.try_get("tier_id")?;

            let expected = entries.len() as i64 + 1;
            if broken || depth != expected || resolved.is_none() || !seen.insert(parent.clone()) {
                broken = true;
                continue;
            }

            match tier_id {
                Some(tier_id) => entries.push(UplineEntry {
                    partner_id: parent,
                    tier_id,
                    depth: depth as u32,
                }),
                None => broken = true,
            }
        }

        let expected_len = promised.min(max_depth as usize);
        let complete = !broken && entries.len() >= expected_len;
        if !complete {
            warn!(
                tenant_id = %tenant_id,
                partner_id = %partner_id,
                resolved = entries.len(),
                expected = expected_len,
                "Upline chain is broken, using resolvable prefix"
            );
        }

        Ok(Upline { entries, complete })
    }

    /// Tiers by primary key, whatever tenant owns them.
    ///
    /// Each tier carries its `tenant_id`; callers verify ownership.
    pub async fn get_tiers(&self, tier_ids: &[String]) -> DbResult<Vec<PartnerTier>> {
        if tier_ids.is_empty() {
            return Ok(Vec::new());
        }

        let sql = format!(
            r#"
            SELECT id, tenant_id, level_code, name, sort_order,
                   default_commission_rate, max_referral_depth
            FROM partner_tiers
            WHERE id IN ({})
            "#,
            placeholders(tier_ids.len())
        );

        let mut query = sqlx::query(&sql);
        for id in tier_ids {
            query = query.bind(id);
        }

        let rows = query.fetch_all(&self.pool).await?;
        rows.iter().map(map_tier).collect()
    }

    /// All tiers of a tenant, entry level first.
    pub async fn list_tiers(&self, tenant_id: &str) -> DbResult<Vec<PartnerTier>> {
        let rows = sqlx::query(
            r#"
            SELECT id, tenant_id, level_code, name, sort_order,
                   default_commission_rate, max_referral_depth
            FROM partner_tiers
            WHERE tenant_id = ?1
            ORDER BY sort_order ASC, level_code ASC
            "#,
        )
        .bind(tenant_id)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(map_tier).collect()
    }

    /// Ground-truth owner tenant of each known partner id.
    ///
    /// Unknown ids are simply absent from the map.
    pub async fn partner_owners(&self, partner_ids: &[String]) -> DbResult<HashMap<String, String>> {
        if partner_ids.is_empty() {
            return Ok(HashMap::new());
        }

        let sql = format!(
            "SELECT id, tenant_id FROM partners WHERE id IN ({})",
            placeholders(partner_ids.len())
        );

        let mut query = sqlx::query(&sql);
        for id in partner_ids {
            query = query.bind(id);
        }

        let rows = query.fetch_all(&self.pool).await?;
        let mut owners = HashMap::with_capacity(rows.len());
        for row in &rows {
            owners.insert(row.try_get("id")?, row.try_get("tenant_id")?);
        }
        Ok(owners)
    }
}

// =============================================================================
// Hierarchy Maintenance
// =============================================================================

/// Writes the closure rows that put `partner_id` (a root) under `sponsor_id`.
async fn attach(
    conn: &mut SqliteConnection,
    tenant_id: &str,
    partner_id: &str,
    sponsor_id: &str,
    now: DateTime<Utc>,
) -> DbResult<()> {
    if partner_id == sponsor_id {
        return Err(DbError::InvalidHierarchy(format!(
            "partner {} cannot sponsor itself",
            partner_id
        )));
    }

    let partner_tenant = owner_of(conn, partner_id).await?;
    if partner_tenant.as_deref() != Some(tenant_id) {
        return Err(DbError::not_found("Partner", partner_id));
    }

    match owner_of(conn, sponsor_id).await? {
        Some(owner) if owner == tenant_id => {}
        Some(_) => {
            return Err(DbError::InvalidHierarchy(format!(
                "sponsor {} belongs to another tenant",
                sponsor_id
            )))
        }
        None => return Err(DbError::not_found("Partner", sponsor_id)),
    }

    let existing: Option<i64> = sqlx::query_scalar(
        "SELECT 1 FROM partner_relations WHERE tenant_id = ?1 AND child_partner_id = ?2 LIMIT 1",
    )
    .bind(tenant_id)
    .bind(partner_id)
    .fetch_optional(&mut *conn)
    .await?;
    if existing.is_some() {
        return Err(DbError::InvalidHierarchy(format!(
            "partner {} already has a sponsor",
            partner_id
        )));
    }

    // Descendants of the partner: (child, distance, path relative to partner)
    let subtree_rows = sqlx::query(
        r#"
        SELECT child_partner_id, depth, path FROM partner_relations
        WHERE tenant_id = ?1 AND parent_partner_id = ?2
        "#,
    )
    .bind(tenant_id)
    .bind(partner_id)
    .fetch_all(&mut *conn)
    .await?;
    let subtree = relation_triples(&subtree_rows)?;

    if subtree.iter().any(|(child, _, _)| child == sponsor_id) {
        return Err(DbError::InvalidHierarchy(format!(
            "sponsor {} is a descendant of {}",
            sponsor_id, partner_id
        )));
    }

    // Ancestors of the sponsor, nearest first
    let sponsor_rows = sqlx::query(
        r#"
        SELECT parent_partner_id, depth, path FROM partner_relations
        WHERE tenant_id = ?1 AND child_partner_id = ?2
        ORDER BY depth ASC
        "#,
    )
    .bind(tenant_id)
    .bind(sponsor_id)
    .fetch_all(&mut *conn)
    .await?;
    let sponsor_rows = relation_triples(&sponsor_rows)?;

    let partner_path = match sponsor_rows.first() {
        Some((_, _, path)) => format!("{}/{}", path, sponsor_id),
        None => sponsor_id.to_string(),
    };

    let mut ancestors = vec![(sponsor_id.to_string(), 0i64)];
    ancestors.extend(sponsor_rows.into_iter().map(|(parent, depth, _)| (parent, depth)));

    let mut descendants = vec![(partner_id.to_string(), 0i64, partner_path.clone())];
    descendants.extend(
        subtree
            .into_iter()
            .map(|(child, depth, path)| (child, depth, format!("{}/{}", partner_path, path))),
    );

    for (child, _, path) in descendants.iter().skip(1) {
        sqlx::query("UPDATE partner_relations SET path = ?3 WHERE tenant_id = ?1 AND child_partner_id = ?2")
            .bind(tenant_id)
            .bind(child)
            .bind(path)
            .execute(&mut *conn)
            .await?;
    }

    for (ancestor, up) in &ancestors {
        for (child, down, path) in &descendants {
            sqlx::query(
                r#"
                INSERT INTO partner_relations
                    (tenant_id, parent_partner_id, child_partner_id, depth, path, created_at)
                VALUES (?1, ?2, ?3, ?4, ?5, ?6)
                "#,
            )
            .bind(tenant_id)
            .bind(ancestor)
            .bind(child)
            .bind(up + down + 1)
            .bind(path)
            .bind(now)
            .execute(&mut *conn)
            .await?;
        }
    }

    debug!(
        partner_id = %partner_id,
        sponsor_id = %sponsor_id,
        moved = descendants.len(),
        "Partner attached to sponsor"
    );
    Ok(())
}

/// `(partner id, depth, path)` triples of closure rows.
fn relation_triples(rows: &[SqliteRow]) -> DbResult<Vec<(String, i64, String)>> {
    let mut triples = Vec::with_capacity(rows.len());
    for row in rows {
        triples.push((row.try_get(0)?, row.try_get(1)?, row.try_get(2)?));
    }
    Ok(triples)
}

async fn owner_of(conn: &mut SqliteConnection, partner_id: &str) -> DbResult<Option<String>> {
    let owner = sqlx::query_scalar("SELECT tenant_id FROM partners WHERE id = ?1")
        .bind(partner_id)
        .fetch_optional(&mut *conn)
        .await?;
    Ok(owner)
}

/// Number of ancestors a stored path promises.
fn path_len(path: &str) -> usize {
    path.split('/').filter(|segment| !segment.is_empty()).count()
}

// =============================================================================
// Row Mapping
// =============================================================================

fn map_partner(row: &SqliteRow) -> DbResult<Partner> {
    Ok(Partner {
        id: row.try_get("id")?,
        tenant_id: row.try_get("tenant_id")?,
        code: row.try_get("code")?,
        tier_id: row.try_get("tier_id")?,
        is_active: row.try_get("is_active")?,
        created_at: row.try_get("created_at")?,
    })
}

fn map_tier(row: &SqliteRow) -> DbResult<PartnerTier> {
    let rate: String = row.try_get("default_commission_rate")?;
    let depth: i64 = row.try_get("max_referral_depth")?;

    Ok(PartnerTier {
        id: row.try_get("id")?,
        tenant_id: row.try_get("tenant_id")?,
        level_code: row.try_get("level_code")?,
        name: row.try_get("name")?,
        sort_order: row.try_get("sort_order")?,
        default_commission_rate: Decimal::from_str(&rate)
            .map_err(|e| DbError::corrupt("default_commission_rate", e))?,
        max_referral_depth: u32::try_from(depth)
            .map_err(|e| DbError::corrupt("max_referral_depth", e))?,
    })
}

// =============================================================================
// Unit Tests
// =============================================================================
