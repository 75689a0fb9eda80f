//! # Sequence Repository
//!
//! Atomic per-tenant counters, e.g. the daily order number sequence.
//!
//! One UPSERT with RETURNING increments and reads in a single statement, so
//! concurrent callers never observe the same value.

use chrono::Utc;
use sqlx::SqlitePool;
use tracing::debug;

use crate::error::DbResult;

/// Repository for counters keyed by `(tenant, scope, period)`.
#[derive(Debug, Clone)]
pub struct SequenceRepository {
    pool: SqlitePool,
}

impl SequenceRepository {
    /// Creates a new SequenceRepository.
    pub fn new(pool: SqlitePool) -> Self {
        SequenceRepository { pool }
    }

    /// Increments the counter and returns the new value. The first call for
    /// a key returns 1.
    ///
    /// ## Example
    /// ```rust,ignore
    /// let period = upline_core::order_number::daily_period(today);
    /// let seq = db.sequences().next_value("t1", ORDER_SCOPE, &period).await?;
    /// let number = format_order_number(today, device_id, seq);
    /// ```
    pub async fn next_value(&self, tenant_id: &str, scope: &str, period: &str) -> DbResult<u64> {
        let value: i64 = sqlx::query_scalar(
            r#"
            INSERT INTO sequences (tenant_id, scope, period, value, updated_at)
            VALUES (?1, ?2, ?3, 1, ?4)
            ON CONFLICT (tenant_id, scope, period)
            DO UPDATE SET value = value + 1, updated_at = excluded.updated_at
            RETURNING value
            "#,
        )
        .bind(tenant_id)
        .bind(scope)
        .bind(period)
        .bind(Utc::now())
        .fetch_one(&self.pool)
        .await?;

        debug!(tenant_id = %tenant_id, scope = %scope, period = %period, value, "Sequence advanced");
        Ok(value as u64)
    }

    /// Current value without incrementing; `None` if never used.
    pub async fn current_value(&self, tenant_id: &str, scope: &str, period: &str) -> DbResult<Option<u64>> {
        let value: Option<i64> = sqlx::query_scalar(
            "SELECT value FROM sequences WHERE tenant_id = ?1 AND scope = ?2 AND period = ?3",
        )
        .bind(tenant_id)
        .bind(scope)
        .bind(period)
        .fetch_optional(&self.pool)
        .await?;

        Ok(value.map(|v| v as u64))
    }
}

#[cfg(test)]
mod tests {
    use crate::{Database, DbConfig};

    #[tokio::test]
    async fn test_counter_increments_per_key() {
        let db = Database::new(DbConfig::in_memory()).await.unwrap();
        let seq = db.sequences();

        assert_eq!(seq.current_value("t1", "order", "20260131").await.unwrap(), None);
        assert_eq!(seq.next_value("t1", "order", "20260131").await.unwrap(), 1);
        assert_eq!(seq.next_value("t1", "order", "20260131").await.unwrap(), 2);

        // Other tenant and other day start fresh
        assert_eq!(seq.next_value("t2", "order", "20260131").await.unwrap(), 1);
        assert_eq!(seq.next_value("t1", "order", "20260201").await.unwrap(), 1);

        assert_eq!(seq.current_value("t1", "order", "20260131").await.unwrap(), Some(2));
    }
}
