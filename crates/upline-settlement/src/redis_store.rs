//! # Redis Backend
//!
//! Locks and idempotency cache shared by every settling process.
//!
//! ## Keys
//! ```text
//! {prefix}:commission:lock:{n}:{tenant}:{tx}     SET NX PX <lease>  value = token
//! {prefix}:commission:settled:{n}:{tenant}:{tx}  SET EX <ttl>       value = JSON
//! ```
//!
//! `{n}` is the byte length of the tenant id.
//!
//! Release runs a Lua script that deletes the lock only while it still
//! holds the caller's token, so an expired holder cannot free a lock that
//! someone else has taken over since.

use std::time::Duration;

use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::Script;
use tracing::{debug, info};
use upline_core::SettlementSummary;
use uuid::Uuid;

use crate::error::SettleResult;
use crate::ports::{IdempotencyCache, LockService, LockToken};

const RELEASE_SCRIPT: &str = r#"
if redis.call("GET", KEYS[1]) == ARGV[1] then
    return redis.call("DEL", KEYS[1])
else
    return 0
end
"#;

/// Redis-backed [`LockService`] and [`IdempotencyCache`].
///
/// Cloning is cheap; clones share the multiplexed connection.
#[derive(Clone)]
pub struct RedisStore {
    conn: ConnectionManager,
    key_prefix: String,
    release: Script,
}

impl RedisStore {
    /// Connects to `url`. The connection manager reconnects on its own.
    pub async fn connect(url: &str, key_prefix: &str) -> SettleResult<Self> {
        let client = redis::Client::open(url)?;
        let conn = ConnectionManager::new(client).await?;
        info!(prefix = %key_prefix, "Connected to Redis");

        Ok(RedisStore {
            conn,
            key_prefix: key_prefix.to_string(),
            release: Script::new(RELEASE_SCRIPT),
        })
    }

    fn key(&self, key: &str) -> String {
        prefixed_key(&self.key_prefix, key)
    }

    /// Round-trips a PING.
    pub async fn health_check(&self) -> bool {
        let mut conn = self.conn.clone();
        redis::cmd("PING").query_async::<String>(&mut conn).await.is_ok()
    }
}

fn prefixed_key(prefix: &str, key: &str) -> String {
    if prefix.is_empty() {
        key.to_string()
    } else {
        format!("{}:{}", prefix, key)
    }
}

#[async_trait]
impl LockService for RedisStore {
    async fn try_acquire(&self, key: &str, lease: Duration) -> SettleResult<Option<LockToken>> {
        let mut conn = self.conn.clone();
        let token = Uuid::new_v4().to_string();

        let reply: Option<String> = redis::cmd("SET")
            .arg(self.key(key))
            .arg(&token)
            .arg("NX")
            .arg("PX")
            .arg(lease.as_millis().max(1) as u64)
            .query_async(&mut conn)
            .await?;

        Ok(reply.map(|_| LockToken {
            key: key.to_string(),
            token,
        }))
    }

    async fn release(&self, token: &LockToken) -> SettleResult<()> {
        let mut conn = self.conn.clone();
        let deleted: i64 = self
            .release
            .key(self.key(&token.key))
            .arg(&token.token)
            .invoke_async(&mut conn)
            .await?;

        if deleted == 0 {
            debug!(key = %token.key, "Lock lease expired before release");
        }
        Ok(())
    }
}

#[async_trait]
impl IdempotencyCache for RedisStore {
    async fn get(&self, key: &str) -> SettleResult<Option<SettlementSummary>> {
        let mut conn = self.conn.clone();
        let raw: Option<String> = redis::cmd("GET")
            .arg(self.key(key))
            .query_async(&mut conn)
            .await?;

        match raw {
            Some(json) => Ok(Some(serde_json::from_str(&json)?)),
            None => Ok(None),
        }
    }

    async fn set(&self, key: &str, summary: &SettlementSummary, ttl: Duration) -> SettleResult<()> {
        let mut conn = self.conn.clone();
        let json = serde_json::to_string(summary)?;

        redis::cmd("SET")
            .arg(self.key(key))
            .arg(json)
            .arg("EX")
            .arg(ttl.as_secs().max(1))
            .query_async::<()>(&mut conn)
            .await?;
        Ok(())
    }
}
