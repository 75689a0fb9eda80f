//! # Settlement Configuration
//!
//! Configuration management for the settlement engine.
//!
//! ## Configuration Sources
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                    Configuration Priority                               │
//! │                                                                         │
//! │  1. Environment Variables (highest priority)                           │
//! │     UPLINE_DATABASE_PATH=/var/lib/upline/upline.db                     │
//! │     UPLINE_REDIS_URL=redis://cache:6379                                │
//! │                                                                         │
//! │  2. TOML Config File                                                   │
//! │     ~/.config/upline/settlement.toml (Linux)                           │
//! │     ~/Library/Application Support/com.upline.upline/settlement.toml    │
//! │                                                                         │
//! │  3. Default Values (lowest priority)                                   │
//! │     depth 10, cache TTL 1 h, in-process locks                          │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Configuration File Format
//! ```toml
//! # settlement.toml
//! [engine]
//! max_upline_depth = 10
//! engine_version = "upline-0.1.0"
//!
//! [idempotency]
//! cache_ttl_secs = 3600
//!
//! [lock]
//! lease_secs = 30
//! wait_timeout_ms = 5000
//! initial_backoff_ms = 20
//! max_backoff_ms = 500
//!
//! [database]
//! path = "./upline.db"
//! max_connections = 5
//!
//! [redis]
//! url = "redis://127.0.0.1:6379"   # omit for in-process locks and cache
//! key_prefix = "upline"
//! ```

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;
use tracing::{debug, info, warn};

use upline_core::{CalculatorSettings, ENGINE_VERSION, GLOBAL_MAX_DEPTH};
use upline_db::DbConfig;

use crate::error::{SettleResult, SettlementError};
use crate::lock::LockWait;

// =============================================================================
// Engine Settings
// =============================================================================

/// Commission calculation settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineSettings {
    /// Ceiling for upline traversal. Tier depth limits apply below it.
    #[serde(default = "default_max_upline_depth")]
    pub max_upline_depth: u32,

    /// Stamped into every commission record.
    #[serde(default = "default_engine_version")]
    pub engine_version: String,
}

fn default_max_upline_depth() -> u32 {
    GLOBAL_MAX_DEPTH
}

fn default_engine_version() -> String {
    ENGINE_VERSION.to_string()
}

impl Default for EngineSettings {
    fn default() -> Self {
        EngineSettings {
            max_upline_depth: default_max_upline_depth(),
            engine_version: default_engine_version(),
        }
    }
}

// =============================================================================
// Idempotency Settings
// =============================================================================

/// Idempotency cache settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IdempotencySettings {
    /// How long a settled summary is served from cache (seconds).
    #[serde(default = "default_cache_ttl")]
    pub cache_ttl_secs: u64,
}

fn default_cache_ttl() -> u64 {
    3600
}

impl Default for IdempotencySettings {
    fn default() -> Self {
        IdempotencySettings {
            cache_ttl_secs: default_cache_ttl(),
        }
    }
}

// =============================================================================
// Lock Settings
// =============================================================================

/// Per-transaction settlement lock settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LockSettings {
    /// Lease after which a crashed holder's lock expires (seconds).
    #[serde(default = "default_lease")]
    pub lease_secs: u64,

    /// Total time to wait for the lock before reporting contention (ms).
    #[serde(default = "default_wait_timeout")]
    pub wait_timeout_ms: u64,

    /// First wait between acquisition attempts (ms).
    #[serde(default = "default_initial_backoff")]
    pub initial_backoff_ms: u64,

    /// Longest wait between acquisition attempts (ms).
    #[serde(default = "default_max_backoff")]
    pub max_backoff_ms: u64,
}

fn default_lease() -> u64 {
    30
}
fn default_wait_timeout() -> u64 {
    5000
}
fn default_initial_backoff() -> u64 {
    20
}
fn default_max_backoff() -> u64 {
    500
}

impl Default for LockSettings {
    fn default() -> Self {
        LockSettings {
            lease_secs: default_lease(),
            wait_timeout_ms: default_wait_timeout(),
            initial_backoff_ms: default_initial_backoff(),
            max_backoff_ms: default_max_backoff(),
        }
    }
}

// =============================================================================
// Database Settings
// =============================================================================

/// SQLite settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseSettings {
    /// Database file path.
    #[serde(default = "default_database_path")]
    pub path: String,

    /// Maximum pool connections.
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
}

fn default_database_path() -> String {
    "./upline.db".to_string()
}

fn default_max_connections() -> u32 {
    5
}

impl Default for DatabaseSettings {
    fn default() -> Self {
        DatabaseSettings {
            path: default_database_path(),
            max_connections: default_max_connections(),
        }
    }
}

// =============================================================================
// Redis Settings
// =============================================================================

/// Redis backend for locks and the idempotency cache.
///
/// Without a URL the engine uses in-process locks and cache, which only
/// protect a single process.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RedisSettings {
    #[serde(default)]
    pub url: Option<String>,

    /// Prepended to every key, `{prefix}:commission:...`.
    #[serde(default = "default_key_prefix")]
    pub key_prefix: String,
}

fn default_key_prefix() -> String {
    "upline".to_string()
}

impl Default for RedisSettings {
    fn default() -> Self {
        RedisSettings {
            url: None,
            key_prefix: default_key_prefix(),
        }
    }
}

// =============================================================================
// Main Settlement Configuration
// =============================================================================

/// Complete settlement configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SettlementConfig {
    #[serde(default)]
    pub engine: EngineSettings,

    #[serde(default)]
    pub idempotency: IdempotencySettings,

    #[serde(default)]
    pub lock: LockSettings,

    #[serde(default)]
    pub database: DatabaseSettings,

    #[serde(default)]
    pub redis: RedisSettings,
}

impl SettlementConfig {
    /// Creates a new config with defaults.
    pub fn new() -> Self {
        Self::default()
    }

    /// Loads configuration from file, environment, and defaults.
    ///
    /// ## Load Order (later overrides earlier)
    /// 1. Default values
    /// 2. Config file (settlement.toml)
    /// 3. Environment variables
    pub fn load(config_path: Option<PathBuf>) -> SettleResult<Self> {
        let mut config = Self::default();

        if let Some(path) = config_path.or_else(Self::default_config_path) {
            if path.exists() {
                info!(?path, "Loading settlement config from file");
                let contents = std::fs::read_to_string(&path)?;
                config = toml::from_str(&contents)?;
            } else {
                debug!(?path, "Config file not found, using defaults");
            }
        }

        config.apply_env_overrides();
        config.validate()?;

        Ok(config)
    }

    /// Loads config or returns default if load fails.
    pub fn load_or_default(config_path: Option<PathBuf>) -> Self {
        Self::load(config_path).unwrap_or_else(|e| {
            warn!("Failed to load settlement config: {}. Using defaults.", e);
            Self::default()
        })
    }

    /// Saves configuration to file.
    pub fn save(&self, config_path: Option<PathBuf>) -> SettleResult<()> {
        let path = config_path
            .or_else(Self::default_config_path)
            .ok_or_else(|| SettlementError::ConfigSaveFailed("No config path available".into()))?;

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let contents = toml::to_string_pretty(self)?;
        std::fs::write(&path, contents)?;

        info!(?path, "Settlement config saved");
        Ok(())
    }

    /// Validates the configuration.
    pub fn validate(&self) -> SettleResult<()> {
        if self.engine.max_upline_depth == 0 {
            return Err(SettlementError::InvalidConfig(
                "max_upline_depth must be greater than 0".into(),
            ));
        }

        if self.engine.engine_version.trim().is_empty() {
            return Err(SettlementError::InvalidConfig(
                "engine_version must not be empty".into(),
            ));
        }

        if self.idempotency.cache_ttl_secs == 0 {
            return Err(SettlementError::InvalidConfig(
                "cache_ttl_secs must be greater than 0".into(),
            ));
        }

        let lock = &self.lock;
        if lock.lease_secs == 0 || lock.wait_timeout_ms == 0 {
            return Err(SettlementError::InvalidConfig(
                "lock lease and wait timeout must be greater than 0".into(),
            ));
        }
        if lock.initial_backoff_ms == 0 || lock.initial_backoff_ms > lock.max_backoff_ms {
            return Err(SettlementError::InvalidConfig(format!(
                "initial_backoff_ms ({}) must be in 1..=max_backoff_ms ({})",
                lock.initial_backoff_ms, lock.max_backoff_ms
            )));
        }

        if self.database.path.trim().is_empty() {
            return Err(SettlementError::InvalidConfig("database path must not be empty".into()));
        }
        if self.database.max_connections == 0 {
            return Err(SettlementError::InvalidConfig(
                "max_connections must be greater than 0".into(),
            ));
        }

        if let Some(ref url) = self.redis.url {
            if !url.starts_with("redis://") && !url.starts_with("rediss://") && !url.starts_with("unix://") {
                return Err(SettlementError::InvalidConfig(format!(
                    "Redis URL must start with redis://, rediss:// or unix://, got: {}",
                    url
                )));
            }
        }

        Ok(())
    }

    /// Applies environment variable overrides.
    fn apply_env_overrides(&mut self) {
        if let Ok(depth) = std::env::var("UPLINE_MAX_UPLINE_DEPTH") {
            if let Ok(d) = depth.parse::<u32>() {
                debug!(depth = d, "Overriding max upline depth from environment");
                self.engine.max_upline_depth = d;
            }
        }

        if let Ok(version) = std::env::var("UPLINE_ENGINE_VERSION") {
            self.engine.engine_version = version;
        }

        if let Ok(ttl) = std::env::var("UPLINE_CACHE_TTL_SECS") {
            if let Ok(t) = ttl.parse::<u64>() {
                self.idempotency.cache_ttl_secs = t;
            }
        }

        if let Ok(lease) = std::env::var("UPLINE_LOCK_LEASE_SECS") {
            if let Ok(l) = lease.parse::<u64>() {
                self.lock.lease_secs = l;
            }
        }

        if let Ok(wait) = std::env::var("UPLINE_LOCK_WAIT_MS") {
            if let Ok(w) = wait.parse::<u64>() {
                debug!(wait_ms = w, "Overriding lock wait from environment");
                self.lock.wait_timeout_ms = w;
            }
        }

        if let Ok(path) = std::env::var("UPLINE_DATABASE_PATH") {
            debug!(path = %path, "Overriding database path from environment");
            self.database.path = path;
        }

        if let Ok(max) = std::env::var("UPLINE_DB_MAX_CONNECTIONS") {
            if let Ok(m) = max.parse::<u32>() {
                self.database.max_connections = m;
            }
        }

        if let Ok(url) = std::env::var("UPLINE_REDIS_URL") {
            debug!("Overriding Redis URL from environment");
            self.redis.url = Some(url).filter(|u| !u.is_empty());
        }
    }

    /// Returns the default config file path.
    fn default_config_path() -> Option<PathBuf> {
        directories::ProjectDirs::from("com", "upline", "upline")
            .map(|dirs| dirs.config_dir().join("settlement.toml"))
    }

    // =========================================================================
    // Convenience Methods
    // =========================================================================

    /// Settings handed to the commission calculator.
    pub fn calculator_settings(&self) -> CalculatorSettings {
        CalculatorSettings {
            max_depth: self.engine.max_upline_depth,
            engine_version: self.engine.engine_version.clone(),
        }
    }

    /// Lock lease and wait policy.
    pub fn lock_wait(&self) -> LockWait {
        LockWait {
            lease: Duration::from_secs(self.lock.lease_secs),
            wait_timeout: Duration::from_millis(self.lock.wait_timeout_ms),
            initial_backoff: Duration::from_millis(self.lock.initial_backoff_ms),
            max_backoff: Duration::from_millis(self.lock.max_backoff_ms),
        }
    }

    /// Lifetime of cached summaries.
    pub fn cache_ttl(&self) -> Duration {
        Duration::from_secs(self.idempotency.cache_ttl_secs)
    }

    /// SQLite pool configuration.
    pub fn db_config(&self) -> DbConfig {
        DbConfig::new(&self.database.path).max_connections(self.database.max_connections)
    }

    /// Returns the Redis URL if configured.
    pub fn redis_url(&self) -> Option<&str> {
        self.redis.url.as_deref()
    }
}
