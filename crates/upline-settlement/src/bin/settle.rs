//! # Settle
//!
//! Settles one transaction from the command line and prints the result.
//!
//! ## Usage
//! ```bash
//! # Transaction JSON from a file
//! cargo run -p upline-settlement --bin settle -- tx.json
//!
//! # From stdin, explicit config and database
//! cat tx.json | cargo run -p upline-settlement --bin settle -- \
//!     --config ./settlement.toml --db ./upline_dev.db
//! ```
//!
//! ## Input
//! ```json
//! {
//!   "tenant_id": "demo",
//!   "transaction_id": "order-1001",
//!   "source_partner_id": "…",
//!   "amount": "1000.00",
//!   "currency": "USD",
//!   "transaction_type": "sale",
//!   "occurred_at": "2026-01-31T10:00:00Z"
//! }
//! ```
//!
//! The exit code is 0 on success, 2 for retryable failures and 1 otherwise.

use std::io::Read;
use std::path::PathBuf;
use std::sync::Arc;

use tracing::info;
use tracing_subscriber::EnvFilter;
use upline_core::Transaction;
use upline_db::Database;
use upline_settlement::{
    CoordinatorSettings, InMemoryIdempotencyCache, InMemoryLockService, RedisStore,
    SettlementConfig, SettlementCoordinator, SettlementError,
};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    init_tracing();

    let args: Vec<String> = std::env::args().collect();
    let mut config_path: Option<PathBuf> = None;
    let mut db_path: Option<String> = None;
    let mut input: Option<PathBuf> = None;

    let mut i = 1;
    while i < args.len() {
        match args[i].as_str() {
            "--config" | "-c" => {
                if i + 1 < args.len() {
                    config_path = Some(PathBuf::from(&args[i + 1]));
                    i += 1;
                }
            }
            "--db" | "-d" => {
                if i + 1 < args.len() {
                    db_path = Some(args[i + 1].clone());
                    i += 1;
                }
            }
            "--help" | "-h" => {
                println!("Upline Settle");
                println!();
                println!("Usage: settle [OPTIONS] [TRANSACTION_JSON]");
                println!();
                println!("Reads the transaction from TRANSACTION_JSON, or stdin when omitted.");
                println!();
                println!("Options:");
                println!("  -c, --config <PATH>  settlement.toml (default: platform config dir)");
                println!("  -d, --db <PATH>      Database file path (overrides config)");
                println!("  -h, --help           Show this help message");
                return Ok(());
            }
            other => input = Some(PathBuf::from(other)),
        }
        i += 1;
    }

    let mut config = SettlementConfig::load(config_path)?;
    if let Some(path) = db_path {
        config.database.path = path;
    }

    let raw = match input {
        Some(path) => std::fs::read_to_string(path)?,
        None => {
            let mut buf = String::new();
            std::io::stdin().read_to_string(&mut buf)?;
            buf
        }
    };
    let transaction: Transaction = serde_json::from_str(&raw)?;

    let db = Database::new(config.db_config()).await?;
    let settings = CoordinatorSettings::from(&config);

    let coordinator = match config.redis_url() {
        Some(url) => {
            let store = Arc::new(RedisStore::connect(url, &config.redis.key_prefix).await?);
            if !store.health_check().await {
                return Err(SettlementError::CoordinationUnavailable(
                    "Redis did not answer PING".to_string(),
                )
                .into());
            }
            SettlementCoordinator::with_sqlite(&db, store.clone(), store, settings)
        }
        None => {
            info!("No Redis configured, using in-process lock and cache");
            SettlementCoordinator::with_sqlite(
                &db,
                Arc::new(InMemoryLockService::new()),
                Arc::new(InMemoryIdempotencyCache::new()),
                settings,
            )
        }
    };

    let result = coordinator.process_commission_settlement(&transaction).await;
    println!("{}", serde_json::to_string_pretty(&result)?);

    db.close().await;

    let code = match &result.error {
        None => 0,
        Some(err) if err.retryable => 2,
        Some(_) => 1,
    };
    std::process::exit(code);
}

/// `RUST_LOG` controls verbosity; defaults to info. Logs go to stderr so
/// stdout carries only the result JSON.
fn init_tracing() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,sqlx=warn"));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}
