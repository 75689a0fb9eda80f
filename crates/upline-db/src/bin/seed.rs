//! # Seed Data Generator
//!
//! Populates the database with a demo tenant, its tiers and a partner tree.
//!
//! ## Usage
//! ```bash
//! # Demo tenant with a 4-level tree, 3 partners per sponsor (default)
//! cargo run -p upline-db --bin seed
//!
//! # Custom shape
//! cargo run -p upline-db --bin seed -- --levels 6 --fanout 2
//!
//! # Specify database path
//! cargo run -p upline-db --bin seed -- --db ./data/upline.db
//! ```
//!
//! ## Generated Data
//! - Tenant `demo`
//! - Tiers BRONZE (2%, depth 1), SILVER (5%, depth 3), GOLD (8%, depth 6),
//!   DIAMOND (10%, depth 10)
//! - A partner tree, tier chosen by distance from the root (nearer = higher)
//! - Partner codes `P{level}-{index}`

use rust_decimal::Decimal;
use std::env;
use upline_db::{Database, DbConfig, NewTier};

const TENANT_ID: &str = "demo";

/// (level_code, name, rate in basis points, max_referral_depth)
const TIERS: &[(&str, &str, i64, u32)] = &[
    ("BRONZE", "Bronze", 200, 1),
    ("SILVER", "Silver", 500, 3),
    ("GOLD", "Gold", 800, 6),
    ("DIAMOND", "Diamond", 1000, 10),
];

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args: Vec<String> = env::args().collect();

    let mut levels: usize = 4;
    let mut fanout: usize = 3;
    let mut db_path = String::from("./upline_dev.db");

    let mut i = 1;
    while i < args.len() {
        match args[i].as_str() {
            "--levels" | "-l" => {
                if i + 1 < args.len() {
                    levels = args[i + 1].parse().unwrap_or(4);
                    i += 1;
                }
            }
            "--fanout" | "-f" => {
                if i + 1 < args.len() {
                    fanout = args[i + 1].parse().unwrap_or(3);
                    i += 1;
                }
            }
            "--db" | "-d" => {
                if i + 1 < args.len() {
                    db_path = args[i + 1].clone();
                    i += 1;
                }
            }
            "--help" | "-h" => {
                println!("Upline Seed Data Generator");
                println!();
                println!("Usage: seed [OPTIONS]");
                println!();
                println!("Options:");
                println!("  -l, --levels <N>   Depth of the partner tree (default: 4)");
                println!("  -f, --fanout <N>   Partners per sponsor (default: 3)");
                println!("  -d, --db <PATH>    Database file path (default: ./upline_dev.db)");
                println!("  -h, --help         Show this help message");
                return Ok(());
            }
            _ => {}
        }
        i += 1;
    }

    println!("🌱 Upline Seed Data Generator");
    println!("============================");
    println!("Database: {}", db_path);
    println!("Tree:     {} levels, fanout {}", levels, fanout);
    println!();

    let db = Database::new(DbConfig::new(&db_path)).await?;
    println!("✓ Connected to database");
    println!("✓ Migrations applied");

    let partners = db.partners();
    let existing = partners.count_partners(TENANT_ID).await?;
    if existing > 0 {
        println!("⚠ Tenant '{}' already has {} partners", TENANT_ID, existing);
        println!("  Skipping seed to avoid duplicates.");
        println!("  Delete the database file to regenerate.");
        return Ok(());
    }

    partners.create_tenant(TENANT_ID, "Demo Commerce").await?;

    let mut tiers = Vec::with_capacity(TIERS.len());
    for (order, (code, name, bps, depth)) in TIERS.iter().enumerate() {
        let tier = partners
            .create_tier(NewTier {
                tenant_id: TENANT_ID.to_string(),
                level_code: code.to_string(),
                name: name.to_string(),
                sort_order: order as i32,
                default_commission_rate: Decimal::new(*bps, 4),
                max_referral_depth: *depth,
            })
            .await?;
        println!("  Tier {:<8} {:>6} depth {}", tier.level_code, tier.default_commission_rate, depth);
        tiers.push(tier);
    }

    let start = std::time::Instant::now();
    let top_tier = &tiers[tiers.len() - 1];
    let root = partners.create_partner(TENANT_ID, "P0-0", &top_tier.id, None).await?;

    let mut generated = 1;
    let mut current_level = vec![root];

    for level in 1..levels {
        // Nearer the root = higher tier
        let tier = &tiers[tiers.len().saturating_sub(level + 1)];
        let mut next_level = Vec::with_capacity(current_level.len() * fanout);

        for sponsor in &current_level {
            for _ in 0..fanout {
                let code = format!("P{}-{}", level, next_level.len());
                let partner = partners
                    .create_partner(TENANT_ID, &code, &tier.id, Some(&sponsor.id))
                    .await?;
                next_level.push(partner);
                generated += 1;
            }
        }

        println!("  Level {}: {} partners", level, next_level.len());
        current_level = next_level;
    }

    let elapsed = start.elapsed();
    println!();
    println!("✓ Generated {} partners in {:?}", generated, elapsed);

    if let Some(leaf) = current_level.first() {
        let upline = partners.get_upline(TENANT_ID, &leaf.id, 10).await?;
        println!();
        println!("Sample leaf {} ({}):", leaf.code, leaf.id);
        println!("  upline depth {} (complete: {})", upline.len(), upline.complete);
    }

    println!();
    println!("✓ Seed complete!");

    Ok(())
}
