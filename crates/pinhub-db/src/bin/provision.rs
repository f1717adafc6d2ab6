//! # Device Token Provisioner
//!
//! Issues device tokens into the gateway database for development and
//! bench setups.
//!
//! ## Usage
//! ```bash
//! # Five devices for owner "user1" on dashboard 100 (device ids 1..=5)
//! cargo run -p pinhub-db --bin provision -- --owner user1 --dashboard 100
//!
//! # Custom range and database
//! cargo run -p pinhub-db --bin provision -- --owner acme-labs --dashboard 3 \
//!     --first-device 40 --count 20 --db ./data/pinhub.db
//! ```
//!
//! Re-running for the same devices reissues their tokens, which revokes the
//! previous ones.

use std::env;

use pinhub_core::{DeviceIdentity, DeviceToken};
use pinhub_db::{Database, DbConfig};
use uuid::Uuid;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args: Vec<String> = env::args().collect();

    let mut db_path = String::from("./pinhub_dev.db");
    let mut owner = String::from("user1");
    let mut dashboard: i64 = 100;
    let mut first_device: i64 = 1;
    let mut count: i64 = 5;

    let mut i = 1;
    while i < args.len() {
        let value = args.get(i + 1);
        match (args[i].as_str(), value) {
            ("--db" | "-d", Some(v)) => {
                db_path = v.clone();
                i += 1;
            }
            ("--owner" | "-o", Some(v)) => {
                owner = v.clone();
                i += 1;
            }
            ("--dashboard", Some(v)) => {
                dashboard = v.parse()?;
                i += 1;
            }
            ("--first-device", Some(v)) => {
                first_device = v.parse()?;
                i += 1;
            }
            ("--count" | "-c", Some(v)) => {
                count = v.parse()?;
                i += 1;
            }
            ("--help" | "-h", _) => {
                println!("PinHub device token provisioner");
                println!();
                println!("Usage: provision [OPTIONS]");
                println!();
                println!("Options:");
                println!("  -o, --owner <ID>          Owner id (default: user1)");
                println!("      --dashboard <N>       Dashboard id (default: 100)");
                println!("      --first-device <N>    First device id (default: 1)");
                println!("  -c, --count <N>           Number of devices (default: 5)");
                println!("  -d, --db <PATH>           Database file (default: ./pinhub_dev.db)");
                println!("  -h, --help                Show this help message");
                return Ok(());
            }
            _ => {}
        }
        i += 1;
    }

    if owner.is_empty() {
        return Err("owner must not be empty".into());
    }

    println!("PinHub device token provisioner");
    println!("===============================");
    println!("Database:  {}", db_path);
    println!("Owner:     {}", owner);
    println!("Dashboard: {}", dashboard);
    println!();

    let db = Database::new(DbConfig::new(&db_path)).await?;
    let tokens = db.device_tokens();

    for device_id in first_device..first_device + count {
        let identity = DeviceIdentity::new(owner.clone(), dashboard, device_id);
        let token = DeviceToken::new(identity.clone(), Uuid::new_v4().simple().to_string());
        tokens.upsert_token(&identity, &token.canonical()).await?;
        println!("  device {:>6}  {}", device_id, token.canonical());
    }

    println!();
    println!("✓ Issued {} tokens", count);

    db.close().await;
    Ok(())
}
