//! Server command implementation

use std::path::Path;
use std::sync::Arc;

use anyhow::Result;
use expenseflow_server::{start_ingestion_scheduler, IngestionScheduleConfig, ServerConfig};

use super::{build_pipeline, open_db};

pub async fn cmd_serve(
    db_path: &Path,
    host: &str,
    port: u16,
    no_auth: bool,
    no_encrypt: bool,
    ingest: bool,
) -> Result<()> {
    println!("🚀 Starting ExpenseFlow web server...");
    println!("   Database: {}", db_path.display());
    println!("   Listening: http://{}:{}", host, port);

    let config = ServerConfig::from_env(!no_auth);

    if no_auth {
        println!();
        println!("   ⚠️  Authentication DISABLED - do not expose to network!");
    } else if config.api_keys.is_empty() {
        println!(
            "   ❌ No API keys configured, set {} to reach /api",
            expenseflow_server::API_KEYS_ENV
        );
    } else {
        println!(
            "   🔑 API keys: {} configured ({})",
            config.api_keys.len(),
            expenseflow_server::API_KEYS_ENV
        );
    }
    if no_encrypt {
        println!("   ⚠️  Encryption DISABLED (--no-encrypt)");
    }

    let db = open_db(db_path, no_encrypt)?;

    if ingest {
        match IngestionScheduleConfig::from_env() {
            Some(schedule) => {
                println!(
                    "   📥 Ingestion: every {} minutes",
                    schedule.interval_minutes
                );
                let pipeline = build_pipeline(db.clone()).await?;
                start_ingestion_scheduler(Arc::new(pipeline), schedule);
            }
            None => println!("   📥 Ingestion: disabled (CHECK_INTERVAL_MINUTES=0)"),
        }
    }

    println!();
    println!("   Press Ctrl+C to stop");

    expenseflow_server::serve_with_config(db, host, port, config).await?;

    Ok(())
}
