//! Core command implementations and shared utilities
//!
//! This module contains:
//! - `open_db` - Shared utility to open the database
//! - `build_extractor` - Model backend from the environment
//! - `cmd_init` - Initialize the database

use std::path::Path;

use anyhow::{Context, Result};
use expenseflow_core::ai::{AIBackend, AIClient, Extractor};
use expenseflow_core::db::Database;

/// Open database with encryption by default, or unencrypted if --no-encrypt
pub fn open_db(db_path: &Path, no_encrypt: bool) -> Result<Database> {
    let path_str = db_path
        .to_str()
        .context("Database path must be valid UTF-8")?;
    if no_encrypt {
        Database::new_unencrypted(path_str).context("Failed to open database (unencrypted)")
    } else {
        Database::new(path_str).context("Failed to open database")
    }
}

/// Build the extractor from AI_BACKEND and its host/model variables
///
/// Warns (but continues) when the backend does not answer its health check.
pub async fn build_extractor() -> Result<Extractor> {
    let client = AIClient::from_env().context(
        "No AI backend configured. Set OPENAI_COMPATIBLE_HOST and OPENAI_COMPATIBLE_MODEL, \
         or AI_BACKEND=ollama with OLLAMA_HOST and OLLAMA_MODEL",
    )?;

    println!("   🤖 Model: {} @ {}", client.model(), client.host());
    if !client.health_check().await {
        println!("   ⚠️  Model backend is not reachable yet, extractions will fail until it is");
    }

    Ok(Extractor::new(client))
}

pub fn cmd_init(db_path: &Path, no_encrypt: bool) -> Result<()> {
    println!("🔧 Initializing database at {}...", db_path.display());

    let db = open_db(db_path, no_encrypt)?;
    let existing = db.count_expenses().context("Failed to read expenses")?;
    if existing > 0 {
        println!("   Found {} existing expense records", existing);
    }

    if no_encrypt {
        println!("   ⚠️  Encryption: DISABLED (--no-encrypt)");
    } else {
        println!("   🔒 Encryption: ENABLED");
    }

    println!("✅ Database initialized successfully!");
    println!();
    println!("Next steps:");
    println!("  1. Ingest bank alerts: expenseflow run-once");
    println!("  2. Start the receipt bot: expenseflow bot");

    Ok(())
}
