//! Status and expense listing command implementations

use std::path::Path;

use anyhow::{anyhow, Result};
use expenseflow_core::db::{Database, ExpenseFilter, DB_KEY_ENV};
use expenseflow_core::models::Source;

use super::{open_db, truncate};

pub fn cmd_status(db_path: &Path, no_encrypt: bool) -> Result<()> {
    use std::fs;

    println!();
    println!("📊 ExpenseFlow Status");
    println!("   ─────────────────────────────────────────────────────────────");

    // Database path
    println!("   Database: {}", db_path.display());

    // Check if database file exists and get size
    if db_path.exists() {
        if let Ok(metadata) = fs::metadata(db_path) {
            let size_kb = metadata.len() as f64 / 1024.0;
            if size_kb < 1024.0 {
                println!("   Size: {:.1} KB", size_kb);
            } else {
                println!("   Size: {:.1} MB", size_kb / 1024.0);
            }
        }
    } else {
        println!("   Size: (database not initialized)");
    }

    // Check encryption status
    let has_key = std::env::var(DB_KEY_ENV).is_ok();
    if no_encrypt {
        println!("   ⚠️  Encryption: DISABLED (--no-encrypt)");
    } else if has_key {
        println!("   🔒 Encryption: ENABLED ({}=***)", DB_KEY_ENV);
    } else {
        println!("   ❌ Encryption: REQUIRED but {} not set", DB_KEY_ENV);
    }

    // Try to open the database and show stats
    if db_path.exists() {
        match open_db(db_path, no_encrypt) {
            Ok(db) => {
                if let Ok(stats) = db.store_stats() {
                    println!();
                    println!("   Expenses: {}", stats.total);
                    for (source, count) in &stats.by_source {
                        println!("     {:<16} {}", source.as_str(), count);
                    }
                    println!("   Reconciliations: {}", stats.reconciliations);
                    match stats.watermark {
                        Some(ts) => println!(
                            "   Last mail ingest: {}",
                            ts.format("%Y-%m-%d %H:%M:%S UTC")
                        ),
                        None => println!("   Last mail ingest: never (first cycle uses lookback)"),
                    }
                }
            }
            Err(e) => {
                println!();
                println!("   ❌ Error opening database: {}", e);
                if !no_encrypt && !has_key {
                    println!("      Set {} or use --no-encrypt", DB_KEY_ENV);
                } else if has_key {
                    println!("      (Check if {} is correct)", DB_KEY_ENV);
                }
            }
        }
    }

    println!();
    Ok(())
}

pub fn cmd_expenses(db: &Database, source: Option<&str>, limit: i64, json: bool) -> Result<()> {
    let source = source
        .map(|s| s.parse::<Source>().map_err(|e| anyhow!(e)))
        .transpose()?;

    let expenses = db.list_expenses(&ExpenseFilter {
        source,
        limit: limit.max(1),
        ..Default::default()
    })?;

    if json {
        println!("{}", serde_json::to_string_pretty(&expenses)?);
        return Ok(());
    }

    if expenses.is_empty() {
        println!("No expenses found.");
        return Ok(());
    }

    println!(
        "{:>5}  {:<10}  {:<28}  {:>12}  {:<15}  {}",
        "ID", "DATE", "MERCHANT", "AMOUNT", "SOURCE", "CATEGORY"
    );
    println!("{}", "-".repeat(90));

    for e in &expenses {
        let date = e
            .date
            .map(|d| d.format("%Y-%m-%d").to_string())
            .unwrap_or_else(|| "-".to_string());
        let category = match (&e.main_category, &e.project) {
            (Some(main), Some(project)) => format!("{} / {}", main, project),
            (Some(main), None) => main.to_string(),
            (None, _) => e.category.clone().unwrap_or_else(|| "-".to_string()),
        };

        println!(
            "{:>5}  {:<10}  {:<28}  {:>12}  {:<15}  {}",
            e.id,
            date,
            truncate(&e.merchant, 28),
            format!("{} {:.2}", e.currency, e.amount),
            e.source.as_str(),
            category
        );
    }

    println!();
    println!("Showing {} record(s)", expenses.len());

    Ok(())
}
