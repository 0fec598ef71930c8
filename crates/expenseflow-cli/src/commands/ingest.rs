//! Mail ingestion commands (monitor, run-once)

use std::path::Path;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use expenseflow_core::db::Database;
use expenseflow_core::gateway::PersistenceGateway;
use expenseflow_core::monitors::monitors_from_env;
use expenseflow_core::pipeline::{CycleSummary, IngestionPipeline};
use expenseflow_server::{run_ingestion_loop, IngestionScheduleConfig};

use super::{build_extractor, open_db};

/// Assemble the pipeline from the store and the configured mailboxes
pub async fn build_pipeline(db: Database) -> Result<IngestionPipeline> {
    let extractor = build_extractor().await?;

    let monitors = monitors_from_env()
        .await
        .context("Failed to open mail session")?;
    if monitors.is_empty() {
        bail!(
            "No mailbox configured. Set GMAIL_ACCESS_TOKEN, or GMAIL_CLIENT_ID, \
             GMAIL_CLIENT_SECRET and GMAIL_REFRESH_TOKEN"
        );
    }

    let pipeline =
        IngestionPipeline::new(extractor, PersistenceGateway::new(db)).with_monitors(monitors);
    println!("   📬 Monitors: {}", pipeline.monitor_names().join(", "));

    Ok(pipeline)
}

/// Run one cycle from the stored watermark
///
/// An unreachable mailbox fails the run so cron marks it failed.
pub async fn run_pipeline_once(pipeline: &IngestionPipeline) -> Result<CycleSummary> {
    let summary = pipeline
        .run_once()
        .await
        .context("Ingestion cycle failed")?;

    print_summary(&summary);

    if summary.source_errors() > 0 {
        bail!(
            "{} mailbox(es) could not be read this cycle",
            summary.source_errors()
        );
    }

    Ok(summary)
}

fn print_summary(summary: &CycleSummary) {
    println!();
    println!("📊 Ingestion Results");
    println!("   ─────────────────────────────");
    match summary.since {
        Some(since) => println!("   Since: {}", since.format("%Y-%m-%d %H:%M:%S UTC")),
        None => println!("   Since: first run (lookback window)"),
    }
    for monitor in &summary.monitors {
        match &monitor.error {
            Some(err) => println!("   ❌ {}: {}", monitor.monitor, err),
            None => println!(
                "   {}: {} fetched, {} saved, {} duplicate, {} failed",
                monitor.monitor, monitor.fetched, monitor.saved, monitor.duplicates, monitor.failed
            ),
        }
    }
    println!(
        "   Total: {} saved, {} duplicate, {} failed",
        summary.saved, summary.duplicates, summary.failed
    );
}

pub async fn cmd_run_once(db_path: &Path, no_encrypt: bool) -> Result<()> {
    println!("📥 Running one ingestion cycle...");

    let db = open_db(db_path, no_encrypt)?;
    let pipeline = build_pipeline(db).await?;
    run_pipeline_once(&pipeline).await?;

    println!();
    println!("✅ Cycle complete");
    Ok(())
}

pub async fn cmd_monitor(db_path: &Path, no_encrypt: bool) -> Result<()> {
    let config = IngestionScheduleConfig::from_env()
        .context("CHECK_INTERVAL_MINUTES is 0, nothing to schedule (use run-once instead)")?;

    println!(
        "🔁 Starting mail monitor (every {} minutes)...",
        config.interval_minutes
    );

    let db = open_db(db_path, no_encrypt)?;
    let pipeline = Arc::new(build_pipeline(db).await?);

    println!();
    println!("   Press Ctrl+C to stop");

    run_ingestion_loop(pipeline, config, async {
        let _ = tokio::signal::ctrl_c().await;
    })
    .await;

    println!("👋 Monitor stopped");
    Ok(())
}
