//! Telegram bot command

use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};
use expenseflow_core::conversation::{ConversationEngine, SessionStore};
use expenseflow_core::gateway::PersistenceGateway;
use expenseflow_server::{run_telegram_bot, TelegramConfig};

use super::{build_extractor, open_db};

pub async fn cmd_bot(db_path: &Path, no_encrypt: bool) -> Result<()> {
    let config = TelegramConfig::from_env().context("TELEGRAM_BOT_TOKEN is not set")?;

    println!("🤖 Starting ExpenseFlow receipt bot...");
    println!("   Database: {}", db_path.display());
    println!("   Inbox: {}", config.inbox_dir.display());
    if no_encrypt {
        println!("   ⚠️  Encryption DISABLED (--no-encrypt)");
    }

    let db = open_db(db_path, no_encrypt)?;
    let extractor = build_extractor().await?;
    let engine = ConversationEngine::new(
        extractor,
        PersistenceGateway::new(db),
        SessionStore::new(),
    );

    println!();
    println!("   Press Ctrl+C to stop");

    run_telegram_bot(Arc::new(engine), config).await
}
