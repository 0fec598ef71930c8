//! ExpenseFlow CLI - Expense ingestion from mail and chat
//!
//! Usage:
//!   expenseflow init             Initialize database
//!   expenseflow run-once         Run one mail ingestion cycle
//!   expenseflow monitor          Run mail ingestion on an interval
//!   expenseflow bot              Start the Telegram receipt bot
//!   expenseflow serve --ingest   Start web server with background ingestion

mod cli;
mod commands;


use anyhow::Result;
use clap::Parser;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use cli::*;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Set up logging
    // Priority: RUST_LOG env var > --verbose flag > default (info)
    let filter = if std::env::var("RUST_LOG").is_ok() {
        EnvFilter::from_default_env()
    } else if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::new("info")
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_target(false).compact())
        .init();

    match cli.command {
        Commands::Init => commands::cmd_init(&cli.db, cli.no_encrypt),
        Commands::Status => commands::cmd_status(&cli.db, cli.no_encrypt),
        Commands::Expenses {
            source,
            limit,
            json,
        } => {
            let db = commands::open_db(&cli.db, cli.no_encrypt)?;
            commands::cmd_expenses(&db, source.as_deref(), limit, json)
        }
        Commands::Prompts { action } => match action {
            None | Some(PromptsAction::List) => commands::cmd_prompts_list(),
            Some(PromptsAction::Show { prompt_id }) => commands::cmd_prompts_show(&prompt_id),
            Some(PromptsAction::Path) => commands::cmd_prompts_path(),
        },
        Commands::Serve {
            port,
            host,
            no_auth,
            ingest,
        } => commands::cmd_serve(&cli.db, &host, port, no_auth, cli.no_encrypt, ingest).await,
        Commands::Bot => commands::cmd_bot(&cli.db, cli.no_encrypt).await,
        Commands::Monitor => commands::cmd_monitor(&cli.db, cli.no_encrypt).await,
        Commands::RunOnce => commands::cmd_run_once(&cli.db, cli.no_encrypt).await,
    }
}
