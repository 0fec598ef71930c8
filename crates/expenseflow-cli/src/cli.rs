//! CLI argument definitions using clap
//!
//! This module contains all the clap structs and enums for parsing CLI arguments.
//! The actual command implementations are in the `commands` module.

use std::path::PathBuf;

use clap::{Parser, Subcommand};

/// ExpenseFlow - Turn bank alerts and receipts into expense records
#[derive(Parser)]
#[command(name = "expenseflow")]
#[command(about = "Expense ingestion from bank alerts, forwarded receipts and a chat bot", long_about = None)]
#[command(version)]
pub struct Cli {
    /// Database path
    #[arg(long, default_value = "expenseflow.db", global = true)]
    pub db: PathBuf,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Disable database encryption (not recommended for production)
    ///
    /// By default, the database is encrypted using SQLCipher.
    /// Set EXPENSEFLOW_DB_KEY environment variable with your passphrase.
    /// Use --no-encrypt only for development or testing.
    #[arg(long, global = true)]
    pub no_encrypt: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Initialize the database
    Init,

    /// Show database status (encryption, record counts, watermark)
    Status,

    /// List stored expenses, newest first
    Expenses {
        /// Only show one source: email, forwarded_email, telegram
        #[arg(short, long)]
        source: Option<String>,

        /// Number of records to show
        #[arg(short, long, default_value = "20")]
        limit: i64,

        /// Print records as JSON
        #[arg(long)]
        json: bool,
    },

    /// Manage extraction prompts (list, show, path)
    Prompts {
        #[command(subcommand)]
        action: Option<PromptsAction>,
    },

    /// Start the web server
    Serve {
        /// Port to listen on
        #[arg(short, long, default_value = "3000")]
        port: u16,

        /// Host to bind to
        #[arg(long, default_value = "127.0.0.1")]
        host: String,

        /// Disable authentication (for local development only)
        ///
        /// WARNING: Do not use this flag when exposing the server to a network.
        /// By default, /api requires a bearer key from EXPENSEFLOW_API_KEYS.
        #[arg(long)]
        no_auth: bool,

        /// Also run mail ingestion every CHECK_INTERVAL_MINUTES
        #[arg(long)]
        ingest: bool,
    },

    /// Run the Telegram receipt bot (long polling)
    Bot,

    /// Run mail ingestion every CHECK_INTERVAL_MINUTES until Ctrl+C
    Monitor,

    /// Run a single mail ingestion cycle and exit (non-zero on failure)
    RunOnce,
}

#[derive(Subcommand)]
pub enum PromptsAction {
    /// List all available prompts and their override status
    List,

    /// Show the content of a specific prompt
    Show {
        /// Prompt ID (e.g., extract_transaction_alert, extract_receipt)
        prompt_id: String,
    },

    /// Show the path where prompt overrides should be placed
    Path,
}
