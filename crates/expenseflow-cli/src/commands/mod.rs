//! CLI command implementations
//!
//! Commands are organized by domain:
//! - `bot` - Telegram receipt bot
//! - `core` - Init command and shared utilities (open_db, build_extractor)
//! - `ingest` - Mail ingestion commands (monitor, run-once)
//! - `prompts` - Prompt library management commands
//! - `serve` - Web server command
//! - `status` - Status and expense listing commands

pub mod bot;
pub mod core;
pub mod ingest;
pub mod prompts;
pub mod serve;
pub mod status;

// Re-export command functions for main.rs
pub use bot::*;
pub use core::*;
pub use ingest::*;
pub use prompts::*;
pub use serve::*;
pub use status::*;

/// Truncate a string to a maximum length, adding "..." if truncated
pub fn truncate(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        s.to_string()
    } else {
        let kept: String = s.chars().take(max.saturating_sub(3)).collect();
        format!("{}...", kept)
    }
}
