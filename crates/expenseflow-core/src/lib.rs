//! ExpenseFlow Core Library
//!
//! Shared functionality for the ExpenseFlow expense ingestion system:
//! - Database access and migrations (expenses, reconciliations, audit log)
//! - Pluggable AI backends and the receipt/alert extractor
//! - Prompt library for customizable extraction prompts
//! - Duplicate detection for chat-submitted receipts
//! - Conversation engine for interactive receipt classification
//! - Source monitors and the unattended batch ingestion pipeline

pub mod ai;
pub mod conversation;
pub mod db;
pub mod dedup;
pub mod error;
pub mod gateway;
pub mod models;
pub mod monitors;
pub mod pipeline;
pub mod prompts;

/// Test utilities including mock model and Gmail servers
#[cfg(any(test, feature = "test-utils"))]
pub mod test_utils;

pub use ai::{
    AIBackend, AIClient, ExtractionError, ExtractionInput, ExtractionKind, Extractor, MockBackend,
    OllamaBackend, OpenAICompatibleBackend,
};
pub use conversation::{ConversationEngine, Inbound, SessionStore, Upload};
pub use db::{Database, ExpenseFilter, ExpenseInsertResult};
pub use dedup::{dedup_key, DuplicateCheck, DuplicateDetector};
pub use error::{Error, Result};
pub use gateway::PersistenceGateway;
pub use monitors::{
    GmailSession, MailSession, ReceiptInboxMonitor, SourceMonitor, TransactionAlertMonitor,
};
pub use pipeline::{CycleSummary, IngestionPipeline, MonitorSummary};
pub use prompts::{Prompt, PromptId, PromptInfo, PromptLibrary};
