//! Domain models for ExpenseFlow
//!
//! Records move through distinct types as they are processed:
//! `RawMessage` (mail) or an uploaded file → `CandidateExpense` (extracted)
//! → `ClassificationAttributes` (chat only) → `NewExpense` → `StoredRecord`.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

/// Chat-user identifier used as the key for sessions and interactive dedup
pub type UserId = i64;

/// Default currency when the extractor does not report one
pub const DEFAULT_CURRENCY: &str = "INR";

/// Where a stored record came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Source {
    /// Bank transaction-alert email
    Email,
    /// Receipt forwarded to the dedicated receipts inbox
    ForwardedEmail,
    /// Photo or document submitted through the chat bot
    Telegram,
}

impl Source {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Email => "email",
            Self::ForwardedEmail => "forwarded_email",
            Self::Telegram => "telegram",
        }
    }

    /// Sources written by the unattended pipeline (used for the watermark)
    pub fn mail_sources() -> &'static [Source] {
        &[Self::Email, Self::ForwardedEmail]
    }
}

impl std::str::FromStr for Source {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "email" => Ok(Self::Email),
            "forwarded_email" | "forwarded" => Ok(Self::ForwardedEmail),
            "telegram" | "chat" => Ok(Self::Telegram),
            _ => Err(format!("Unknown source: {}", s)),
        }
    }
}

impl std::fmt::Display for Source {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A single source email, as produced by a source monitor
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawMessage {
    /// Provider-assigned id, unique per mail account
    pub message_id: String,
    pub subject: String,
    pub sender: String,
    /// Plain-text body with HTML stripped
    pub body: String,
    /// Provider receive time, when reported
    pub received_at: Option<DateTime<Utc>>,
}

/// A line item on a receipt
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LineItem {
    pub name: String,
    #[serde(default)]
    pub price: Option<f64>,
}

/// Bank-alert specific fields carried through from extraction
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AlertDetails {
    /// Transaction time (HH:MM:SS)
    pub time: Option<String>,
    pub card_last_4: Option<String>,
    /// "credit" or "debit"
    pub transaction_type: Option<String>,
    pub bank: Option<String>,
    pub account_holder: Option<String>,
}

/// Source-specific passthrough fields
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Passthrough {
    pub message_id: Option<String>,
    pub email_subject: Option<String>,
    pub email_sender: Option<String>,
    /// Local path of the uploaded file
    pub file_path: Option<String>,
}

/// The extractor's well-formed output for one message or uploaded file
///
/// Not eligible for storage on its own: chat candidates must first be
/// classified, mail candidates go through the unattended mapping.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CandidateExpense {
    pub merchant: String,
    pub amount: f64,
    pub currency: String,
    /// Occurrence date (no time unless the alert carried one)
    pub date: Option<NaiveDate>,
    pub items: Vec<LineItem>,
    pub tax_amount: Option<f64>,
    pub payment_method: Option<String>,
    /// Category guess from the model (Food, Transport, ...)
    pub category: Option<String>,
    /// Present for transaction-alert extractions
    pub alert: Option<AlertDetails>,
    pub passthrough: Passthrough,
}

/// Main category chosen by the user
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MainCategory {
    Personal,
    Business,
}

impl MainCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Personal => "Personal",
            Self::Business => "Business",
        }
    }
}

impl std::fmt::Display for MainCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Reimbursement disposition for business expenses
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Reimbursement {
    /// Employee paid, reimbursement requested
    Pending,
    /// Company paid directly
    NotNeeded,
}

/// Sentinel reimbursement value for personal expenses
pub const REIMBURSEMENT_NOT_APPLICABLE: &str = "Not Applicable";
/// Sentinel project value for personal expenses
pub const PROJECT_PERSONAL: &str = "Personal";
/// Project value for business expenses the company paid
pub const PROJECT_COMPANY_PAID: &str = "Company Paid";
/// Project value when the user skips the project question
pub const PROJECT_NOT_SPECIFIED: &str = "Not Specified";

impl Reimbursement {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "Pending",
            Self::NotNeeded => "Not Needed",
        }
    }
}

/// Personal or business classification
///
/// Reimbursement and project only exist for business expenses.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Classification {
    Personal,
    Business {
        reimbursement: Reimbursement,
        project: String,
    },
}

impl Classification {
    /// Business expense the company paid directly
    pub fn company_paid() -> Self {
        Self::Business {
            reimbursement: Reimbursement::NotNeeded,
            project: PROJECT_COMPANY_PAID.to_string(),
        }
    }

    /// Business expense awaiting reimbursement, tagged with a project
    pub fn reimbursable(project: Option<String>) -> Self {
        Self::Business {
            reimbursement: Reimbursement::Pending,
            project: project.unwrap_or_else(|| PROJECT_NOT_SPECIFIED.to_string()),
        }
    }

    pub fn main_category(&self) -> MainCategory {
        match self {
            Self::Personal => MainCategory::Personal,
            Self::Business { .. } => MainCategory::Business,
        }
    }

    pub fn reimbursement(&self) -> &str {
        match self {
            Self::Personal => REIMBURSEMENT_NOT_APPLICABLE,
            Self::Business { reimbursement, .. } => reimbursement.as_str(),
        }
    }

    pub fn project(&self) -> &str {
        match self {
            Self::Personal => PROJECT_PERSONAL,
            Self::Business { project, .. } => project,
        }
    }
}

/// Attributes collected by the chat dialogue for one candidate
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClassificationAttributes {
    pub classification: Classification,
    pub notes: Option<String>,
}

/// A record ready to be written to the store
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewExpense {
    pub merchant: String,
    pub amount: f64,
    pub currency: String,
    pub date: Option<NaiveDate>,
    pub time: Option<String>,
    /// Receipt category guess, or the bank name for alert emails
    pub category: Option<String>,
    pub description: Option<String>,
    pub source: Source,
    pub confidence: f64,
    pub user_id: Option<UserId>,
    pub main_category: Option<MainCategory>,
    pub reimbursement: Option<String>,
    pub project: Option<String>,
    pub notes: Option<String>,
    pub items: Vec<LineItem>,
    pub tax_amount: Option<f64>,
    pub payment_method: Option<String>,
    pub message_id: Option<String>,
    pub card_last_4: Option<String>,
    pub transaction_type: Option<String>,
    pub bank: Option<String>,
    pub account_holder: Option<String>,
    pub email_subject: Option<String>,
    pub email_sender: Option<String>,
    pub file_path: Option<String>,
    /// Hex SHA-256 of (MERCHANT, amount, date, user)
    pub dedup_key: String,
}

/// A persisted expense record (immutable once written)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredRecord {
    pub id: i64,
    pub merchant: String,
    pub amount: f64,
    pub currency: String,
    pub date: Option<NaiveDate>,
    pub time: Option<String>,
    pub category: Option<String>,
    pub description: Option<String>,
    pub source: Source,
    pub confidence: f64,
    pub user_id: Option<UserId>,
    pub main_category: Option<MainCategory>,
    pub reimbursement: Option<String>,
    pub project: Option<String>,
    pub notes: Option<String>,
    pub items: Vec<LineItem>,
    pub tax_amount: Option<f64>,
    pub payment_method: Option<String>,
    pub message_id: Option<String>,
    pub card_last_4: Option<String>,
    pub transaction_type: Option<String>,
    pub bank: Option<String>,
    pub account_holder: Option<String>,
    pub email_subject: Option<String>,
    pub email_sender: Option<String>,
    pub file_path: Option<String>,
    pub dedup_key: String,
    pub created_at: DateTime<Utc>,
}

/// A monthly reconciliation report
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReconciliationReport {
    pub id: i64,
    pub month: u32,
    pub year: i32,
    pub matched_transactions: serde_json::Value,
    pub unmatched_transactions: serde_json::Value,
    pub summary: serde_json::Value,
    pub created_at: DateTime<Utc>,
}

/// New reconciliation report for creation
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewReconciliation {
    pub month: u32,
    pub year: i32,
    #[serde(default = "empty_array")]
    pub matched_transactions: serde_json::Value,
    #[serde(default = "empty_array")]
    pub unmatched_transactions: serde_json::Value,
    #[serde(default = "empty_object")]
    pub summary: serde_json::Value,
}

fn empty_array() -> serde_json::Value {
    serde_json::Value::Array(Vec::new())
}

fn empty_object() -> serde_json::Value {
    serde_json::Value::Object(serde_json::Map::new())
}

/// Audit log entry
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditEntry {
    pub id: i64,
    pub timestamp: DateTime<Utc>,
    pub actor: String,
    pub action: String,
    pub entity_type: Option<String>,
    pub entity_id: Option<i64>,
    pub details: Option<String>,
}

/// Per-source record counts for status output
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreStats {
    pub total: i64,
    pub by_source: Vec<(Source, i64)>,
    pub reconciliations: i64,
    pub watermark: Option<DateTime<Utc>>,
}
