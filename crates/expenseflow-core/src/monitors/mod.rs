//! Source monitors for the unattended ingestion path
//!
//! A monitor turns a time bound into a list of [`RawMessage`]s by issuing a
//! search against a [`MailSession`] and fetching each hit. Two monitors
//! exist:
//!
//! - [`TransactionAlertMonitor`] - bank alert emails, narrowed by subject line
//! - [`ReceiptInboxMonitor`] - a dedicated forwarding inbox, every message is a receipt
//!
//! Both cap the number of messages fetched per call.

mod gmail;

pub use gmail::{strip_html, GmailSession, GMAIL_API_BASE};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::error::Result;
use crate::models::{RawMessage, Source};

/// Subject line that marks a bank transaction alert
pub const DEFAULT_ALERT_SUBJECT: &str = "Credit transaction alert";

/// Messages fetched per monitor call
pub const DEFAULT_MAX_RESULTS: u32 = 50;

/// First-run lookback for alerts, in days
pub const ALERT_LOOKBACK_DAYS: u32 = 7;

/// First-run lookback for the receipts inbox, in days
pub const RECEIPT_LOOKBACK_DAYS: u32 = 30;

/// An authenticated mailbox that can be searched
#[async_trait]
pub trait MailSession: Send + Sync {
    /// Ids of messages matching a provider search query, newest first
    async fn search(&self, query: &str, max_results: u32) -> Result<Vec<String>>;

    /// Headers and plain-text body of one message
    async fn fetch(&self, message_id: &str) -> Result<RawMessage>;

    /// Account label for logs
    fn account(&self) -> &str;
}

/// A source of raw messages for the ingestion pipeline
#[async_trait]
pub trait SourceMonitor: Send + Sync {
    /// Monitor name for logs and summaries
    fn name(&self) -> &'static str;

    /// Source recorded on expenses ingested from this monitor
    fn source(&self) -> Source;

    /// Search query for messages newer than `after`
    ///
    /// With no bound the monitor's fixed lookback window applies.
    fn query(&self, after: Option<DateTime<Utc>>) -> String;

    /// Messages newer than `after`
    async fn fetch(&self, after: Option<DateTime<Utc>>) -> Result<Vec<RawMessage>>;
}

/// Time clause of a search query
pub fn time_clause(after: Option<DateTime<Utc>>, lookback_days: u32) -> String {
    match after {
        Some(ts) => format!("after:{}", ts.format("%Y/%m/%d")),
        None => format!("newer_than:{}d", lookback_days),
    }
}

/// Run a search and fetch every hit
///
/// A failed search fails the call. A message that cannot be fetched is
/// logged and skipped, so one bad message does not hide the rest.
async fn search_and_fetch(
    session: &dyn MailSession,
    monitor: &str,
    query: &str,
    max_results: u32,
) -> Result<Vec<RawMessage>> {
    debug!(monitor, account = session.account(), query, "Searching mailbox");
    let ids = session.search(query, max_results).await?;

    if ids.is_empty() {
        info!(monitor, "No new messages");
        return Ok(Vec::new());
    }
    info!(monitor, found = ids.len(), "Found messages");

    let mut messages = Vec::with_capacity(ids.len());
    for id in ids.iter().take(max_results as usize) {
        match session.fetch(id).await {
            Ok(message) => {
                debug!(monitor, message_id = %id, subject = %message.subject, "Fetched message");
                messages.push(message);
            }
            Err(e) => warn!(monitor, message_id = %id, error = %e, "Failed to fetch message"),
        }
    }

    Ok(messages)
}

/// Bank transaction alerts in the personal mailbox
pub struct TransactionAlertMonitor {
    session: Arc<dyn MailSession>,
    subject_filter: String,
    max_results: u32,
}

impl TransactionAlertMonitor {
    pub fn new(session: Arc<dyn MailSession>) -> Self {
        Self {
            session,
            subject_filter: DEFAULT_ALERT_SUBJECT.to_string(),
            max_results: DEFAULT_MAX_RESULTS,
        }
    }

    /// Apply `ALERT_SUBJECT_FILTER` and `MONITOR_MAX_RESULTS` when set
    pub fn from_env(session: Arc<dyn MailSession>) -> Self {
        let mut monitor = Self::new(session);
        if let Ok(filter) = std::env::var("ALERT_SUBJECT_FILTER") {
            if !filter.trim().is_empty() {
                monitor.subject_filter = filter.trim().to_string();
            }
        }
        monitor.max_results = max_results_from_env();
        monitor
    }

    pub fn with_subject_filter(mut self, filter: &str) -> Self {
        self.subject_filter = filter.to_string();
        self
    }

    pub fn with_max_results(mut self, max_results: u32) -> Self {
        self.max_results = max_results;
        self
    }
}

#[async_trait]
impl SourceMonitor for TransactionAlertMonitor {
    fn name(&self) -> &'static str {
        "transaction_alerts"
    }

    fn source(&self) -> Source {
        Source::Email
    }

    fn query(&self, after: Option<DateTime<Utc>>) -> String {
        format!(
            "subject:({}) {}",
            self.subject_filter,
            time_clause(after, ALERT_LOOKBACK_DAYS)
        )
    }

    async fn fetch(&self, after: Option<DateTime<Utc>>) -> Result<Vec<RawMessage>> {
        let query = self.query(after);
        search_and_fetch(self.session.as_ref(), self.name(), &query, self.max_results).await
    }
}

/// Every message in the dedicated receipts inbox
pub struct ReceiptInboxMonitor {
    session: Arc<dyn MailSession>,
    max_results: u32,
}

impl ReceiptInboxMonitor {
    pub fn new(session: Arc<dyn MailSession>) -> Self {
        Self {
            session,
            max_results: DEFAULT_MAX_RESULTS,
        }
    }

    pub fn from_env(session: Arc<dyn MailSession>) -> Self {
        Self::new(session).with_max_results(max_results_from_env())
    }

    pub fn with_max_results(mut self, max_results: u32) -> Self {
        self.max_results = max_results;
        self
    }
}

#[async_trait]
impl SourceMonitor for ReceiptInboxMonitor {
    fn name(&self) -> &'static str {
        "receipt_inbox"
    }

    fn source(&self) -> Source {
        Source::ForwardedEmail
    }

    fn query(&self, after: Option<DateTime<Utc>>) -> String {
        time_clause(after, RECEIPT_LOOKBACK_DAYS)
    }

    async fn fetch(&self, after: Option<DateTime<Utc>>) -> Result<Vec<RawMessage>> {
        let query = self.query(after);
        search_and_fetch(self.session.as_ref(), self.name(), &query, self.max_results).await
    }
}

/// Monitors for every mailbox with credentials in the environment
///
/// The alerts mailbox uses the `GMAIL_` variables and the receipts inbox
/// the `GMAIL_RECEIPTS_` variables. A mailbox without credentials is
/// skipped with a warning.
pub async fn monitors_from_env() -> Result<Vec<Box<dyn SourceMonitor>>> {
    let mut monitors: Vec<Box<dyn SourceMonitor>> = Vec::new();

    match GmailSession::from_env("GMAIL_").await? {
        Some(session) => monitors.push(Box::new(TransactionAlertMonitor::from_env(Arc::new(
            session.with_account("alerts"),
        )))),
        None => warn!("No GMAIL_ credentials, transaction alert monitor disabled"),
    }

    match GmailSession::from_env("GMAIL_RECEIPTS_").await? {
        Some(session) => monitors.push(Box::new(ReceiptInboxMonitor::from_env(Arc::new(
            session.with_account("receipts"),
        )))),
        None => warn!("No GMAIL_RECEIPTS_ credentials, receipt inbox monitor disabled"),
    }

    Ok(monitors)
}

fn max_results_from_env() -> u32 {
    std::env::var("MONITOR_MAX_RESULTS")
        .ok()
        .and_then(|v| v.trim().parse::<u32>().ok())
        .filter(|n| *n > 0)
        .unwrap_or(DEFAULT_MAX_RESULTS)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;
    use chrono::TimeZone;
    use std::sync::Mutex;

    /// In-memory mailbox that records the queries it receives
    struct FakeMailbox {
        messages: Vec<RawMessage>,
        broken: Vec<String>,
        queries: Mutex<Vec<(String, u32)>>,
    }

    impl FakeMailbox {
        fn with_ids(ids: &[&str]) -> Self {
            Self {
                messages: ids
                    .iter()
                    .map(|id| RawMessage {
                        message_id: id.to_string(),
                        subject: format!("Subject {}", id),
                        sender: "alerts@bank.example".into(),
                        body: "Rs 250.00 spent at CAFE X".into(),
                        received_at: None,
                    })
                    .collect(),
                broken: Vec::new(),
                queries: Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl MailSession for FakeMailbox {
        async fn search(&self, query: &str, max_results: u32) -> Result<Vec<String>> {
            self.queries
                .lock()
                .unwrap()
                .push((query.to_string(), max_results));
            Ok(self
                .messages
                .iter()
                .map(|m| m.message_id.clone())
                .chain(self.broken.iter().cloned())
                .take(max_results as usize)
                .collect())
        }

        async fn fetch(&self, message_id: &str) -> Result<RawMessage> {
            self.messages
                .iter()
                .find(|m| m.message_id == message_id)
                .cloned()
                .ok_or_else(|| Error::Mail(format!("no message {}", message_id)))
        }

        fn account(&self) -> &str {
            "fake"
        }
    }

    #[test]
    fn test_first_run_uses_lookback_windows() {
        let session: Arc<dyn MailSession> = Arc::new(FakeMailbox::with_ids(&[]));
        let alerts = TransactionAlertMonitor::new(session.clone());
        let receipts = ReceiptInboxMonitor::new(session);

        assert_eq!(
            alerts.query(None),
            "subject:(Credit transaction alert) newer_than:7d"
        );
        assert_eq!(receipts.query(None), "newer_than:30d");
    }

    #[test]
    fn test_watermark_becomes_after_clause() {
        let session: Arc<dyn MailSession> = Arc::new(FakeMailbox::with_ids(&[]));
        let since = Utc.with_ymd_and_hms(2024, 3, 1, 18, 30, 0).unwrap();

        let alerts = TransactionAlertMonitor::new(session.clone()).with_subject_filter("Debit alert");
        assert_eq!(alerts.query(Some(since)), "subject:(Debit alert) after:2024/03/01");
        assert_eq!(
            ReceiptInboxMonitor::new(session).query(Some(since)),
            "after:2024/03/01"
        );
    }

    #[tokio::test]
    async fn test_fetch_caps_results() {
        let ids: Vec<String> = (0..10).map(|i| format!("m{}", i)).collect();
        let id_refs: Vec<&str> = ids.iter().map(String::as_str).collect();
        let mailbox = Arc::new(FakeMailbox::with_ids(&id_refs));

        let monitor = ReceiptInboxMonitor::new(mailbox.clone()).with_max_results(3);
        let messages = monitor.fetch(None).await.unwrap();

        assert_eq!(messages.len(), 3);
        assert_eq!(messages[0].message_id, "m0");
        let queries = mailbox.queries.lock().unwrap();
        assert_eq!(queries[0], ("newer_than:30d".to_string(), 3));
    }

    #[tokio::test]
    async fn test_fetch_skips_unreadable_messages() {
        let mut mailbox = FakeMailbox::with_ids(&["a", "b"]);
        mailbox.broken.push("gone".into());
        let monitor = TransactionAlertMonitor::new(Arc::new(mailbox));

        let messages = monitor.fetch(None).await.unwrap();
        let ids: Vec<&str> = messages.iter().map(|m| m.message_id.as_str()).collect();
        assert_eq!(ids, vec!["a", "b"]);
    }

    #[test]
    fn test_monitor_sources() {
        let session: Arc<dyn MailSession> = Arc::new(FakeMailbox::with_ids(&[]));
        assert_eq!(TransactionAlertMonitor::new(session.clone()).source(), Source::Email);
        assert_eq!(ReceiptInboxMonitor::new(session).source(), Source::ForwardedEmail);
    }
}
