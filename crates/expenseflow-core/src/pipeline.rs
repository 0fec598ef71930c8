//! Batch ingestion pipeline for the unattended path
//!
//! One cycle asks every configured monitor for messages newer than the
//! watermark, extracts each message and saves it keyed by its provider
//! message id. Items are independent: a failure on one is counted and the
//! cycle moves on.

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{debug, error, info, warn};

use crate::ai::{ExtractionInput, Extractor};
use crate::db::ExpenseInsertResult;
use crate::error::Result;
use crate::gateway::PersistenceGateway;
use crate::models::{RawMessage, Source};
use crate::monitors::SourceMonitor;

/// Counts for one monitor within a cycle
#[derive(Debug, Clone, Default, Serialize)]
pub struct MonitorSummary {
    pub monitor: String,
    pub fetched: usize,
    pub saved: usize,
    pub duplicates: usize,
    pub failed: usize,
    /// Set when the monitor could not be read at all
    pub error: Option<String>,
}

/// Aggregate result of one ingestion cycle
#[derive(Debug, Clone, Default, Serialize)]
pub struct CycleSummary {
    pub since: Option<DateTime<Utc>>,
    pub saved: usize,
    pub duplicates: usize,
    pub failed: usize,
    pub monitors: Vec<MonitorSummary>,
}

impl CycleSummary {
    fn add(&mut self, monitor: MonitorSummary) {
        self.saved += monitor.saved;
        self.duplicates += monitor.duplicates;
        self.failed += monitor.failed;
        self.monitors.push(monitor);
    }

    /// Monitors whose mailbox could not be read this cycle
    pub fn source_errors(&self) -> usize {
        self.monitors.iter().filter(|m| m.error.is_some()).count()
    }

    pub fn fetched(&self) -> usize {
        self.monitors.iter().map(|m| m.fetched).sum()
    }
}

enum ItemOutcome {
    Saved(i64),
    Duplicate(i64),
    Failed,
}

/// Sequential mail-to-store ingestion
pub struct IngestionPipeline {
    extractor: Extractor,
    gateway: PersistenceGateway,
    monitors: Vec<Box<dyn SourceMonitor>>,
}

impl IngestionPipeline {
    pub fn new(extractor: Extractor, gateway: PersistenceGateway) -> Self {
        Self {
            extractor,
            gateway,
            monitors: Vec::new(),
        }
    }

    pub fn with_monitor(mut self, monitor: Box<dyn SourceMonitor>) -> Self {
        self.monitors.push(monitor);
        self
    }

    pub fn with_monitors(mut self, monitors: Vec<Box<dyn SourceMonitor>>) -> Self {
        self.monitors.extend(monitors);
        self
    }

    pub fn gateway(&self) -> &PersistenceGateway {
        &self.gateway
    }

    pub fn monitor_names(&self) -> Vec<&'static str> {
        self.monitors.iter().map(|m| m.name()).collect()
    }

    /// Run a cycle starting from the stored watermark
    pub async fn run_once(&self) -> Result<CycleSummary> {
        let since = self.gateway.watermark()?;
        self.run_cycle(since).await
    }

    /// Run one cycle over every monitor
    ///
    /// `since = None` means first run: each monitor applies its own lookback
    /// window instead of scanning unbounded history.
    pub async fn run_cycle(&self, since: Option<DateTime<Utc>>) -> Result<CycleSummary> {
        info!(
            since = ?since,
            monitors = self.monitors.len(),
            "Starting ingestion cycle"
        );

        let mut summary = CycleSummary {
            since,
            ..Default::default()
        };

        for monitor in &self.monitors {
            let result = self.run_monitor(monitor.as_ref(), since).await;
            summary.add(result);
        }

        info!(
            saved = summary.saved,
            duplicates = summary.duplicates,
            failed = summary.failed,
            source_errors = summary.source_errors(),
            "Ingestion cycle complete"
        );
        Ok(summary)
    }

    async fn run_monitor(
        &self,
        monitor: &dyn SourceMonitor,
        since: Option<DateTime<Utc>>,
    ) -> MonitorSummary {
        let mut summary = MonitorSummary {
            monitor: monitor.name().to_string(),
            ..Default::default()
        };

        let messages = match monitor.fetch(since).await {
            Ok(messages) => messages,
            Err(e) => {
                error!(monitor = monitor.name(), error = %e, "Monitor fetch failed, skipping");
                summary.error = Some(e.to_string());
                return summary;
            }
        };
        summary.fetched = messages.len();

        for message in messages {
            match self.ingest(monitor.source(), message).await {
                ItemOutcome::Saved(_) => summary.saved += 1,
                ItemOutcome::Duplicate(_) => summary.duplicates += 1,
                ItemOutcome::Failed => summary.failed += 1,
            }
        }

        summary
    }

    async fn ingest(&self, source: Source, message: RawMessage) -> ItemOutcome {
        let message_id = message.message_id.clone();

        // Skip the model call for messages already stored
        match self.gateway.db().find_expense_by_message_id(&message_id) {
            Ok(Some(existing)) => {
                debug!(message_id = %message_id, existing_id = existing.id, "Already ingested");
                return ItemOutcome::Duplicate(existing.id);
            }
            Ok(None) => {}
            Err(e) => warn!(message_id = %message_id, error = %e, "Message id lookup failed"),
        }

        let input = match source {
            Source::Email => ExtractionInput::Alert {
                subject: message.subject.clone(),
                body: message.body.clone(),
            },
            _ => ExtractionInput::ForwardedReceipt {
                subject: message.subject.clone(),
                body: message.body.clone(),
            },
        };

        let mut candidate = match self.extractor.extract(input).await {
            Ok(candidate) => candidate,
            Err(e) => {
                warn!(
                    message_id = %message_id,
                    kind = e.kind.as_str(),
                    error = %e,
                    "Skipping message, extraction failed"
                );
                return ItemOutcome::Failed;
            }
        };

        candidate.passthrough.message_id = Some(message.message_id);
        candidate.passthrough.email_subject = Some(message.subject);
        candidate.passthrough.email_sender = Some(message.sender);

        let merchant = candidate.merchant.clone();
        let amount = candidate.amount;
        match self.gateway.save_from_mail(candidate, source) {
            Ok(ExpenseInsertResult::Inserted(id)) => {
                info!(message_id = %message_id, id, merchant = %merchant, amount, "Saved expense");
                ItemOutcome::Saved(id)
            }
            Ok(ExpenseInsertResult::Duplicate(id)) => {
                debug!(message_id = %message_id, existing_id = id, "Duplicate message id");
                ItemOutcome::Duplicate(id)
            }
            Err(e) => {
                error!(message_id = %message_id, error = %e, "Failed to save expense");
                ItemOutcome::Failed
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ai::{AIClient, MockBackend};
    use crate::db::{Database, ExpenseFilter};
    use crate::monitors::{GmailSession, MailSession, ReceiptInboxMonitor, TransactionAlertMonitor};
    use crate::prompts::PromptLibrary;
    use crate::test_utils::{MockGmailServer, MockMail};
    use chrono::TimeZone;
    use std::sync::Arc;

    const ALERT_REPLY: &str = r#"{"merchant": "CAFE X", "amount": 250.00, "currency": "INR", "date": "2024-03-01", "time": "10:15:00", "card_last_4": "1234", "transaction_type": "debit", "bank": "HDFC Bank", "account_holder": null}"#;

    fn pipeline(mock: &MockBackend, db: &Database) -> IngestionPipeline {
        IngestionPipeline::new(
            Extractor::with_prompts(AIClient::mock(mock.clone()), PromptLibrary::embedded_only()),
            PersistenceGateway::new(db.clone()),
        )
    }

    fn alert_mail(id: &str) -> MockMail {
        MockMail::new(
            id,
            "Credit transaction alert for your card",
            "<p>Rs.250.00 spent on card ending 1234 at CAFE X</p>",
        )
    }

    async fn gmail(server: &MockGmailServer) -> Arc<dyn MailSession> {
        Arc::new(GmailSession::new(&server.url(), "test-token"))
    }

    #[tokio::test]
    async fn test_first_run_uses_lookback_windows() {
        let alerts = MockGmailServer::start(vec![]).await;
        let receipts = MockGmailServer::start(vec![]).await;
        let db = Database::in_memory().unwrap();
        let mock = MockBackend::new();

        let pipeline = pipeline(&mock, &db)
            .with_monitor(Box::new(TransactionAlertMonitor::new(gmail(&alerts).await)))
            .with_monitor(Box::new(ReceiptInboxMonitor::new(gmail(&receipts).await)));

        let summary = pipeline.run_once().await.unwrap();

        assert!(summary.since.is_none());
        assert_eq!(summary.saved + summary.duplicates + summary.failed, 0);
        assert_eq!(
            alerts.queries(),
            vec!["subject:(Credit transaction alert) newer_than:7d".to_string()]
        );
        assert_eq!(receipts.queries(), vec!["newer_than:30d".to_string()]);
        assert_eq!(mock.call_count(), 0);
    }

    #[tokio::test]
    async fn test_alert_cycle_saves_and_dedups_by_message_id() {
        let server = MockGmailServer::start(vec![alert_mail("m1")]).await;
        let db = Database::in_memory().unwrap();
        let mock = MockBackend::new().with_response(ALERT_REPLY);

        let pipeline = pipeline(&mock, &db)
            .with_monitor(Box::new(TransactionAlertMonitor::new(gmail(&server).await)));

        let first = pipeline.run_once().await.unwrap();
        assert_eq!(first.saved, 1);
        assert_eq!(first.fetched(), 1);

        let record = db.find_expense_by_message_id("m1").unwrap().unwrap();
        assert_eq!(record.source, Source::Email);
        assert_eq!(record.amount, 250.0);
        assert_eq!(record.bank.as_deref(), Some("HDFC Bank"));
        assert_eq!(record.description.as_deref(), Some("debit - CAFE X"));
        assert_eq!(record.email_sender.as_deref(), Some("alerts@bank.example"));

        // Second cycle starts at the watermark and skips the model call
        let second = pipeline.run_once().await.unwrap();
        assert!(second.since.is_some());
        assert_eq!(second.saved, 0);
        assert_eq!(second.duplicates, 1);
        assert_eq!(mock.call_count(), 1);
        assert!(server.queries()[1].contains("after:"));
    }

    #[tokio::test]
    async fn test_failures_do_not_block_later_items() {
        let server = MockGmailServer::start(vec![
            alert_mail("bad-json"),
            alert_mail("call-error"),
            alert_mail("good"),
        ])
        .await;
        let db = Database::in_memory().unwrap();
        let mock = MockBackend::new()
            .with_response("I cannot find a transaction here")
            .with_failure("model overloaded")
            .with_response(ALERT_REPLY);

        let pipeline = pipeline(&mock, &db)
            .with_monitor(Box::new(TransactionAlertMonitor::new(gmail(&server).await)));

        let summary = pipeline.run_cycle(None).await.unwrap();
        assert_eq!(summary.failed, 2);
        assert_eq!(summary.saved, 1);
        assert!(db.message_id_exists("good").unwrap());
        assert!(!db.message_id_exists("bad-json").unwrap());
    }

    #[tokio::test]
    async fn test_forwarded_receipts_use_receipt_mapping() {
        let server = MockGmailServer::start(vec![MockMail::new(
            "r1",
            "Fwd: Your booking confirmation",
            "<h1>Hotel Booking</h1><p>Total: INR 4,200.00</p>",
        )
        .with_sender("me@example.com")])
        .await;
        let db = Database::in_memory().unwrap();
        let mock = MockBackend::new().with_response(
            r#"{"merchant_name": "Grand Hotel", "total_amount": "4,200.00", "currency": "INR", "date": "2024-02-20", "category": "Other"}"#,
        );

        let pipeline = pipeline(&mock, &db)
            .with_monitor(Box::new(ReceiptInboxMonitor::new(gmail(&server).await)));
        let summary = pipeline.run_cycle(None).await.unwrap();
        assert_eq!(summary.saved, 1);

        let records = db.list_expenses(&ExpenseFilter::default()).unwrap();
        assert_eq!(records[0].source, Source::ForwardedEmail);
        assert_eq!(records[0].merchant, "Grand Hotel");
        assert_eq!(records[0].amount, 4200.0);
        assert_eq!(records[0].email_subject.as_deref(), Some("Fwd: Your booking confirmation"));
    }

    #[tokio::test]
    async fn test_unreachable_mailbox_is_counted_not_fatal() {
        let db = Database::in_memory().unwrap();
        let mock = MockBackend::new();
        let dead: Arc<dyn MailSession> = Arc::new(GmailSession::new("http://127.0.0.1:1", "t"));
        let since = Utc.with_ymd_and_hms(2024, 3, 1, 0, 0, 0).unwrap();

        let pipeline =
            pipeline(&mock, &db).with_monitor(Box::new(ReceiptInboxMonitor::new(dead)));
        let summary = pipeline.run_cycle(Some(since)).await.unwrap();

        assert_eq!(summary.source_errors(), 1);
        assert_eq!(summary.monitors[0].monitor, "receipt_inbox");
        assert_eq!(summary.saved, 0);
    }
}
