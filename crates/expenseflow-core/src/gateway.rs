//! Persistence gateway: maps finalized records onto store writes
//!
//! The only writer of expense records. Chat receipts are written after
//! classification; mail extractions are written with fixed source defaults.

use chrono::{DateTime, Utc};

use crate::db::{Database, ExpenseInsertResult};
use crate::dedup::dedup_key;
use crate::error::Result;
use crate::models::{
    CandidateExpense, ClassificationAttributes, NewExpense, Source, UserId,
};

/// Confidence recorded for bank-alert extractions
const ALERT_CONFIDENCE: f64 = 0.95;
/// Confidence recorded for forwarded receipt emails
const FORWARDED_CONFIDENCE: f64 = 0.9;
/// Confidence recorded for user-confirmed chat receipts
const CHAT_CONFIDENCE: f64 = 1.0;

impl NewExpense {
    /// Merge a chat candidate with the attributes the user chose
    pub fn from_classified(
        candidate: CandidateExpense,
        attrs: &ClassificationAttributes,
        user_id: UserId,
    ) -> Self {
        let key = dedup_key(
            &candidate.merchant,
            candidate.amount,
            candidate.date,
            Some(user_id),
        );
        let alert = candidate.alert.unwrap_or_default();
        let classification = &attrs.classification;

        Self {
            description: Some(format!(
                "{} - {}",
                classification.main_category(),
                candidate.merchant
            )),
            merchant: candidate.merchant,
            amount: candidate.amount,
            currency: candidate.currency,
            date: candidate.date,
            time: alert.time,
            category: candidate.category,
            source: Source::Telegram,
            confidence: CHAT_CONFIDENCE,
            user_id: Some(user_id),
            main_category: Some(classification.main_category()),
            reimbursement: Some(classification.reimbursement().to_string()),
            project: Some(classification.project().to_string()),
            notes: attrs.notes.clone(),
            items: candidate.items,
            tax_amount: candidate.tax_amount,
            payment_method: candidate.payment_method,
            message_id: None,
            card_last_4: alert.card_last_4,
            transaction_type: alert.transaction_type,
            bank: alert.bank,
            account_holder: alert.account_holder,
            email_subject: None,
            email_sender: None,
            file_path: candidate.passthrough.file_path,
            dedup_key: key,
        }
    }

    /// Map an unattended mail extraction (no classification step)
    pub fn from_mail(candidate: CandidateExpense, source: Source) -> Self {
        let key = dedup_key(&candidate.merchant, candidate.amount, candidate.date, None);
        let alert = candidate.alert.unwrap_or_default();

        let (category, description, confidence) = match source {
            Source::Email => (
                alert.bank.clone(),
                Some(format!(
                    "{} - {}",
                    alert.transaction_type.as_deref().unwrap_or("transaction"),
                    candidate.merchant
                )),
                ALERT_CONFIDENCE,
            ),
            _ => (
                candidate.category,
                Some(format!("receipt - {}", candidate.merchant)),
                FORWARDED_CONFIDENCE,
            ),
        };

        Self {
            merchant: candidate.merchant,
            amount: candidate.amount,
            currency: candidate.currency,
            date: candidate.date,
            time: alert.time,
            category,
            description,
            source,
            confidence,
            user_id: None,
            main_category: None,
            reimbursement: None,
            project: None,
            notes: None,
            items: candidate.items,
            tax_amount: candidate.tax_amount,
            payment_method: candidate.payment_method,
            message_id: candidate.passthrough.message_id,
            card_last_4: alert.card_last_4,
            transaction_type: alert.transaction_type,
            bank: alert.bank,
            account_holder: alert.account_holder,
            email_subject: candidate.passthrough.email_subject,
            email_sender: candidate.passthrough.email_sender,
            file_path: None,
            dedup_key: key,
        }
    }
}

/// Write path into the store
#[derive(Clone)]
pub struct PersistenceGateway {
    db: Database,
}

impl PersistenceGateway {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    pub fn db(&self) -> &Database {
        &self.db
    }

    /// Save a classified chat receipt, returning the new record ID
    pub fn save_classified(
        &self,
        candidate: CandidateExpense,
        attrs: &ClassificationAttributes,
        user_id: UserId,
    ) -> Result<i64> {
        let expense = NewExpense::from_classified(candidate, attrs, user_id);
        match self.db.insert_expense(&expense)? {
            ExpenseInsertResult::Inserted(id) | ExpenseInsertResult::Duplicate(id) => Ok(id),
        }
    }

    /// Save a mail extraction keyed by its provider message id
    pub fn save_from_mail(
        &self,
        candidate: CandidateExpense,
        source: Source,
    ) -> Result<ExpenseInsertResult> {
        let expense = NewExpense::from_mail(candidate, source);
        self.db.insert_expense(&expense)
    }

    /// Watermark for the unattended path: newest mail-sourced record
    pub fn watermark(&self) -> Result<Option<DateTime<Utc>>> {
        self.db.last_processed_at(Source::mail_sources())
    }
}
