//! Expense record operations

use chrono::{DateTime, NaiveDate, Utc};
use rusqlite::{params, OptionalExtension, Row};

use super::{parse_datetime, Database};
use crate::error::Result;
use crate::models::{LineItem, MainCategory, NewExpense, Source, StoreStats, StoredRecord};

/// Result of inserting an expense
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExpenseInsertResult {
    /// Record was inserted, contains new record ID
    Inserted(i64),
    /// A record with the same message id exists, contains its ID
    Duplicate(i64),
}

/// Filters for listing expenses
#[derive(Debug, Clone, Default)]
pub struct ExpenseFilter {
    pub source: Option<Source>,
    pub user_id: Option<i64>,
    pub limit: i64,
    pub offset: i64,
}

impl ExpenseFilter {
    pub fn recent(limit: i64) -> Self {
        Self {
            limit,
            ..Default::default()
        }
    }
}

const EXPENSE_COLUMNS: &str = r#"
    id, merchant, amount, currency, date, time, category, description, source,
    confidence, user_id, main_category, reimbursement, project, notes, items,
    tax_amount, payment_method, message_id, card_last_4, transaction_type, bank,
    account_holder, email_subject, email_sender, file_path, dedup_key, created_at
"#;

fn row_to_expense(row: &Row) -> rusqlite::Result<StoredRecord> {
    let date: Option<String> = row.get(4)?;
    let source: String = row.get(8)?;
    let main_category: Option<String> = row.get(11)?;
    let items_json: String = row.get(15)?;
    let created_at: String = row.get(27)?;

    Ok(StoredRecord {
        id: row.get(0)?,
        merchant: row.get(1)?,
        amount: row.get(2)?,
        currency: row.get(3)?,
        date: date.and_then(|d| NaiveDate::parse_from_str(&d, "%Y-%m-%d").ok()),
        time: row.get(5)?,
        category: row.get(6)?,
        description: row.get(7)?,
        source: source.parse().unwrap_or(Source::Email),
        confidence: row.get(9)?,
        user_id: row.get(10)?,
        main_category: main_category.and_then(|c| match c.as_str() {
            "Personal" => Some(MainCategory::Personal),
            "Business" => Some(MainCategory::Business),
            _ => None,
        }),
        reimbursement: row.get(12)?,
        project: row.get(13)?,
        notes: row.get(14)?,
        items: serde_json::from_str::<Vec<LineItem>>(&items_json).unwrap_or_default(),
        tax_amount: row.get(16)?,
        payment_method: row.get(17)?,
        message_id: row.get(18)?,
        card_last_4: row.get(19)?,
        transaction_type: row.get(20)?,
        bank: row.get(21)?,
        account_holder: row.get(22)?,
        email_subject: row.get(23)?,
        email_sender: row.get(24)?,
        file_path: row.get(25)?,
        dedup_key: row.get(26)?,
        created_at: parse_datetime(&created_at),
    })
}

impl Database {
    /// Insert an expense record
    ///
    /// Records carrying a provider message id are written at most once;
    /// a second insert with the same id reports the existing record.
    pub fn insert_expense(&self, expense: &NewExpense) -> Result<ExpenseInsertResult> {
        let conn = self.conn()?;

        if let Some(ref message_id) = expense.message_id {
            let existing: Option<i64> = conn
                .query_row(
                    "SELECT id FROM expenses WHERE message_id = ?",
                    params![message_id],
                    |row| row.get(0),
                )
                .optional()?;

            if let Some(existing_id) = existing {
                return Ok(ExpenseInsertResult::Duplicate(existing_id));
            }
        }

        let items = serde_json::to_string(&expense.items)?;

        conn.execute(
            r#"
            INSERT INTO expenses (
                merchant, amount, currency, date, time, category, description, source,
                confidence, user_id, main_category, reimbursement, project, notes, items,
                tax_amount, payment_method, message_id, card_last_4, transaction_type, bank,
                account_holder, email_subject, email_sender, file_path, dedup_key
            )
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
            params![
                expense.merchant,
                expense.amount,
                expense.currency,
                expense.date.map(|d| d.format("%Y-%m-%d").to_string()),
                expense.time,
                expense.category,
                expense.description,
                expense.source.as_str(),
                expense.confidence,
                expense.user_id,
                expense.main_category.map(|c| c.as_str()),
                expense.reimbursement,
                expense.project,
                expense.notes,
                items,
                expense.tax_amount,
                expense.payment_method,
                expense.message_id,
                expense.card_last_4,
                expense.transaction_type,
                expense.bank,
                expense.account_holder,
                expense.email_subject,
                expense.email_sender,
                expense.file_path,
                expense.dedup_key,
            ],
        )?;

        Ok(ExpenseInsertResult::Inserted(conn.last_insert_rowid()))
    }

    /// Get an expense by ID
    pub fn get_expense(&self, id: i64) -> Result<Option<StoredRecord>> {
        let conn = self.conn()?;
        let sql = format!("SELECT {} FROM expenses WHERE id = ?", EXPENSE_COLUMNS);
        let record = conn
            .query_row(&sql, params![id], row_to_expense)
            .optional()?;
        Ok(record)
    }

    /// Find the record written for a provider message id
    pub fn find_expense_by_message_id(&self, message_id: &str) -> Result<Option<StoredRecord>> {
        let conn = self.conn()?;
        let sql = format!(
            "SELECT {} FROM expenses WHERE message_id = ?",
            EXPENSE_COLUMNS
        );
        let record = conn
            .query_row(&sql, params![message_id], row_to_expense)
            .optional()?;
        Ok(record)
    }

    /// Check whether a provider message id has already been stored
    pub fn message_id_exists(&self, message_id: &str) -> Result<bool> {
        let conn = self.conn()?;
        let count: i64 = conn.query_row(
            "SELECT COUNT(*) FROM expenses WHERE message_id = ?",
            params![message_id],
            |row| row.get(0),
        )?;
        Ok(count > 0)
    }

    /// Find the oldest record with the given duplicate key
    pub fn find_expense_by_dedup_key(&self, dedup_key: &str) -> Result<Option<StoredRecord>> {
        let conn = self.conn()?;
        let sql = format!(
            "SELECT {} FROM expenses WHERE dedup_key = ? ORDER BY id ASC LIMIT 1",
            EXPENSE_COLUMNS
        );
        let record = conn
            .query_row(&sql, params![dedup_key], row_to_expense)
            .optional()?;
        Ok(record)
    }

    /// List expenses, newest first
    pub fn list_expenses(&self, filter: &ExpenseFilter) -> Result<Vec<StoredRecord>> {
        let conn = self.conn()?;
        let sql = format!(
            r#"
            SELECT {}
            FROM expenses
            WHERE (?1 IS NULL OR source = ?1)
              AND (?2 IS NULL OR user_id = ?2)
            ORDER BY created_at DESC, id DESC
            LIMIT ?3 OFFSET ?4
            "#,
            EXPENSE_COLUMNS
        );

        let limit = if filter.limit > 0 { filter.limit } else { -1 };

        let mut stmt = conn.prepare(&sql)?;
        let records = stmt
            .query_map(
                params![
                    filter.source.map(|s| s.as_str()),
                    filter.user_id,
                    limit,
                    filter.offset.max(0),
                ],
                row_to_expense,
            )?
            .collect::<std::result::Result<Vec<_>, _>>()?;

        Ok(records)
    }

    /// Count stored expenses
    pub fn count_expenses(&self) -> Result<i64> {
        let conn = self.conn()?;
        let count: i64 = conn.query_row("SELECT COUNT(*) FROM expenses", [], |row| row.get(0))?;
        Ok(count)
    }

    /// Creation time of the newest record from the given sources
    ///
    /// This is the ingestion watermark: the lower bound for the next
    /// unattended fetch. Returns None when nothing has been stored yet.
    pub fn last_processed_at(&self, sources: &[Source]) -> Result<Option<DateTime<Utc>>> {
        if sources.is_empty() {
            return Ok(None);
        }

        let conn = self.conn()?;
        let placeholders = vec!["?"; sources.len()].join(", ");
        let sql = format!(
            "SELECT MAX(created_at) FROM expenses WHERE source IN ({})",
            placeholders
        );

        let names: Vec<&str> = sources.iter().map(|s| s.as_str()).collect();
        let newest: Option<String> = conn.query_row(
            &sql,
            rusqlite::params_from_iter(names.iter()),
            |row| row.get(0),
        )?;

        Ok(newest.map(|s| parse_datetime(&s)))
    }

    /// Summary counts for status output
    pub fn store_stats(&self) -> Result<StoreStats> {
        let conn = self.conn()?;

        let mut stmt =
            conn.prepare("SELECT source, COUNT(*) FROM expenses GROUP BY source ORDER BY source")?;
        let by_source = stmt
            .query_map([], |row| {
                let source: String = row.get(0)?;
                let count: i64 = row.get(1)?;
                Ok((source, count))
            })?
            .collect::<std::result::Result<Vec<_>, _>>()?
            .into_iter()
            .filter_map(|(source, count)| source.parse::<Source>().ok().map(|s| (s, count)))
            .collect::<Vec<_>>();

        let total: i64 = by_source.iter().map(|(_, c)| c).sum();
        let reconciliations: i64 =
            conn.query_row("SELECT COUNT(*) FROM reconciliations", [], |row| row.get(0))?;
        drop(stmt);
        drop(conn);

        Ok(StoreStats {
            total,
            by_source,
            reconciliations,
            watermark: self.last_processed_at(Source::mail_sources())?,
        })
    }
}
