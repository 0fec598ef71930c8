//! Reconciliation report operations

use rusqlite::{params, OptionalExtension, Row};

use super::{parse_datetime, Database};
use crate::error::{Error, Result};
use crate::models::{NewReconciliation, ReconciliationReport};

fn row_to_reconciliation(row: &Row) -> rusqlite::Result<ReconciliationReport> {
    let matched: String = row.get(3)?;
    let unmatched: String = row.get(4)?;
    let summary: String = row.get(5)?;
    let created_at: String = row.get(6)?;

    Ok(ReconciliationReport {
        id: row.get(0)?,
        month: row.get(1)?,
        year: row.get(2)?,
        matched_transactions: serde_json::from_str(&matched).unwrap_or_default(),
        unmatched_transactions: serde_json::from_str(&unmatched).unwrap_or_default(),
        summary: serde_json::from_str(&summary).unwrap_or_default(),
        created_at: parse_datetime(&created_at),
    })
}

impl Database {
    /// Store a reconciliation report
    pub fn create_reconciliation(&self, report: &NewReconciliation) -> Result<i64> {
        if !(1..=12).contains(&report.month) {
            return Err(Error::InvalidData(format!(
                "Month must be between 1 and 12, got {}",
                report.month
            )));
        }

        let conn = self.conn()?;
        conn.execute(
            r#"
            INSERT INTO reconciliations (month, year, matched_transactions, unmatched_transactions, summary)
            VALUES (?, ?, ?, ?, ?)
            "#,
            params![
                report.month,
                report.year,
                serde_json::to_string(&report.matched_transactions)?,
                serde_json::to_string(&report.unmatched_transactions)?,
                serde_json::to_string(&report.summary)?,
            ],
        )?;

        Ok(conn.last_insert_rowid())
    }

    /// Get a reconciliation report by ID
    pub fn get_reconciliation(&self, id: i64) -> Result<Option<ReconciliationReport>> {
        let conn = self.conn()?;
        let report = conn
            .query_row(
                r#"
                SELECT id, month, year, matched_transactions, unmatched_transactions, summary, created_at
                FROM reconciliations
                WHERE id = ?
                "#,
                params![id],
                row_to_reconciliation,
            )
            .optional()?;
        Ok(report)
    }

    /// List reconciliation reports, newest first, optionally for one year
    pub fn list_reconciliations(&self, year: Option<i32>) -> Result<Vec<ReconciliationReport>> {
        let conn = self.conn()?;

        let mut stmt = conn.prepare(
            r#"
            SELECT id, month, year, matched_transactions, unmatched_transactions, summary, created_at
            FROM reconciliations
            WHERE (?1 IS NULL OR year = ?1)
            ORDER BY created_at DESC, id DESC
            "#,
        )?;

        let reports = stmt
            .query_map(params![year], row_to_reconciliation)?
            .collect::<std::result::Result<Vec<_>, _>>()?;

        Ok(reports)
    }
}
