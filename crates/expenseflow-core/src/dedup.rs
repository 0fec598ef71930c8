//! Duplicate detection for chat-submitted receipts
//!
//! Receipts have no provider id, so identity is the business tuple
//! (merchant, amount, date, user). Merchant is compared upper-cased and the
//! amount must match exactly: 250.00 and 250.01 are different expenses.

use chrono::NaiveDate;
use sha2::{Digest, Sha256};
use tracing::warn;

use crate::db::Database;
use crate::models::{StoredRecord, UserId};

/// Outcome of a duplicate check
#[derive(Debug, Clone, Default)]
pub struct DuplicateCheck {
    pub is_duplicate: bool,
    pub existing: Option<StoredRecord>,
}

/// Compute the duplicate key for a (merchant, amount, date, user) tuple
///
/// Mail-sourced records use `None` for the user, so they never collide
/// with a chat user's receipts.
pub fn dedup_key(
    merchant: &str,
    amount: f64,
    date: Option<NaiveDate>,
    user_id: Option<UserId>,
) -> String {
    let date = date.map(|d| d.format("%Y-%m-%d").to_string()).unwrap_or_default();
    let user = user_id.map(|u| u.to_string()).unwrap_or_default();

    let mut hasher = Sha256::new();
    hasher.update(merchant.trim().to_uppercase().as_bytes());
    hasher.update(b"|");
    // f64 Display is exact for equal values (250.0 and 250 both print "250")
    hasher.update(amount.to_string().as_bytes());
    hasher.update(b"|");
    hasher.update(date.as_bytes());
    hasher.update(b"|");
    hasher.update(user.as_bytes());
    hex::encode(hasher.finalize())
}

/// Looks up previously stored records by business key
pub struct DuplicateDetector<'a> {
    db: &'a Database,
}

impl<'a> DuplicateDetector<'a> {
    pub fn new(db: &'a Database) -> Self {
        Self { db }
    }

    /// Check whether a matching record already exists
    ///
    /// Fails open: a store error is logged and reported as "not a duplicate"
    /// so ingestion is never blocked by a lookup failure.
    pub fn check(
        &self,
        merchant: &str,
        amount: f64,
        date: Option<NaiveDate>,
        user_id: UserId,
    ) -> DuplicateCheck {
        let key = dedup_key(merchant, amount, date, Some(user_id));

        match self.db.find_expense_by_dedup_key(&key) {
            Ok(Some(existing)) => DuplicateCheck {
                is_duplicate: true,
                existing: Some(existing),
            },
            Ok(None) => DuplicateCheck::default(),
            Err(e) => {
                warn!(user_id, merchant, error = %e, "Duplicate lookup failed, treating as new");
                DuplicateCheck::default()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{CandidateExpense, ClassificationAttributes, Classification, NewExpense, Passthrough};

    fn candidate(merchant: &str, amount: f64) -> CandidateExpense {
        CandidateExpense {
            merchant: merchant.to_string(),
            amount,
            currency: "INR".to_string(),
            date: NaiveDate::from_ymd_opt(2024, 3, 1),
            items: vec![],
            tax_amount: None,
            payment_method: None,
            category: Some("Food".to_string()),
            alert: None,
            passthrough: Passthrough::default(),
        }
    }

    fn save(db: &Database, merchant: &str, amount: f64, user: UserId) {
        let attrs = ClassificationAttributes {
            classification: Classification::Personal,
            notes: None,
        };
        let expense = NewExpense::from_classified(candidate(merchant, amount), &attrs, user);
        db.insert_expense(&expense).unwrap();
    }

    #[test]
    fn test_dedup_key_ignores_merchant_case() {
        let date = NaiveDate::from_ymd_opt(2024, 3, 1);
        assert_eq!(
            dedup_key("Cafe X", 250.0, date, Some(7)),
            dedup_key("CAFE x ", 250.0, date, Some(7))
        );
    }

    #[test]
    fn test_dedup_key_distinguishes_fields() {
        let date = NaiveDate::from_ymd_opt(2024, 3, 1);
        let base = dedup_key("Cafe X", 250.0, date, Some(7));
        assert_ne!(base, dedup_key("Cafe X", 250.01, date, Some(7)));
        assert_ne!(base, dedup_key("Cafe X", 250.0, NaiveDate::from_ymd_opt(2024, 3, 2), Some(7)));
        assert_ne!(base, dedup_key("Cafe X", 250.0, date, Some(8)));
        assert_ne!(base, dedup_key("Cafe X", 250.0, date, None));
    }

    #[test]
    fn test_detects_existing_record_any_case() {
        let db = Database::in_memory().unwrap();
        save(&db, "Cafe X", 250.0, 42);

        let detector = DuplicateDetector::new(&db);
        let check = detector.check("cafe x", 250.0, NaiveDate::from_ymd_opt(2024, 3, 1), 42);
        assert!(check.is_duplicate);
        assert_eq!(check.existing.unwrap().merchant, "Cafe X");
    }

    #[test]
    fn test_one_cent_difference_is_not_duplicate() {
        let db = Database::in_memory().unwrap();
        save(&db, "Cafe X", 250.0, 42);

        let detector = DuplicateDetector::new(&db);
        let check = detector.check("Cafe X", 250.01, NaiveDate::from_ymd_opt(2024, 3, 1), 42);
        assert!(!check.is_duplicate);
        assert!(check.existing.is_none());
    }

    #[test]
    fn test_other_user_is_not_duplicate() {
        let db = Database::in_memory().unwrap();
        save(&db, "Cafe X", 250.0, 42);

        let detector = DuplicateDetector::new(&db);
        let check = detector.check("Cafe X", 250.0, NaiveDate::from_ymd_opt(2024, 3, 1), 43);
        assert!(!check.is_duplicate);
    }

    #[test]
    fn test_fails_open_on_store_error() {
        let db = Database::in_memory().unwrap();
        db.conn().unwrap().execute_batch("DROP TABLE expenses;").unwrap();

        let detector = DuplicateDetector::new(&db);
        let check = detector.check("Cafe X", 250.0, NaiveDate::from_ymd_opt(2024, 3, 1), 42);
        assert!(!check.is_duplicate);
    }
}
