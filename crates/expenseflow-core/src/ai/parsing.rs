//! JSON parsing helpers for model replies
//!
//! Models are asked for a single JSON object but often wrap it in a code
//! fence or add a sentence around it. These helpers strip that, parse the
//! object and validate it into a `CandidateExpense`.

use chrono::NaiveDate;
use serde_json::{Map, Value};

use crate::models::{AlertDetails, CandidateExpense, LineItem, Passthrough, DEFAULT_CURRENCY};

/// Longest raw reply kept in an error message
const RAW_PREVIEW_LEN: usize = 200;

/// Why an extraction failed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExtractionKind {
    /// The model answered but the reply was not a usable JSON object
    ParseFailed,
    /// The model or network call itself failed
    CallFailed,
}

impl ExtractionKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ParseFailed => "parse_failed",
            Self::CallFailed => "call_failed",
        }
    }
}

/// Error marker returned instead of a candidate
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
#[error("{message}")]
pub struct ExtractionError {
    pub kind: ExtractionKind,
    pub message: String,
    /// Raw model text, kept for diagnosis on parse failures
    pub raw: Option<String>,
}

impl ExtractionError {
    pub fn parse_failed(message: impl Into<String>, raw: &str) -> Self {
        Self {
            kind: ExtractionKind::ParseFailed,
            message: message.into(),
            raw: Some(raw.to_string()),
        }
    }

    pub fn call_failed(message: impl Into<String>) -> Self {
        Self {
            kind: ExtractionKind::CallFailed,
            message: message.into(),
            raw: None,
        }
    }

    /// First part of the raw reply, for log lines
    pub fn raw_preview(&self) -> Option<String> {
        self.raw.as_deref().map(truncate)
    }
}

fn truncate(s: &str) -> String {
    if s.chars().count() > RAW_PREVIEW_LEN {
        let head: String = s.chars().take(RAW_PREVIEW_LEN).collect();
        format!("{}...", head)
    } else {
        s.to_string()
    }
}

/// Remove a surrounding markdown code fence (```json ... ```), if any
pub fn strip_code_fence(response: &str) -> &str {
    let trimmed = response.trim();
    let Some(rest) = trimmed.strip_prefix("```") else {
        return trimmed;
    };

    // Drop the info string ("json") on the opening fence line
    let rest = match rest.find('\n') {
        Some(newline) => &rest[newline + 1..],
        None => rest.trim_start_matches("json"),
    };

    rest.trim_end().trim_end_matches("```").trim()
}

/// Parse the reply into a JSON object
pub fn parse_json_object(response: &str) -> Result<Map<String, Value>, ExtractionError> {
    let body = strip_code_fence(response);

    let value = match serde_json::from_str::<Value>(body) {
        Ok(value) => value,
        Err(first_err) => {
            // Fall back to the outermost {...} span when prose surrounds it
            let start = body.find('{');
            let end = body.rfind('}');
            match (start, end) {
                (Some(s), Some(e)) if s < e => serde_json::from_str::<Value>(&body[s..=e])
                    .map_err(|e| {
                        ExtractionError::parse_failed(
                            format!("Invalid JSON from model: {}", e),
                            response,
                        )
                    })?,
                _ => {
                    return Err(ExtractionError::parse_failed(
                        format!("No JSON object in model reply: {}", first_err),
                        response,
                    ))
                }
            }
        }
    };

    match value {
        Value::Object(map) => Ok(map),
        other => Err(ExtractionError::parse_failed(
            format!("Expected a JSON object, got {}", json_type(&other)),
            response,
        )),
    }
}

fn json_type(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}

/// Non-empty string field; "null" spelled as text counts as absent
fn string_field(map: &Map<String, Value>, key: &str) -> Option<String> {
    match map.get(key) {
        Some(Value::String(s)) => {
            let s = s.trim();
            if s.is_empty() || s.eq_ignore_ascii_case("null") {
                None
            } else {
                Some(s.to_string())
            }
        }
        Some(Value::Number(n)) => Some(n.to_string()),
        _ => None,
    }
}

/// Numeric field, accepting numbers and numeric strings ("1,299.00")
fn number_field(map: &Map<String, Value>, key: &str) -> Option<f64> {
    let n = match map.get(key)? {
        Value::Number(n) => n.as_f64()?,
        Value::String(s) => s.trim().replace(',', "").parse::<f64>().ok()?,
        _ => return None,
    };
    n.is_finite().then_some(n)
}

fn date_field(map: &Map<String, Value>, key: &str) -> Option<NaiveDate> {
    string_field(map, key).and_then(|d| NaiveDate::parse_from_str(&d, "%Y-%m-%d").ok())
}

fn required_amount(
    map: &Map<String, Value>,
    key: &str,
    raw: &str,
) -> Result<f64, ExtractionError> {
    match map.get(key) {
        None | Some(Value::Null) => Err(ExtractionError::parse_failed(
            format!("Model reply has no {}", key),
            raw,
        )),
        Some(_) => number_field(map, key).ok_or_else(|| {
            ExtractionError::parse_failed(format!("Model reply has non-numeric {}", key), raw)
        }),
    }
}

/// Receipt items may come back as plain names or as {name, price} objects
fn items_field(map: &Map<String, Value>) -> Vec<LineItem> {
    let Some(Value::Array(items)) = map.get("items") else {
        return Vec::new();
    };

    items
        .iter()
        .filter_map(|item| match item {
            Value::String(name) if !name.trim().is_empty() => Some(LineItem {
                name: name.trim().to_string(),
                price: None,
            }),
            Value::Object(obj) => string_field(obj, "name").map(|name| LineItem {
                name,
                price: number_field(obj, "price"),
            }),
            _ => None,
        })
        .collect()
}

/// Parse a transaction-alert reply
pub fn parse_alert_response(response: &str) -> Result<CandidateExpense, ExtractionError> {
    let map = parse_json_object(response)?;
    let amount = required_amount(&map, "amount", response)?;

    Ok(CandidateExpense {
        merchant: string_field(&map, "merchant").unwrap_or_else(|| "Unknown".to_string()),
        amount,
        currency: string_field(&map, "currency").unwrap_or_else(|| DEFAULT_CURRENCY.to_string()),
        date: date_field(&map, "date"),
        items: Vec::new(),
        tax_amount: None,
        payment_method: None,
        category: None,
        alert: Some(AlertDetails {
            time: string_field(&map, "time"),
            card_last_4: string_field(&map, "card_last_4"),
            transaction_type: string_field(&map, "transaction_type").map(|t| t.to_lowercase()),
            bank: string_field(&map, "bank"),
            account_holder: string_field(&map, "account_holder"),
        }),
        passthrough: Passthrough::default(),
    })
}

/// Parse a receipt reply (photo, PDF or forwarded email)
pub fn parse_receipt_response(response: &str) -> Result<CandidateExpense, ExtractionError> {
    let map = parse_json_object(response)?;
    let amount = required_amount(&map, "total_amount", response)?;

    Ok(CandidateExpense {
        merchant: string_field(&map, "merchant_name").unwrap_or_else(|| "Unknown".to_string()),
        amount,
        currency: string_field(&map, "currency").unwrap_or_else(|| DEFAULT_CURRENCY.to_string()),
        date: date_field(&map, "date"),
        items: items_field(&map),
        tax_amount: number_field(&map, "tax_amount"),
        payment_method: string_field(&map, "payment_method"),
        category: string_field(&map, "category"),
        alert: None,
        passthrough: Passthrough::default(),
    })
}
