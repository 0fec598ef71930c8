//! Extractor adapter: one model call per message or uploaded file
//!
//! Renders the matching prompt, issues a single low-temperature completion
//! and validates the JSON reply into a `CandidateExpense`. There is no retry
//! here; callers decide whether to skip or try again.

use std::collections::HashMap;
use std::path::Path;
use std::sync::{Arc, Mutex};

use tracing::{debug, warn};

use crate::models::CandidateExpense;
use crate::prompts::{PromptId, PromptLibrary, RenderedPrompt};

use super::parsing::{parse_alert_response, parse_receipt_response, ExtractionError};
use super::{AIBackend, AIClient, Attachment, CompletionRequest};

/// Token budget for alert and forwarded-email replies
const TEXT_MAX_TOKENS: u32 = 500;
/// Token budget for receipt image/PDF replies (line items make them longer)
const VISION_MAX_TOKENS: u32 = 800;

/// What to extract from
#[derive(Debug, Clone)]
pub enum ExtractionInput {
    /// Bank transaction-alert email
    Alert { subject: String, body: String },
    /// Receipt forwarded to the receipts inbox
    ForwardedReceipt { subject: String, body: String },
    /// Receipt photo or PDF
    Document { bytes: Vec<u8>, mime_type: String },
}

impl ExtractionInput {
    fn prompt_id(&self) -> PromptId {
        match self {
            Self::Alert { .. } => PromptId::ExtractTransactionAlert,
            Self::ForwardedReceipt { .. } => PromptId::ExtractForwardedReceipt,
            Self::Document { .. } => PromptId::ExtractReceipt,
        }
    }

    fn mode(&self) -> &'static str {
        match self {
            Self::Alert { .. } => "alert",
            Self::ForwardedReceipt { .. } => "forwarded_receipt",
            Self::Document { .. } => "document",
        }
    }

    /// Parser for the model's reply in this mode
    fn reply_parser(&self) -> fn(&str) -> Result<CandidateExpense, ExtractionError> {
        match self {
            Self::Alert { .. } => parse_alert_response,
            Self::ForwardedReceipt { .. } | Self::Document { .. } => parse_receipt_response,
        }
    }
}

/// MIME type for an uploaded file, by extension
///
/// Unknown extensions are sent as JPEG since chat photos arrive that way.
pub fn detect_mime_type(file_name: &str) -> &'static str {
    let ext = Path::new(file_name)
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_ascii_lowercase());

    match ext.as_deref() {
        Some("jpg") | Some("jpeg") => "image/jpeg",
        Some("png") => "image/png",
        Some("pdf") => "application/pdf",
        _ => "image/jpeg",
    }
}

/// Turns raw email text or receipt files into candidate expenses
#[derive(Clone)]
pub struct Extractor {
    client: AIClient,
    prompts: Arc<Mutex<PromptLibrary>>,
}

impl Extractor {
    pub fn new(client: AIClient) -> Self {
        Self::with_prompts(client, PromptLibrary::new())
    }

    pub fn with_prompts(client: AIClient, prompts: PromptLibrary) -> Self {
        Self {
            client,
            prompts: Arc::new(Mutex::new(prompts)),
        }
    }

    pub fn client(&self) -> &AIClient {
        &self.client
    }

    fn render(&self, input: &ExtractionInput) -> Result<RenderedPrompt, ExtractionError> {
        let mut prompts = self
            .prompts
            .lock()
            .map_err(|_| ExtractionError::call_failed("Failed to acquire prompt library lock"))?;
        let template = prompts
            .get(input.prompt_id())
            .map_err(|e| ExtractionError::call_failed(format!("Prompt unavailable: {}", e)))?;

        let vars: HashMap<&str, &str> = match input {
            ExtractionInput::Alert { subject, body }
            | ExtractionInput::ForwardedReceipt { subject, body } => {
                HashMap::from([("subject", subject.as_str()), ("body", body.as_str())])
            }
            ExtractionInput::Document { .. } => HashMap::new(),
        };

        Ok(template.render(&vars))
    }

    /// Extract one candidate
    pub async fn extract(
        &self,
        input: ExtractionInput,
    ) -> Result<CandidateExpense, ExtractionError> {
        let mode = input.mode();
        let parse_reply = input.reply_parser();
        let rendered = self.render(&input)?;

        let request = match input {
            ExtractionInput::Document { bytes, mime_type } => CompletionRequest::vision(
                rendered.system,
                rendered.user,
                Attachment { bytes, mime_type },
                VISION_MAX_TOKENS,
            ),
            _ => CompletionRequest::text(rendered.system, rendered.user, TEXT_MAX_TOKENS),
        };

        let reply = self.client.complete(&request).await.map_err(|e| {
            warn!(mode, model = %self.client.model(), error = %e, "Extraction call failed");
            ExtractionError::call_failed(e.to_string())
        })?;

        match parse_reply(&reply) {
            Ok(candidate) => {
                debug!(
                    mode,
                    merchant = %candidate.merchant,
                    amount = candidate.amount,
                    currency = %candidate.currency,
                    "Extracted candidate"
                );
                Ok(candidate)
            }
            Err(e) => {
                warn!(mode, error = %e, raw = ?e.raw_preview(), "Model reply did not parse");
                Err(e)
            }
        }
    }

    /// Transaction-alert mode
    pub async fn extract_alert(
        &self,
        subject: &str,
        body: &str,
    ) -> Result<CandidateExpense, ExtractionError> {
        self.extract(ExtractionInput::Alert {
            subject: subject.to_string(),
            body: body.to_string(),
        })
        .await
    }

    /// Receipt mode for an uploaded file; MIME type comes from the file name
    pub async fn extract_document(
        &self,
        bytes: Vec<u8>,
        file_name: &str,
    ) -> Result<CandidateExpense, ExtractionError> {
        self.extract(ExtractionInput::Document {
            bytes,
            mime_type: detect_mime_type(file_name).to_string(),
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ai::{ExtractionKind, MockBackend};

    fn extractor(mock: &MockBackend) -> Extractor {
        Extractor::with_prompts(AIClient::mock(mock.clone()), PromptLibrary::embedded_only())
    }

    #[test]
    fn test_detect_mime_type() {
        assert_eq!(detect_mime_type("receipt.JPG"), "image/jpeg");
        assert_eq!(detect_mime_type("receipt.jpeg"), "image/jpeg");
        assert_eq!(detect_mime_type("scan.png"), "image/png");
        assert_eq!(detect_mime_type("invoice.pdf"), "application/pdf");
        assert_eq!(detect_mime_type("photo.webp"), "image/jpeg");
        assert_eq!(detect_mime_type("noext"), "image/jpeg");
    }

    #[test]
    fn test_reply_parser_follows_input_kind() {
        let receipt_reply = r#"{"merchant_name": "STORE", "total_amount": 99.5}"#;
        let alert_reply = r#"{"merchant": "SWIGGY", "amount": 412.0}"#;

        let alert = ExtractionInput::Alert {
            subject: "s".into(),
            body: "b".into(),
        };
        let forwarded = ExtractionInput::ForwardedReceipt {
            subject: "s".into(),
            body: "b".into(),
        };
        let document = ExtractionInput::Document {
            bytes: vec![],
            mime_type: "image/jpeg".into(),
        };

        assert!(alert.reply_parser()(alert_reply).unwrap().alert.is_some());
        assert!(alert.reply_parser()(receipt_reply).is_err());
        assert_eq!(forwarded.reply_parser()(receipt_reply).unwrap().amount, 99.5);
        assert_eq!(document.reply_parser()(receipt_reply).unwrap().merchant, "STORE");
        assert!(document.reply_parser()(alert_reply).is_err());
    }

    #[tokio::test]
    async fn test_alert_mode_is_text_only() {
        let mock = MockBackend::new().with_response(
            r#"{"merchant": "SWIGGY", "amount": 412.0, "currency": "INR", "date": "2024-03-02"}"#,
        );
        let candidate = extractor(&mock)
            .extract_alert("Credit transaction alert", "INR 412.00 spent at SWIGGY")
            .await
            .unwrap();

        assert_eq!(candidate.merchant, "SWIGGY");
        assert!(candidate.alert.is_some());

        let request = &mock.requests()[0];
        assert!(request.attachment.is_none());
        assert_eq!(request.max_tokens, 500);
        assert!(request.prompt.contains("INR 412.00 spent at SWIGGY"));
        assert!(request.system.is_some());
    }

    #[tokio::test]
    async fn test_document_mode_attaches_file() {
        let mock = MockBackend::new().with_response(
            "```json\n{\"merchant_name\": \"Cafe X\", \"total_amount\": 250, \"currency\": \"INR\", \"date\": \"2024-03-01\"}\n```",
        );
        let candidate = extractor(&mock)
            .extract_document(vec![1, 2, 3], "bill.pdf")
            .await
            .unwrap();

        assert_eq!(candidate.merchant, "Cafe X");
        assert_eq!(candidate.amount, 250.0);

        let request = &mock.requests()[0];
        let attachment = request.attachment.as_ref().unwrap();
        assert_eq!(attachment.mime_type, "application/pdf");
        assert_eq!(attachment.bytes, vec![1, 2, 3]);
        assert_eq!(request.max_tokens, 800);
    }

    #[tokio::test]
    async fn test_call_failure_kind() {
        let mock = MockBackend::new().with_failure("connection refused");
        let err = extractor(&mock)
            .extract_document(vec![0], "r.jpg")
            .await
            .unwrap_err();
        assert_eq!(err.kind, ExtractionKind::CallFailed);
        assert!(err.raw.is_none());
        assert!(err.message.contains("connection refused"));
    }

    #[tokio::test]
    async fn test_parse_failure_kind_keeps_raw() {
        let mock = MockBackend::new().with_response("I could not read the receipt.");
        let err = extractor(&mock)
            .extract_document(vec![0], "r.jpg")
            .await
            .unwrap_err();
        assert_eq!(err.kind, ExtractionKind::ParseFailed);
        assert_eq!(err.raw.as_deref(), Some("I could not read the receipt."));
    }

    #[tokio::test]
    async fn test_forwarded_receipt_uses_receipt_schema() {
        let mock = MockBackend::new()
            .with_response(r#"{"merchant_name": "IndiGo", "total_amount": 5400, "category": "Transport"}"#);
        let candidate = extractor(&mock)
            .extract(ExtractionInput::ForwardedReceipt {
                subject: "Fwd: Your booking".into(),
                body: "PNR ABC123 total 5,400".into(),
            })
            .await
            .unwrap();
        assert_eq!(candidate.merchant, "IndiGo");
        assert!(candidate.alert.is_none());
        assert!(mock.requests()[0].prompt.contains("forwarded"));
    }
}
