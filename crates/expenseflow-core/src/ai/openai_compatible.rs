//! OpenAI-compatible backend implementation
//!
//! Works with any server that implements the OpenAI chat completions API:
//! - OpenRouter (https://openrouter.ai/api)
//! - vLLM (http://localhost:8000)
//! - LocalAI (http://localhost:8080)
//! - llama-server / llama.cpp (http://localhost:8080)
//!
//! # Configuration
//!
//! Environment variables:
//! - `OPENAI_COMPATIBLE_HOST`: Server URL (required)
//! - `OPENAI_COMPATIBLE_MODEL`: Model name (default: google/gemini-2.0-flash-exp)
//! - `OPENAI_COMPATIBLE_API_KEY`: API key if required (optional)

use async_trait::async_trait;
use base64::Engine;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{Error, Result};

use super::{AIBackend, CompletionRequest, EXTRACTION_TEMPERATURE};

const DEFAULT_MODEL: &str = "google/gemini-2.0-flash-exp";

/// OpenAI-compatible backend
///
/// Works with any server implementing the OpenAI `/v1/chat/completions` API.
/// Attached documents are sent inline as base64 data URLs.
#[derive(Clone)]
pub struct OpenAICompatibleBackend {
    http_client: Client,
    base_url: String,
    model: String,
    api_key: Option<String>,
}

impl OpenAICompatibleBackend {
    /// Create a new OpenAI-compatible backend
    pub fn new(base_url: &str, model: &str) -> Self {
        Self {
            http_client: Client::new(),
            base_url: base_url.trim_end_matches('/').to_string(),
            model: model.to_string(),
            api_key: None,
        }
    }

    /// Create with an API key
    pub fn with_api_key(base_url: &str, model: &str, api_key: &str) -> Self {
        Self {
            api_key: Some(api_key.to_string()),
            ..Self::new(base_url, model)
        }
    }

    /// Create from environment variables
    ///
    /// Required: `OPENAI_COMPATIBLE_HOST`
    /// Optional: `OPENAI_COMPATIBLE_MODEL`, `OPENAI_COMPATIBLE_API_KEY`
    pub fn from_env() -> Option<Self> {
        let host = std::env::var("OPENAI_COMPATIBLE_HOST").ok()?;
        let model =
            std::env::var("OPENAI_COMPATIBLE_MODEL").unwrap_or_else(|_| DEFAULT_MODEL.to_string());
        let api_key = std::env::var("OPENAI_COMPATIBLE_API_KEY").ok();

        let mut backend = Self::new(&host, &model);
        backend.api_key = api_key;
        Some(backend)
    }

    fn build_request(&self, request: &CompletionRequest) -> ChatCompletionRequest {
        let mut messages = Vec::with_capacity(2);

        if let Some(ref system) = request.system {
            messages.push(ChatMessage {
                role: "system".to_string(),
                content: ChatContent::Text(system.clone()),
            });
        }

        let content = match request.attachment {
            Some(ref attachment) => {
                let encoded = base64::engine::general_purpose::STANDARD.encode(&attachment.bytes);
                ChatContent::Parts(vec![
                    ContentPart::Text {
                        text: request.prompt.clone(),
                    },
                    ContentPart::ImageUrl {
                        image_url: ImageUrl {
                            url: format!("data:{};base64,{}", attachment.mime_type, encoded),
                        },
                    },
                ])
            }
            None => ChatContent::Text(request.prompt.clone()),
        };

        messages.push(ChatMessage {
            role: "user".to_string(),
            content,
        });

        ChatCompletionRequest {
            model: self.model.clone(),
            messages,
            temperature: Some(EXTRACTION_TEMPERATURE),
            max_tokens: Some(request.max_tokens),
            stream: false,
        }
    }
}

/// OpenAI chat completion request
#[derive(Debug, Serialize)]
struct ChatCompletionRequest {
    model: String,
    messages: Vec<ChatMessage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_tokens: Option<u32>,
    stream: bool,
}

#[derive(Debug, Serialize)]
struct ChatMessage {
    role: String,
    content: ChatContent,
}

/// Chat message content (text or multimodal)
#[derive(Debug, Serialize)]
#[serde(untagged)]
enum ChatContent {
    Text(String),
    Parts(Vec<ContentPart>),
}

#[derive(Debug, Serialize)]
#[serde(tag = "type")]
enum ContentPart {
    #[serde(rename = "text")]
    Text { text: String },
    #[serde(rename = "image_url")]
    ImageUrl { image_url: ImageUrl },
}

#[derive(Debug, Serialize)]
struct ImageUrl {
    url: String,
}

#[derive(Debug, Deserialize)]
struct ChatCompletionResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatResponseMessage,
}

#[derive(Debug, Deserialize)]
struct ChatResponseMessage {
    #[serde(default)]
    content: Option<String>,
}

#[async_trait]
impl AIBackend for OpenAICompatibleBackend {
    async fn complete(&self, request: &CompletionRequest) -> Result<String> {
        let body = self.build_request(request);

        let mut req_builder = self
            .http_client
            .post(format!("{}/v1/chat/completions", self.base_url))
            .json(&body);

        if let Some(ref api_key) = self.api_key {
            req_builder = req_builder.header("Authorization", format!("Bearer {}", api_key));
        }

        let response = req_builder.send().await?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(Error::InvalidData(format!(
                "OpenAI API error {}: {}",
                status, body
            )));
        }

        let chat_response: ChatCompletionResponse = response.json().await?;
        let content = chat_response
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .ok_or_else(|| Error::InvalidData("No response from OpenAI API".into()))?;

        debug!(model = %self.model, chars = content.len(), "OpenAI-compatible completion");
        Ok(content)
    }

    async fn health_check(&self) -> bool {
        // Try /v1/models first (standard OpenAI endpoint)
        if let Ok(resp) = self
            .http_client
            .get(format!("{}/v1/models", self.base_url))
            .send()
            .await
        {
            if resp.status().is_success() {
                return true;
            }
        }

        // Some local servers only answer /health
        if let Ok(resp) = self
            .http_client
            .get(format!("{}/health", self.base_url))
            .send()
            .await
        {
            if resp.status().is_success() {
                return true;
            }
        }

        false
    }

    fn model(&self) -> &str {
        &self.model
    }

    fn host(&self) -> &str {
        &self.base_url
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ai::Attachment;
    use crate::test_utils::MockModelServer;

    #[test]
    fn test_backend_new_trims_trailing_slash() {
        let backend = OpenAICompatibleBackend::new("http://localhost:8080/", "gemini");
        assert_eq!(backend.host(), "http://localhost:8080");
        assert_eq!(backend.model(), "gemini");
    }

    #[test]
    fn test_backend_with_api_key() {
        let backend =
            OpenAICompatibleBackend::with_api_key("http://localhost:8080", "gemini", "sk-test");
        assert_eq!(backend.api_key.as_deref(), Some("sk-test"));
    }

    #[test]
    fn test_text_request_serialization() {
        let backend = OpenAICompatibleBackend::new("http://localhost", "gemini");
        let request = CompletionRequest::text(Some("sys".into()), "Hello".into(), 500);

        let json = serde_json::to_value(backend.build_request(&request)).unwrap();
        assert_eq!(json["model"], "gemini");
        assert_eq!(json["messages"][0]["role"], "system");
        assert_eq!(json["messages"][1]["role"], "user");
        assert_eq!(json["messages"][1]["content"], "Hello");
        assert_eq!(json["max_tokens"], 500);
        let temp = json["temperature"].as_f64().unwrap();
        assert!((temp - 0.1).abs() < 0.001);
        assert_eq!(json["stream"], false);
    }

    #[test]
    fn test_vision_request_uses_mime_data_url() {
        let backend = OpenAICompatibleBackend::new("http://localhost", "gemini");
        let request = CompletionRequest::vision(
            None,
            "Read this receipt".into(),
            Attachment {
                bytes: b"abc".to_vec(),
                mime_type: "application/pdf".into(),
            },
            800,
        );

        let json = serde_json::to_value(backend.build_request(&request)).unwrap();
        let parts = &json["messages"][0]["content"];
        assert_eq!(parts[0]["type"], "text");
        assert_eq!(parts[1]["type"], "image_url");
        assert_eq!(
            parts[1]["image_url"]["url"],
            "data:application/pdf;base64,YWJj"
        );
        assert_eq!(json["max_tokens"], 800);
    }

    #[tokio::test]
    async fn test_complete_against_mock_server() {
        let server = MockModelServer::start(r#"{"merchant": "Cafe X", "amount": 250}"#).await;
        let backend = OpenAICompatibleBackend::new(&server.url(), "gemini");

        let request = CompletionRequest::text(None, "extract".into(), 500);
        let text = backend.complete(&request).await.unwrap();
        assert!(text.contains("Cafe X"));
        assert_eq!(server.request_count(), 1);
    }

    #[tokio::test]
    async fn test_health_check_unreachable() {
        let backend = OpenAICompatibleBackend::new("http://localhost:1", "gemini");
        assert!(!backend.health_check().await);
    }
}
