//! Pluggable model backend abstraction
//!
//! This module provides a backend-agnostic interface for the single model
//! operation the system needs: a near-deterministic completion over a text
//! prompt, optionally with one attached document (receipt photo or PDF).
//!
//! # Architecture
//!
//! - `AIBackend` trait: defines the interface for all model backends
//! - `AIClient` enum: concrete wrapper providing Clone + compile-time dispatch
//! - Backend implementations: `OpenAICompatibleBackend`, `OllamaBackend`, `MockBackend`
//! - `Extractor`: renders prompts, calls the backend and parses the JSON reply
//!   into a `CandidateExpense`
//!
//! # Configuration
//!
//! Environment variables:
//! - `AI_BACKEND`: Backend to use (openai_compatible, ollama, mock). Default: openai_compatible
//! - `OPENAI_COMPATIBLE_HOST`: Server URL (required for openai_compatible backend)
//! - `OPENAI_COMPATIBLE_MODEL`: Model name (default: google/gemini-2.0-flash-exp)
//! - `OPENAI_COMPATIBLE_API_KEY`: API key if required (optional)
//! - `OLLAMA_HOST`: Ollama server URL (required for ollama backend)
//! - `OLLAMA_MODEL`: Model name (default: llama3.2-vision)

mod extractor;
mod mock;
mod ollama;
mod openai_compatible;
pub mod parsing;

pub use extractor::{detect_mime_type, ExtractionInput, Extractor};
pub use mock::MockBackend;
pub use ollama::OllamaBackend;
pub use openai_compatible::OpenAICompatibleBackend;
pub use parsing::{ExtractionError, ExtractionKind};

use async_trait::async_trait;

use crate::error::Result;

/// Sampling temperature used for every extraction call
pub const EXTRACTION_TEMPERATURE: f32 = 0.1;

/// A binary document sent alongside the prompt
#[derive(Debug, Clone)]
pub struct Attachment {
    pub bytes: Vec<u8>,
    pub mime_type: String,
}

/// One completion request
#[derive(Debug, Clone)]
pub struct CompletionRequest {
    /// Optional system instructions
    pub system: Option<String>,
    /// User prompt text
    pub prompt: String,
    /// Receipt image or PDF, for vision requests
    pub attachment: Option<Attachment>,
    pub max_tokens: u32,
}

impl CompletionRequest {
    /// Text-only request
    pub fn text(system: Option<String>, prompt: String, max_tokens: u32) -> Self {
        Self {
            system,
            prompt,
            attachment: None,
            max_tokens,
        }
    }

    /// Request with an attached document
    pub fn vision(
        system: Option<String>,
        prompt: String,
        attachment: Attachment,
        max_tokens: u32,
    ) -> Self {
        Self {
            system,
            prompt,
            attachment: Some(attachment),
            max_tokens,
        }
    }
}

/// Trait defining the interface for all model backends
///
/// Backends should be Send + Sync to allow use across async tasks.
#[async_trait]
pub trait AIBackend: Send + Sync {
    /// Run one completion and return the raw model text
    async fn complete(&self, request: &CompletionRequest) -> Result<String>;

    /// Check if the backend is available
    async fn health_check(&self) -> bool;

    /// Get the model name (for logging)
    fn model(&self) -> &str;

    /// Get the host URL (for logging)
    fn host(&self) -> &str;
}

/// Concrete AI client enum
///
/// Provides Clone and compile-time dispatch without Box<dyn> overhead.
#[derive(Clone)]
pub enum AIClient {
    /// OpenAI-compatible backend (OpenRouter, vLLM, LocalAI, llama-server, etc.)
    OpenAICompatible(OpenAICompatibleBackend),
    /// Ollama backend (HTTP API)
    Ollama(OllamaBackend),
    /// Scripted backend for testing
    Mock(MockBackend),
}

impl AIClient {
    /// Create an AI client from environment variables
    ///
    /// Checks `AI_BACKEND` to determine which backend to use:
    /// - `openai_compatible` (default): Uses OPENAI_COMPATIBLE_HOST and OPENAI_COMPATIBLE_MODEL
    /// - `ollama`: Uses OLLAMA_HOST and OLLAMA_MODEL
    /// - `mock`: Creates an empty scripted backend
    ///
    /// Returns None if the required environment variables are not set.
    pub fn from_env() -> Option<Self> {
        let backend =
            std::env::var("AI_BACKEND").unwrap_or_else(|_| "openai_compatible".to_string());

        match backend.to_lowercase().as_str() {
            "openai_compatible" | "openai" | "openrouter" | "vllm" | "localai" => {
                OpenAICompatibleBackend::from_env().map(AIClient::OpenAICompatible)
            }
            "ollama" => OllamaBackend::from_env().map(AIClient::Ollama),
            "mock" => Some(AIClient::Mock(MockBackend::new())),
            _ => {
                tracing::warn!(backend = %backend, "Unknown AI_BACKEND, falling back to openai_compatible");
                OpenAICompatibleBackend::from_env().map(AIClient::OpenAICompatible)
            }
        }
    }

    /// Create a scripted mock backend for testing
    pub fn mock(backend: MockBackend) -> Self {
        AIClient::Mock(backend)
    }
}

// Implement AIBackend for AIClient by delegating to the inner backend
#[async_trait]
impl AIBackend for AIClient {
    async fn complete(&self, request: &CompletionRequest) -> Result<String> {
        match self {
            AIClient::OpenAICompatible(b) => b.complete(request).await,
            AIClient::Ollama(b) => b.complete(request).await,
            AIClient::Mock(b) => b.complete(request).await,
        }
    }

    async fn health_check(&self) -> bool {
        match self {
            AIClient::OpenAICompatible(b) => b.health_check().await,
            AIClient::Ollama(b) => b.health_check().await,
            AIClient::Mock(b) => b.health_check().await,
        }
    }

    fn model(&self) -> &str {
        match self {
            AIClient::OpenAICompatible(b) => b.model(),
            AIClient::Ollama(b) => b.model(),
            AIClient::Mock(b) => b.model(),
        }
    }

    fn host(&self) -> &str {
        match self {
            AIClient::OpenAICompatible(b) => b.host(),
            AIClient::Ollama(b) => b.host(),
            AIClient::Mock(b) => b.host(),
        }
    }
}
