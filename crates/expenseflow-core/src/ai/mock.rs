//! Scripted backend for testing
//!
//! Replies are queued up front and handed out in order, so a test can script
//! exactly what the "model" says for each extraction call. Clones share the
//! same script, which lets a test keep a handle after passing the backend in.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;

use crate::error::{Error, Result};

use super::{AIBackend, CompletionRequest};

#[derive(Debug, Clone)]
enum Scripted {
    Reply(String),
    Fail(String),
}

/// Mock AI backend for testing
#[derive(Clone, Default)]
pub struct MockBackend {
    script: Arc<Mutex<VecDeque<Scripted>>>,
    requests: Arc<Mutex<Vec<CompletionRequest>>>,
    /// Whether health_check should return true
    pub healthy: bool,
}

impl MockBackend {
    /// Create a new mock backend (healthy, nothing scripted)
    pub fn new() -> Self {
        Self {
            healthy: true,
            ..Default::default()
        }
    }

    /// Queue a raw model reply
    pub fn with_response(self, text: impl Into<String>) -> Self {
        self.push(Scripted::Reply(text.into()));
        self
    }

    /// Queue a failed call
    pub fn with_failure(self, message: impl Into<String>) -> Self {
        self.push(Scripted::Fail(message.into()));
        self
    }

    /// Queue a reply on an existing handle
    pub fn push_response(&self, text: impl Into<String>) {
        self.push(Scripted::Reply(text.into()));
    }

    /// Number of completion calls made so far
    pub fn call_count(&self) -> usize {
        self.requests.lock().map(|r| r.len()).unwrap_or(0)
    }

    /// Copy of every request received, oldest first
    pub fn requests(&self) -> Vec<CompletionRequest> {
        self.requests.lock().map(|r| r.clone()).unwrap_or_default()
    }

    fn push(&self, item: Scripted) {
        if let Ok(mut script) = self.script.lock() {
            script.push_back(item);
        }
    }
}

#[async_trait]
impl AIBackend for MockBackend {
    async fn complete(&self, request: &CompletionRequest) -> Result<String> {
        if let Ok(mut requests) = self.requests.lock() {
            requests.push(request.clone());
        }

        let next = self
            .script
            .lock()
            .map_err(|_| Error::InvalidData("Mock script lock poisoned".into()))?
            .pop_front();

        match next {
            Some(Scripted::Reply(text)) => Ok(text),
            Some(Scripted::Fail(message)) => Err(Error::InvalidData(message)),
            None => Err(Error::InvalidData("Mock backend has no scripted reply".into())),
        }
    }

    async fn health_check(&self) -> bool {
        self.healthy
    }

    fn model(&self) -> &str {
        "mock"
    }

    fn host(&self) -> &str {
        "mock://localhost"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request() -> CompletionRequest {
        CompletionRequest::text(None, "extract".into(), 100)
    }

    #[tokio::test]
    async fn test_replies_in_order() {
        let mock = MockBackend::new().with_response("one").with_response("two");
        assert_eq!(mock.complete(&request()).await.unwrap(), "one");
        assert_eq!(mock.complete(&request()).await.unwrap(), "two");
        assert!(mock.complete(&request()).await.is_err());
        assert_eq!(mock.call_count(), 3);
    }

    #[tokio::test]
    async fn test_clones_share_script() {
        let mock = MockBackend::new();
        let handle = mock.clone();
        handle.push_response("shared");
        assert_eq!(mock.complete(&request()).await.unwrap(), "shared");
        assert_eq!(handle.call_count(), 1);
    }

    #[tokio::test]
    async fn test_scripted_failure() {
        let mock = MockBackend::new().with_failure("timeout");
        let err = mock.complete(&request()).await.unwrap_err();
        assert!(err.to_string().contains("timeout"));
    }
}
