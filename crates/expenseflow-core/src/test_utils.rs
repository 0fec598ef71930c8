//! Test utilities for expenseflow-core
//!
//! Local axum servers that stand in for the HTTP services the crate talks
//! to, so clients can be exercised end to end without network access:
//! - [`MockModelServer`] answers OpenAI chat completions and Ollama generate
//! - [`MockGmailServer`] answers Gmail list/get and the OAuth token endpoint

use axum::{
    extract::{Path, Query, State},
    http::{HeaderMap, StatusCode},
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use base64::Engine;
use serde::Deserialize;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::oneshot;

/// Bind a router on an ephemeral port and serve it until the sender fires
async fn spawn(app: Router) -> (SocketAddr, oneshot::Sender<()>) {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();

    tokio::spawn(async move {
        axum::serve(listener, app)
            .with_graceful_shutdown(async {
                shutdown_rx.await.ok();
            })
            .await
            .unwrap();
    });

    (addr, shutdown_tx)
}

#[derive(Default)]
struct ModelState {
    reply: String,
    requests: AtomicUsize,
    last_request: Mutex<Option<Value>>,
}

impl ModelState {
    fn record(&self, body: Value) {
        self.requests.fetch_add(1, Ordering::SeqCst);
        *self.last_request.lock().unwrap() = Some(body);
    }
}

/// Mock model server returning one fixed reply for every completion
pub struct MockModelServer {
    addr: SocketAddr,
    state: Arc<ModelState>,
    shutdown_tx: Option<oneshot::Sender<()>>,
}

impl MockModelServer {
    /// Start the mock server on an available port
    pub async fn start(reply: &str) -> Self {
        let state = Arc::new(ModelState {
            reply: reply.to_string(),
            ..Default::default()
        });

        let app = Router::new()
            .route("/v1/chat/completions", post(handle_chat_completion))
            .route("/v1/models", get(handle_models))
            .route("/api/generate", post(handle_generate))
            .route("/api/tags", get(handle_tags))
            .with_state(state.clone());

        let (addr, shutdown_tx) = spawn(app).await;
        Self {
            addr,
            state,
            shutdown_tx: Some(shutdown_tx),
        }
    }

    /// Get the base URL for this mock server
    pub fn url(&self) -> String {
        format!("http://{}", self.addr)
    }

    /// Completion requests received so far
    pub fn request_count(&self) -> usize {
        self.state.requests.load(Ordering::SeqCst)
    }

    /// JSON body of the most recent completion request
    pub fn last_request(&self) -> Option<Value> {
        self.state.last_request.lock().unwrap().clone()
    }

    /// Stop the mock server
    pub fn stop(&mut self) {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
        }
    }
}

impl Drop for MockModelServer {
    fn drop(&mut self) {
        self.stop();
    }
}

async fn handle_chat_completion(
    State(state): State<Arc<ModelState>>,
    Json(body): Json<Value>,
) -> Json<Value> {
    let model = body["model"].as_str().unwrap_or("mock").to_string();
    state.record(body);
    Json(json!({
        "id": "chatcmpl-mock",
        "object": "chat.completion",
        "model": model,
        "choices": [{
            "index": 0,
            "message": {"role": "assistant", "content": state.reply},
            "finish_reason": "stop"
        }]
    }))
}

async fn handle_models() -> Json<Value> {
    Json(json!({"object": "list", "data": [{"id": "mock-model", "object": "model"}]}))
}

async fn handle_generate(
    State(state): State<Arc<ModelState>>,
    Json(body): Json<Value>,
) -> Json<Value> {
    let model = body["model"].as_str().unwrap_or("mock").to_string();
    state.record(body);
    Json(json!({"model": model, "response": state.reply, "done": true}))
}

async fn handle_tags() -> Json<Value> {
    Json(json!({"models": [{"name": "llama3.2-vision:latest", "size": 4_000_000_000u64}]}))
}

/// One message held by [`MockGmailServer`]
#[derive(Debug, Clone)]
pub struct MockMail {
    pub id: String,
    pub subject: String,
    pub sender: String,
    /// HTML body, served as a `text/html` part
    pub html: String,
}

impl MockMail {
    pub fn new(id: &str, subject: &str, html: &str) -> Self {
        Self {
            id: id.to_string(),
            subject: subject.to_string(),
            sender: "alerts@bank.example".to_string(),
            html: html.to_string(),
        }
    }

    pub fn with_sender(mut self, sender: &str) -> Self {
        self.sender = sender.to_string();
        self
    }
}

#[derive(Default)]
struct GmailState {
    mails: Vec<MockMail>,
    queries: Mutex<Vec<String>>,
    rejected_tokens: Mutex<Vec<String>>,
    token_requests: AtomicUsize,
}

impl GmailState {
    fn authorized(&self, headers: &HeaderMap) -> bool {
        let Some(token) = headers
            .get("authorization")
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.strip_prefix("Bearer "))
        else {
            return false;
        };
        !self
            .rejected_tokens
            .lock()
            .unwrap()
            .iter()
            .any(|t| t == token)
    }
}

/// Mock Gmail API server
///
/// Search returns every held message regardless of the query (capped by
/// `maxResults`); queries are recorded for assertions. The token endpoint
/// hands out `mock-access-token-1`, `mock-access-token-2`, and so on.
pub struct MockGmailServer {
    addr: SocketAddr,
    state: Arc<GmailState>,
    shutdown_tx: Option<oneshot::Sender<()>>,
}

impl MockGmailServer {
    pub async fn start(mails: Vec<MockMail>) -> Self {
        let state = Arc::new(GmailState {
            mails,
            ..Default::default()
        });

        let app = Router::new()
            .route("/gmail/v1/users/me/messages", get(handle_list))
            .route("/gmail/v1/users/me/messages/:id", get(handle_get))
            .route("/token", post(handle_token))
            .with_state(state.clone());

        let (addr, shutdown_tx) = spawn(app).await;
        Self {
            addr,
            state,
            shutdown_tx: Some(shutdown_tx),
        }
    }

    pub fn url(&self) -> String {
        format!("http://{}", self.addr)
    }

    /// Search queries received so far, oldest first
    pub fn queries(&self) -> Vec<String> {
        self.state.queries.lock().unwrap().clone()
    }

    /// Answer 401 to requests carrying this bearer token
    pub fn reject_token(&self, token: &str) {
        self.state
            .rejected_tokens
            .lock()
            .unwrap()
            .push(token.to_string());
    }

    /// Token endpoint calls received so far
    pub fn token_requests(&self) -> usize {
        self.state.token_requests.load(Ordering::SeqCst)
    }

    pub fn stop(&mut self) {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
        }
    }
}

impl Drop for MockGmailServer {
    fn drop(&mut self) {
        self.stop();
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ListParams {
    #[serde(default)]
    q: String,
    max_results: Option<usize>,
}

async fn handle_list(
    State(state): State<Arc<GmailState>>,
    headers: HeaderMap,
    Query(params): Query<ListParams>,
) -> impl IntoResponse {
    if !state.authorized(&headers) {
        return (StatusCode::UNAUTHORIZED, Json(json!({"error": "unauthenticated"})));
    }
    state.queries.lock().unwrap().push(params.q);

    let cap = params.max_results.unwrap_or(100);
    let messages: Vec<Value> = state
        .mails
        .iter()
        .take(cap)
        .map(|m| json!({"id": m.id, "threadId": m.id}))
        .collect();

    if messages.is_empty() {
        return (StatusCode::OK, Json(json!({"resultSizeEstimate": 0})));
    }
    (
        StatusCode::OK,
        Json(json!({"messages": messages, "resultSizeEstimate": state.mails.len()})),
    )
}

async fn handle_get(
    State(state): State<Arc<GmailState>>,
    headers: HeaderMap,
    Path(id): Path<String>,
    Query(_params): Query<HashMap<String, String>>,
) -> impl IntoResponse {
    if !state.authorized(&headers) {
        return (StatusCode::UNAUTHORIZED, Json(json!({"error": "unauthenticated"})));
    }

    let Some(mail) = state.mails.iter().find(|m| m.id == id) else {
        return (
            StatusCode::NOT_FOUND,
            Json(json!({"error": {"code": 404, "message": "Requested entity was not found."}})),
        );
    };

    let data = base64::engine::general_purpose::URL_SAFE.encode(&mail.html);
    (
        StatusCode::OK,
        Json(json!({
            "id": mail.id,
            "threadId": mail.id,
            "snippet": mail.subject,
            "internalDate": "1709287200000",
            "payload": {
                "mimeType": "multipart/alternative",
                "headers": [
                    {"name": "Subject", "value": mail.subject},
                    {"name": "From", "value": mail.sender},
                    {"name": "Date", "value": "Fri, 1 Mar 2024 10:00:00 +0000"}
                ],
                "body": {"size": 0},
                "parts": [{
                    "mimeType": "text/html",
                    "headers": [],
                    "body": {"size": mail.html.len(), "data": data}
                }]
            }
        })),
    )
}

async fn handle_token(State(state): State<Arc<GmailState>>) -> Json<Value> {
    let issued = state.token_requests.fetch_add(1, Ordering::SeqCst) + 1;
    Json(json!({
        "access_token": format!("mock-access-token-{}", issued),
        "expires_in": 3599,
        "token_type": "Bearer"
    }))
}
