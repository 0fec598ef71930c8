//! Server API tests

use super::*;
use axum::{
    body::Body,
    http::{Request, StatusCode},
};
use expenseflow_core::db::Database;
use expenseflow_core::gateway::PersistenceGateway;
use expenseflow_core::models::{CandidateExpense, Passthrough, Source};
use http_body_util::BodyExt;
use tower::ServiceExt;

const TEST_KEY: &str = "test-key-0123456789";

fn setup_test_app() -> Router {
    let db = Database::in_memory().unwrap();
    setup_app_with_db(db)
}

fn setup_app_with_db(db: Database) -> Router {
    let config = ServerConfig {
        require_auth: false,
        allowed_origins: vec![],
        ..Default::default()
    };
    create_router(db, config)
}

fn setup_auth_app(db: Database) -> Router {
    let config = ServerConfig {
        require_auth: true,
        api_keys: vec![TEST_KEY.to_string()],
        ..Default::default()
    };
    create_router(db, config)
}

async fn get_body_json(response: axum::response::Response) -> serde_json::Value {
    let body = response.into_body();
    let bytes = body.collect().await.unwrap().to_bytes();
    serde_json::from_slice(&bytes).unwrap()
}

fn seed_expense(db: &Database, merchant: &str, amount: f64, source: Source, message_id: &str) {
    let candidate = CandidateExpense {
        merchant: merchant.to_string(),
        amount,
        currency: "INR".to_string(),
        date: chrono::NaiveDate::from_ymd_opt(2024, 3, 1),
        items: vec![],
        tax_amount: None,
        payment_method: None,
        category: None,
        alert: None,
        passthrough: Passthrough {
            message_id: Some(message_id.to_string()),
            ..Default::default()
        },
    };
    PersistenceGateway::new(db.clone())
        .save_from_mail(candidate, source)
        .unwrap();
}

fn get(uri: &str) -> Request<Body> {
    Request::builder().uri(uri).body(Body::empty()).unwrap()
}

fn post_json(uri: &str, body: &serde_json::Value) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(uri)
        .header("content-type", "application/json")
        .body(Body::from(serde_json::to_string(body).unwrap()))
        .unwrap()
}

// ========== Health ==========

#[tokio::test]
async fn test_health() {
    let app = setup_test_app();

    let response = app.oneshot(get("/health")).await.unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(
        response.headers().get("x-content-type-options").unwrap(),
        "nosniff"
    );
    assert_eq!(response.headers().get("x-frame-options").unwrap(), "DENY");

    let json = get_body_json(response).await;
    assert_eq!(json["status"], "healthy");
    assert_eq!(json["service"], "expenseflow");
}

#[tokio::test]
async fn test_health_needs_no_auth() {
    let app = setup_auth_app(Database::in_memory().unwrap());

    let response = app.oneshot(get("/health")).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
}

// ========== Authentication ==========

#[tokio::test]
async fn test_api_requires_key() {
    let app = setup_auth_app(Database::in_memory().unwrap());

    let response = app.oneshot(get("/api/expenses")).await.unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

    let json = get_body_json(response).await;
    assert_eq!(json["error"], "Authentication required");
}

#[tokio::test]
async fn test_api_rejects_wrong_key() {
    let app = setup_auth_app(Database::in_memory().unwrap());

    let response = app
        .oneshot(
            Request::builder()
                .uri("/api/expenses")
                .header("authorization", "Bearer test-key-0123456780")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_api_accepts_valid_key_and_audits_actor() {
    let db = Database::in_memory().unwrap();
    let app = setup_auth_app(db.clone());

    let response = app
        .oneshot(
            Request::builder()
                .uri("/api/expenses")
                .header("authorization", format!("Bearer {}", TEST_KEY))
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);

    let entries = db.list_audit_log(10).unwrap();
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0].actor, "api-key");
    assert_eq!(entries[0].action, "list");
    assert_eq!(entries[0].entity_type.as_deref(), Some("expense"));
}

#[test]
fn test_validate_api_key() {
    let keys = vec!["alpha".to_string(), "bravo-key".to_string()];
    assert!(validate_api_key("alpha", &keys));
    assert!(validate_api_key("bravo-key", &keys));
    assert!(!validate_api_key("alph", &keys));
    assert!(!validate_api_key("alphb", &keys));
    assert!(!validate_api_key("", &keys));
    assert!(!validate_api_key("alpha", &[]));
}

#[test]
fn test_parse_api_keys() {
    assert_eq!(
        parse_api_keys(" one, two ,,three "),
        vec!["one".to_string(), "two".to_string(), "three".to_string()]
    );
    assert!(parse_api_keys("").is_empty());
}

// ========== Expenses ==========

#[tokio::test]
async fn test_list_expenses_newest_first() {
    let db = Database::in_memory().unwrap();
    seed_expense(&db, "CAFE X", 250.0, Source::Email, "m1");
    seed_expense(&db, "FUEL", 1050.5, Source::Email, "m2");
    let app = setup_app_with_db(db);

    let response = app.oneshot(get("/api/expenses")).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let json = get_body_json(response).await;
    let expenses = json.as_array().unwrap();
    assert_eq!(expenses.len(), 2);
    assert_eq!(expenses[0]["merchant"], "FUEL");
    assert_eq!(expenses[0]["source"], "email");
    assert_eq!(expenses[1]["message_id"], "m1");
}

#[tokio::test]
async fn test_list_expenses_filters_by_source() {
    let db = Database::in_memory().unwrap();
    seed_expense(&db, "HDFC", 100.0, Source::Email, "m1");
    seed_expense(&db, "Store", 20.0, Source::ForwardedEmail, "m2");
    let app = setup_app_with_db(db);

    let response = app
        .oneshot(get("/api/expenses?source=forwarded_email"))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let json = get_body_json(response).await;
    let expenses = json.as_array().unwrap();
    assert_eq!(expenses.len(), 1);
    assert_eq!(expenses[0]["merchant"], "Store");
}

#[tokio::test]
async fn test_list_expenses_unknown_source() {
    let app = setup_test_app();

    let response = app
        .oneshot(get("/api/expenses?source=fax"))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_list_expenses_limit_is_clamped() {
    let db = Database::in_memory().unwrap();
    for i in 0..3 {
        seed_expense(&db, "M", i as f64, Source::Email, &format!("m{}", i));
    }
    let app = setup_app_with_db(db.clone());

    let response = app
        .clone()
        .oneshot(get("/api/expenses?limit=2"))
        .await
        .unwrap();
    let json = get_body_json(response).await;
    assert_eq!(json.as_array().unwrap().len(), 2);

    let response = app
        .oneshot(get("/api/expenses?limit=999999"))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let entries = db.list_audit_log(1).unwrap();
    assert!(entries[0]
        .details
        .as_deref()
        .unwrap()
        .contains(&format!("limit={}", MAX_PAGE_LIMIT)));
}

#[tokio::test]
async fn test_get_expense() {
    let db = Database::in_memory().unwrap();
    seed_expense(&db, "CAFE X", 250.0, Source::Email, "m1");
    let id = db.find_expense_by_message_id("m1").unwrap().unwrap().id;
    let app = setup_app_with_db(db);

    let response = app
        .clone()
        .oneshot(get(&format!("/api/expenses/{}", id)))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let json = get_body_json(response).await;
    assert_eq!(json["amount"], 250.0);

    let response = app
        .oneshot(get(&format!("/api/expenses/{}", id + 1)))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_store_status() {
    let db = Database::in_memory().unwrap();
    seed_expense(&db, "CAFE X", 250.0, Source::Email, "m1");
    let app = setup_app_with_db(db);

    let response = app.oneshot(get("/api/status")).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let json = get_body_json(response).await;
    assert_eq!(json["total"], 1);
    assert!(!json["watermark"].is_null());
}

// ========== Reconciliations ==========

#[tokio::test]
async fn test_create_and_list_reconciliations() {
    let db = Database::in_memory().unwrap();
    let app = setup_app_with_db(db.clone());

    let body = serde_json::json!({
        "month": 3,
        "year": 2024,
        "matched_transactions": [{"id": 1}],
        "unmatched_transactions": [],
        "summary": {"matched": 1, "unmatched": 0}
    });
    let response = app
        .clone()
        .oneshot(post_json("/api/reconciliations", &body))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let json = get_body_json(response).await;
    assert_eq!(json["month"], 3);
    assert_eq!(json["summary"]["matched"], 1);
    let id = json["id"].as_i64().unwrap();

    // Another year, with optional fields omitted
    let body = serde_json::json!({"month": 12, "year": 2023});
    let response = app
        .clone()
        .oneshot(post_json("/api/reconciliations", &body))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let response = app
        .clone()
        .oneshot(get("/api/reconciliations?year=2024"))
        .await
        .unwrap();
    let json = get_body_json(response).await;
    let reports = json.as_array().unwrap();
    assert_eq!(reports.len(), 1);
    assert_eq!(reports[0]["id"], id);

    let response = app
        .clone()
        .oneshot(get("/api/reconciliations"))
        .await
        .unwrap();
    let json = get_body_json(response).await;
    assert_eq!(json.as_array().unwrap().len(), 2);

    let response = app
        .oneshot(get(&format!("/api/reconciliations/{}", id)))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let creates = db
        .list_audit_log(20)
        .unwrap()
        .into_iter()
        .filter(|e| e.action == "create")
        .count();
    assert_eq!(creates, 2);
}

#[tokio::test]
async fn test_create_reconciliation_rejects_bad_month() {
    let app = setup_test_app();

    for month in [0, 13] {
        let body = serde_json::json!({"month": month, "year": 2024});
        let response = app
            .clone()
            .oneshot(post_json("/api/reconciliations", &body))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }
}

#[tokio::test]
async fn test_create_reconciliation_rejects_invalid_json() {
    let app = setup_test_app();

    let response = app
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/api/reconciliations")
                .header("content-type", "application/json")
                .body(Body::from("{not json"))
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let json = get_body_json(response).await;
    assert_eq!(json["error"], "Invalid JSON");
}

#[tokio::test]
async fn test_get_reconciliation_not_found() {
    let app = setup_test_app();

    let response = app
        .oneshot(get("/api/reconciliations/404"))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

// ========== Audit ==========

#[tokio::test]
async fn test_audit_log_lists_api_access() {
    let app = setup_test_app();

    app.clone().oneshot(get("/api/expenses")).await.unwrap();

    let response = app.oneshot(get("/api/audit?limit=10")).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let json = get_body_json(response).await;
    let entries = json.as_array().unwrap();
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0]["actor"], "local-dev");
    assert_eq!(entries[0]["entity_type"], "expense");
}
