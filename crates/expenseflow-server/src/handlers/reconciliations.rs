//! Reconciliation report handlers

use std::sync::Arc;

use axum::{
    extract::{Path, Query, Request, State},
    Json,
};
use serde::Deserialize;

use crate::{get_actor, AppError, AppState, MAX_BODY_SIZE};
use expenseflow_core::models::{NewReconciliation, ReconciliationReport};

/// Query parameters for listing reports
#[derive(Debug, Deserialize)]
pub struct ReconciliationQuery {
    pub year: Option<i32>,
}

/// GET /api/reconciliations - List reports, optionally for one year
pub async fn list_reconciliations(
    State(state): State<Arc<AppState>>,
    Query(params): Query<ReconciliationQuery>,
    request: Request,
) -> Result<Json<Vec<ReconciliationReport>>, AppError> {
    let actor = get_actor(request.headers());

    let reports = state.db.list_reconciliations(params.year)?;

    state.db.log_audit(
        &actor,
        "list",
        Some("reconciliation"),
        None,
        Some(&format!(
            "year={}, count={}",
            params
                .year
                .map(|y| y.to_string())
                .unwrap_or_else(|| "all".to_string()),
            reports.len()
        )),
    )?;

    Ok(Json(reports))
}

/// GET /api/reconciliations/:id - Get a single report
pub async fn get_reconciliation(
    State(state): State<Arc<AppState>>,
    Path(id): Path<i64>,
    request: Request,
) -> Result<Json<ReconciliationReport>, AppError> {
    let actor = get_actor(request.headers());

    let report = state
        .db
        .get_reconciliation(id)?
        .ok_or_else(|| AppError::not_found(&format!("Reconciliation {} not found", id)))?;

    state
        .db
        .log_audit(&actor, "view", Some("reconciliation"), Some(id), None)?;

    Ok(Json(report))
}

/// POST /api/reconciliations - Store a report
pub async fn create_reconciliation(
    State(state): State<Arc<AppState>>,
    request: Request,
) -> Result<Json<ReconciliationReport>, AppError> {
    let actor = get_actor(request.headers());

    let bytes = axum::body::to_bytes(request.into_body(), MAX_BODY_SIZE)
        .await
        .map_err(|_| AppError::bad_request("Invalid request body"))?;
    let req: NewReconciliation =
        serde_json::from_slice(&bytes).map_err(|_| AppError::bad_request("Invalid JSON"))?;

    if !(1..=12).contains(&req.month) {
        return Err(AppError::bad_request("Month must be between 1 and 12"));
    }

    let id = state.db.create_reconciliation(&req)?;

    state.db.log_audit(
        &actor,
        "create",
        Some("reconciliation"),
        Some(id),
        Some(&format!("month={}, year={}", req.month, req.year)),
    )?;

    let report = state
        .db
        .get_reconciliation(id)?
        .ok_or_else(|| AppError::not_found("Reconciliation not found after creation"))?;

    Ok(Json(report))
}
