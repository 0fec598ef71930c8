//! Expense record handlers

use std::sync::Arc;

use axum::{
    extract::{Path, Query, Request, State},
    Json,
};
use serde::Deserialize;

use crate::{get_actor, AppError, AppState, MAX_PAGE_LIMIT};
use expenseflow_core::db::ExpenseFilter;
use expenseflow_core::models::{Source, StoreStats, StoredRecord};

/// Query parameters for listing expenses
#[derive(Debug, Deserialize)]
pub struct ExpenseQuery {
    pub source: Option<String>,
    pub user_id: Option<i64>,
    #[serde(default = "default_limit")]
    pub limit: i64,
    #[serde(default)]
    pub offset: i64,
}

fn default_limit() -> i64 {
    50
}

/// GET /api/expenses - List expenses, newest first
pub async fn list_expenses(
    State(state): State<Arc<AppState>>,
    Query(params): Query<ExpenseQuery>,
    request: Request,
) -> Result<Json<Vec<StoredRecord>>, AppError> {
    let actor = get_actor(request.headers());

    let source = params
        .source
        .as_deref()
        .map(str::parse::<Source>)
        .transpose()
        .map_err(|e| AppError::bad_request(&e))?;

    let limit = params.limit.clamp(1, MAX_PAGE_LIMIT);
    let offset = params.offset.max(0);

    let expenses = state.db.list_expenses(&ExpenseFilter {
        source,
        user_id: params.user_id,
        limit,
        offset,
    })?;

    // Audit log - read access
    state.db.log_audit(
        &actor,
        "list",
        Some("expense"),
        None,
        Some(&format!(
            "source={}, limit={}, offset={}, count={}",
            source.map(|s| s.as_str()).unwrap_or("all"),
            limit,
            offset,
            expenses.len()
        )),
    )?;

    Ok(Json(expenses))
}

/// GET /api/expenses/:id - Get a single expense
pub async fn get_expense(
    State(state): State<Arc<AppState>>,
    Path(id): Path<i64>,
    request: Request,
) -> Result<Json<StoredRecord>, AppError> {
    let actor = get_actor(request.headers());

    let expense = state
        .db
        .get_expense(id)?
        .ok_or_else(|| AppError::not_found(&format!("Expense {} not found", id)))?;

    state
        .db
        .log_audit(&actor, "view", Some("expense"), Some(id), None)?;

    Ok(Json(expense))
}

/// GET /api/status - Store counts and ingestion watermark
pub async fn store_status(
    State(state): State<Arc<AppState>>,
    request: Request,
) -> Result<Json<StoreStats>, AppError> {
    let actor = get_actor(request.headers());

    let stats = state.db.store_stats()?;

    state.db.log_audit(
        &actor,
        "view",
        Some("status"),
        None,
        Some(&format!("total={}", stats.total)),
    )?;

    Ok(Json(stats))
}
