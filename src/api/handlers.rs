//! Route handlers for the read-only query façade.

use crate::api::AppState;
use axum::extract::{Query, State};
use axum::response::IntoResponse;
use axum::{http::StatusCode, Json};
use serde::Deserialize;
use serde_json::json;
use std::sync::Arc;

fn err_response(status: StatusCode, message: impl Into<String>) -> axum::response::Response {
    (status, Json(json!({ "error": message.into() }))).into_response()
}

const BANNED_TOKENS: &[&str] = &[
    ";", "--", "/*", "insert", "update", "delete", "drop", "create", "alter", "truncate",
];

/// Rejects anything but a single read-only `SELECT` statement. This is a
/// denylist filter, not a parser — it exists to keep `/sql` honest for an
/// operator dashboard, not to be adversarially safe against a hostile
/// caller.
fn is_safe_select(q: &str) -> bool {
    let trimmed = q.trim();
    if !trimmed.to_ascii_lowercase().starts_with("select") {
        return false;
    }
    let lower = trimmed.to_ascii_lowercase();
    !BANNED_TOKENS.iter().any(|t| lower.contains(t))
}

#[derive(Debug, Deserialize)]
pub struct SqlParams {
    pub q: String,
}

pub async fn sql(State(state): State<Arc<AppState>>, Query(params): Query<SqlParams>) -> axum::response::Response {
    if !is_safe_select(&params.q) {
        return err_response(StatusCode::BAD_REQUEST, "only a single read-only SELECT is allowed");
    }
    match state.store.query_json(&params.q) {
        Ok(value) => Json(value).into_response(),
        Err(e) => err_response(StatusCode::BAD_REQUEST, e.to_string()),
    }
}

const TABLES: &[&str] = &[
    "condition",
    "pnl_condition",
    "enriched_order_filled",
    "split",
    "merge",
    "redemption",
];

pub async fn stats(State(state): State<Arc<AppState>>) -> axum::response::Response {
    let mut counts = serde_json::Map::new();
    for table in TABLES {
        match state.store.query_single_int(&format!("SELECT COUNT(*) FROM {table}")) {
            Ok(n) => {
                counts.insert((*table).to_string(), json!(n));
            }
            Err(_) => {
                counts.insert((*table).to_string(), json!(null));
            }
        }
    }
    Json(serde_json::Value::Object(counts)).into_response()
}

pub async fn sync_state(State(state): State<Arc<AppState>>) -> axum::response::Response {
    match state.store.query_json("SELECT * FROM sync_state") {
        Ok(value) => Json(value).into_response(),
        Err(e) => err_response(StatusCode::INTERNAL_SERVER_ERROR, e.to_string()),
    }
}

pub async fn entity_stats(State(state): State<Arc<AppState>>) -> axum::response::Response {
    match state.stats.snapshot_json() {
        Ok(value) => Json(value).into_response(),
        Err(e) => err_response(StatusCode::INTERNAL_SERVER_ERROR, e.to_string()),
    }
}

#[derive(Debug, Deserialize)]
pub struct IndexerFailsParams {
    pub source: String,
    pub entity: String,
}

pub async fn indexer_fails(
    State(state): State<Arc<AppState>>,
    Query(params): Query<IndexerFailsParams>,
) -> axum::response::Response {
    let sql = "SELECT indexer_id, fail_requests FROM indexer_fail_meta
               WHERE source = ?1 AND entity = ?2 ORDER BY fail_requests DESC";
    match state
        .store
        .query_json_params(sql, rusqlite::params![params.source, params.entity])
    {
        Ok(value) => Json(value).into_response(),
        Err(e) => err_response(StatusCode::INTERNAL_SERVER_ERROR, e.to_string()),
    }
}

pub async fn rebuild_all(State(state): State<Arc<AppState>>) -> axum::response::Response {
    let engine = state.rebuild.clone();
    tokio::task::spawn_blocking(move || {
        if let Err(e) = engine.run() {
            tracing::error!(error = %e, "rebuild failed");
        }
    });
    Json(json!({ "started": true })).into_response()
}

pub async fn rebuild_status(State(state): State<Arc<AppState>>) -> axum::response::Response {
    Json(state.rebuild.status()).into_response()
}

pub async fn rebuild_load(State(state): State<Arc<AppState>>) -> axum::response::Response {
    match state.rebuild.load_from_file() {
        Ok(()) => Json(json!({ "loaded": true })).into_response(),
        Err(e) => err_response(StatusCode::INTERNAL_SERVER_ERROR, e.to_string()),
    }
}

#[derive(Debug, Deserialize)]
pub struct UserParam {
    pub user: String,
}

pub async fn replay(State(state): State<Arc<AppState>>, Query(params): Query<UserParam>) -> axum::response::Response {
    match state.rebuild.user_timeline(&params.user) {
        Some(steps) => Json(steps).into_response(),
        None => err_response(StatusCode::NOT_FOUND, "unknown user or rebuild not loaded"),
    }
}

#[derive(Debug, Deserialize)]
pub struct TradesParams {
    pub user: String,
    pub ts: i64,
    pub radius: Option<usize>,
}

pub async fn replay_trades(
    State(state): State<Arc<AppState>>,
    Query(params): Query<TradesParams>,
) -> axum::response::Response {
    let radius = params.radius.unwrap_or(5);
    match state.rebuild.trades_at(&params.user, params.ts, radius) {
        Some(entries) => Json(entries).into_response(),
        None => err_response(StatusCode::NOT_FOUND, "unknown user or rebuild not loaded"),
    }
}

#[derive(Debug, Deserialize)]
pub struct PositionsParams {
    pub user: String,
    pub ts: i64,
}

pub async fn replay_positions(
    State(state): State<Arc<AppState>>,
    Query(params): Query<PositionsParams>,
) -> axum::response::Response {
    match state.rebuild.positions_at(&params.user, params.ts) {
        Some(entries) => Json(entries).into_response(),
        None => err_response(StatusCode::NOT_FOUND, "unknown user or rebuild not loaded"),
    }
}

#[derive(Debug, Deserialize)]
pub struct UserListParams {
    pub limit: Option<usize>,
}

pub async fn replay_users(
    State(state): State<Arc<AppState>>,
    Query(params): Query<UserListParams>,
) -> axum::response::Response {
    let limit = params.limit.unwrap_or(100);
    Json(state.rebuild.user_list(limit)).into_response()
}
