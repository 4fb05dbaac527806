//! Read-only query HTTP façade.

pub mod handlers;

use crate::middleware::request_logging_simple;
use crate::rebuild::RebuildEngine;
use crate::stats::StatsLedger;
use crate::store::Store;
use axum::routing::get;
use axum::Router;
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

pub struct AppState {
    pub store: Arc<Store>,
    pub stats: Arc<StatsLedger>,
    pub rebuild: Arc<RebuildEngine>,
}

/// Builds the façade's router. Every response carries
/// `Access-Control-Allow-Origin: *`.
pub fn router(state: Arc<AppState>) -> Router {
    let cors = CorsLayer::new().allow_origin(Any).allow_methods(Any).allow_headers(Any);

    Router::new()
        .route("/health", get(|| async { "ok" }))
        .route("/sql", get(handlers::sql))
        .route("/stats", get(handlers::stats))
        .route("/sync", get(handlers::sync_state))
        .route("/entity-stats", get(handlers::entity_stats))
        .route("/indexer-fails", get(handlers::indexer_fails))
        .route("/rebuild-all", get(handlers::rebuild_all))
        .route("/rebuild-status", get(handlers::rebuild_status))
        .route("/rebuild-load", get(handlers::rebuild_load))
        .route("/replay", get(handlers::replay))
        .route("/replay-trades", get(handlers::replay_trades))
        .route("/replay-positions", get(handlers::replay_positions))
        .route("/replay-users", get(handlers::replay_users))
        .layer(cors)
        .layer(axum::middleware::from_fn(request_logging_simple))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
