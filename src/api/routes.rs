//! Operational HTTP endpoints.
//!
//! Thin wrappers over the settlement engine and ranking query service for
//! operators and the profile/leaderboard frontend. All business rules live
//! below this layer.

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::Json,
    routing::{get, post},
    Router,
};
use serde::Deserialize;
use serde_json::{json, Value};
use std::sync::Arc;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::warn;

use crate::ranking::RankingQuery;
use crate::settlement::{MissingResolution, SettlementEngine, SettlementReport};
use crate::store::SettlementStore;

#[derive(Clone)]
pub struct ApiState {
    pub engine: Arc<SettlementEngine>,
    pub query: RankingQuery,
    pub store: Arc<SettlementStore>,
    pub settle_batch_limit: usize,
}

pub fn router(state: ApiState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/api/settlement/decisions/:id", post(settle_decision))
        .route("/api/settlement/run", post(settle_all))
        .route("/api/settlement/audit", get(ledger_audit))
        .route("/api/rankings", get(all_regions_ranking))
        .route("/api/rankings/:region", get(region_ranking))
        .route("/api/users/:id", get(user_profile))
        .route("/api/users/:id/ledger", get(user_ledger))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

async fn health() -> Json<Value> {
    Json(json!({ "status": "ok" }))
}

#[derive(Debug, Deserialize)]
struct LimitQuery {
    limit: Option<usize>,
}

async fn settle_decision(
    State(state): State<ApiState>,
    Path(decision_id): Path<String>,
) -> Result<Json<SettlementReport>, StatusCode> {
    match state.engine.settle_decision(&decision_id).await {
        Ok(report) => Ok(Json(report)),
        Err(e) => {
            warn!(decision_id = %decision_id, error = %e, "Settle request failed");
            if e.downcast_ref::<MissingResolution>().is_some() {
                Err(StatusCode::NOT_FOUND)
            } else {
                Err(StatusCode::UNPROCESSABLE_ENTITY)
            }
        }
    }
}

async fn settle_all(
    State(state): State<ApiState>,
    Query(params): Query<LimitQuery>,
) -> Result<Json<SettlementReport>, StatusCode> {
    let limit = params.limit.unwrap_or(state.settle_batch_limit);
    state
        .engine
        .settle_all_resolved_decisions(limit)
        .await
        .map(Json)
        .map_err(|e| {
            warn!(error = %e, "Settlement sweep failed");
            StatusCode::INTERNAL_SERVER_ERROR
        })
}

async fn ledger_audit(State(state): State<ApiState>) -> Result<Json<Value>, StatusCode> {
    let unledgered = state.store.unledgered_resolved_predictions().map_err(|e| {
        warn!(error = %e, "Ledger audit failed");
        StatusCode::INTERNAL_SERVER_ERROR
    })?;
    Ok(Json(json!({
        "clean": unledgered.is_empty(),
        "unledgered_predictions": unledgered,
    })))
}

async fn region_ranking(
    State(state): State<ApiState>,
    Path(region): Path<String>,
    Query(params): Query<LimitQuery>,
) -> Result<Json<Value>, StatusCode> {
    let limit = params.limit.unwrap_or(10);
    let entries = state.query.region_ranking(&region, limit).map_err(|e| {
        warn!(region = %region, error = %e, "Ranking query failed");
        StatusCode::INTERNAL_SERVER_ERROR
    })?;
    Ok(Json(json!({ "region": region, "entries": entries })))
}

async fn all_regions_ranking(
    State(state): State<ApiState>,
    Query(params): Query<LimitQuery>,
) -> Result<Json<Value>, StatusCode> {
    let limit = params.limit.unwrap_or(10);
    let rankings = state.query.all_regions_ranking(limit).map_err(|e| {
        warn!(error = %e, "All-regions ranking query failed");
        StatusCode::INTERNAL_SERVER_ERROR
    })?;
    Ok(Json(json!({ "regions": rankings })))
}

async fn user_profile(
    State(state): State<ApiState>,
    Path(user_id): Path<String>,
) -> Result<Json<Value>, StatusCode> {
    let user = state
        .store
        .get_user(&user_id)
        .map_err(|e| {
            warn!(user_id = %user_id, error = %e, "User lookup failed");
            StatusCode::INTERNAL_SERVER_ERROR
        })?
        .ok_or(StatusCode::NOT_FOUND)?;
    Ok(Json(json!({ "user": user })))
}

async fn user_ledger(
    State(state): State<ApiState>,
    Path(user_id): Path<String>,
    Query(params): Query<LimitQuery>,
) -> Result<Json<Value>, StatusCode> {
    let limit = params.limit.unwrap_or(50);
    let entries = state.store.ledger_for_user(&user_id, limit).map_err(|e| {
        warn!(user_id = %user_id, error = %e, "Ledger lookup failed");
        StatusCode::INTERNAL_SERVER_ERROR
    })?;
    Ok(Json(json!({ "user_id": user_id, "entries": entries })))
}
