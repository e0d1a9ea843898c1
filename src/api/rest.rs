// =============================================================================
// REST API Endpoints — Axum 0.7
// =============================================================================
//
// A read-only observation surface. All endpoints live under `/api/v1/` and
// none of them mutate pipeline state; the ingestion and persistence loops are
// the only writers. CORS is configured permissively for development.
// =============================================================================

use std::sync::Arc;

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
    routing::get,
    Json, Router,
};
use serde::Serialize;
use tower_http::cors::{Any, CorsLayer};

use crate::pipeline_state::PipelineState;

// =============================================================================
// Router construction
// =============================================================================

/// Build the full REST API router with CORS middleware and shared state.
pub fn router(state: Arc<PipelineState>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/api/v1/health", get(health))
        .route("/api/v1/status", get(status))
        .route("/api/v1/candles/:instrument", get(candles))
        .route("/api/v1/history/:instrument/:timeframe", get(history))
        .layer(cors)
        .with_state(state)
}

// =============================================================================
// Handlers
// =============================================================================

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    uptime_secs: u64,
    server_time: i64,
}

async fn health(State(state): State<Arc<PipelineState>>) -> impl IntoResponse {
    Json(HealthResponse {
        status: "ok",
        uptime_secs: state.start_time.elapsed().as_secs(),
        server_time: chrono::Utc::now().timestamp_millis(),
    })
}

/// Full pipeline status: session summary, ingest counters, processor state.
async fn status(State(state): State<Arc<PipelineState>>) -> impl IntoResponse {
    Json(state.build_status())
}

/// The live candle series for one instrument.
async fn candles(
    State(state): State<Arc<PipelineState>>,
    Path(instrument): Path<String>,
) -> impl IntoResponse {
    match state.aggregator.series(&instrument) {
        Some(series) => Json(series).into_response(),
        None => (StatusCode::NOT_FOUND, "no series for instrument").into_response(),
    }
}

/// A cached historical series for (instrument, timeframe-seconds). Expired
/// entries read as missing.
async fn history(
    State(state): State<Arc<PipelineState>>,
    Path((instrument, timeframe)): Path<(String, i64)>,
) -> impl IntoResponse {
    match state.history_cache.get(&instrument, timeframe) {
        Some(series) => Json(series).into_response(),
        None => (StatusCode::NOT_FOUND, "no cached history").into_response(),
    }
}
