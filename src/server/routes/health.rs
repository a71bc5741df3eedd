//! Liveness and readiness probes. These sit outside the `/api` CORS and rate-limit
//! layers so orchestrators can always reach them.

use crate::server::AppState;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::get;
use axum::{Json, Router};
use chrono::Utc;
use serde_json::json;
use std::time::Instant;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/health", get(health))
        .route("/health/detailed", get(health_detailed))
        .route("/health/database", get(health_database))
        .route("/ready", get(ready))
        .route("/live", get(live))
}

async fn health() -> impl IntoResponse {
    Json(json!({ "status": "ok", "timestamp": Utc::now() }))
}

async fn health_detailed(State(state): State<AppState>) -> impl IntoResponse {
    let started = Instant::now();
    let ping = state.db.ping().await;
    let latency_ms = started.elapsed().as_millis() as u64;

    let (status, database) = match &ping {
        Ok(()) => (
            StatusCode::OK,
            json!({ "status": "ok", "latency_ms": latency_ms }),
        ),
        Err(e) => (
            StatusCode::SERVICE_UNAVAILABLE,
            json!({ "status": "error", "latency_ms": latency_ms, "error": e.to_string() }),
        ),
    };
    let body = json!({
        "status": if ping.is_ok() { "ok" } else { "degraded" },
        "timestamp": Utc::now(),
        "uptime_seconds": state.started_at.elapsed().as_secs(),
        "version": env!("CARGO_PKG_VERSION"),
        "environment": state.config.environment,
        "checks": { "database": database },
    });
    (status, Json(body))
}

async fn health_database(State(state): State<AppState>) -> impl IntoResponse {
    match state.db.ping().await {
        Ok(()) => (
            StatusCode::OK,
            Json(json!({ "status": "ok", "timestamp": Utc::now() })),
        ),
        Err(e) => (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(json!({
                "status": "error",
                "error": e.to_string(),
                "timestamp": Utc::now(),
            })),
        ),
    }
}

async fn ready(State(state): State<AppState>) -> impl IntoResponse {
    match state.db.ping().await {
        Ok(()) => (StatusCode::OK, Json(json!({ "status": "ready" }))),
        Err(e) => (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(json!({ "status": "not ready", "error": e.to_string() })),
        ),
    }
}

async fn live() -> impl IntoResponse {
    Json(json!({ "status": "alive", "timestamp": Utc::now() }))
}
