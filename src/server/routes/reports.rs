use crate::core::models::{ErrorLogEntry, Id};
use crate::core::summary::{Month, PortfolioSummary, SummaryInput, build_summary};
use crate::db::{DEFAULT_ERROR_LOG_LIMIT, ErrorReport};
use crate::security::SecurityEvent;
use crate::security::audit::AuditStats;
use crate::security::rate_limit::RateLimitStats;
use crate::server::AppState;
use crate::server::error::{ApiError, ApiResult};
use axum::extract::rejection::{JsonRejection, QueryRejection};
use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::routing::get;
use axum::{Json, Router};
use serde::{Deserialize, Serialize};

const MAX_ERROR_LOG_LIMIT: usize = 500;
const RECENT_SECURITY_EVENTS: usize = 20;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/api/summary", get(summary))
        .route("/api/error-logs", get(list_error_logs).post(create_error_log))
        .route("/api/security/stats", get(security_stats))
}

#[derive(Debug, Deserialize)]
struct SummaryQuery {
    month: Option<String>,
    account_id: Option<Id>,
}

async fn summary(
    State(state): State<AppState>,
    query: Result<Query<SummaryQuery>, QueryRejection>,
) -> ApiResult<Json<PortfolioSummary>> {
    let Query(query) = query?;
    let month = query
        .month
        .as_deref()
        .filter(|m| !m.trim().is_empty())
        .map(str::parse::<Month>)
        .transpose()
        .map_err(|e| ApiError::BadRequest(e.to_string()))?;
    if let Some(account_id) = query.account_id {
        state.db.get_account(account_id).await?;
    }

    let trades = state.db.all_trades().await?;
    let deposits = state.db.all_deposits().await?;
    let deposit_types = state.db.deposit_types().await?;
    let universes = state.db.list_universe(true).await?;
    let risk_groups = state.db.risk_groups().await?;
    let input = SummaryInput {
        trades: &trades,
        deposits: &deposits,
        deposit_types: &deposit_types,
        universes: &universes,
        risk_groups: &risk_groups,
    };
    Ok(Json(build_summary(&input, month, query.account_id)))
}

#[derive(Debug, Deserialize)]
struct ErrorLogQuery {
    limit: Option<usize>,
}

async fn list_error_logs(
    State(state): State<AppState>,
    query: Result<Query<ErrorLogQuery>, QueryRejection>,
) -> ApiResult<Json<Vec<ErrorLogEntry>>> {
    let Query(query) = query?;
    let limit = query
        .limit
        .unwrap_or(DEFAULT_ERROR_LOG_LIMIT)
        .min(MAX_ERROR_LOG_LIMIT);
    Ok(Json(state.db.recent_errors(limit).await?))
}

async fn create_error_log(
    State(state): State<AppState>,
    payload: Result<Json<ErrorReport>, JsonRejection>,
) -> ApiResult<(StatusCode, Json<ErrorLogEntry>)> {
    let Json(report) = payload?;
    let entry = state.db.record_error(report).await?;
    Ok((StatusCode::CREATED, Json(entry)))
}

#[derive(Debug, Serialize)]
struct SecurityStats {
    audit: AuditStats,
    recent_events: Vec<SecurityEvent>,
    rate_limits: Vec<RateLimitStats>,
}

async fn security_stats(State(state): State<AppState>) -> Json<SecurityStats> {
    Json(SecurityStats {
        audit: state.audit.stats(),
        recent_events: state.audit.recent(RECENT_SECURITY_EVENTS),
        rate_limits: vec![state.api_limiter.stats(), state.import_limiter.stats()],
    })
}
