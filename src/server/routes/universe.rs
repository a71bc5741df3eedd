use super::IdParam;
use crate::core::filters::{
    SortDirection, UniverseRow, UniverseSortField, apply_symbol_filter, apply_yield_filter,
    sort_universes,
};
use crate::core::models::{RiskGroup, Screener, Universe};
use crate::db::{ScreenerFlags, SettingsOutcome, SymbolLists, SyncOutcome};
use crate::providers::{REFRESH_CONCURRENCY, RefreshOutcome, refresh_prices};
use crate::server::AppState;
use crate::server::error::{ApiError, ApiResult};
use axum::extract::rejection::{JsonRejection, QueryRejection};
use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::routing::{get, patch, post, put};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/api/feature-flags", get(feature_flags))
        .route("/api/settings", post(update_settings))
        .route("/api/universe", get(list_universe).post(create_universe))
        .route(
            "/api/universe/{id}",
            put(update_universe).delete(delete_universe),
        )
        .route("/api/universe/sync-from-screener", post(sync_from_screener))
        .route("/api/universe/refresh-prices", post(refresh_universe_prices))
        .route("/api/risk-groups", get(list_risk_groups).post(create_risk_group))
        .route("/api/screener", get(list_screener).post(create_screener))
        .route("/api/screener/{id}", patch(update_screener))
}

#[derive(Debug, Serialize)]
struct FeatureFlagsView {
    use_screener_for_universe: bool,
}

async fn feature_flags(State(state): State<AppState>) -> Json<FeatureFlagsView> {
    Json(FeatureFlagsView {
        use_screener_for_universe: state.config.features.use_screener_for_universe,
    })
}

async fn update_settings(
    State(state): State<AppState>,
    payload: Result<Json<SymbolLists>, JsonRejection>,
) -> ApiResult<Json<SettingsOutcome>> {
    let Json(lists) = payload?;
    Ok(Json(state.db.apply_settings(&lists).await?))
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct UniverseQuery {
    symbol: Option<String>,
    min_yield: Option<f64>,
    sort: Option<String>,
    direction: Option<String>,
    include_expired: bool,
}

async fn list_universe(
    State(state): State<AppState>,
    query: Result<Query<UniverseQuery>, QueryRejection>,
) -> ApiResult<Json<Vec<UniverseRow>>> {
    let Query(query) = query?;
    let direction: SortDirection = query
        .direction
        .as_deref()
        .unwrap_or_default()
        .parse()
        .map_err(|e: anyhow::Error| ApiError::BadRequest(e.to_string()))?;
    let field = query
        .sort
        .as_deref()
        .map(str::parse::<UniverseSortField>)
        .transpose()
        .map_err(|e| ApiError::BadRequest(e.to_string()))?;

    let groups: HashMap<_, _> = state
        .db
        .risk_groups()
        .await?
        .into_iter()
        .map(|g| (g.id, g.name))
        .collect();
    let rows: Vec<UniverseRow> = state
        .db
        .list_universe(query.include_expired)
        .await?
        .into_iter()
        .map(|u| {
            let group = groups.get(&u.risk_group_id).cloned();
            UniverseRow::new(u, group)
        })
        .collect();

    let rows = apply_symbol_filter(&rows, query.symbol.as_deref());
    let rows = apply_yield_filter(&rows, query.min_yield);
    let rows = match field {
        Some(field) => sort_universes(rows, field, direction),
        None => rows,
    };
    Ok(Json(rows))
}

async fn create_universe(
    State(state): State<AppState>,
    payload: Result<Json<Universe>, JsonRejection>,
) -> ApiResult<(StatusCode, Json<Universe>)> {
    let Json(universe) = payload?;
    let universe = state.db.create_universe(universe).await?;
    Ok((StatusCode::CREATED, Json(universe)))
}

async fn update_universe(
    State(state): State<AppState>,
    IdParam(id): IdParam,
    payload: Result<Json<Universe>, JsonRejection>,
) -> ApiResult<Json<Universe>> {
    let Json(universe) = payload?;
    Ok(Json(state.db.update_universe(id, universe).await?))
}

async fn delete_universe(
    State(state): State<AppState>,
    IdParam(id): IdParam,
) -> ApiResult<StatusCode> {
    state.db.delete_universe(id).await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn sync_from_screener(State(state): State<AppState>) -> ApiResult<Json<SyncOutcome>> {
    if !state.config.features.use_screener_for_universe {
        return Err(ApiError::Conflict(
            "Screener sync is disabled (USE_SCREENER_FOR_UNIVERSE is off)".to_string(),
        ));
    }
    Ok(Json(state.db.sync_universe_from_screener().await?))
}

async fn refresh_universe_prices(
    State(state): State<AppState>,
) -> ApiResult<Json<RefreshOutcome>> {
    let outcome = refresh_prices(&state.db, state.prices.as_ref(), REFRESH_CONCURRENCY).await?;
    Ok(Json(outcome))
}

#[derive(Debug, Deserialize)]
struct RiskGroupBody {
    name: String,
}

async fn list_risk_groups(State(state): State<AppState>) -> ApiResult<Json<Vec<RiskGroup>>> {
    Ok(Json(state.db.risk_groups().await?))
}

async fn create_risk_group(
    State(state): State<AppState>,
    payload: Result<Json<RiskGroupBody>, JsonRejection>,
) -> ApiResult<(StatusCode, Json<RiskGroup>)> {
    let Json(body) = payload?;
    let group = state.db.create_risk_group(&body.name).await?;
    Ok((StatusCode::CREATED, Json(group)))
}

async fn list_screener(State(state): State<AppState>) -> ApiResult<Json<Vec<Screener>>> {
    Ok(Json(state.db.list_screener().await?))
}

async fn create_screener(
    State(state): State<AppState>,
    payload: Result<Json<Screener>, JsonRejection>,
) -> ApiResult<(StatusCode, Json<Screener>)> {
    let Json(screener) = payload?;
    let screener = state.db.create_screener(screener).await?;
    Ok((StatusCode::CREATED, Json(screener)))
}

async fn update_screener(
    State(state): State<AppState>,
    IdParam(id): IdParam,
    payload: Result<Json<ScreenerFlags>, JsonRejection>,
) -> ApiResult<Json<Screener>> {
    let Json(flags) = payload?;
    Ok(Json(state.db.update_screener_flags(id, &flags).await?))
}
