use super::IdParam;
use crate::core::filters::{CapitalGainClass, classify_capital_gain};
use crate::core::models::{Account, DivDeposit, DivDepositType, Trade};
use crate::db::TradeStatus;
use crate::server::AppState;
use crate::server::error::ApiResult;
use axum::extract::rejection::{JsonRejection, QueryRejection};
use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::routing::{get, post, put};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/api/accounts", get(list_accounts).post(create_account))
        .route(
            "/api/accounts/{id}",
            put(rename_account).delete(delete_account),
        )
        .route("/api/accounts/{id}/trades", get(list_trades))
        .route("/api/trades", post(create_trade))
        .route("/api/trades/{id}", put(update_trade).delete(delete_trade))
        .route("/api/accounts/{id}/div-deposits", get(list_deposits))
        .route("/api/div-deposits", post(create_deposit))
        .route(
            "/api/div-deposits/{id}",
            put(update_deposit).delete(delete_deposit),
        )
        .route("/api/div-deposit-types", get(list_deposit_types))
}

#[derive(Debug, Deserialize)]
struct AccountBody {
    name: String,
}

async fn list_accounts(State(state): State<AppState>) -> ApiResult<Json<Vec<Account>>> {
    Ok(Json(state.db.list_accounts().await?))
}

async fn create_account(
    State(state): State<AppState>,
    payload: Result<Json<AccountBody>, JsonRejection>,
) -> ApiResult<(StatusCode, Json<Account>)> {
    let Json(body) = payload?;
    let account = state.db.create_account(&body.name).await?;
    Ok((StatusCode::CREATED, Json(account)))
}

async fn rename_account(
    State(state): State<AppState>,
    IdParam(id): IdParam,
    payload: Result<Json<AccountBody>, JsonRejection>,
) -> ApiResult<Json<Account>> {
    let Json(body) = payload?;
    Ok(Json(state.db.rename_account(id, &body.name).await?))
}

async fn delete_account(
    State(state): State<AppState>,
    IdParam(id): IdParam,
) -> ApiResult<StatusCode> {
    state.db.delete_account(id).await?;
    Ok(StatusCode::NO_CONTENT)
}

#[derive(Debug, Deserialize)]
struct TradesQuery {
    status: Option<TradeStatus>,
}

/// A trade as listed to clients, with its symbol and realized result.
#[derive(Debug, Serialize)]
struct TradeView {
    #[serde(flatten)]
    trade: Trade,
    symbol: Option<String>,
    capital_gain: Option<f64>,
    gain_class: Option<CapitalGainClass>,
}

async fn list_trades(
    State(state): State<AppState>,
    IdParam(account_id): IdParam,
    query: Result<Query<TradesQuery>, QueryRejection>,
) -> ApiResult<Json<Vec<TradeView>>> {
    let Query(query) = query?;
    let trades = state.db.list_trades(account_id, query.status).await?;
    let symbols: HashMap<_, _> = state
        .db
        .list_universe(true)
        .await?
        .into_iter()
        .map(|u| (u.id, u.symbol))
        .collect();

    let views = trades
        .into_iter()
        .map(|trade| {
            let capital_gain = trade.capital_gain();
            TradeView {
                symbol: symbols.get(&trade.universe_id).cloned(),
                capital_gain,
                gain_class: capital_gain.map(classify_capital_gain),
                trade,
            }
        })
        .collect();
    Ok(Json(views))
}

async fn create_trade(
    State(state): State<AppState>,
    payload: Result<Json<Trade>, JsonRejection>,
) -> ApiResult<(StatusCode, Json<Trade>)> {
    let Json(trade) = payload?;
    let trade = state.db.create_trade(trade).await?;
    Ok((StatusCode::CREATED, Json(trade)))
}

async fn update_trade(
    State(state): State<AppState>,
    IdParam(id): IdParam,
    payload: Result<Json<Trade>, JsonRejection>,
) -> ApiResult<Json<Trade>> {
    let Json(trade) = payload?;
    Ok(Json(state.db.update_trade(id, trade).await?))
}

async fn delete_trade(
    State(state): State<AppState>,
    IdParam(id): IdParam,
) -> ApiResult<StatusCode> {
    state.db.delete_trade(id).await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn list_deposits(
    State(state): State<AppState>,
    IdParam(account_id): IdParam,
) -> ApiResult<Json<Vec<DivDeposit>>> {
    Ok(Json(state.db.list_deposits(account_id).await?))
}

async fn create_deposit(
    State(state): State<AppState>,
    payload: Result<Json<DivDeposit>, JsonRejection>,
) -> ApiResult<(StatusCode, Json<DivDeposit>)> {
    let Json(deposit) = payload?;
    let deposit = state.db.create_deposit(deposit).await?;
    Ok((StatusCode::CREATED, Json(deposit)))
}

async fn update_deposit(
    State(state): State<AppState>,
    IdParam(id): IdParam,
    payload: Result<Json<DivDeposit>, JsonRejection>,
) -> ApiResult<Json<DivDeposit>> {
    let Json(deposit) = payload?;
    Ok(Json(state.db.update_deposit(id, deposit).await?))
}

async fn delete_deposit(
    State(state): State<AppState>,
    IdParam(id): IdParam,
) -> ApiResult<StatusCode> {
    state.db.delete_deposit(id).await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn list_deposit_types(
    State(state): State<AppState>,
) -> ApiResult<Json<Vec<DivDepositType>>> {
    Ok(Json(state.db.deposit_types().await?))
}
