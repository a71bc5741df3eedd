pub mod accounts;
pub mod health;
pub mod import;
pub mod reports;
pub mod universe;

use super::AppState;
use super::error::ApiError;
use crate::core::models::Id;
use axum::Router;
use axum::extract::{FromRequestParts, Path};
use axum::http::request::Parts;

/// `/api/*` routes except the import upload, which carries its own limits.
pub fn api_router() -> Router<AppState> {
    Router::new()
        .merge(accounts::router())
        .merge(universe::router())
        .merge(reports::router())
        .merge(import::csp_router())
}

/// Numeric `{id}` path segment, rejected with the standard error body.
pub struct IdParam(pub Id);

impl<S: Send + Sync> FromRequestParts<S> for IdParam {
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let Path(id) = Path::<Id>::from_request_parts(parts, state).await?;
        Ok(IdParam(id))
    }
}
