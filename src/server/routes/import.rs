use crate::import::{ImportReport, import_fidelity};
use crate::security::{SecurityEventKind, client_source};
use crate::server::AppState;
use crate::server::error::{ApiError, ApiResult};
use axum::body::Bytes;
use axum::extract::multipart::MultipartRejection;
use axum::extract::rejection::QueryRejection;
use axum::extract::{Multipart, Query, Request, State};
use axum::http::StatusCode;
use axum::routing::post;
use axum::{Json, Router};
use serde::Deserialize;
use serde_json::Value;
use tracing::debug;

const UPLOAD_FIELD: &str = "file";

// CSP reports are small; anything larger is not a browser report.
const CSP_REPORT_LIMIT: usize = 64 * 1024;

pub fn router() -> Router<AppState> {
    Router::new().route("/api/import/fidelity", post(import_upload))
}

pub fn csp_router() -> Router<AppState> {
    Router::new().route("/api/csp-report", post(csp_report))
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct ImportQuery {
    dry_run: bool,
}

async fn import_upload(
    State(state): State<AppState>,
    query: Result<Query<ImportQuery>, QueryRejection>,
    multipart: Result<Multipart, MultipartRejection>,
) -> ApiResult<Json<ImportReport>> {
    let Query(query) = query?;
    let mut multipart = multipart.map_err(|e| ApiError::BadRequest(e.body_text()))?;

    let mut upload: Option<Bytes> = None;
    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| ApiError::BadRequest(e.body_text()))?
    {
        if field.name() == Some(UPLOAD_FIELD) {
            debug!(
                file_name = field.file_name().unwrap_or("<unnamed>"),
                "Receiving import upload"
            );
            upload = Some(
                field
                    .bytes()
                    .await
                    .map_err(|e| ApiError::BadRequest(e.body_text()))?,
            );
        }
    }
    let upload = upload.ok_or_else(|| {
        ApiError::BadRequest(format!("Multipart field '{UPLOAD_FIELD}' is required"))
    })?;

    let report = import_fidelity(&state.db, &upload, query.dry_run).await?;
    Ok(Json(report))
}

/// Accepts browser violation reports sent as `application/csp-report` or JSON.
async fn csp_report(State(state): State<AppState>, request: Request) -> ApiResult<StatusCode> {
    let source = client_source(&request, state.config.security.trust_proxy);
    let body = axum::body::to_bytes(request.into_body(), CSP_REPORT_LIMIT)
        .await
        .map_err(|_| ApiError::BadRequest("CSP report body is too large".to_string()))?;
    let report: Value = serde_json::from_slice(&body)
        .map_err(|e| ApiError::BadRequest(format!("Invalid CSP report: {e}")))?;

    state
        .audit
        .record(SecurityEventKind::CspViolation, &source, describe_violation(&report));
    Ok(StatusCode::NO_CONTENT)
}

fn describe_violation(report: &Value) -> String {
    // Reporting API batches arrive as an array of {"type", "body"} objects.
    let report = match report {
        Value::Array(items) => items.first().and_then(|i| i.get("body")).unwrap_or(report),
        other => other.get("csp-report").unwrap_or(other),
    };
    let field = |names: &[&str]| {
        names
            .iter()
            .find_map(|n| report.get(*n).and_then(Value::as_str))
            .unwrap_or("unknown")
            .to_string()
    };
    format!(
        "{} blocked {} on {}",
        field(&["violated-directive", "effectiveDirective", "effective-directive"]),
        field(&["blocked-uri", "blockedURL"]),
        field(&["document-uri", "documentURL"]),
    )
}
