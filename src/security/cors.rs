//! Origin validation for cross-origin requests.
//!
//! The same policy backs both the `tower_http` CORS layer (which decides whether
//! response headers are emitted) and the enforcement middleware (which refuses
//! requests from origins the policy rejects).

use super::audit::{AuditLog, SecurityEventKind};
use super::client_source;
use crate::core::config::{AppConfig, Environment};
use axum::extract::{Request, State};
use axum::http::{HeaderName, HeaderValue, Method, StatusCode, header};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use axum::Json;
use regex::Regex;
use serde_json::json;
use std::sync::{Arc, LazyLock};
use std::time::Duration;
use tower_http::cors::{AllowOrigin, CorsLayer};
use tracing::debug;

static ORIGIN_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"^https?://(\[[0-9A-Fa-f:.]+\]|[A-Za-z0-9]([A-Za-z0-9-]*[A-Za-z0-9])?(\.[A-Za-z0-9]([A-Za-z0-9-]*[A-Za-z0-9])?)*)(:\d{1,5})?$",
    )
    .expect("origin pattern compiles")
});

static LOCAL_ORIGIN_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^https?://(localhost|127\.0\.0\.1|0\.0\.0\.0)(:\d{1,5})?$")
        .expect("local origin pattern compiles")
});

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CorsRejection {
    #[error("Origin header is required")]
    MissingOrigin,
    #[error("Malformed origin: {0}")]
    Malformed(String),
    #[error("Origin {0} is not allowed")]
    NotAllowed(String),
}

#[derive(Debug, Clone)]
pub struct CorsPolicy {
    allowed: Vec<String>,
    environment: Environment,
}

impl CorsPolicy {
    pub fn new(allowed: Vec<String>, environment: Environment) -> Self {
        let allowed = allowed
            .into_iter()
            .map(|o| o.trim().trim_end_matches('/').to_ascii_lowercase())
            .filter(|o| !o.is_empty())
            .collect();
        Self {
            allowed,
            environment,
        }
    }

    pub fn from_config(config: &AppConfig) -> Self {
        Self::new(config.allowed_origins(), config.environment)
    }

    /// Decides whether a request carrying `origin` may proceed. Rules apply in
    /// order: a missing origin passes outside production, a malformed one never
    /// does, listed origins pass, local origins pass outside production.
    pub fn evaluate(&self, origin: Option<&str>) -> Result<(), CorsRejection> {
        let production = self.environment.is_production();
        let Some(origin) = origin else {
            return if production {
                Err(CorsRejection::MissingOrigin)
            } else {
                Ok(())
            };
        };

        if !ORIGIN_PATTERN.is_match(origin) {
            return Err(CorsRejection::Malformed(origin.to_string()));
        }
        let normalized = origin.to_ascii_lowercase();
        if self.allowed.iter().any(|o| *o == normalized) {
            return Ok(());
        }
        if !production && LOCAL_ORIGIN_PATTERN.is_match(&normalized) {
            return Ok(());
        }
        Err(CorsRejection::NotAllowed(origin.to_string()))
    }
}

/// Response-header side of CORS: echoes allowed origins with credentials.
pub fn cors_layer(policy: Arc<CorsPolicy>) -> CorsLayer {
    CorsLayer::new()
        .allow_origin(AllowOrigin::predicate(move |origin: &HeaderValue, _| {
            origin
                .to_str()
                .is_ok_and(|origin| policy.evaluate(Some(origin)).is_ok())
        }))
        .allow_methods([
            Method::GET,
            Method::POST,
            Method::PUT,
            Method::PATCH,
            Method::DELETE,
            Method::OPTIONS,
        ])
        .allow_headers([
            header::CONTENT_TYPE,
            header::AUTHORIZATION,
            header::ACCEPT,
            HeaderName::from_static("x-requested-with"),
        ])
        .allow_credentials(true)
        .max_age(Duration::from_secs(86_400))
}

#[derive(Clone)]
pub struct CorsGuard {
    pub policy: Arc<CorsPolicy>,
    pub audit: Arc<AuditLog>,
    pub trust_proxy: bool,
}

/// Refuses requests whose origin the policy rejects with a 403 error body.
pub async fn enforce_cors(
    State(guard): State<CorsGuard>,
    request: Request,
    next: Next,
) -> Response {
    let origin = request
        .headers()
        .get(header::ORIGIN)
        .map(|v| v.to_str().unwrap_or("<non-ascii>").to_string());

    match guard.policy.evaluate(origin.as_deref()) {
        Ok(()) => next.run(request).await,
        Err(rejection) => {
            let source = client_source(&request, guard.trust_proxy);
            guard.audit.record(
                SecurityEventKind::CorsViolation,
                &source,
                format!("{} {}: {}", request.method(), request.uri().path(), rejection),
            );
            debug!("Rejected cross-origin request from {}", source);
            (
                StatusCode::FORBIDDEN,
                Json(json!({
                    "statusCode": 403,
                    "error": "Forbidden",
                    "message": rejection.to_string(),
                })),
            )
                .into_response()
        }
    }
}
