use crate::core::config::{AppConfig, Environment};
use anyhow::{Context, Result};
use axum::extract::{Request, State};
use axum::http::{HeaderName, HeaderValue, header};
use axum::middleware::Next;
use axum::response::Response;
use std::sync::Arc;

pub const CSP_REPORT_PATH: &str = "/api/csp-report";

const HSTS: &str = "max-age=31536000; includeSubDomains; preload";

// Directives that do not depend on configuration.
const STATIC_DIRECTIVES: &[(&str, &[&str])] = &[
    ("default-src", &["'self'"]),
    ("style-src", &["'self'", "'unsafe-inline'"]),
    ("img-src", &["'self'", "data:", "https:"]),
    ("font-src", &["'self'", "data:"]),
    ("frame-ancestors", &["'none'"]),
    ("object-src", &["'none'"]),
    ("base-uri", &["'self'"]),
    ("form-action", &["'self'"]),
];

/// Builds the `Content-Security-Policy` value.
pub fn content_security_policy(
    environment: Environment,
    api_base_url: Option<&str>,
    extra_connect_src: &[String],
) -> String {
    let production = environment.is_production();

    let mut script_src = vec!["'self'".to_string()];
    if !production {
        script_src.push("'unsafe-eval'".to_string());
    }

    let mut connect_src = vec!["'self'".to_string()];
    connect_src.extend(
        api_base_url
            .into_iter()
            .chain(extra_connect_src.iter().map(String::as_str))
            .map(|s| s.trim().trim_end_matches('/'))
            .filter(|s| !s.is_empty())
            .map(str::to_string),
    );
    if !production {
        connect_src.push("ws://localhost:*".to_string());
    }
    connect_src.dedup();

    let mut directives: Vec<String> = Vec::new();
    for (name, sources) in STATIC_DIRECTIVES {
        directives.push(format!("{} {}", name, sources.join(" ")));
        if *name == "default-src" {
            directives.push(format!("script-src {}", script_src.join(" ")));
        }
    }
    directives.push(format!("connect-src {}", connect_src.join(" ")));
    directives.push(format!("report-uri {CSP_REPORT_PATH}"));
    if production {
        directives.push("upgrade-insecure-requests".to_string());
    }
    directives.join("; ")
}

/// The fixed set of headers added to every response.
#[derive(Debug, Clone)]
pub struct SecurityHeaders {
    headers: Vec<(HeaderName, HeaderValue)>,
}

impl SecurityHeaders {
    pub fn from_config(config: &AppConfig) -> Result<Self> {
        Self::new(
            config.environment,
            config.api_base_url.as_deref(),
            &config.security.connect_src,
        )
    }

    pub fn new(
        environment: Environment,
        api_base_url: Option<&str>,
        extra_connect_src: &[String],
    ) -> Result<Self> {
        let csp = content_security_policy(environment, api_base_url, extra_connect_src);
        let mut headers = vec![
            (
                header::CONTENT_SECURITY_POLICY,
                HeaderValue::from_str(&csp).context("Invalid Content-Security-Policy value")?,
            ),
            (
                header::X_CONTENT_TYPE_OPTIONS,
                HeaderValue::from_static("nosniff"),
            ),
            (header::X_FRAME_OPTIONS, HeaderValue::from_static("DENY")),
            (
                header::REFERRER_POLICY,
                HeaderValue::from_static("strict-origin-when-cross-origin"),
            ),
            (
                HeaderName::from_static("cross-origin-opener-policy"),
                HeaderValue::from_static("same-origin"),
            ),
            (
                HeaderName::from_static("permissions-policy"),
                HeaderValue::from_static("camera=(), microphone=(), geolocation=()"),
            ),
        ];
        if environment.is_production() {
            headers.push((
                header::STRICT_TRANSPORT_SECURITY,
                HeaderValue::from_static(HSTS),
            ));
        }
        Ok(Self { headers })
    }

    pub fn get(&self, name: &HeaderName) -> Option<&HeaderValue> {
        self.headers
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, v)| v)
    }
}

pub async fn apply_security_headers(
    State(security): State<Arc<SecurityHeaders>>,
    request: Request,
    next: Next,
) -> Response {
    let mut response = next.run(request).await;
    let headers = response.headers_mut();
    for (name, value) in &security.headers {
        headers.insert(name.clone(), value.clone());
    }
    response
}
