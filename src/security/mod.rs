//! HTTP security middleware: CORS, response headers, rate limiting and the audit log
//! they report violations to.

pub mod audit;
pub mod cors;
pub mod headers;
pub mod rate_limit;

pub use audit::{AuditLog, SecurityEvent, SecurityEventKind};
pub use cors::{CorsPolicy, CorsRejection};
pub use headers::SecurityHeaders;
pub use rate_limit::{RateDecision, RateLimiter};

use axum::extract::{ConnectInfo, Request};
use std::net::SocketAddr;

/// Client identity for rate limiting and audit records: the peer address, or the
/// first `X-Forwarded-For` hop when the server sits behind a trusted proxy.
pub fn client_source(request: &Request, trust_proxy: bool) -> String {
    let forwarded = request
        .headers()
        .get("x-forwarded-for")
        .filter(|_| trust_proxy)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.split(',').next())
        .map(str::trim)
        .filter(|v| !v.is_empty());
    if let Some(hop) = forwarded {
        return hop.to_string();
    }
    request
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| addr.ip().to_string())
        .unwrap_or_else(|| "unknown".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;

    #[test]
    fn test_client_source() {
        let request = Request::builder()
            .header("x-forwarded-for", " 203.0.113.7 , 10.0.0.1")
            .body(Body::empty())
            .unwrap();
        assert_eq!(client_source(&request, true), "203.0.113.7");

        let mut request = Request::builder().body(Body::empty()).unwrap();
        request
            .extensions_mut()
            .insert(ConnectInfo(SocketAddr::from(([192, 168, 1, 5], 51000))));
        assert_eq!(client_source(&request, true), "192.168.1.5");

        let request = Request::builder().body(Body::empty()).unwrap();
        assert_eq!(client_source(&request, false), "unknown");
    }

    #[test]
    fn test_forwarded_header_ignored_without_trusted_proxy() {
        let mut request = Request::builder()
            .header("x-forwarded-for", "198.51.100.23")
            .body(Body::empty())
            .unwrap();
        request
            .extensions_mut()
            .insert(ConnectInfo(SocketAddr::from(([192, 168, 1, 5], 51000))));
        assert_eq!(client_source(&request, false), "192.168.1.5");
        assert_eq!(client_source(&request, true), "198.51.100.23");
    }
}
