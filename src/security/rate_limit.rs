use super::audit::{AuditLog, SecurityEventKind};
use super::client_source;
use axum::Json;
use axum::extract::{Request, State};
use axum::http::{HeaderName, HeaderValue, StatusCode, header};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use serde::Serialize;
use serde_json::json;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};
use tracing::debug;

// Tracked keys above which expired windows are swept, at most once per window.
const SWEEP_THRESHOLD: usize = 10_000;

const LIMIT_HEADER: HeaderName = HeaderName::from_static("x-ratelimit-limit");
const REMAINING_HEADER: HeaderName = HeaderName::from_static("x-ratelimit-remaining");

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RateDecision {
    Allowed { limit: u32, remaining: u32 },
    Limited { limit: u32, retry_after: Duration },
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RateLimitStats {
    pub name: &'static str,
    pub limit: u32,
    pub window_secs: u64,
    pub checked: u64,
    pub rejected: u64,
    pub tracked_keys: usize,
}

struct Window {
    started: Instant,
    count: u32,
}

struct LimiterState {
    windows: HashMap<String, Window>,
    last_sweep: Option<Instant>,
    checked: u64,
    rejected: u64,
}

/// Fixed-window request counter per client key.
pub struct RateLimiter {
    name: &'static str,
    limit: u32,
    window: Duration,
    state: Mutex<LimiterState>,
}

impl RateLimiter {
    pub fn new(name: &'static str, limit: u32, window: Duration) -> Self {
        Self {
            name,
            limit: limit.max(1),
            window: window.max(Duration::from_secs(1)),
            state: Mutex::new(LimiterState {
                windows: HashMap::new(),
                last_sweep: None,
                checked: 0,
                rejected: 0,
            }),
        }
    }

    pub fn check(&self, key: &str) -> RateDecision {
        self.check_at(key, Instant::now())
    }

    pub fn check_at(&self, key: &str, now: Instant) -> RateDecision {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        state.checked += 1;

        let sweep_due = state
            .last_sweep
            .is_none_or(|at| now.saturating_duration_since(at) >= self.window);
        if state.windows.len() > SWEEP_THRESHOLD && sweep_due {
            let window = self.window;
            state.last_sweep = Some(now);
            let before = state.windows.len();
            state
                .windows
                .retain(|_, w| now.saturating_duration_since(w.started) < window);
            debug!(
                "Swept {} expired {} rate-limit windows",
                before - state.windows.len(),
                self.name
            );
        }

        let entry = state.windows.entry(key.to_string()).or_insert(Window {
            started: now,
            count: 0,
        });
        if now.saturating_duration_since(entry.started) >= self.window {
            entry.started = now;
            entry.count = 0;
        }

        if entry.count >= self.limit {
            let retry_after = self
                .window
                .saturating_sub(now.saturating_duration_since(entry.started));
            state.rejected += 1;
            return RateDecision::Limited {
                limit: self.limit,
                retry_after,
            };
        }
        entry.count += 1;
        RateDecision::Allowed {
            limit: self.limit,
            remaining: self.limit - entry.count,
        }
    }

    pub fn stats(&self) -> RateLimitStats {
        let state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        RateLimitStats {
            name: self.name,
            limit: self.limit,
            window_secs: self.window.as_secs(),
            checked: state.checked,
            rejected: state.rejected,
            tracked_keys: state.windows.len(),
        }
    }
}

#[derive(Clone)]
pub struct RateLimitGuard {
    pub limiter: Arc<RateLimiter>,
    pub audit: Arc<AuditLog>,
    pub trust_proxy: bool,
}

pub async fn rate_limit(
    State(guard): State<RateLimitGuard>,
    request: Request,
    next: Next,
) -> Response {
    let source = client_source(&request, guard.trust_proxy);
    match guard.limiter.check(&source) {
        RateDecision::Allowed { limit, remaining } => {
            let mut response = next.run(request).await;
            let headers = response.headers_mut();
            headers.insert(LIMIT_HEADER, HeaderValue::from(limit));
            headers.insert(REMAINING_HEADER, HeaderValue::from(remaining));
            response
        }
        RateDecision::Limited { limit, retry_after } => {
            // Round up so clients never retry inside the window.
            let seconds = retry_after.as_secs() + u64::from(retry_after.subsec_nanos() > 0);
            guard.audit.record(
                SecurityEventKind::RateLimitExceeded,
                &source,
                format!(
                    "{} limit of {} exceeded on {}",
                    guard.limiter.name,
                    limit,
                    request.uri().path()
                ),
            );
            let mut response = (
                StatusCode::TOO_MANY_REQUESTS,
                Json(json!({
                    "statusCode": 429,
                    "error": "Too Many Requests",
                    "message": format!("Rate limit exceeded, retry in {seconds} seconds"),
                })),
            )
                .into_response();
            let headers = response.headers_mut();
            headers.insert(header::RETRY_AFTER, HeaderValue::from(seconds));
            headers.insert(LIMIT_HEADER, HeaderValue::from(limit));
            headers.insert(REMAINING_HEADER, HeaderValue::from(0u32));
            response
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fixed_window() {
        let limiter = RateLimiter::new("api", 2, Duration::from_secs(60));
        let start = Instant::now();

        assert_eq!(
            limiter.check_at("a", start),
            RateDecision::Allowed { limit: 2, remaining: 1 }
        );
        assert_eq!(
            limiter.check_at("a", start + Duration::from_secs(1)),
            RateDecision::Allowed { limit: 2, remaining: 0 }
        );
        assert_eq!(
            limiter.check_at("a", start + Duration::from_secs(20)),
            RateDecision::Limited {
                limit: 2,
                retry_after: Duration::from_secs(40)
            }
        );
        assert!(matches!(
            limiter.check_at("b", start + Duration::from_secs(20)),
            RateDecision::Allowed { .. }
        ));
        assert_eq!(
            limiter.check_at("a", start + Duration::from_secs(60)),
            RateDecision::Allowed { limit: 2, remaining: 1 }
        );

        let stats = limiter.stats();
        assert_eq!(stats.checked, 5);
        assert_eq!(stats.rejected, 1);
        assert_eq!(stats.tracked_keys, 2);
    }

    #[test]
    fn test_sweep_drops_expired_windows() {
        let limiter = RateLimiter::new("api", 5, Duration::from_secs(1));
        let start = Instant::now();
        for i in 0..=SWEEP_THRESHOLD {
            limiter.check_at(&format!("client-{i}"), start);
        }
        assert_eq!(limiter.stats().tracked_keys, SWEEP_THRESHOLD + 1);

        limiter.check_at("late", start + Duration::from_secs(2));
        assert_eq!(limiter.stats().tracked_keys, 1);
    }

    #[test]
    fn test_sweep_runs_at_most_once_per_window() {
        let limiter = RateLimiter::new("api", 5, Duration::from_secs(1));
        let start = Instant::now();
        for i in 0..=SWEEP_THRESHOLD {
            limiter.check_at(&format!("client-{i}"), start);
        }

        // Nothing has expired yet, so this sweep frees nothing.
        limiter.check_at("x", start + Duration::from_millis(500));
        assert_eq!(limiter.stats().tracked_keys, SWEEP_THRESHOLD + 2);

        // The first batch has expired but the last sweep is too recent.
        limiter.check_at("y", start + Duration::from_millis(1200));
        assert_eq!(limiter.stats().tracked_keys, SWEEP_THRESHOLD + 3);

        limiter.check_at("z", start + Duration::from_millis(1600));
        assert_eq!(limiter.stats().tracked_keys, 2);
    }
}
