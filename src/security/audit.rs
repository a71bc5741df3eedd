use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::{BTreeMap, VecDeque};
use std::sync::{Mutex, PoisonError};
use tracing::warn;

/// Events retained in memory.
pub const AUDIT_CAPACITY: usize = 500;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SecurityEventKind {
    CorsViolation,
    CspViolation,
    RateLimitExceeded,
}

impl SecurityEventKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            SecurityEventKind::CorsViolation => "cors_violation",
            SecurityEventKind::CspViolation => "csp_violation",
            SecurityEventKind::RateLimitExceeded => "rate_limit_exceeded",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SecurityEvent {
    pub timestamp: DateTime<Utc>,
    pub kind: SecurityEventKind,
    pub source: String,
    pub detail: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AuditStats {
    pub total: u64,
    pub retained: usize,
    pub by_kind: BTreeMap<&'static str, u64>,
}

struct AuditState {
    events: VecDeque<SecurityEvent>,
    counts: BTreeMap<SecurityEventKind, u64>,
}

/// Bounded in-memory record of security violations. Older events are dropped once
/// the ring is full; the per-kind counters keep counting.
pub struct AuditLog {
    capacity: usize,
    state: Mutex<AuditState>,
}

impl AuditLog {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            state: Mutex::new(AuditState {
                events: VecDeque::new(),
                counts: BTreeMap::new(),
            }),
        }
    }

    pub fn record(&self, kind: SecurityEventKind, source: &str, detail: impl Into<String>) {
        let event = SecurityEvent {
            timestamp: Utc::now(),
            kind,
            source: source.to_string(),
            detail: detail.into(),
        };
        warn!(
            kind = kind.as_str(),
            source = %event.source,
            detail = %event.detail,
            "Security violation"
        );

        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        *state.counts.entry(kind).or_default() += 1;
        if state.events.len() == self.capacity {
            state.events.pop_front();
        }
        state.events.push_back(event);
    }

    /// Newest events first.
    pub fn recent(&self, limit: usize) -> Vec<SecurityEvent> {
        let state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        state.events.iter().rev().take(limit).cloned().collect()
    }

    pub fn stats(&self) -> AuditStats {
        let state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        AuditStats {
            total: state.counts.values().sum(),
            retained: state.events.len(),
            by_kind: state
                .counts
                .iter()
                .map(|(kind, count)| (kind.as_str(), *count))
                .collect(),
        }
    }
}

impl Default for AuditLog {
    fn default() -> Self {
        Self::new(AUDIT_CAPACITY)
    }
}
