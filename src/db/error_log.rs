use super::{Database, DbError, DbResult};
use crate::core::models::{ErrorLogEntry, LogLevel};
use chrono::Utc;
use serde::Deserialize;

/// Default number of entries returned by `recent_errors`.
pub const DEFAULT_ERROR_LOG_LIMIT: usize = 50;

/// A client error report as posted by the front-end.
#[derive(Debug, Clone, Deserialize)]
pub struct ErrorReport {
    #[serde(default)]
    pub level: LogLevel,
    pub message: String,
    #[serde(default)]
    pub context: Option<serde_json::Value>,
    #[serde(default)]
    pub user_id: Option<String>,
}

impl Database {
    pub async fn record_error(&self, report: ErrorReport) -> DbResult<ErrorLogEntry> {
        if report.message.trim().is_empty() {
            return Err(DbError::Invalid("Error message must not be empty".to_string()));
        }
        let _guard = self.write_lock.lock().await;
        Ok(self
            .error_logs
            .insert(ErrorLogEntry {
                id: 0,
                timestamp: Utc::now(),
                level: report.level,
                message: report.message,
                context: report.context,
                user_id: report.user_id,
            })
            .await?)
    }

    /// Newest entries first.
    pub async fn recent_errors(&self, limit: usize) -> DbResult<Vec<ErrorLogEntry>> {
        let mut entries = self.error_logs.all().await?;
        entries.reverse();
        entries.truncate(limit);
        Ok(entries)
    }
}
