//! Fidelity "Accounts History" CSV import.
//!
//! The pipeline parses the transaction table, validates every row, drops in-file
//! duplicates and then writes the valid rows one by one. Row problems are reported
//! per 1-based data row; only a file without a usable header fails as a whole.

pub mod parse;
pub mod persist;
pub mod validate;

use crate::db::{Database, DbError};
use serde::Serialize;
use tracing::info;

#[derive(Debug, thiserror::Error)]
pub enum ImportError {
    #[error("No header row starting with \"Run Date\" found")]
    MissingHeader,
    #[error("Missing required columns: {}", .0.join(", "))]
    MissingColumns(Vec<String>),
    #[error("Malformed CSV: {0}")]
    Csv(#[from] csv::Error),
    #[error("File is empty")]
    Empty,
    #[error(transparent)]
    Database(#[from] DbError),
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RowIssue {
    pub row: usize,
    pub message: String,
}

impl RowIssue {
    pub fn new(row: usize, message: impl Into<String>) -> Self {
        Self {
            row,
            message: message.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ImportReport {
    pub success: bool,
    /// Rows written, or rows that would be written on a dry run.
    pub imported: usize,
    pub errors: Vec<RowIssue>,
    pub warnings: Vec<RowIssue>,
}

/// Runs the whole pipeline over an uploaded file. With `dry_run` nothing is written.
pub async fn import_fidelity(
    db: &Database,
    content: &[u8],
    dry_run: bool,
) -> Result<ImportReport, ImportError> {
    let content = String::from_utf8_lossy(content);
    if content.trim().is_empty() {
        return Err(ImportError::Empty);
    }

    let rows = parse::parse_rows(&content)?;
    let validated = validate::validate_rows(&rows);
    let mut errors = validated.errors;

    let imported = if dry_run {
        validated.transactions.len()
    } else {
        persist::persist_transactions(db, &validated.transactions, &mut errors).await?
    };
    errors.sort_by_key(|e| e.row);

    let report = ImportReport {
        success: errors.is_empty(),
        imported,
        errors,
        warnings: validated.warnings,
    };
    info!(
        rows = rows.len(),
        imported = report.imported,
        errors = report.errors.len(),
        warnings = report.warnings.len(),
        dry_run,
        "Fidelity import finished"
    );
    Ok(report)
}
