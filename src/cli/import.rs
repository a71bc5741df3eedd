use super::ui;
use crate::core::config::AppConfig;
use crate::db::Database;
use crate::import::{ImportReport, import_fidelity};
use crate::store::KeyValueStore;
use anyhow::{Context, Result};
use comfy_table::Cell;
use std::path::Path;
use std::sync::Arc;

impl ImportReport {
    pub fn display_as_table(&self) -> String {
        let mut output = String::new();
        let headline = if self.success {
            ui::style_text(
                &format!("Imported {} rows", self.imported),
                ui::StyleType::Success,
            )
        } else {
            ui::style_text(
                &format!(
                    "Imported {} rows, {} rows failed",
                    self.imported,
                    self.errors.len()
                ),
                ui::StyleType::Error,
            )
        };
        output.push_str(&headline);
        output.push('\n');

        if self.errors.is_empty() && self.warnings.is_empty() {
            return output;
        }

        let mut table = ui::new_styled_table();
        table.set_header(vec![
            ui::header_cell("Row"),
            ui::header_cell("Severity"),
            ui::header_cell("Message"),
        ]);
        let mut issues: Vec<_> = self
            .errors
            .iter()
            .map(|issue| (issue, true))
            .chain(self.warnings.iter().map(|issue| (issue, false)))
            .collect();
        issues.sort_by_key(|(issue, is_error)| (issue.row, !*is_error));
        for (issue, is_error) in issues {
            table.add_row(vec![
                ui::number_cell(issue.row),
                ui::severity_cell(if is_error { "error" } else { "warning" }, is_error),
                Cell::new(&issue.message),
            ]);
        }
        output.push_str(&table.to_string());
        output.push('\n');
        output
    }
}

/// Imports a Fidelity export from disk into the configured store and prints the
/// row report.
pub async fn run_import(config: &AppConfig, file: &Path, dry_run: bool) -> Result<()> {
    let content =
        std::fs::read(file).with_context(|| format!("Failed to read {}", file.display()))?;

    let store = KeyValueStore::from_location(&config.storage_location()?)?;
    let db = Database::open(Arc::new(store)).await?;

    let report = import_fidelity(&db, &content, dry_run).await?;
    db.flush()?;

    if dry_run {
        println!(
            "{}",
            ui::style_text("Dry run: nothing was written", ui::StyleType::Subtle)
        );
    }
    println!(
        "{}",
        ui::style_text(&format!("Import of {}", file.display()), ui::StyleType::Title)
    );
    print!("{}", report.display_as_table());
    if !report.success {
        anyhow::bail!("{} rows could not be imported", report.errors.len());
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::import::RowIssue;

    #[test]
    fn test_clean_report_has_no_table() {
        let report = ImportReport {
            success: true,
            imported: 3,
            errors: vec![],
            warnings: vec![],
        };
        let output = console::strip_ansi_codes(&report.display_as_table()).to_string();
        assert_eq!(output, "Imported 3 rows\n");
    }

    #[test]
    fn test_issues_are_listed_by_row() {
        let report = ImportReport {
            success: false,
            imported: 1,
            errors: vec![RowIssue::new(4, "Duplicate of row 1")],
            warnings: vec![RowIssue::new(2, "Amount mismatch")],
        };
        let output = console::strip_ansi_codes(&report.display_as_table()).to_string();
        assert!(output.starts_with("Imported 1 rows, 1 rows failed\n"));
        let warning = output.find("Amount mismatch").unwrap();
        let error = output.find("Duplicate of row 1").unwrap();
        assert!(warning < error);
    }
}
