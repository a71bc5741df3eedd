use super::ImportError;
use std::collections::HashMap;

pub const RUN_DATE: &str = "Run Date";
pub const ACCOUNT: &str = "Account";
pub const ACTION: &str = "Action";
pub const SYMBOL: &str = "Symbol";
pub const QUANTITY: &str = "Quantity";
pub const PRICE: &str = "Price ($)";
pub const AMOUNT: &str = "Amount ($)";

const REQUIRED_COLUMNS: [&str; 7] = [RUN_DATE, ACCOUNT, ACTION, SYMBOL, QUANTITY, PRICE, AMOUNT];

/// One data row of the export with the required columns picked out. `row` is the
/// 1-based position among data rows.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawRow {
    pub row: usize,
    pub run_date: String,
    pub account: String,
    pub action: String,
    pub symbol: String,
    pub quantity: String,
    pub price: String,
    pub amount: String,
}

/// Extracts the transaction table from a Fidelity "Accounts History" export.
///
/// The table starts at the line beginning with `Run Date` and ends at the first
/// blank line; preamble and disclaimer footers around it are ignored.
pub fn parse_rows(content: &str) -> Result<Vec<RawRow>, ImportError> {
    let content = content.trim_start_matches('\u{feff}');
    let mut lines = content.lines().skip_while(|line| {
        !line
            .trim_start()
            .trim_start_matches('"')
            .starts_with(RUN_DATE)
    });
    let header = lines.next().ok_or(ImportError::MissingHeader)?;
    let table: Vec<&str> = std::iter::once(header)
        .chain(lines.take_while(|line| !line.trim().is_empty()))
        .collect();
    let table = table.join("\n");

    let mut reader = csv::ReaderBuilder::new()
        .flexible(true)
        .trim(csv::Trim::All)
        .from_reader(table.as_bytes());

    let columns: HashMap<String, usize> = reader
        .headers()?
        .iter()
        .enumerate()
        .map(|(i, name)| (name.to_string(), i))
        .collect();
    let missing: Vec<String> = REQUIRED_COLUMNS
        .iter()
        .filter(|c| !columns.contains_key(**c))
        .map(|c| c.to_string())
        .collect();
    if !missing.is_empty() {
        return Err(ImportError::MissingColumns(missing));
    }
    let index = |name: &str| columns[name];

    let mut rows = Vec::new();
    for (i, record) in reader.records().enumerate() {
        let record = record?;
        let field = |name: &str| record.get(index(name)).unwrap_or_default().to_string();
        rows.push(RawRow {
            row: i + 1,
            run_date: field(RUN_DATE),
            account: field(ACCOUNT),
            action: field(ACTION),
            symbol: field(SYMBOL),
            quantity: field(QUANTITY),
            price: field(PRICE),
            amount: field(AMOUNT),
        });
    }
    Ok(rows)
}

#[cfg(test)]
mod tests {
    use super::*;

    const EXPORT: &str = "\u{feff}\n\nBrokerage\n\nRun Date,Account,Action,Symbol,Description,Type,Quantity,Price ($),Commission ($),Fees ($),Accrued Interest ($),Amount ($),Settlement Date\n\
01/02/2025,Roth IRA,\"YOU BOUGHT PIMCO DYNAMIC INCOME FUND (PDI) (Cash)\",PDI,\"PIMCO DYNAMIC INCOME FUND\",Cash,10,18.50,,,,-185.00,01/03/2025\n\
01/31/2025,Roth IRA,\"DIVIDEND RECEIVED PIMCO DYNAMIC INCOME FUND (PDI) (Cash)\", PDI ,,Cash,,,,,,22.05,\n\
\n\
\"The data and information in this spreadsheet is provided to you solely for your use\"\n\
\"Date downloaded 02/01/2025 10:00 am\"\n";

    #[test]
    fn test_parse_skips_preamble_and_footer() {
        let rows = parse_rows(EXPORT).unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].row, 1);
        assert_eq!(rows[0].run_date, "01/02/2025");
        assert_eq!(
            rows[0].action,
            "YOU BOUGHT PIMCO DYNAMIC INCOME FUND (PDI) (Cash)"
        );
        assert_eq!(rows[0].amount, "-185.00");
        assert_eq!(rows[1].row, 2);
        assert_eq!(rows[1].symbol, "PDI");
        assert_eq!(rows[1].quantity, "");
    }

    #[test]
    fn test_missing_header() {
        let err = parse_rows("Date,Symbol\n01/02/2025,PDI\n").unwrap_err();
        assert!(matches!(err, ImportError::MissingHeader));
    }

    #[test]
    fn test_missing_columns() {
        let err = parse_rows("Run Date,Account,Action,Symbol\n01/02/2025,Roth,YOU BOUGHT,PDI\n")
            .unwrap_err();
        match err {
            ImportError::MissingColumns(columns) => {
                assert_eq!(columns, vec!["Quantity", "Price ($)", "Amount ($)"]);
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_short_records_yield_empty_fields() {
        let rows = parse_rows(
            "Run Date,Account,Action,Symbol,Quantity,Price ($),Amount ($)\n01/02/2025,Roth\n",
        )
        .unwrap();
        assert_eq!(rows[0].account, "Roth");
        assert_eq!(rows[0].action, "");
        assert_eq!(rows[0].amount, "");
    }
}
