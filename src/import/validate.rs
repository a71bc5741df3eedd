use super::parse::RawRow;
use super::RowIssue;
use crate::core::models::normalize_symbol;
use chrono::NaiveDate;
use std::collections::HashMap;

/// Largest tolerated gap between `|quantity × price|` and `|amount|`.
pub const AMOUNT_TOLERANCE: f64 = 0.01;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActionKind {
    Buy,
    Sell,
    Dividend,
    Reinvestment,
    Deposit,
}

// Matched as prefixes of the upper-cased action text.
const ACTIONS: &[(&str, ActionKind)] = &[
    ("YOU BOUGHT", ActionKind::Buy),
    ("YOU SOLD", ActionKind::Sell),
    ("DIVIDEND RECEIVED", ActionKind::Dividend),
    ("REINVESTMENT", ActionKind::Reinvestment),
    ("ELECTRONIC FUNDS TRANSFER RECEIVED", ActionKind::Deposit),
    ("CASH CONTRIBUTION", ActionKind::Deposit),
];

impl ActionKind {
    pub fn classify(action: &str) -> Option<ActionKind> {
        let action = action.trim().to_uppercase();
        ACTIONS
            .iter()
            .find(|(prefix, _)| action.starts_with(prefix))
            .map(|(_, kind)| *kind)
    }

    fn is_trade(&self) -> bool {
        matches!(
            self,
            ActionKind::Buy | ActionKind::Sell | ActionKind::Reinvestment
        )
    }
}

/// A row that passed validation.
#[derive(Debug, Clone, PartialEq)]
pub struct Transaction {
    pub row: usize,
    pub date: NaiveDate,
    pub account: String,
    pub kind: ActionKind,
    pub symbol: Option<String>,
    /// Unsigned; the action carries the direction.
    pub quantity: Option<f64>,
    pub price: Option<f64>,
    pub amount: Option<f64>,
}

#[derive(Debug, Default)]
pub struct Validated {
    pub transactions: Vec<Transaction>,
    pub errors: Vec<RowIssue>,
    pub warnings: Vec<RowIssue>,
}

pub fn validate_rows(rows: &[RawRow]) -> Validated {
    let mut out = Validated::default();
    let mut first_seen: HashMap<String, usize> = HashMap::new();

    for raw in rows {
        let key = duplicate_key(raw);
        if let Some(first) = first_seen.get(&key) {
            out.errors.push(RowIssue::new(
                raw.row,
                format!("Duplicate of row {first}"),
            ));
            continue;
        }
        first_seen.insert(key, raw.row);

        match validate_row(raw) {
            Ok(transaction) => {
                if let Some(warning) = amount_mismatch(&transaction) {
                    out.warnings.push(RowIssue::new(raw.row, warning));
                }
                out.transactions.push(transaction);
            }
            Err(messages) => out
                .errors
                .extend(messages.into_iter().map(|m| RowIssue::new(raw.row, m))),
        }
    }
    out
}

fn duplicate_key(raw: &RawRow) -> String {
    [
        raw.run_date.trim().to_string(),
        raw.action.trim().to_uppercase(),
        normalize_symbol(&raw.symbol),
        normalize_number(&raw.quantity),
        normalize_number(&raw.price),
        raw.account.trim().to_lowercase(),
    ]
    .join("\u{1f}")
}

// Numerically equal cells ("10" and "10.00") share a key.
fn normalize_number(value: &str) -> String {
    match parse_number(value) {
        Ok(Some(n)) => n.to_string(),
        _ => value.trim().to_string(),
    }
}

/// Parses a money or quantity cell. Accepts `$`, thousands separators and
/// accounting-style parentheses; an empty cell is `None`.
pub fn parse_number(value: &str) -> Result<Option<f64>, String> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return Ok(None);
    }
    let (negative, body) = match trimmed
        .strip_prefix('(')
        .and_then(|s| s.strip_suffix(')'))
    {
        Some(inner) => (true, inner),
        None => (false, trimmed),
    };
    let cleaned: String = body.chars().filter(|c| *c != '$' && *c != ',').collect();
    let number: f64 = cleaned
        .trim()
        .parse()
        .map_err(|_| format!("Invalid number '{trimmed}'"))?;
    if !number.is_finite() {
        return Err(format!("Invalid number '{trimmed}'"));
    }
    Ok(Some(if negative { -number } else { number }))
}

fn validate_row(raw: &RawRow) -> Result<Transaction, Vec<String>> {
    let mut errors = Vec::new();

    let date = NaiveDate::parse_from_str(raw.run_date.trim(), "%m/%d/%Y")
        .map_err(|_| {
            errors.push(format!(
                "Invalid date '{}' (expected MM/DD/YYYY)",
                raw.run_date.trim()
            ))
        })
        .ok();

    let kind = ActionKind::classify(&raw.action);
    if kind.is_none() {
        errors.push(format!("Unsupported action '{}'", raw.action.trim()));
    }

    let account = raw.account.trim().to_string();
    if account.is_empty() {
        errors.push("Account is required".to_string());
    }

    let mut number = |label: &str, value: &str| match parse_number(value) {
        Ok(n) => n,
        Err(e) => {
            errors.push(format!("{label}: {e}"));
            None
        }
    };
    let quantity = number("Quantity", &raw.quantity).map(f64::abs);
    let price = number("Price", &raw.price);
    let amount = number("Amount", &raw.amount);

    let symbol = Some(normalize_symbol(&raw.symbol)).filter(|s| !s.is_empty());

    if let Some(kind) = kind {
        if kind.is_trade() {
            if symbol.is_none() {
                errors.push("Symbol is required".to_string());
            }
            if !quantity.is_some_and(|q| q > 0.0) {
                errors.push("Quantity must be positive".to_string());
            }
            if !price.is_some_and(|p| p > 0.0) {
                errors.push("Price must be positive".to_string());
            }
        } else if amount.is_none() {
            errors.push("Amount is required".to_string());
        }
    }

    match (date, kind) {
        (Some(date), Some(kind)) if errors.is_empty() => Ok(Transaction {
            row: raw.row,
            date,
            account,
            kind,
            symbol,
            quantity,
            price,
            amount,
        }),
        _ => Err(errors),
    }
}

fn amount_mismatch(transaction: &Transaction) -> Option<String> {
    let (Some(quantity), Some(price), Some(amount)) =
        (transaction.quantity, transaction.price, transaction.amount)
    else {
        return None;
    };
    let expected = (quantity * price).abs();
    if (expected - amount.abs()).abs() > AMOUNT_TOLERANCE {
        Some(format!(
            "Amount mismatch: quantity × price is {expected:.2} but amount is {:.2}",
            amount.abs()
        ))
    } else {
        None
    }
}
