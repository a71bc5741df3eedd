use super::RowIssue;
use super::validate::{ActionKind, Transaction};
use crate::core::models::{Account, DEPOSIT_TYPE, DIVIDEND_TYPE, DivDeposit, Id};
use crate::db::{Database, DbError, DbResult};
use std::collections::HashMap;
use tracing::debug;

/// Writes transactions one at a time, oldest first, with buys ahead of sells on the
/// same day so a sale finds the lots it closes. Exports list the newest rows first.
/// A failing row is reported and does not stop the rows after it. Returns the
/// number of rows written.
pub async fn persist_transactions(
    db: &Database,
    transactions: &[Transaction],
    errors: &mut Vec<RowIssue>,
) -> DbResult<usize> {
    let mut accounts: HashMap<String, Option<Account>> = HashMap::new();
    let dividend_type = db.deposit_type_id(DIVIDEND_TYPE).await?;
    let deposit_type = db.deposit_type_id(DEPOSIT_TYPE).await?;

    let mut ordered: Vec<&Transaction> = transactions.iter().collect();
    ordered.sort_by_key(|t| (t.date, matches!(t.kind, ActionKind::Sell)));

    let mut imported = 0;
    for transaction in ordered {
        let key = transaction.account.to_lowercase();
        if !accounts.contains_key(&key) {
            let account = db.find_account_by_name(&transaction.account).await?;
            accounts.insert(key.clone(), account);
        }
        let Some(Some(account)) = accounts.get(&key) else {
            errors.push(RowIssue::new(
                transaction.row,
                format!("Account '{}' not found", transaction.account),
            ));
            continue;
        };

        let result = match transaction.kind {
            ActionKind::Buy | ActionKind::Reinvestment => {
                open(db, account.id, transaction).await
            }
            ActionKind::Sell => sell(db, account.id, transaction).await,
            ActionKind::Dividend => {
                deposit(db, account.id, dividend_type, transaction, true).await
            }
            ActionKind::Deposit => deposit(db, account.id, deposit_type, transaction, false).await,
        };
        match result {
            Ok(()) => imported += 1,
            Err(e) => {
                debug!(row = transaction.row, error = %e, "Import row rejected");
                errors.push(RowIssue::new(transaction.row, e.to_string()));
            }
        }
    }
    Ok(imported)
}

fn trade_fields(transaction: &Transaction) -> DbResult<(&str, f64, f64)> {
    match (&transaction.symbol, transaction.quantity, transaction.price) {
        (Some(symbol), Some(quantity), Some(price)) => Ok((symbol.as_str(), quantity, price)),
        _ => Err(DbError::Invalid(
            "Symbol, quantity and price are required".to_string(),
        )),
    }
}

async fn open(db: &Database, account_id: Id, transaction: &Transaction) -> DbResult<()> {
    let (symbol, quantity, price) = trade_fields(transaction)?;
    db.open_position(account_id, symbol, quantity, price, transaction.date)
        .await?;
    Ok(())
}

async fn sell(db: &Database, account_id: Id, transaction: &Transaction) -> DbResult<()> {
    let (symbol, quantity, price) = trade_fields(transaction)?;
    db.sell_position(account_id, symbol, quantity, price, transaction.date)
        .await?;
    Ok(())
}

async fn deposit(
    db: &Database,
    account_id: Id,
    type_id: Id,
    transaction: &Transaction,
    link_symbol: bool,
) -> DbResult<()> {
    let universe_id = match (&transaction.symbol, link_symbol) {
        (Some(symbol), true) => db.find_universe_by_symbol(symbol).await?.map(|u| u.id),
        _ => None,
    };
    db.create_deposit(DivDeposit {
        id: 0,
        account_id,
        div_deposit_type_id: type_id,
        universe_id,
        date: transaction.date,
        amount: transaction.amount.map(f64::abs).unwrap_or_default(),
        deleted_at: None,
    })
    .await?;
    Ok(())
}
