//! Repository over the key-value store. Every mutation runs under one write lock so
//! uniqueness checks and id allocation cannot interleave.

mod error_log;
mod portfolio;
mod universe;

pub use error_log::{DEFAULT_ERROR_LOG_LIMIT, ErrorReport};
pub use portfolio::TradeStatus;
pub use universe::{ScreenerFlags, SettingsOutcome, SymbolLists, SyncOutcome};

use crate::core::models::{
    Account, DEPOSIT_TYPE, DIVIDEND_TYPE, DivDeposit, DivDepositType, EQUITIES_GROUP,
    ErrorLogEntry, INCOME_GROUP, Id, RiskGroup, Screener, SoftDelete, TAX_FREE_INCOME_GROUP,
    Trade, Universe,
};
use crate::store::Store;
use crate::store::table::Table;
use anyhow::Result;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, info};

#[derive(Debug, thiserror::Error)]
pub enum DbError {
    #[error("{entity} {id} not found")]
    NotFound { entity: &'static str, id: Id },
    #[error("{entity} with {field} '{value}' already exists")]
    UniqueViolation {
        entity: &'static str,
        field: &'static str,
        value: String,
    },
    #[error("{0}")]
    Invalid(String),
    #[error(transparent)]
    Storage(#[from] anyhow::Error),
}

pub type DbResult<T> = std::result::Result<T, DbError>;

pub struct Database {
    store: Arc<dyn Store>,
    write_lock: Mutex<()>,
    accounts: Table<Account>,
    trades: Table<Trade>,
    deposits: Table<DivDeposit>,
    deposit_types: Table<DivDepositType>,
    risk_groups: Table<RiskGroup>,
    universe: Table<Universe>,
    screener: Table<Screener>,
    error_logs: Table<ErrorLogEntry>,
}

impl Database {
    /// Opens every table and seeds the fixed deposit types and risk groups.
    pub async fn open(store: Arc<dyn Store>) -> Result<Self> {
        let db = Database {
            accounts: Table::open(store.as_ref(), "accounts")?,
            trades: Table::open(store.as_ref(), "trades")?,
            deposits: Table::open(store.as_ref(), "div_deposits")?,
            deposit_types: Table::open(store.as_ref(), "div_deposit_types")?,
            risk_groups: Table::open(store.as_ref(), "risk_groups")?,
            universe: Table::open(store.as_ref(), "universe")?,
            screener: Table::open(store.as_ref(), "screener")?,
            error_logs: Table::open(store.as_ref(), "error_logs")?,
            write_lock: Mutex::new(()),
            store,
        };
        db.seed().await?;
        Ok(db)
    }

    async fn seed(&self) -> Result<()> {
        let _guard = self.write_lock.lock().await;

        let types = self.deposit_types.all().await?;
        for name in [DIVIDEND_TYPE, DEPOSIT_TYPE] {
            if !types.iter().any(|t| t.name == name) {
                info!("Seeding deposit type {}", name);
                self.deposit_types
                    .insert(DivDepositType {
                        id: 0,
                        name: name.to_string(),
                    })
                    .await?;
            }
        }

        let groups = self.risk_groups.all().await?;
        for name in [EQUITIES_GROUP, INCOME_GROUP, TAX_FREE_INCOME_GROUP] {
            if !groups.iter().any(|g| g.name.eq_ignore_ascii_case(name)) {
                info!("Seeding risk group {}", name);
                self.risk_groups
                    .insert(RiskGroup {
                        id: 0,
                        name: name.to_string(),
                    })
                    .await?;
            }
        }
        Ok(())
    }

    /// Round-trips a read through the store.
    pub async fn ping(&self) -> Result<()> {
        let meta = self.store.collection("meta")?;
        meta.get(b"ping").await?;
        debug!("Store ping ok");
        Ok(())
    }

    pub fn flush(&self) -> Result<()> {
        self.store.flush()
    }
}

fn live<T: SoftDelete>(rows: Vec<T>) -> Vec<T> {
    rows.into_iter().filter(SoftDelete::is_live).collect()
}

fn require_live<T: SoftDelete>(row: Option<T>, entity: &'static str, id: Id) -> DbResult<T> {
    match row {
        Some(row) if row.is_live() => Ok(row),
        _ => Err(DbError::NotFound { entity, id }),
    }
}

fn require_name(name: &str, entity: &str) -> DbResult<String> {
    let name = name.trim();
    if name.is_empty() {
        return Err(DbError::Invalid(format!("{entity} name must not be empty")));
    }
    Ok(name.to_string())
}
