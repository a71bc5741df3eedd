//! Persisted domain entities.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

/// Identifier assigned by the store.
pub type Id = u64;

/// Implemented by everything stored in a `Table`.
pub trait Record {
    fn id(&self) -> Id;
    fn set_id(&mut self, id: Id);
}

/// Rows that are soft-deleted rather than removed.
pub trait SoftDelete {
    fn deleted_at(&self) -> Option<DateTime<Utc>>;
    fn mark_deleted(&mut self, at: DateTime<Utc>);

    fn is_live(&self) -> bool {
        self.deleted_at().is_none()
    }
}

macro_rules! record {
    ($($ty:ty),+ $(,)?) => {
        $(
            impl Record for $ty {
                fn id(&self) -> Id {
                    self.id
                }

                fn set_id(&mut self, id: Id) {
                    self.id = id;
                }
            }
        )+
    };
}

macro_rules! soft_delete {
    ($($ty:ty),+ $(,)?) => {
        $(
            impl SoftDelete for $ty {
                fn deleted_at(&self) -> Option<DateTime<Utc>> {
                    self.deleted_at
                }

                fn mark_deleted(&mut self, at: DateTime<Utc>) {
                    self.deleted_at = Some(at);
                }
            }
        )+
    };
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Account {
    #[serde(default)]
    pub id: Id,
    pub name: String,
    #[serde(default)]
    pub deleted_at: Option<DateTime<Utc>>,
}

/// An open or closed position. A trade is open while `sell_date` is empty.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Trade {
    #[serde(default)]
    pub id: Id,
    pub account_id: Id,
    pub universe_id: Id,
    pub buy: f64,
    #[serde(default)]
    pub sell: Option<f64>,
    pub buy_date: NaiveDate,
    #[serde(default)]
    pub sell_date: Option<NaiveDate>,
    pub quantity: f64,
    #[serde(default)]
    pub deleted_at: Option<DateTime<Utc>>,
}

impl Trade {
    pub fn is_open(&self) -> bool {
        self.sell_date.is_none()
    }

    /// Realized gain, `None` while the position is open.
    pub fn capital_gain(&self) -> Option<f64> {
        match (self.sell, self.sell_date) {
            (Some(sell), Some(_)) => Some((sell - self.buy) * self.quantity),
            _ => None,
        }
    }

    pub fn cost_basis(&self) -> f64 {
        self.buy * self.quantity
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DivDeposit {
    #[serde(default)]
    pub id: Id,
    pub account_id: Id,
    pub div_deposit_type_id: Id,
    #[serde(default)]
    pub universe_id: Option<Id>,
    pub date: NaiveDate,
    pub amount: f64,
    #[serde(default)]
    pub deleted_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DivDepositType {
    #[serde(default)]
    pub id: Id,
    pub name: String,
}

pub const DIVIDEND_TYPE: &str = "Dividend";
pub const DEPOSIT_TYPE: &str = "Deposit";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RiskGroup {
    #[serde(default)]
    pub id: Id,
    pub name: String,
}

pub const EQUITIES_GROUP: &str = "Equities";
pub const INCOME_GROUP: &str = "Income";
pub const TAX_FREE_INCOME_GROUP: &str = "Tax Free Income";

/// A tracked symbol.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Universe {
    #[serde(default)]
    pub id: Id,
    pub symbol: String,
    #[serde(default)]
    pub distribution: f64,
    #[serde(default)]
    pub distributions_per_year: u32,
    #[serde(default)]
    pub last_price: f64,
    #[serde(default)]
    pub ex_date: Option<NaiveDate>,
    #[serde(default)]
    pub most_recent_sell_date: Option<NaiveDate>,
    #[serde(default)]
    pub most_recent_sell_price: Option<f64>,
    pub risk_group_id: Id,
    #[serde(default)]
    pub expired: bool,
    #[serde(default)]
    pub is_closed_end_fund: bool,
    #[serde(default)]
    pub deleted_at: Option<DateTime<Utc>>,
}

impl Universe {
    pub fn new(symbol: &str, risk_group_id: Id) -> Self {
        Universe {
            id: 0,
            symbol: normalize_symbol(symbol),
            distribution: 0.0,
            distributions_per_year: 0,
            last_price: 0.0,
            ex_date: None,
            most_recent_sell_date: None,
            most_recent_sell_price: None,
            risk_group_id,
            expired: false,
            is_closed_end_fund: false,
            deleted_at: None,
        }
    }
}

/// A candidate symbol. It qualifies for the universe once every flag is set.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Screener {
    #[serde(default)]
    pub id: Id,
    pub symbol: String,
    pub risk_group_id: Id,
    #[serde(default)]
    pub distribution: f64,
    #[serde(default)]
    pub distributions_per_year: u32,
    #[serde(default)]
    pub last_price: f64,
    #[serde(default)]
    pub ex_date: Option<NaiveDate>,
    #[serde(default)]
    pub is_closed_end_fund: bool,
    #[serde(default)]
    pub has_volatility: bool,
    #[serde(default)]
    pub objectives_understood: bool,
    #[serde(default)]
    pub graph_higher_before_2008: bool,
}

impl Screener {
    pub fn qualifies(&self) -> bool {
        self.has_volatility && self.objectives_understood && self.graph_higher_before_2008
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Debug,
    Info,
    Warn,
    #[default]
    Error,
}

/// A client-side error reported by the front-end.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorLogEntry {
    #[serde(default)]
    pub id: Id,
    pub timestamp: DateTime<Utc>,
    #[serde(default)]
    pub level: LogLevel,
    pub message: String,
    #[serde(default)]
    pub context: Option<serde_json::Value>,
    #[serde(default)]
    pub user_id: Option<String>,
}

record!(
    Account,
    Trade,
    DivDeposit,
    DivDepositType,
    RiskGroup,
    Universe,
    Screener,
    ErrorLogEntry,
);
soft_delete!(Account, Trade, DivDeposit, Universe);

/// Symbols are stored upper-case without surrounding whitespace.
pub fn normalize_symbol(symbol: &str) -> String {
    symbol.trim().to_uppercase()
}
