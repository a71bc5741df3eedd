use super::{Database, DbError, DbResult, live, require_live, require_name};
use crate::core::models::{
    Account, DivDeposit, DivDepositType, Id, SoftDelete, Trade, normalize_symbol,
};
use chrono::{NaiveDate, Utc};
use serde::Deserialize;
use tracing::{debug, info};

// Quantities below this are treated as fully consumed.
const QUANTITY_EPSILON: f64 = 1e-9;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TradeStatus {
    Open,
    Closed,
}

impl Database {
    pub async fn list_accounts(&self) -> DbResult<Vec<Account>> {
        Ok(live(self.accounts.all().await?))
    }

    pub async fn get_account(&self, id: Id) -> DbResult<Account> {
        require_live(self.accounts.get(id).await?, "Account", id)
    }

    pub async fn find_account_by_name(&self, name: &str) -> DbResult<Option<Account>> {
        let name = name.trim();
        Ok(self
            .list_accounts()
            .await?
            .into_iter()
            .find(|a| a.name.eq_ignore_ascii_case(name)))
    }

    pub async fn create_account(&self, name: &str) -> DbResult<Account> {
        let name = require_name(name, "Account")?;
        let _guard = self.write_lock.lock().await;
        self.ensure_unique_account_name(&name, None).await?;
        let account = self
            .accounts
            .insert(Account {
                id: 0,
                name,
                deleted_at: None,
            })
            .await?;
        info!("Created account {} ({})", account.name, account.id);
        Ok(account)
    }

    pub async fn rename_account(&self, id: Id, name: &str) -> DbResult<Account> {
        let name = require_name(name, "Account")?;
        let _guard = self.write_lock.lock().await;
        let mut account = self.get_account(id).await?;
        self.ensure_unique_account_name(&name, Some(id)).await?;
        account.name = name;
        self.accounts.update(&account).await?;
        Ok(account)
    }

    pub async fn delete_account(&self, id: Id) -> DbResult<()> {
        let _guard = self.write_lock.lock().await;
        let mut account = self.get_account(id).await?;
        account.mark_deleted(Utc::now());
        self.accounts.update(&account).await?;
        info!("Deleted account {}", id);
        Ok(())
    }

    async fn ensure_unique_account_name(&self, name: &str, except: Option<Id>) -> DbResult<()> {
        let taken = self
            .list_accounts()
            .await?
            .iter()
            .any(|a| Some(a.id) != except && a.name.eq_ignore_ascii_case(name));
        if taken {
            return Err(DbError::UniqueViolation {
                entity: "Account",
                field: "name",
                value: name.to_string(),
            });
        }
        Ok(())
    }

    /// Live trades of every account, for summaries.
    pub async fn all_trades(&self) -> DbResult<Vec<Trade>> {
        Ok(live(self.trades.all().await?))
    }

    pub async fn list_trades(
        &self,
        account_id: Id,
        status: Option<TradeStatus>,
    ) -> DbResult<Vec<Trade>> {
        self.get_account(account_id).await?;
        Ok(self
            .all_trades()
            .await?
            .into_iter()
            .filter(|t| t.account_id == account_id)
            .filter(|t| match status {
                Some(TradeStatus::Open) => t.is_open(),
                Some(TradeStatus::Closed) => !t.is_open(),
                None => true,
            })
            .collect())
    }

    pub async fn get_trade(&self, id: Id) -> DbResult<Trade> {
        require_live(self.trades.get(id).await?, "Trade", id)
    }

    pub async fn create_trade(&self, trade: Trade) -> DbResult<Trade> {
        let _guard = self.write_lock.lock().await;
        self.validate_trade(&trade).await?;
        let trade = self
            .trades
            .insert(Trade {
                id: 0,
                deleted_at: None,
                ..trade
            })
            .await?;
        debug!("Created trade {}", trade.id);
        Ok(trade)
    }

    pub async fn update_trade(&self, id: Id, trade: Trade) -> DbResult<Trade> {
        let _guard = self.write_lock.lock().await;
        self.get_trade(id).await?;
        self.validate_trade(&trade).await?;
        let trade = Trade {
            id,
            deleted_at: None,
            ..trade
        };
        self.trades.update(&trade).await?;
        Ok(trade)
    }

    pub async fn delete_trade(&self, id: Id) -> DbResult<()> {
        let _guard = self.write_lock.lock().await;
        let mut trade = self.get_trade(id).await?;
        trade.mark_deleted(Utc::now());
        self.trades.update(&trade).await?;
        Ok(())
    }

    async fn validate_trade(&self, trade: &Trade) -> DbResult<()> {
        self.get_account(trade.account_id).await?;
        self.get_universe(trade.universe_id).await?;
        if !(trade.quantity > 0.0) {
            return Err(DbError::Invalid("Trade quantity must be positive".to_string()));
        }
        if !(trade.buy >= 0.0) {
            return Err(DbError::Invalid("Trade buy price must not be negative".to_string()));
        }
        match (trade.sell, trade.sell_date) {
            (Some(sell), Some(sell_date)) => {
                if sell < 0.0 {
                    return Err(DbError::Invalid(
                        "Trade sell price must not be negative".to_string(),
                    ));
                }
                if sell_date < trade.buy_date {
                    return Err(DbError::Invalid(
                        "Trade sell date is before its buy date".to_string(),
                    ));
                }
            }
            (None, None) => {}
            _ => {
                return Err(DbError::Invalid(
                    "Trade sell price and sell date must be set together".to_string(),
                ));
            }
        }
        Ok(())
    }

    /// Records a purchase as a new open trade on `symbol`.
    pub async fn open_position(
        &self,
        account_id: Id,
        symbol: &str,
        quantity: f64,
        price: f64,
        date: NaiveDate,
    ) -> DbResult<Trade> {
        let universe = self.require_symbol(symbol).await?;
        self.create_trade(Trade {
            id: 0,
            account_id,
            universe_id: universe.id,
            buy: price,
            sell: None,
            buy_date: date,
            sell_date: None,
            quantity,
            deleted_at: None,
        })
        .await
    }

    /// Closes open trades of `symbol` in the account oldest first, splitting the last
    /// lot when it is only partly sold. Nothing changes when the open quantity does
    /// not cover the sale. Returns the closed trades.
    pub async fn sell_position(
        &self,
        account_id: Id,
        symbol: &str,
        quantity: f64,
        price: f64,
        date: NaiveDate,
    ) -> DbResult<Vec<Trade>> {
        if !(quantity > 0.0) {
            return Err(DbError::Invalid("Sale quantity must be positive".to_string()));
        }
        let _guard = self.write_lock.lock().await;
        self.get_account(account_id).await?;
        let mut universe = self.require_symbol(symbol).await?;

        let mut open: Vec<Trade> = self
            .all_trades()
            .await?
            .into_iter()
            .filter(|t| t.account_id == account_id && t.universe_id == universe.id && t.is_open())
            .filter(|t| t.buy_date <= date)
            .collect();
        open.sort_by(|a, b| a.buy_date.cmp(&b.buy_date).then(a.id.cmp(&b.id)));

        let available = open.iter().fold(0.0, |acc, t| acc + t.quantity);
        if available + QUANTITY_EPSILON < quantity {
            return Err(DbError::Invalid(format!(
                "Insufficient open quantity for {}: have {}, selling {}",
                universe.symbol, available, quantity
            )));
        }

        let mut remaining = quantity;
        let mut closed = Vec::new();
        for mut lot in open {
            if remaining <= QUANTITY_EPSILON {
                break;
            }
            if lot.quantity <= remaining + QUANTITY_EPSILON {
                remaining -= lot.quantity;
                lot.sell = Some(price);
                lot.sell_date = Some(date);
                self.trades.update(&lot).await?;
                closed.push(lot);
            } else {
                let sold = Trade {
                    id: 0,
                    quantity: remaining,
                    sell: Some(price),
                    sell_date: Some(date),
                    ..lot.clone()
                };
                lot.quantity -= remaining;
                remaining = 0.0;
                self.trades.update(&lot).await?;
                closed.push(self.trades.insert(sold).await?);
            }
        }

        universe.most_recent_sell_date = Some(date);
        universe.most_recent_sell_price = Some(price);
        self.universe.update(&universe).await?;
        debug!("Sold {} {} across {} lots", quantity, universe.symbol, closed.len());
        Ok(closed)
    }

    pub async fn deposit_types(&self) -> DbResult<Vec<DivDepositType>> {
        Ok(self.deposit_types.all().await?)
    }

    pub async fn deposit_type_id(&self, name: &str) -> DbResult<Id> {
        self.deposit_types()
            .await?
            .into_iter()
            .find(|t| t.name.eq_ignore_ascii_case(name))
            .map(|t| t.id)
            .ok_or_else(|| DbError::Invalid(format!("Unknown deposit type: {name}")))
    }

    /// Live deposits of every account, for summaries.
    pub async fn all_deposits(&self) -> DbResult<Vec<DivDeposit>> {
        Ok(live(self.deposits.all().await?))
    }

    pub async fn list_deposits(&self, account_id: Id) -> DbResult<Vec<DivDeposit>> {
        self.get_account(account_id).await?;
        Ok(self
            .all_deposits()
            .await?
            .into_iter()
            .filter(|d| d.account_id == account_id)
            .collect())
    }

    pub async fn get_deposit(&self, id: Id) -> DbResult<DivDeposit> {
        require_live(self.deposits.get(id).await?, "DivDeposit", id)
    }

    pub async fn create_deposit(&self, deposit: DivDeposit) -> DbResult<DivDeposit> {
        let _guard = self.write_lock.lock().await;
        self.validate_deposit(&deposit).await?;
        Ok(self
            .deposits
            .insert(DivDeposit {
                id: 0,
                deleted_at: None,
                ..deposit
            })
            .await?)
    }

    pub async fn update_deposit(&self, id: Id, deposit: DivDeposit) -> DbResult<DivDeposit> {
        let _guard = self.write_lock.lock().await;
        self.get_deposit(id).await?;
        self.validate_deposit(&deposit).await?;
        let deposit = DivDeposit {
            id,
            deleted_at: None,
            ..deposit
        };
        self.deposits.update(&deposit).await?;
        Ok(deposit)
    }

    pub async fn delete_deposit(&self, id: Id) -> DbResult<()> {
        let _guard = self.write_lock.lock().await;
        let mut deposit = self.get_deposit(id).await?;
        deposit.mark_deleted(Utc::now());
        self.deposits.update(&deposit).await?;
        Ok(())
    }

    async fn validate_deposit(&self, deposit: &DivDeposit) -> DbResult<()> {
        self.get_account(deposit.account_id).await?;
        if !self
            .deposit_types()
            .await?
            .iter()
            .any(|t| t.id == deposit.div_deposit_type_id)
        {
            return Err(DbError::NotFound {
                entity: "DivDepositType",
                id: deposit.div_deposit_type_id,
            });
        }
        if let Some(universe_id) = deposit.universe_id {
            self.get_universe(universe_id).await?;
        }
        if !deposit.amount.is_finite() {
            return Err(DbError::Invalid("Deposit amount must be a number".to_string()));
        }
        Ok(())
    }

    async fn require_symbol(&self, symbol: &str) -> DbResult<crate::core::models::Universe> {
        self.find_universe_by_symbol(symbol).await?.ok_or_else(|| {
            DbError::Invalid(format!(
                "Symbol {} not found in universe",
                normalize_symbol(symbol)
            ))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::super::testutil::memory_db;
    use super::*;
    use crate::core::models::Universe;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    async fn setup() -> (Database, Account, Universe) {
        let db = memory_db().await;
        let account = db.create_account("Roth IRA").await.unwrap();
        let group = db.find_risk_group_by_name("Income").await.unwrap().unwrap();
        let universe = db
            .create_universe(Universe::new("PDI", group.id))
            .await
            .unwrap();
        (db, account, universe)
    }

    #[tokio::test]
    async fn test_account_names_are_unique_among_live_rows() {
        let db = memory_db().await;
        let roth = db.create_account("Roth IRA").await.unwrap();

        let err = db.create_account("roth ira").await.unwrap_err();
        assert!(matches!(err, DbError::UniqueViolation { .. }));
        assert!(matches!(db.create_account("  ").await, Err(DbError::Invalid(_))));

        db.delete_account(roth.id).await.unwrap();
        assert!(db.list_accounts().await.unwrap().is_empty());
        assert!(matches!(
            db.get_account(roth.id).await,
            Err(DbError::NotFound { .. })
        ));
        assert!(db.create_account("Roth IRA").await.is_ok());
    }

    #[tokio::test]
    async fn test_trade_validation() {
        let (db, account, universe) = setup().await;
        let mut trade = Trade {
            id: 0,
            account_id: account.id,
            universe_id: universe.id,
            buy: 18.0,
            sell: Some(19.0),
            buy_date: date(2025, 1, 2),
            sell_date: None,
            quantity: 10.0,
            deleted_at: None,
        };
        assert!(matches!(
            db.create_trade(trade.clone()).await,
            Err(DbError::Invalid(_))
        ));

        trade.sell_date = Some(date(2024, 12, 1));
        assert!(matches!(
            db.create_trade(trade.clone()).await,
            Err(DbError::Invalid(_))
        ));

        trade.sell_date = Some(date(2025, 2, 1));
        let saved = db.create_trade(trade.clone()).await.unwrap();
        assert!(!saved.is_open());

        trade.universe_id = 999;
        assert!(matches!(
            db.create_trade(trade).await,
            Err(DbError::NotFound { .. })
        ));
    }

    #[tokio::test]
    async fn test_list_trades_by_status() {
        let (db, account, _) = setup().await;
        db.open_position(account.id, "pdi", 10.0, 18.0, date(2025, 1, 2))
            .await
            .unwrap();
        db.open_position(account.id, "PDI", 5.0, 19.0, date(2025, 1, 3))
            .await
            .unwrap();
        db.sell_position(account.id, "PDI", 10.0, 20.0, date(2025, 2, 1))
            .await
            .unwrap();

        let open = db
            .list_trades(account.id, Some(TradeStatus::Open))
            .await
            .unwrap();
        let closed = db
            .list_trades(account.id, Some(TradeStatus::Closed))
            .await
            .unwrap();
        assert_eq!(open.len(), 1);
        assert_eq!(open[0].quantity, 5.0);
        assert_eq!(closed.len(), 1);
        assert_eq!(closed[0].capital_gain(), Some(20.0));
    }

    #[tokio::test]
    async fn test_sell_position_fifo_with_split() {
        let (db, account, universe) = setup().await;
        let first = db
            .open_position(account.id, "PDI", 10.0, 18.0, date(2025, 1, 2))
            .await
            .unwrap();
        let second = db
            .open_position(account.id, "PDI", 10.0, 17.0, date(2025, 1, 10))
            .await
            .unwrap();

        let closed = db
            .sell_position(account.id, "PDI", 15.0, 20.0, date(2025, 3, 1))
            .await
            .unwrap();
        assert_eq!(closed.len(), 2);
        assert_eq!(closed[0].id, first.id);
        assert_eq!(closed[0].quantity, 10.0);
        assert_eq!(closed[1].quantity, 5.0);
        assert_eq!(closed[1].buy, 17.0);
        assert_ne!(closed[1].id, second.id);

        let remaining = db.get_trade(second.id).await.unwrap();
        assert!(remaining.is_open());
        assert_eq!(remaining.quantity, 5.0);

        let universe = db.get_universe(universe.id).await.unwrap();
        assert_eq!(universe.most_recent_sell_price, Some(20.0));
        assert_eq!(universe.most_recent_sell_date, Some(date(2025, 3, 1)));
    }

    #[tokio::test]
    async fn test_sell_position_insufficient_quantity_changes_nothing() {
        let (db, account, _) = setup().await;
        let lot = db
            .open_position(account.id, "PDI", 3.0, 18.0, date(2025, 1, 2))
            .await
            .unwrap();

        let err = db
            .sell_position(account.id, "PDI", 5.0, 20.0, date(2025, 3, 1))
            .await
            .unwrap_err();
        assert!(err.to_string().contains("Insufficient open quantity"));
        assert!(db.get_trade(lot.id).await.unwrap().is_open());
    }

    #[tokio::test]
    async fn test_sale_before_any_purchase_reports_zero_open() {
        let (db, account, _) = setup().await;
        db.open_position(account.id, "PDI", 3.0, 18.0, date(2025, 3, 2))
            .await
            .unwrap();

        let err = db
            .sell_position(account.id, "PDI", 2.0, 20.0, date(2025, 3, 1))
            .await
            .unwrap_err();
        assert_eq!(
            err.to_string(),
            "Insufficient open quantity for PDI: have 0, selling 2"
        );
    }

    #[tokio::test]
    async fn test_unknown_symbol_is_rejected() {
        let (db, account, _) = setup().await;
        let err = db
            .open_position(account.id, "zzz", 1.0, 1.0, date(2025, 1, 2))
            .await
            .unwrap_err();
        assert_eq!(err.to_string(), "Symbol ZZZ not found in universe");
    }

    #[tokio::test]
    async fn test_deposits_crud() {
        let (db, account, universe) = setup().await;
        let dividend_type = db.deposit_type_id("dividend").await.unwrap();

        let deposit = db
            .create_deposit(DivDeposit {
                id: 0,
                account_id: account.id,
                div_deposit_type_id: dividend_type,
                universe_id: Some(universe.id),
                date: date(2025, 3, 31),
                amount: 22.05,
                deleted_at: None,
            })
            .await
            .unwrap();
        assert_eq!(db.list_deposits(account.id).await.unwrap().len(), 1);

        let mut changed = deposit.clone();
        changed.amount = 23.0;
        let updated = db.update_deposit(deposit.id, changed).await.unwrap();
        assert_eq!(updated.amount, 23.0);

        db.delete_deposit(deposit.id).await.unwrap();
        assert!(db.list_deposits(account.id).await.unwrap().is_empty());

        let bad_type = DivDeposit {
            div_deposit_type_id: 99,
            ..deposit
        };
        assert!(matches!(
            db.create_deposit(bad_type).await,
            Err(DbError::NotFound { .. })
        ));
    }
}
