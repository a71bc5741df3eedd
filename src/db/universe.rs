use super::{Database, DbError, DbResult, live, require_live, require_name};
use crate::core::models::{
    EQUITIES_GROUP, INCOME_GROUP, Id, RiskGroup, Screener, SoftDelete, TAX_FREE_INCOME_GROUP,
    Universe, normalize_symbol,
};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use tracing::{debug, info};

/// Partial update of the screener qualification flags.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ScreenerFlags {
    pub has_volatility: Option<bool>,
    pub objectives_understood: Option<bool>,
    pub graph_higher_before_2008: Option<bool>,
}

/// Symbol lists per risk group, each a comma or whitespace separated string.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct SymbolLists {
    pub equities: String,
    pub income: String,
    pub tax_free_income: String,
}

impl SymbolLists {
    fn groups(&self) -> [(&'static str, Vec<String>); 3] {
        [
            (EQUITIES_GROUP, split_symbols(&self.equities)),
            (INCOME_GROUP, split_symbols(&self.income)),
            (TAX_FREE_INCOME_GROUP, split_symbols(&self.tax_free_income)),
        ]
    }
}

fn split_symbols(list: &str) -> Vec<String> {
    let mut seen = HashSet::new();
    list.split(|c: char| c == ',' || c.is_whitespace())
        .map(normalize_symbol)
        .filter(|s| !s.is_empty())
        .filter(|s| seen.insert(s.clone()))
        .collect()
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct SettingsOutcome {
    pub added: usize,
    pub updated: usize,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct SyncOutcome {
    pub selected: usize,
    pub inserted: usize,
    pub updated: usize,
    pub expired: usize,
}

impl Database {
    pub async fn risk_groups(&self) -> DbResult<Vec<RiskGroup>> {
        Ok(self.risk_groups.all().await?)
    }

    pub async fn find_risk_group_by_name(&self, name: &str) -> DbResult<Option<RiskGroup>> {
        let name = name.trim();
        Ok(self
            .risk_groups()
            .await?
            .into_iter()
            .find(|g| g.name.eq_ignore_ascii_case(name)))
    }

    pub async fn create_risk_group(&self, name: &str) -> DbResult<RiskGroup> {
        let name = require_name(name, "RiskGroup")?;
        let _guard = self.write_lock.lock().await;
        if self.find_risk_group_by_name(&name).await?.is_some() {
            return Err(DbError::UniqueViolation {
                entity: "RiskGroup",
                field: "name",
                value: name,
            });
        }
        Ok(self.risk_groups.insert(RiskGroup { id: 0, name }).await?)
    }

    async fn require_risk_group(&self, id: Id) -> DbResult<RiskGroup> {
        self.risk_groups
            .get(id)
            .await?
            .ok_or(DbError::NotFound {
                entity: "RiskGroup",
                id,
            })
    }

    /// Live universe rows; expired rows only when asked for.
    pub async fn list_universe(&self, include_expired: bool) -> DbResult<Vec<Universe>> {
        Ok(live(self.universe.all().await?)
            .into_iter()
            .filter(|u| include_expired || !u.expired)
            .collect())
    }

    pub async fn get_universe(&self, id: Id) -> DbResult<Universe> {
        require_live(self.universe.get(id).await?, "Universe", id)
    }

    pub async fn find_universe_by_symbol(&self, symbol: &str) -> DbResult<Option<Universe>> {
        let symbol = normalize_symbol(symbol);
        Ok(self
            .list_universe(true)
            .await?
            .into_iter()
            .find(|u| u.symbol == symbol))
    }

    pub async fn create_universe(&self, universe: Universe) -> DbResult<Universe> {
        let _guard = self.write_lock.lock().await;
        let universe = self.validate_universe(universe, None).await?;
        let universe = self
            .universe
            .insert(Universe {
                id: 0,
                deleted_at: None,
                ..universe
            })
            .await?;
        info!("Added {} to the universe", universe.symbol);
        Ok(universe)
    }

    pub async fn update_universe(&self, id: Id, universe: Universe) -> DbResult<Universe> {
        let _guard = self.write_lock.lock().await;
        self.get_universe(id).await?;
        let universe = self.validate_universe(universe, Some(id)).await?;
        let universe = Universe {
            id,
            deleted_at: None,
            ..universe
        };
        self.universe.update(&universe).await?;
        Ok(universe)
    }

    pub async fn delete_universe(&self, id: Id) -> DbResult<()> {
        let _guard = self.write_lock.lock().await;
        let mut universe = self.get_universe(id).await?;
        universe.mark_deleted(Utc::now());
        self.universe.update(&universe).await?;
        info!("Removed {} from the universe", universe.symbol);
        Ok(())
    }

    pub async fn set_last_price(&self, id: Id, price: f64) -> DbResult<Universe> {
        let _guard = self.write_lock.lock().await;
        let mut universe = self.get_universe(id).await?;
        universe.last_price = price;
        self.universe.update(&universe).await?;
        Ok(universe)
    }

    async fn validate_universe(&self, mut universe: Universe, except: Option<Id>) -> DbResult<Universe> {
        universe.symbol = normalize_symbol(&universe.symbol);
        if universe.symbol.is_empty() {
            return Err(DbError::Invalid("Universe symbol must not be empty".to_string()));
        }
        self.require_risk_group(universe.risk_group_id).await?;
        if let Some(existing) = self.find_universe_by_symbol(&universe.symbol).await?
            && Some(existing.id) != except
        {
            return Err(DbError::UniqueViolation {
                entity: "Universe",
                field: "symbol",
                value: universe.symbol,
            });
        }
        Ok(universe)
    }

    /// Adds the listed symbols under their risk group and moves or un-expires the
    /// ones already tracked. A symbol listed under several groups ends up in the last.
    pub async fn apply_settings(&self, lists: &SymbolLists) -> DbResult<SettingsOutcome> {
        let _guard = self.write_lock.lock().await;
        let mut outcome = SettingsOutcome::default();
        for (group_name, symbols) in lists.groups() {
            if symbols.is_empty() {
                continue;
            }
            let group = self.find_risk_group_by_name(group_name).await?.ok_or_else(|| {
                DbError::Invalid(format!("Risk group {group_name} is missing"))
            })?;
            for symbol in symbols {
                match self.find_universe_by_symbol(&symbol).await? {
                    Some(mut existing) => {
                        if existing.risk_group_id != group.id || existing.expired {
                            existing.risk_group_id = group.id;
                            existing.expired = false;
                            self.universe.update(&existing).await?;
                            outcome.updated += 1;
                        }
                    }
                    None => {
                        self.universe.insert(Universe::new(&symbol, group.id)).await?;
                        outcome.added += 1;
                    }
                }
            }
        }
        info!(
            "Settings applied: {} added, {} updated",
            outcome.added, outcome.updated
        );
        Ok(outcome)
    }

    pub async fn list_screener(&self) -> DbResult<Vec<Screener>> {
        Ok(self.screener.all().await?)
    }

    pub async fn create_screener(&self, mut screener: Screener) -> DbResult<Screener> {
        screener.symbol = normalize_symbol(&screener.symbol);
        if screener.symbol.is_empty() {
            return Err(DbError::Invalid("Screener symbol must not be empty".to_string()));
        }
        let _guard = self.write_lock.lock().await;
        self.require_risk_group(screener.risk_group_id).await?;
        if self
            .list_screener()
            .await?
            .iter()
            .any(|s| s.symbol == screener.symbol)
        {
            return Err(DbError::UniqueViolation {
                entity: "Screener",
                field: "symbol",
                value: screener.symbol,
            });
        }
        Ok(self.screener.insert(Screener { id: 0, ..screener }).await?)
    }

    pub async fn update_screener_flags(&self, id: Id, flags: &ScreenerFlags) -> DbResult<Screener> {
        let _guard = self.write_lock.lock().await;
        let mut screener = self
            .screener
            .get(id)
            .await?
            .ok_or(DbError::NotFound {
                entity: "Screener",
                id,
            })?;
        if let Some(v) = flags.has_volatility {
            screener.has_volatility = v;
        }
        if let Some(v) = flags.objectives_understood {
            screener.objectives_understood = v;
        }
        if let Some(v) = flags.graph_higher_before_2008 {
            screener.graph_higher_before_2008 = v;
        }
        self.screener.update(&screener).await?;
        Ok(screener)
    }

    /// Makes the universe mirror the qualifying screener rows: they are inserted or
    /// refreshed, every other live universe row is marked expired.
    pub async fn sync_universe_from_screener(&self) -> DbResult<SyncOutcome> {
        let _guard = self.write_lock.lock().await;
        let selected: Vec<Screener> = self
            .list_screener()
            .await?
            .into_iter()
            .filter(Screener::qualifies)
            .collect();
        let mut outcome = SyncOutcome {
            selected: selected.len(),
            ..SyncOutcome::default()
        };

        let mut kept = HashSet::new();
        for candidate in &selected {
            match self.find_universe_by_symbol(&candidate.symbol).await? {
                Some(mut existing) => {
                    copy_screener(&mut existing, candidate);
                    existing.expired = false;
                    self.universe.update(&existing).await?;
                    kept.insert(existing.id);
                    outcome.updated += 1;
                }
                None => {
                    let mut row = Universe::new(&candidate.symbol, candidate.risk_group_id);
                    copy_screener(&mut row, candidate);
                    let row = self.universe.insert(row).await?;
                    kept.insert(row.id);
                    outcome.inserted += 1;
                }
            }
        }

        for mut row in self.list_universe(false).await? {
            if !kept.contains(&row.id) {
                debug!("Expiring {}", row.symbol);
                row.expired = true;
                self.universe.update(&row).await?;
                outcome.expired += 1;
            }
        }
        info!(
            "Universe synced from screener: {} selected, {} inserted, {} updated, {} expired",
            outcome.selected, outcome.inserted, outcome.updated, outcome.expired
        );
        Ok(outcome)
    }
}

fn copy_screener(row: &mut Universe, screener: &Screener) {
    row.risk_group_id = screener.risk_group_id;
    row.distribution = screener.distribution;
    row.distributions_per_year = screener.distributions_per_year;
    row.last_price = screener.last_price;
    row.ex_date = screener.ex_date;
    row.is_closed_end_fund = screener.is_closed_end_fund;
}

#[cfg(test)]
mod tests {
    use super::super::testutil::memory_db;
    use super::*;

    async fn group_id(db: &Database, name: &str) -> Id {
        db.find_risk_group_by_name(name).await.unwrap().unwrap().id
    }

    fn screener(symbol: &str, risk_group_id: Id, qualifies: bool) -> Screener {
        Screener {
            id: 0,
            symbol: symbol.to_string(),
            risk_group_id,
            distribution: 0.2,
            distributions_per_year: 12,
            last_price: 20.0,
            ex_date: None,
            is_closed_end_fund: true,
            has_volatility: qualifies,
            objectives_understood: qualifies,
            graph_higher_before_2008: qualifies,
        }
    }

    #[tokio::test]
    async fn test_universe_symbol_is_unique_case_insensitive() {
        let db = memory_db().await;
        let income = group_id(&db, "income").await;
        let pdi = db.create_universe(Universe::new("PDI", income)).await.unwrap();

        let err = db
            .create_universe(Universe::new(" pdi", income))
            .await
            .unwrap_err();
        assert!(matches!(err, DbError::UniqueViolation { field: "symbol", .. }));

        db.delete_universe(pdi.id).await.unwrap();
        assert!(db.create_universe(Universe::new("pdi", income)).await.is_ok());
    }

    #[tokio::test]
    async fn test_universe_requires_existing_risk_group() {
        let db = memory_db().await;
        let err = db.create_universe(Universe::new("PDI", 42)).await.unwrap_err();
        assert!(matches!(err, DbError::NotFound { entity: "RiskGroup", id: 42 }));
    }

    #[tokio::test]
    async fn test_risk_group_names_are_unique() {
        let db = memory_db().await;
        assert!(matches!(
            db.create_risk_group("EQUITIES").await,
            Err(DbError::UniqueViolation { .. })
        ));
        let growth = db.create_risk_group(" Growth ").await.unwrap();
        assert_eq!(growth.name, "Growth");
        assert_eq!(db.risk_groups().await.unwrap().len(), 4);
    }

    #[tokio::test]
    async fn test_update_universe_keeps_own_symbol() {
        let db = memory_db().await;
        let income = group_id(&db, "Income").await;
        let pdi = db.create_universe(Universe::new("PDI", income)).await.unwrap();
        db.create_universe(Universe::new("CLM", income)).await.unwrap();

        let mut changed = pdi.clone();
        changed.distribution = 0.2205;
        let updated = db.update_universe(pdi.id, changed).await.unwrap();
        assert_eq!(updated.distribution, 0.2205);

        let mut clash = pdi.clone();
        clash.symbol = "clm".to_string();
        assert!(matches!(
            db.update_universe(pdi.id, clash).await,
            Err(DbError::UniqueViolation { .. })
        ));
    }

    #[tokio::test]
    async fn test_apply_settings_adds_and_moves_symbols() {
        let db = memory_db().await;
        let equities = group_id(&db, "Equities").await;
        let mut msft = db.create_universe(Universe::new("MSFT", equities)).await.unwrap();
        msft.expired = true;
        db.update_universe(msft.id, msft.clone()).await.unwrap();

        let lists = SymbolLists {
            equities: "msft, aapl".to_string(),
            income: "PDI CLM\nPDI".to_string(),
            tax_free_income: String::new(),
        };
        let outcome = db.apply_settings(&lists).await.unwrap();
        assert_eq!(outcome, SettingsOutcome { added: 3, updated: 1 });

        let again = db.apply_settings(&lists).await.unwrap();
        assert_eq!(again, SettingsOutcome::default());

        let income = group_id(&db, "Income").await;
        let pdi = db.find_universe_by_symbol("pdi").await.unwrap().unwrap();
        assert_eq!(pdi.risk_group_id, income);
        assert!(!db.get_universe(msft.id).await.unwrap().expired);
    }

    #[tokio::test]
    async fn test_sync_from_screener() {
        let db = memory_db().await;
        let income = group_id(&db, "Income").await;
        let equities = group_id(&db, "Equities").await;
        let old = db.create_universe(Universe::new("OLD", equities)).await.unwrap();
        db.create_universe(Universe::new("PDI", equities)).await.unwrap();

        db.create_screener(screener("pdi", income, true)).await.unwrap();
        db.create_screener(screener("CLM", income, true)).await.unwrap();
        let pending = db.create_screener(screener("PTY", income, false)).await.unwrap();

        let outcome = db.sync_universe_from_screener().await.unwrap();
        assert_eq!(
            outcome,
            SyncOutcome { selected: 2, inserted: 1, updated: 1, expired: 1 }
        );

        let pdi = db.find_universe_by_symbol("PDI").await.unwrap().unwrap();
        assert_eq!(pdi.risk_group_id, income);
        assert_eq!(pdi.last_price, 20.0);
        assert!(db.get_universe(old.id).await.unwrap().expired);
        let symbols: Vec<String> = db
            .list_universe(false)
            .await
            .unwrap()
            .into_iter()
            .map(|u| u.symbol)
            .collect();
        assert_eq!(symbols, vec!["PDI", "CLM"]);

        let flags = ScreenerFlags {
            has_volatility: Some(true),
            objectives_understood: Some(true),
            graph_higher_before_2008: Some(true),
        };
        db.update_screener_flags(pending.id, &flags).await.unwrap();
        let outcome = db.sync_universe_from_screener().await.unwrap();
        assert_eq!(outcome.selected, 3);
        assert_eq!(outcome.inserted, 1);
        assert_eq!(outcome.expired, 0);
    }

    #[tokio::test]
    async fn test_screener_symbol_is_unique() {
        let db = memory_db().await;
        let income = group_id(&db, "Income").await;
        db.create_screener(screener("PDI", income, false)).await.unwrap();
        assert!(matches!(
            db.create_screener(screener(" pdi ", income, false)).await,
            Err(DbError::UniqueViolation { .. })
        ));
        assert!(matches!(
            db.update_screener_flags(99, &ScreenerFlags::default()).await,
            Err(DbError::NotFound { .. })
        ));
    }

    #[test]
    fn test_split_symbols() {
        assert_eq!(split_symbols(" pdi,clm  pty,,\nPDI"), vec!["PDI", "CLM", "PTY"]);
        assert!(split_symbols("  ").is_empty());
    }
}
