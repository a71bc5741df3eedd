//! Portfolio summary: cash flows for a period and allocation of open positions by
//! risk group.
use crate::core::models::{
    DEPOSIT_TYPE, DIVIDEND_TYPE, DivDeposit, DivDepositType, Id, RiskGroup, Trade, Universe,
};
use anyhow::{Result, anyhow};
use chrono::{Datelike, NaiveDate};
use serde::Serialize;
use std::collections::HashMap;
use std::str::FromStr;

/// A calendar month, parsed from `YYYY-MM`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Month {
    pub year: i32,
    pub month: u32,
}

impl Month {
    pub fn contains(&self, date: NaiveDate) -> bool {
        date.year() == self.year && date.month() == self.month
    }
}

impl FromStr for Month {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (year, month) = s
            .trim()
            .split_once('-')
            .ok_or_else(|| anyhow!("Invalid month (expected YYYY-MM): {}", s))?;
        let year: i32 = year
            .parse()
            .map_err(|_| anyhow!("Invalid month (expected YYYY-MM): {}", s))?;
        let month: u32 = month
            .parse()
            .map_err(|_| anyhow!("Invalid month (expected YYYY-MM): {}", s))?;
        if !(1..=12).contains(&month) {
            return Err(anyhow!("Invalid month (expected YYYY-MM): {}", s));
        }
        Ok(Month { year, month })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RiskGroupAllocation {
    pub risk_group: String,
    pub cost_basis: f64,
    pub weight: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PortfolioSummary {
    pub deposits: f64,
    pub dividends: f64,
    pub capital_gains: f64,
    pub open_cost_basis: f64,
    pub allocations: Vec<RiskGroupAllocation>,
}

/// Everything the summary needs, already restricted to live rows.
pub struct SummaryInput<'a> {
    pub trades: &'a [Trade],
    pub deposits: &'a [DivDeposit],
    pub deposit_types: &'a [DivDepositType],
    pub universes: &'a [Universe],
    pub risk_groups: &'a [RiskGroup],
}

/// Builds the summary. Cash flows and realized gains are limited to `month` when
/// given; the allocation always reflects the currently open positions.
pub fn build_summary(
    input: &SummaryInput<'_>,
    month: Option<Month>,
    account_id: Option<Id>,
) -> PortfolioSummary {
    let in_period = |date: NaiveDate| month.is_none_or(|m| m.contains(date));
    let in_account = |id: Id| account_id.is_none_or(|a| a == id);

    let type_name: HashMap<Id, &str> = input
        .deposit_types
        .iter()
        .map(|t| (t.id, t.name.as_str()))
        .collect();

    let mut deposits = 0.0;
    let mut dividends = 0.0;
    for deposit in input
        .deposits
        .iter()
        .filter(|d| in_account(d.account_id) && in_period(d.date))
    {
        match type_name.get(&deposit.div_deposit_type_id).copied() {
            Some(DIVIDEND_TYPE) => dividends += deposit.amount,
            Some(DEPOSIT_TYPE) => deposits += deposit.amount,
            _ => {}
        }
    }

    let capital_gains: f64 = input
        .trades
        .iter()
        .filter(|t| in_account(t.account_id))
        .filter(|t| t.sell_date.is_some_and(|d| in_period(d)))
        .filter_map(Trade::capital_gain)
        .sum();

    let group_of: HashMap<Id, Id> = input
        .universes
        .iter()
        .map(|u| (u.id, u.risk_group_id))
        .collect();
    let mut cost_by_group: HashMap<Id, f64> = HashMap::new();
    for trade in input
        .trades
        .iter()
        .filter(|t| t.is_open() && in_account(t.account_id))
    {
        if let Some(group) = group_of.get(&trade.universe_id) {
            *cost_by_group.entry(*group).or_default() += trade.cost_basis();
        }
    }
    let open_cost_basis: f64 = cost_by_group.values().sum();

    let allocations = input
        .risk_groups
        .iter()
        .map(|group| {
            let cost_basis = cost_by_group.get(&group.id).copied().unwrap_or(0.0);
            let weight = if open_cost_basis > 0.0 {
                cost_basis / open_cost_basis * 100.0
            } else {
                0.0
            };
            RiskGroupAllocation {
                risk_group: group.name.clone(),
                cost_basis,
                weight,
            }
        })
        .collect();

    PortfolioSummary {
        deposits,
        dividends,
        capital_gains,
        open_cost_basis,
        allocations,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    fn trade(id: Id, account_id: Id, universe_id: Id, buy: f64, qty: f64) -> Trade {
        Trade {
            id,
            account_id,
            universe_id,
            buy,
            sell: None,
            buy_date: date(2025, 1, 2),
            sell_date: None,
            quantity: qty,
            deleted_at: None,
        }
    }

    fn deposit(account_id: Id, type_id: Id, d: NaiveDate, amount: f64) -> DivDeposit {
        DivDeposit {
            id: 0,
            account_id,
            div_deposit_type_id: type_id,
            universe_id: None,
            date: d,
            amount,
            deleted_at: None,
        }
    }

    struct Fixture {
        trades: Vec<Trade>,
        deposits: Vec<DivDeposit>,
        deposit_types: Vec<DivDepositType>,
        universes: Vec<Universe>,
        risk_groups: Vec<RiskGroup>,
    }

    impl Fixture {
        fn new() -> Self {
            let mut pdi = Universe::new("PDI", 2);
            pdi.id = 1;
            let mut msft = Universe::new("MSFT", 1);
            msft.id = 2;

            let mut sold = trade(3, 1, 2, 100.0, 2.0);
            sold.sell = Some(130.0);
            sold.sell_date = Some(date(2025, 3, 10));

            Fixture {
                trades: vec![trade(1, 1, 1, 20.0, 10.0), trade(2, 2, 2, 300.0, 1.0), sold],
                deposits: vec![
                    deposit(1, 1, date(2025, 3, 1), 25.0),
                    deposit(1, 2, date(2025, 3, 5), 1000.0),
                    deposit(2, 1, date(2025, 4, 1), 7.5),
                ],
                deposit_types: vec![
                    DivDepositType { id: 1, name: DIVIDEND_TYPE.to_string() },
                    DivDepositType { id: 2, name: DEPOSIT_TYPE.to_string() },
                ],
                universes: vec![pdi, msft],
                risk_groups: vec![
                    RiskGroup { id: 1, name: "Equities".to_string() },
                    RiskGroup { id: 2, name: "Income".to_string() },
                ],
            }
        }

        fn input(&self) -> SummaryInput<'_> {
            SummaryInput {
                trades: &self.trades,
                deposits: &self.deposits,
                deposit_types: &self.deposit_types,
                universes: &self.universes,
                risk_groups: &self.risk_groups,
            }
        }
    }

    #[test]
    fn test_summary_all_time() {
        let fixture = Fixture::new();
        let summary = build_summary(&fixture.input(), None, None);

        assert_eq!(summary.dividends, 32.5);
        assert_eq!(summary.deposits, 1000.0);
        assert_eq!(summary.capital_gains, 60.0);
        assert_eq!(summary.open_cost_basis, 500.0);
        assert_eq!(summary.allocations[0].risk_group, "Equities");
        assert_eq!(summary.allocations[0].cost_basis, 300.0);
        assert_eq!(summary.allocations[0].weight, 60.0);
        assert_eq!(summary.allocations[1].cost_basis, 200.0);
    }

    #[test]
    fn test_summary_for_month_and_account() {
        let fixture = Fixture::new();
        let march: Month = "2025-03".parse().unwrap();
        let summary = build_summary(&fixture.input(), Some(march), Some(1));

        assert_eq!(summary.dividends, 25.0);
        assert_eq!(summary.deposits, 1000.0);
        assert_eq!(summary.capital_gains, 60.0);
        assert_eq!(summary.open_cost_basis, 200.0);
        assert_eq!(summary.allocations[1].weight, 100.0);

        let april: Month = "2025-04".parse().unwrap();
        let summary = build_summary(&fixture.input(), Some(april), Some(1));
        assert_eq!(summary.dividends, 0.0);
        assert_eq!(summary.capital_gains, 0.0);
    }

    #[test]
    fn test_month_parsing() {
        assert_eq!(
            "2024-11".parse::<Month>().unwrap(),
            Month { year: 2024, month: 11 }
        );
        assert!("2024-13".parse::<Month>().is_err());
        assert!("2024".parse::<Month>().is_err());
        assert!("abcd-01".parse::<Month>().is_err());
    }
}
