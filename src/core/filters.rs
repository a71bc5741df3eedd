//! Filtering, sorting and classification of rows shown in the universe and
//! position tables.

use crate::core::models::Universe;
use anyhow::{Result, anyhow};
use serde::Serialize;
use std::cmp::Ordering;
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum CapitalGainClass {
    Gain,
    Loss,
    Neutral,
}

pub fn classify_capital_gain(value: f64) -> CapitalGainClass {
    if value > 0.0 {
        CapitalGainClass::Gain
    } else if value < 0.0 {
        CapitalGainClass::Loss
    } else {
        CapitalGainClass::Neutral
    }
}

pub trait SymbolRow {
    fn symbol(&self) -> &str;
}

pub trait YieldRow {
    fn yield_percent(&self) -> Option<f64>;
}

/// The inputs of a yield calculation.
pub trait DistributionRow {
    fn distribution(&self) -> f64;
    fn distributions_per_year(&self) -> u32;
    fn last_price(&self) -> f64;
}

impl DistributionRow for Universe {
    fn distribution(&self) -> f64 {
        self.distribution
    }

    fn distributions_per_year(&self) -> u32 {
        self.distributions_per_year
    }

    fn last_price(&self) -> f64 {
        self.last_price
    }
}

impl SymbolRow for Universe {
    fn symbol(&self) -> &str {
        &self.symbol
    }
}

/// Annualized yield in percent; zero when there is no usable price.
pub fn calculate_yield_percent<R: DistributionRow>(row: &R) -> f64 {
    let last_price = row.last_price();
    if last_price == 0.0 || !last_price.is_finite() {
        return 0.0;
    }
    (row.distribution() * row.distributions_per_year() as f64 * 100.0) / last_price
}

pub fn apply_symbol_filter<R: SymbolRow + Clone>(data: &[R], filter: Option<&str>) -> Vec<R> {
    let needle = match filter.map(str::trim) {
        Some(f) if !f.is_empty() => f.to_lowercase(),
        _ => return data.to_vec(),
    };
    data.iter()
        .filter(|row| row.symbol().to_lowercase().contains(&needle))
        .cloned()
        .collect()
}

pub fn apply_yield_filter<R: YieldRow + Clone>(data: &[R], min_yield: Option<f64>) -> Vec<R> {
    let min_yield = match min_yield {
        Some(m) if m > 0.0 => m,
        _ => return data.to_vec(),
    };
    data.iter()
        .filter(|row| {
            row.yield_percent()
                .is_some_and(|y| y != 0.0 && !y.is_nan() && y >= min_yield)
        })
        .cloned()
        .collect()
}

/// A universe row as listed to clients.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct UniverseRow {
    #[serde(flatten)]
    pub universe: Universe,
    pub yield_percent: Option<f64>,
    pub risk_group: Option<String>,
}

impl UniverseRow {
    pub fn new(universe: Universe, risk_group: Option<String>) -> Self {
        let yield_percent = Some(calculate_yield_percent(&universe));
        UniverseRow {
            universe,
            yield_percent,
            risk_group,
        }
    }
}

impl SymbolRow for UniverseRow {
    fn symbol(&self) -> &str {
        &self.universe.symbol
    }
}

impl YieldRow for UniverseRow {
    fn yield_percent(&self) -> Option<f64> {
        self.yield_percent
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UniverseSortField {
    Symbol,
    RiskGroup,
    YieldPercent,
    LastPrice,
    Distribution,
    DistributionsPerYear,
    ExDate,
    MostRecentSellDate,
    MostRecentSellPrice,
}

impl FromStr for UniverseSortField {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "symbol" => Ok(UniverseSortField::Symbol),
            "risk_group" => Ok(UniverseSortField::RiskGroup),
            "yield_percent" => Ok(UniverseSortField::YieldPercent),
            "last_price" => Ok(UniverseSortField::LastPrice),
            "distribution" => Ok(UniverseSortField::Distribution),
            "distributions_per_year" => Ok(UniverseSortField::DistributionsPerYear),
            "ex_date" => Ok(UniverseSortField::ExDate),
            "most_recent_sell_date" => Ok(UniverseSortField::MostRecentSellDate),
            "most_recent_sell_price" => Ok(UniverseSortField::MostRecentSellPrice),
            other => Err(anyhow!("Invalid sort field: {}", other)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SortDirection {
    Ascending,
    Descending,
    #[default]
    Unsorted,
}

impl FromStr for SortDirection {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "asc" | "ascending" => Ok(SortDirection::Ascending),
            "desc" | "descending" => Ok(SortDirection::Descending),
            "" => Ok(SortDirection::Unsorted),
            other => Err(anyhow!("Invalid sort direction: {}", other)),
        }
    }
}

/// Stable sort on `field`. Rows missing the value go last in both directions.
pub fn sort_universes(
    mut data: Vec<UniverseRow>,
    field: UniverseSortField,
    direction: SortDirection,
) -> Vec<UniverseRow> {
    let descending = match direction {
        SortDirection::Unsorted => return data,
        SortDirection::Ascending => false,
        SortDirection::Descending => true,
    };

    data.sort_by(|a, b| {
        let u = (&a.universe, &b.universe);
        match field {
            UniverseSortField::Symbol => nulls_last(
                Some(u.0.symbol.to_lowercase()),
                Some(u.1.symbol.to_lowercase()),
                descending,
            ),
            UniverseSortField::RiskGroup => nulls_last(
                a.risk_group.as_ref().map(|g| g.to_lowercase()),
                b.risk_group.as_ref().map(|g| g.to_lowercase()),
                descending,
            ),
            UniverseSortField::YieldPercent => {
                nulls_last_f64(a.yield_percent, b.yield_percent, descending)
            }
            UniverseSortField::LastPrice => {
                nulls_last_f64(Some(u.0.last_price), Some(u.1.last_price), descending)
            }
            UniverseSortField::Distribution => {
                nulls_last_f64(Some(u.0.distribution), Some(u.1.distribution), descending)
            }
            UniverseSortField::DistributionsPerYear => nulls_last(
                Some(u.0.distributions_per_year),
                Some(u.1.distributions_per_year),
                descending,
            ),
            UniverseSortField::ExDate => nulls_last(u.0.ex_date, u.1.ex_date, descending),
            UniverseSortField::MostRecentSellDate => nulls_last(
                u.0.most_recent_sell_date,
                u.1.most_recent_sell_date,
                descending,
            ),
            UniverseSortField::MostRecentSellPrice => nulls_last_f64(
                u.0.most_recent_sell_price,
                u.1.most_recent_sell_price,
                descending,
            ),
        }
    });
    data
}

fn nulls_last<T: Ord>(a: Option<T>, b: Option<T>, descending: bool) -> Ordering {
    match (a, b) {
        (None, None) => Ordering::Equal,
        (None, Some(_)) => Ordering::Greater,
        (Some(_), None) => Ordering::Less,
        (Some(a), Some(b)) if descending => b.cmp(&a),
        (Some(a), Some(b)) => a.cmp(&b),
    }
}

// NaN counts as missing.
fn nulls_last_f64(a: Option<f64>, b: Option<f64>, descending: bool) -> Ordering {
    let a = a.filter(|v| !v.is_nan());
    let b = b.filter(|v| !v.is_nan());
    match (a, b) {
        (None, None) => Ordering::Equal,
        (None, Some(_)) => Ordering::Greater,
        (Some(_), None) => Ordering::Less,
        (Some(a), Some(b)) if descending => b.total_cmp(&a),
        (Some(a), Some(b)) => a.total_cmp(&b),
    }
}
