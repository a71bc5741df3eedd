use crate::core::price::PriceProvider;
use crate::db::{Database, DbResult};
use futures::stream::{self, StreamExt};
use serde::Serialize;
use tracing::{info, warn};

/// Number of quote requests in flight at once.
pub const REFRESH_CONCURRENCY: usize = 4;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RefreshFailure {
    pub symbol: String,
    pub error: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct RefreshOutcome {
    pub updated: usize,
    pub failed: Vec<RefreshFailure>,
}

/// Fetches the last price of every non-expired universe symbol and stores it.
/// Lookups that fail are reported per symbol and leave the stored price unchanged.
pub async fn refresh_prices(
    db: &Database,
    provider: &dyn PriceProvider,
    concurrency: usize,
) -> DbResult<RefreshOutcome> {
    let universe = db.list_universe(false).await?;
    let quotes: Vec<_> = stream::iter(universe)
        .map(|row| async move {
            let quote = provider.fetch_price(&row.symbol).await;
            (row, quote)
        })
        .buffer_unordered(concurrency.max(1))
        .collect()
        .await;

    let mut outcome = RefreshOutcome::default();
    for (row, quote) in quotes {
        match quote {
            Ok(quote) if quote.price.is_finite() && quote.price > 0.0 => {
                db.set_last_price(row.id, quote.price).await?;
                outcome.updated += 1;
            }
            Ok(quote) => outcome.failed.push(RefreshFailure {
                symbol: row.symbol,
                error: format!("Invalid price {}", quote.price),
            }),
            Err(e) => {
                warn!(symbol = %row.symbol, error = %e, "Price refresh failed");
                outcome.failed.push(RefreshFailure {
                    symbol: row.symbol,
                    error: e.to_string(),
                });
            }
        }
    }
    outcome.failed.sort_by(|a, b| a.symbol.cmp(&b.symbol));
    info!(
        "Refreshed {} prices, {} failed",
        outcome.updated,
        outcome.failed.len()
    );
    Ok(outcome)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::models::Universe;
    use crate::core::price::PriceResult;
    use crate::db::testutil::memory_db;
    use anyhow::{Result, anyhow};
    use async_trait::async_trait;
    use std::collections::HashMap;

    struct FixedPrices(HashMap<&'static str, f64>);

    #[async_trait]
    impl PriceProvider for FixedPrices {
        async fn fetch_price(&self, symbol: &str) -> Result<PriceResult> {
            self.0
                .get(symbol)
                .map(|price| PriceResult {
                    price: *price,
                    currency: "USD".to_string(),
                    short_name: None,
                })
                .ok_or_else(|| anyhow!("No price data found for symbol: {}", symbol))
        }
    }

    #[tokio::test]
    async fn test_refresh_updates_known_symbols() {
        let db = memory_db().await;
        let group = db.find_risk_group_by_name("Income").await.unwrap().unwrap();
        let pdi = db.create_universe(Universe::new("PDI", group.id)).await.unwrap();
        db.create_universe(Universe::new("ZZZ", group.id)).await.unwrap();
        let mut gone = db.create_universe(Universe::new("OLD", group.id)).await.unwrap();
        gone.expired = true;
        db.update_universe(gone.id, gone).await.unwrap();

        let provider = FixedPrices(HashMap::from([("PDI", 18.5), ("OLD", 1.0)]));
        let outcome = refresh_prices(&db, &provider, 2).await.unwrap();

        assert_eq!(outcome.updated, 1);
        assert_eq!(outcome.failed.len(), 1);
        assert_eq!(outcome.failed[0].symbol, "ZZZ");
        assert_eq!(db.get_universe(pdi.id).await.unwrap().last_price, 18.5);
    }
}
