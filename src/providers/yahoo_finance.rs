use anyhow::{Context, Result, anyhow};
use async_trait::async_trait;
use serde::Deserialize;
use tracing::{debug, instrument};

use super::util::with_retry;
use crate::core::cache::Cache;
use crate::core::price::{PriceProvider, PriceResult};

pub const DEFAULT_BASE_URL: &str = "https://query1.finance.yahoo.com";

const RETRIES: usize = 2;
const RETRY_DELAY_MS: u64 = 300;

/// Last price lookups against the Yahoo chart endpoint.
pub struct YahooFinanceProvider {
    base_url: String,
    client: reqwest::Client,
    cache: Cache<String, PriceResult>,
}

impl YahooFinanceProvider {
    pub fn new(base_url: &str, cache: Cache<String, PriceResult>) -> Result<Self> {
        let client = reqwest::Client::builder()
            .user_agent("divtrack/1.0")
            .build()
            .context("Failed to build HTTP client")?;
        Ok(YahooFinanceProvider {
            base_url: base_url.trim_end_matches('/').to_string(),
            client,
            cache,
        })
    }
}

#[derive(Deserialize, Debug)]
struct YahooPriceResponse {
    chart: PriceChartResult,
}

#[derive(Deserialize, Debug)]
struct PriceChartResult {
    result: Option<Vec<PriceChartItem>>,
    error: Option<ChartError>,
}

#[derive(Deserialize, Debug)]
struct ChartError {
    description: String,
}

#[derive(Deserialize, Debug)]
struct PriceChartItem {
    meta: PriceChartMeta,
}

#[derive(Deserialize, Debug)]
struct PriceChartMeta {
    #[serde(alias = "regularMarketPrice")]
    regular_market_price: f64,
    #[serde(default)]
    currency: Option<String>,
    #[serde(alias = "shortName", default)]
    short_name: Option<String>,
}

#[async_trait]
impl PriceProvider for YahooFinanceProvider {
    #[instrument(
        name = "YahooPriceFetch",
        skip(self),
        fields(symbol = %symbol)
    )]
    async fn fetch_price(&self, symbol: &str) -> Result<PriceResult> {
        if let Some(cached) = self.cache.get(&symbol.to_string()).await {
            return Ok(cached);
        }

        let url = format!(
            "{}/v8/finance/chart/{}?interval=1d&range=1d",
            self.base_url, symbol
        );
        debug!("Requesting price data from {}", url);

        let response = with_retry(|| self.client.get(&url).send(), RETRIES, RETRY_DELAY_MS)
            .await
            .map_err(|e| anyhow!("Request error: {} for symbol: {}", e, symbol))?;
        let status = response.status();
        let text = response
            .text()
            .await
            .context("Failed to read price response")?;

        let data: YahooPriceResponse = serde_json::from_str(&text).map_err(|e| {
            anyhow!(
                "Failed to parse price response for {} (HTTP {}): {}",
                symbol,
                status,
                e
            )
        })?;
        if let Some(error) = data.chart.error {
            return Err(anyhow!("{} for symbol: {}", error.description, symbol));
        }
        if !status.is_success() {
            return Err(anyhow!("HTTP error: {} for symbol: {}", status, symbol));
        }

        let item = data
            .chart
            .result
            .and_then(|items| items.into_iter().next())
            .ok_or_else(|| anyhow!("No price data found for symbol: {}", symbol))?;

        let result = PriceResult {
            price: item.meta.regular_market_price,
            currency: item.meta.currency.unwrap_or_else(|| "USD".to_string()),
            short_name: item.meta.short_name,
        };

        self.cache.put(symbol.to_string(), result.clone()).await;

        Ok(result)
    }
}
