use crate::config::EngineSettings;
use anyhow::{anyhow, Context, Result};
use chrono::NaiveDate;
use log::warn;
use serde::Deserialize;
use std::collections::BTreeMap;
use std::time::Duration;

/// Daily-close fetcher over the configured price API. Bounded retries with
/// exponential backoff per symbol; a delay between symbol requests keeps us
/// under upstream rate limits.
pub struct PriceFetcher {
    client: reqwest::Client,
    base_url: Option<String>,
    max_retries: u32,
    retry_delay: Duration,
    rate_limit_delay: Duration,
}

#[derive(Debug, Deserialize)]
struct DailyClose {
    date: NaiveDate,
    close: f64,
}

impl PriceFetcher {
    pub fn from_settings(settings: &EngineSettings) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .context("failed to build price API client")?;
        Ok(Self {
            client,
            base_url: settings.price_api_base_url.clone(),
            max_retries: settings.fetch_max_retries.max(1),
            retry_delay: Duration::from_millis(settings.fetch_retry_delay_ms),
            rate_limit_delay: Duration::from_millis(settings.fetch_rate_limit_ms),
        })
    }

    /// Fetch daily closes for every symbol. Symbols that keep failing after
    /// all retries are dropped with a warning rather than failing the batch;
    /// an empty result is the caller's signal that nothing was available.
    pub async fn fetch_price_data(
        &self,
        symbols: &[String],
        start_date: NaiveDate,
        end_date: NaiveDate,
    ) -> Result<BTreeMap<String, BTreeMap<NaiveDate, f64>>> {
        let mut columns = BTreeMap::new();
        for (i, symbol) in symbols.iter().enumerate() {
            if i > 0 && !self.rate_limit_delay.is_zero() {
                tokio::time::sleep(self.rate_limit_delay).await;
            }
            match self.fetch_daily_closes(symbol, start_date, end_date).await {
                Ok(series) if !series.is_empty() => {
                    columns.insert(symbol.clone(), series);
                }
                Ok(_) => {
                    warn!("Price API returned no rows for {}", symbol);
                }
                Err(err) => {
                    warn!("Failed to fetch prices for {}: {}", symbol, err);
                }
            }
        }
        Ok(columns)
    }

    pub async fn fetch_daily_closes(
        &self,
        symbol: &str,
        start_date: NaiveDate,
        end_date: NaiveDate,
    ) -> Result<BTreeMap<NaiveDate, f64>> {
        let base_url = self
            .base_url
            .as_deref()
            .ok_or_else(|| anyhow!("PRICE_API_BASE_URL is not configured"))?;
        let url = format!(
            "{}/daily?symbol={}&start={}&end={}",
            base_url, symbol, start_date, end_date
        );

        let mut last_error = anyhow!("no fetch attempts made for {}", symbol);
        for attempt in 0..self.max_retries {
            if attempt > 0 {
                tokio::time::sleep(self.retry_delay * 2u32.pow(attempt - 1)).await;
            }
            match self.request_closes(&url).await {
                Ok(closes) => {
                    return Ok(closes
                        .into_iter()
                        .filter(|row| row.close.is_finite() && row.close > 0.0)
                        .map(|row| (row.date, row.close))
                        .collect());
                }
                Err(err) => {
                    warn!(
                        "Attempt {}/{} fetching {} failed: {}",
                        attempt + 1,
                        self.max_retries,
                        symbol,
                        err
                    );
                    last_error = err;
                }
            }
        }
        Err(last_error)
    }

    async fn request_closes(&self, url: &str) -> Result<Vec<DailyClose>> {
        let response = self
            .client
            .get(url)
            .send()
            .await
            .with_context(|| format!("request to {} failed", url))?;
        if !response.status().is_success() {
            return Err(anyhow!("price API responded with {}", response.status()));
        }
        response
            .json::<Vec<DailyClose>>()
            .await
            .context("failed to decode price API response")
    }
}
