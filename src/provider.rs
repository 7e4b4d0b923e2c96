use crate::database::Database;
use crate::fetcher::PriceFetcher;
use crate::market_data::PriceTable;
use anyhow::Result;
use chrono::NaiveDate;
use log::{info, warn};

/// Price series provider for the simulation loop: a date-indexed table per
/// symbol set and range. Live mode consults the database cache first, fetches
/// on a miss and falls back to stale cache rows when the upstream is down.
/// Snapshot mode serves from a table loaded off disk and never touches the
/// network.
pub enum PriceProvider {
    Live {
        cache: Option<Database>,
        fetcher: PriceFetcher,
    },
    Snapshot(PriceTable),
}

impl PriceProvider {
    pub fn live(cache: Option<Database>, fetcher: PriceFetcher) -> Self {
        PriceProvider::Live { cache, fetcher }
    }

    pub fn from_snapshot(table: PriceTable) -> Self {
        PriceProvider::Snapshot(table)
    }

    /// May return an empty table on failure; callers treat that as
    /// data-unavailable for the run.
    pub async fn get_price_data(
        &mut self,
        symbols: &[String],
        start_date: NaiveDate,
        end_date: NaiveDate,
    ) -> Result<PriceTable> {
        if symbols.is_empty() {
            return Ok(PriceTable::empty());
        }
        match self {
            PriceProvider::Snapshot(table) => {
                Ok(table.select(symbols).restrict(start_date, end_date))
            }
            PriceProvider::Live { cache, fetcher } => {
                if let Some(db) = cache.as_ref() {
                    match db.cached_prices(symbols, start_date, end_date).await {
                        Ok(columns) if covers_all(&columns, symbols) => {
                            info!(
                                "Serving cached prices for {} symbols ({} to {})",
                                symbols.len(),
                                start_date,
                                end_date
                            );
                            return Ok(PriceTable::from_columns(&columns));
                        }
                        Ok(_) => {}
                        Err(err) => warn!("Price cache lookup failed: {}", err),
                    }
                }

                let fresh = fetcher
                    .fetch_price_data(symbols, start_date, end_date)
                    .await?;
                if !fresh.is_empty() {
                    if let Some(db) = cache.as_mut() {
                        if let Err(err) = db.store_prices(&fresh).await {
                            warn!("Failed to cache fetched prices: {}", err);
                        }
                    }
                    return Ok(PriceTable::from_columns(&fresh));
                }

                if let Some(db) = cache.as_ref() {
                    match db.cached_prices(symbols, start_date, end_date).await {
                        Ok(columns) if !columns.is_empty() => {
                            warn!("Using stale cached prices after fetch failure");
                            return Ok(PriceTable::from_columns(&columns));
                        }
                        Ok(_) => {}
                        Err(err) => warn!("Stale price cache lookup failed: {}", err),
                    }
                }

                Ok(PriceTable::empty())
            }
        }
    }
}

fn covers_all(
    columns: &std::collections::BTreeMap<String, std::collections::BTreeMap<NaiveDate, f64>>,
    symbols: &[String],
) -> bool {
    symbols.iter().all(|symbol| {
        columns
            .get(symbol)
            .map(|series| !series.is_empty())
            .unwrap_or(false)
    })
}
