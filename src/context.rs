use crate::config::{settings_from_env, EngineSettings};
use crate::database::Database;
use crate::fetcher::PriceFetcher;
use crate::market_data::PriceTable;
use crate::provider::PriceProvider;
use crate::store::ResultsStore;
use crate::strategy::StrategyRegistry;
use anyhow::Result;
use log::warn;
use std::collections::HashMap;
use std::path::Path;

/// Application wiring: resolves settings once, hands out store, provider and
/// registry instances. Every consumer gets its own database connection.
pub struct AppContext {
    database_url: Option<String>,
    settings_map: HashMap<String, String>,
    settings: EngineSettings,
}

impl AppContext {
    pub fn initialize(database_url: Option<String>) -> Result<Self> {
        let settings_map = settings_from_env();
        let settings = EngineSettings::from_settings_map(&settings_map)?;
        Ok(Self {
            database_url,
            settings_map,
            settings,
        })
    }

    pub fn settings(&self) -> &EngineSettings {
        &self.settings
    }

    pub fn settings_map(&self) -> &HashMap<String, String> {
        &self.settings_map
    }

    pub fn registry(&self) -> StrategyRegistry {
        StrategyRegistry::builtin()
    }

    /// Postgres-backed store when a database URL is configured and
    /// reachable; otherwise an in-memory store so offline work still runs,
    /// with results gone when the process exits.
    pub async fn results_store(&self) -> ResultsStore {
        match self.database_url.as_deref() {
            Some(url) if !url.trim().is_empty() => match Database::new(url).await {
                Ok(db) => match db.initialize_schema().await {
                    Ok(()) => ResultsStore::Postgres(db),
                    Err(error) => {
                        warn!(
                            "Failed to initialize results schema ({}). Using in-memory results store.",
                            error
                        );
                        ResultsStore::in_memory()
                    }
                },
                Err(error) => {
                    warn!(
                        "Database connection unavailable ({}). Using in-memory results store.",
                        error
                    );
                    ResultsStore::in_memory()
                }
            },
            _ => {
                warn!("DATABASE_URL not provided. Using in-memory results store.");
                ResultsStore::in_memory()
            }
        }
    }

    /// Snapshot provider when a data file is given; otherwise the live
    /// provider with the database price cache when one is reachable.
    pub async fn price_provider(&self, data_file: Option<&Path>) -> Result<PriceProvider> {
        if let Some(path) = data_file {
            let table = PriceTable::load_snapshot(path)?;
            return Ok(PriceProvider::from_snapshot(table));
        }

        let cache = match self.database_url.as_deref() {
            Some(url) if !url.trim().is_empty() => match Database::new(url).await {
                Ok(db) => {
                    db.initialize_schema().await?;
                    Some(db)
                }
                Err(error) => {
                    warn!(
                        "Price cache database unavailable ({}). Fetching without a cache.",
                        error
                    );
                    None
                }
            },
            _ => None,
        };
        let fetcher = PriceFetcher::from_settings(&self.settings)?;
        Ok(PriceProvider::live(cache, fetcher))
    }
}
