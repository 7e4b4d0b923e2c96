use crate::rebalance::DEFAULT_MIN_TRADE_VALUE;
use anyhow::{anyhow, Result};
use log::warn;
use std::collections::HashMap;
use std::env;

pub const DEFAULT_INITIAL_CAPITAL: f64 = 100_000.0;

const DEFAULT_FETCH_MAX_RETRIES: u32 = 3;
const DEFAULT_FETCH_RETRY_DELAY_MS: u64 = 1_000;
const DEFAULT_FETCH_RATE_LIMIT_MS: u64 = 500;

const SETTING_KEYS: [&str; 6] = [
    "BACKTEST_INITIAL_CAPITAL",
    "MIN_TRADE_VALUE",
    "PRICE_API_BASE_URL",
    "PRICE_FETCH_MAX_RETRIES",
    "PRICE_FETCH_RATE_LIMIT_MS",
    "PRICE_FETCH_RETRY_DELAY_MS",
];

/// Runtime knobs for the engine, resolved from a flat settings map. The map
/// is assembled from the process environment by default; hosts embedding the
/// engine can hand in their own.
#[derive(Debug, Clone)]
pub struct EngineSettings {
    pub min_trade_value: f64,
    pub fetch_max_retries: u32,
    pub fetch_retry_delay_ms: u64,
    pub fetch_rate_limit_ms: u64,
    pub price_api_base_url: Option<String>,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            min_trade_value: DEFAULT_MIN_TRADE_VALUE,
            fetch_max_retries: DEFAULT_FETCH_MAX_RETRIES,
            fetch_retry_delay_ms: DEFAULT_FETCH_RETRY_DELAY_MS,
            fetch_rate_limit_ms: DEFAULT_FETCH_RATE_LIMIT_MS,
            price_api_base_url: None,
        }
    }
}

impl EngineSettings {
    pub fn from_settings_map(settings: &HashMap<String, String>) -> Result<Self> {
        let min_trade_value =
            setting_f64(settings, "MIN_TRADE_VALUE", DEFAULT_MIN_TRADE_VALUE, 0.0)?;
        let fetch_max_retries =
            setting_u64(settings, "PRICE_FETCH_MAX_RETRIES", DEFAULT_FETCH_MAX_RETRIES as u64)?
                as u32;
        let fetch_retry_delay_ms = setting_u64(
            settings,
            "PRICE_FETCH_RETRY_DELAY_MS",
            DEFAULT_FETCH_RETRY_DELAY_MS,
        )?;
        let fetch_rate_limit_ms = setting_u64(
            settings,
            "PRICE_FETCH_RATE_LIMIT_MS",
            DEFAULT_FETCH_RATE_LIMIT_MS,
        )?;
        let price_api_base_url = settings
            .get("PRICE_API_BASE_URL")
            .map(|value| value.trim().trim_end_matches('/').to_string())
            .filter(|value| !value.is_empty());

        Ok(Self {
            min_trade_value,
            fetch_max_retries,
            fetch_retry_delay_ms,
            fetch_rate_limit_ms,
            price_api_base_url,
        })
    }

    pub fn from_env() -> Result<Self> {
        Self::from_settings_map(&settings_from_env())
    }
}

/// Collect the known setting keys from the process environment.
pub fn settings_from_env() -> HashMap<String, String> {
    let mut settings = HashMap::new();
    for key in SETTING_KEYS {
        if let Ok(value) = env::var(key) {
            if !value.trim().is_empty() {
                settings.insert(key.to_string(), value);
            }
        }
    }
    settings
}

/// Starting capital for runs that do not specify one. Falls back to the
/// default with a warning when the configured value does not parse.
pub fn resolve_initial_capital(settings: &HashMap<String, String>) -> f64 {
    let Some(raw) = settings.get("BACKTEST_INITIAL_CAPITAL") else {
        return DEFAULT_INITIAL_CAPITAL;
    };
    match raw.trim().parse::<f64>() {
        Ok(value) if value.is_finite() && value > 0.0 => value,
        _ => {
            warn!(
                "Ignoring invalid BACKTEST_INITIAL_CAPITAL value '{}'; using {}",
                raw, DEFAULT_INITIAL_CAPITAL
            );
            DEFAULT_INITIAL_CAPITAL
        }
    }
}

fn setting_f64(
    settings: &HashMap<String, String>,
    key: &str,
    default: f64,
    min: f64,
) -> Result<f64> {
    let Some(raw) = settings.get(key) else {
        return Ok(default);
    };
    let value = raw
        .trim()
        .parse::<f64>()
        .map_err(|_| anyhow!("{} must be a number (value: {})", key, raw))?;
    if !value.is_finite() || value < min {
        return Err(anyhow!("{} must be >= {} (value: {})", key, min, raw));
    }
    Ok(value)
}

fn setting_u64(settings: &HashMap<String, String>, key: &str, default: u64) -> Result<u64> {
    let Some(raw) = settings.get(key) else {
        return Ok(default);
    };
    raw.trim()
        .parse::<u64>()
        .map_err(|_| anyhow!("{} must be a non-negative integer (value: {})", key, raw))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_apply_when_map_is_empty() {
        let settings = EngineSettings::from_settings_map(&HashMap::new()).unwrap();
        assert_eq!(settings.min_trade_value, DEFAULT_MIN_TRADE_VALUE);
        assert_eq!(settings.fetch_max_retries, DEFAULT_FETCH_MAX_RETRIES);
        assert!(settings.price_api_base_url.is_none());
    }

    #[test]
    fn configured_values_override_defaults() {
        let mut map = HashMap::new();
        map.insert("MIN_TRADE_VALUE".to_string(), "25.0".to_string());
        map.insert(
            "PRICE_API_BASE_URL".to_string(),
            "https://prices.example.com/".to_string(),
        );
        let settings = EngineSettings::from_settings_map(&map).unwrap();
        assert_eq!(settings.min_trade_value, 25.0);
        assert_eq!(
            settings.price_api_base_url.as_deref(),
            Some("https://prices.example.com")
        );
    }

    #[test]
    fn negative_deadband_is_rejected() {
        let mut map = HashMap::new();
        map.insert("MIN_TRADE_VALUE".to_string(), "-1".to_string());
        assert!(EngineSettings::from_settings_map(&map).is_err());
    }

    #[test]
    fn invalid_initial_capital_falls_back_to_default() {
        let mut map = HashMap::new();
        map.insert(
            "BACKTEST_INITIAL_CAPITAL".to_string(),
            "not-a-number".to_string(),
        );
        assert_eq!(resolve_initial_capital(&map), DEFAULT_INITIAL_CAPITAL);
        map.insert("BACKTEST_INITIAL_CAPITAL".to_string(), "250000".to_string());
        assert_eq!(resolve_initial_capital(&map), 250_000.0);
    }
}
