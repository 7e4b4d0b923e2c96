pub mod backtest;
pub mod backtest_all;
pub mod export_prices;
pub mod summary;
pub mod traces;

use anyhow::{anyhow, Result};
use chrono::NaiveDate;

/// Dates cross the CLI boundary as ISO `YYYY-MM-DD` strings.
pub(crate) fn parse_date(raw: &str, label: &str) -> Result<NaiveDate> {
    raw.trim()
        .parse::<NaiveDate>()
        .map_err(|_| anyhow!("{} must be a YYYY-MM-DD date (value: {})", label, raw))
}

pub(crate) fn parse_date_range(start_raw: &str, end_raw: &str) -> Result<(NaiveDate, NaiveDate)> {
    let start = parse_date(start_raw, "start date")?;
    let end = parse_date(end_raw, "end date")?;
    if end < start {
        return Err(anyhow!(
            "end date {} must not be before start date {}",
            end,
            start
        ));
    }
    Ok((start, end))
}

pub(crate) fn validate_initial_capital(initial_capital: f64) -> Result<f64> {
    if !initial_capital.is_finite() || initial_capital <= 0.0 {
        return Err(anyhow!(
            "initial capital must be positive (value: {})",
            initial_capital
        ));
    }
    Ok(initial_capital)
}
