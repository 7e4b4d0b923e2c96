use chrono::NaiveDate;
use thiserror::Error;

/// Fatal error kinds that abort a single backtest run. Soft conditions
/// (skipped trades, trace write failures, undefined metric denominators)
/// are absorbed where they occur and never surface through this type.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("no price data available for {symbols:?} between {start} and {end}")]
    DataUnavailable {
        symbols: Vec<String>,
        start: NaiveDate,
        end: NaiveDate,
    },
    #[error("strategy '{0}' is not registered")]
    UnknownStrategy(String),
}
