use anyhow::anyhow;
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::str::FromStr;

/// Target or realized allocation, symbol to fraction of portfolio value.
/// Sorted keys keep trade emission and serialized output deterministic.
pub type WeightVector = BTreeMap<String, f64>;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum TradeAction {
    Buy,
    Sell,
}

impl TradeAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            TradeAction::Buy => "BUY",
            TradeAction::Sell => "SELL",
        }
    }
}

impl FromStr for TradeAction {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_uppercase().as_str() {
            "BUY" => Ok(TradeAction::Buy),
            "SELL" => Ok(TradeAction::Sell),
            other => Err(anyhow!("Unknown trade action '{}'", other)),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Trade {
    pub symbol: String,
    pub action: TradeAction,
    pub quantity: f64,
    pub price: f64,
    pub value: f64,
    pub trade_date: NaiveDate,
}

/// Portfolio state carried by the simulation loop. One instance per run,
/// mutated once per day and once per rebalance, never shared.
#[derive(Debug, Clone)]
pub struct PortfolioState {
    pub portfolio_value: f64,
    pub cash: f64,
    pub weights: WeightVector,
}

impl PortfolioState {
    pub fn new(initial_capital: f64) -> Self {
        Self {
            portfolio_value: initial_capital,
            cash: initial_capital,
            weights: WeightVector::new(),
        }
    }
}

/// One row of the daily value trajectory, appended after every simulated day.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DailyRecord {
    pub date: NaiveDate,
    pub portfolio_value: f64,
    pub cash: f64,
    pub weights: WeightVector,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PerformanceMetrics {
    pub total_return: f64,
    pub annualized_return: f64,
    pub volatility: f64,
    pub sharpe_ratio: f64,
    pub max_drawdown: f64,
    pub calmar_ratio: f64,
    pub win_rate: f64,
    pub profit_factor: f64,
    pub avg_trade_return: f64,
    /// Count of daily return observations, not executed trades. The trade
    /// log carries the executed count; this field keeps the stored-results
    /// meaning it has always had.
    pub num_trades: i32,
}

impl PerformanceMetrics {
    pub fn zeroed() -> Self {
        Self {
            total_return: 0.0,
            annualized_return: 0.0,
            volatility: 0.0,
            sharpe_ratio: 0.0,
            max_drawdown: 0.0,
            calmar_ratio: 0.0,
            win_rate: 0.0,
            profit_factor: 0.0,
            avg_trade_return: 0.0,
            num_trades: 0,
        }
    }
}

/// Full result of one simulation: trajectory, trade log and derived metrics.
/// Handed to the results store and then discarded; the store is the durable
/// owner afterward.
#[derive(Debug, Clone)]
pub struct BacktestRun {
    pub id: String,
    pub strategy_name: String,
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
    pub initial_capital: f64,
    pub final_value: f64,
    pub portfolio_values: Vec<DailyRecord>,
    pub trades: Vec<Trade>,
    pub metrics: PerformanceMetrics,
}

impl BacktestRun {
    pub fn summary(&self) -> BacktestSummary {
        BacktestSummary {
            strategy_name: self.strategy_name.clone(),
            start_date: self.start_date,
            end_date: self.end_date,
            initial_capital: self.initial_capital,
            final_value: self.final_value,
            metrics: self.metrics.clone(),
        }
    }
}

/// What a caller of `run_backtest` gets back.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BacktestSummary {
    pub strategy_name: String,
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
    pub initial_capital: f64,
    pub final_value: f64,
    pub metrics: PerformanceMetrics,
}

/// Stored run summary as read back from the results store.
#[derive(Debug, Clone)]
pub struct RunSummaryRow {
    pub strategy_name: String,
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
    pub metrics: PerformanceMetrics,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum TraceLevel {
    Debug,
    Info,
    Warning,
    Error,
}

impl TraceLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            TraceLevel::Debug => "DEBUG",
            TraceLevel::Info => "INFO",
            TraceLevel::Warning => "WARNING",
            TraceLevel::Error => "ERROR",
        }
    }
}

impl FromStr for TraceLevel {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_uppercase().as_str() {
            "DEBUG" => Ok(TraceLevel::Debug),
            "INFO" => Ok(TraceLevel::Info),
            "WARNING" => Ok(TraceLevel::Warning),
            "ERROR" => Ok(TraceLevel::Error),
            other => Err(anyhow!("Unknown trace level '{}'", other)),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum TraceCategory {
    Backtest,
    Portfolio,
    Rebalance,
    WeightCalc,
    Trade,
    Performance,
}

impl TraceCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            TraceCategory::Backtest => "BACKTEST",
            TraceCategory::Portfolio => "PORTFOLIO",
            TraceCategory::Rebalance => "REBALANCE",
            TraceCategory::WeightCalc => "WEIGHT_CALC",
            TraceCategory::Trade => "TRADE",
            TraceCategory::Performance => "PERFORMANCE",
        }
    }
}

impl FromStr for TraceCategory {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_uppercase().as_str() {
            "BACKTEST" => Ok(TraceCategory::Backtest),
            "PORTFOLIO" => Ok(TraceCategory::Portfolio),
            "REBALANCE" => Ok(TraceCategory::Rebalance),
            "WEIGHT_CALC" => Ok(TraceCategory::WeightCalc),
            "TRADE" => Ok(TraceCategory::Trade),
            "PERFORMANCE" => Ok(TraceCategory::Performance),
            other => Err(anyhow!("Unknown trace category '{}'", other)),
        }
    }
}

/// Structured observability record emitted while a run is in flight.
/// Append-only; a failed write is logged and never aborts the run.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TraceEvent {
    pub strategy_name: String,
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
    pub timestamp: DateTime<Utc>,
    pub level: TraceLevel,
    pub category: TraceCategory,
    pub message: String,
    pub data: Option<Value>,
}
