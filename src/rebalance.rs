use crate::models::{Trade, TradeAction, WeightVector};
use crate::strategy_utils::normalize_weights;
use chrono::NaiveDate;
use log::warn;
use std::collections::BTreeMap;

/// Deadband below which a weight delta is noise, not a trade. One currency
/// unit by default; overridable through `MIN_TRADE_VALUE`.
pub const DEFAULT_MIN_TRADE_VALUE: f64 = 1.0;

#[derive(Debug, Clone)]
pub struct SkippedTrade {
    pub symbol: String,
    pub trade_value: f64,
}

#[derive(Debug, Clone)]
pub struct RebalanceOutcome {
    pub portfolio_value: f64,
    pub cash: f64,
    pub weights: WeightVector,
    pub trades: Vec<Trade>,
    pub skipped: Vec<SkippedTrade>,
}

/// Convert a target allocation into discrete trades against today's prices.
///
/// Only assets named by the target are touched. Each trade moves the asset
/// from its current dollar value to its target dollar value; deltas inside
/// the deadband are dropped. Assets without a quote on the trade date are
/// skipped and reported rather than failing the rebalance. The returned
/// weights carry exactly the traded assets, renormalized to sum to one.
///
/// Callers are responsible for handing in a sane positive portfolio value;
/// zero and negative values are not guarded here.
pub fn execute_rebalance(
    portfolio_value: f64,
    cash: f64,
    current_weights: &WeightVector,
    target_weights: &WeightVector,
    prices: &BTreeMap<String, f64>,
    trade_date: NaiveDate,
    min_trade_value: f64,
) -> RebalanceOutcome {
    let mut trades = Vec::new();
    let mut skipped = Vec::new();
    let mut new_weights = WeightVector::new();
    let mut cash = cash;

    for (symbol, target_weight) in target_weights {
        let target_value = target_weight * portfolio_value;
        let current_value = current_weights.get(symbol).copied().unwrap_or(0.0) * portfolio_value;
        let trade_value = target_value - current_value;

        if trade_value.abs() <= min_trade_value {
            continue;
        }

        let Some(price) = prices.get(symbol).copied() else {
            warn!("No price available for {} on {}", symbol, trade_date);
            skipped.push(SkippedTrade {
                symbol: symbol.clone(),
                trade_value,
            });
            continue;
        };

        let quantity = trade_value / price;
        trades.push(Trade {
            symbol: symbol.clone(),
            action: if quantity > 0.0 {
                TradeAction::Buy
            } else {
                TradeAction::Sell
            },
            quantity: quantity.abs(),
            price,
            value: trade_value.abs(),
            trade_date,
        });

        if quantity > 0.0 {
            cash -= trade_value.abs();
        } else {
            cash += trade_value.abs();
        }

        new_weights.insert(symbol.clone(), target_value / portfolio_value);
    }

    normalize_weights(&mut new_weights);

    RebalanceOutcome {
        portfolio_value,
        cash,
        weights: new_weights,
        trades,
        skipped,
    }
}
