use crate::config::EngineSettings;
use crate::error::EngineError;
use crate::market_data::PriceTable;
use crate::models::{
    BacktestRun, DailyRecord, PortfolioState, TraceCategory, TraceLevel, WeightVector,
};
use crate::performance::PerformanceCalculator;
use crate::rebalance::execute_rebalance;
use crate::strategy::Strategy;
use crate::trace::TraceLog;
use anyhow::Result;
use chrono::NaiveDate;
use log::warn;
use serde_json::json;
use uuid::Uuid;

/// Run one strategy over the price table, day by day, and produce the full
/// trajectory with trades and derived metrics.
///
/// The simulated calendar is the intersection of the requested range with
/// the dates actually present in the table; data gaps stay gaps, which
/// keeps annualization on a trading-day basis. Each day the strategy sees
/// only the price history up to and including that day. The rebalance
/// decision for a day is taken before that day's revaluation, using the
/// weights that were in effect beforehand.
///
/// Revaluation carries weight fractions against the rolling portfolio value
/// rather than repricing per-asset share counts; between rebalances the
/// trajectory therefore moves only through allocation changes and the cash
/// residual.
pub fn simulate(
    strategy: &dyn Strategy,
    prices: &PriceTable,
    start_date: NaiveDate,
    end_date: NaiveDate,
    initial_capital: f64,
    settings: &EngineSettings,
    trace: &mut TraceLog,
) -> Result<BacktestRun> {
    let dates: Vec<NaiveDate> = prices
        .dates()
        .iter()
        .copied()
        .filter(|date| *date >= start_date && *date <= end_date)
        .collect();
    if prices.is_empty() || dates.is_empty() {
        return Err(EngineError::DataUnavailable {
            symbols: strategy.assets().to_vec(),
            start: start_date,
            end: end_date,
        }
        .into());
    }

    let mut state = PortfolioState::new(initial_capital);
    let mut portfolio_values: Vec<DailyRecord> = Vec::with_capacity(dates.len());
    let mut trades = Vec::new();

    trace.record(
        TraceLevel::Info,
        TraceCategory::Portfolio,
        format!("Initializing portfolio with ${:.2}", initial_capital),
        Some(json!({
            "initialCapital": initial_capital,
            "assets": strategy.assets(),
        })),
    );

    for (i, date) in dates.iter().copied().enumerate() {
        let view = prices.up_to(date);
        let current_prices = view.prices_on(date);

        let mut target_weights: Option<WeightVector> = None;
        let should_rebalance = if i == 0 {
            trace.record(
                TraceLevel::Info,
                TraceCategory::Rebalance,
                format!("First day rebalancing on {}", date),
                Some(json!({
                    "date": date.to_string(),
                    "portfolioValue": state.portfolio_value,
                })),
            );
            true
        } else {
            let target = strategy.calculate_weights(&view)?;
            let triggered = strategy.should_rebalance(&state.weights, &target);
            if triggered {
                trace.record(
                    TraceLevel::Info,
                    TraceCategory::Rebalance,
                    format!("Drift-based rebalancing triggered on {}", date),
                    Some(json!({
                        "date": date.to_string(),
                        "currentWeights": state.weights,
                        "targetWeights": target,
                        "portfolioValue": state.portfolio_value,
                    })),
                );
            }
            target_weights = Some(target);
            triggered
        };

        if should_rebalance {
            let target = match target_weights {
                Some(target) => target,
                None => strategy.calculate_weights(&view)?,
            };
            trace.record(
                TraceLevel::Debug,
                TraceCategory::WeightCalc,
                format!("Calculated target weights for {}", date),
                Some(json!({
                    "date": date.to_string(),
                    "targetWeights": target,
                    "portfolioValue": state.portfolio_value,
                })),
            );

            let outcome = execute_rebalance(
                state.portfolio_value,
                state.cash,
                &state.weights,
                &target,
                &current_prices,
                date,
                settings.min_trade_value,
            );
            for skip in &outcome.skipped {
                warn!(
                    "Skipping trade for {} on {}: no price available",
                    skip.symbol, date
                );
                trace.record(
                    TraceLevel::Warning,
                    TraceCategory::Trade,
                    format!("Trade skipped for {}: no price available", skip.symbol),
                    Some(json!({
                        "date": date.to_string(),
                        "symbol": skip.symbol,
                        "tradeValue": skip.trade_value,
                    })),
                );
            }

            state.portfolio_value = outcome.portfolio_value;
            state.cash = outcome.cash;
            state.weights = outcome.weights;

            trace.record(
                TraceLevel::Info,
                TraceCategory::Trade,
                format!("Executed {} trades on {}", outcome.trades.len(), date),
                Some(json!({
                    "date": date.to_string(),
                    "numTrades": outcome.trades.len(),
                    "trades": &outcome.trades,
                    "newPortfolioValue": state.portfolio_value,
                    "cash": state.cash,
                })),
            );
            trades.extend(outcome.trades);
        }

        if !state.weights.is_empty() {
            let allocated: f64 = state
                .weights
                .values()
                .map(|weight| weight * state.portfolio_value)
                .sum();
            state.portfolio_value = allocated + state.cash;
        }

        portfolio_values.push(DailyRecord {
            date,
            portfolio_value: state.portfolio_value,
            cash: state.cash,
            weights: state.weights.clone(),
        });
    }

    let values: Vec<f64> = portfolio_values
        .iter()
        .map(|record| record.portfolio_value)
        .collect();
    let returns = PerformanceCalculator::daily_returns(&values);
    let metrics = PerformanceCalculator::calculate(
        &returns,
        values.first().copied().unwrap_or(initial_capital),
        values.last().copied().unwrap_or(initial_capital),
    );

    trace.record(
        TraceLevel::Info,
        TraceCategory::Performance,
        format!("Backtest completed with {} trades", trades.len()),
        Some(json!({
            "finalPortfolioValue": state.portfolio_value,
            "totalReturn": metrics.total_return,
            "sharpeRatio": metrics.sharpe_ratio,
            "maxDrawdown": metrics.max_drawdown,
            "numTrades": trades.len(),
        })),
    );

    Ok(BacktestRun {
        id: Uuid::new_v4().to_string(),
        strategy_name: strategy.name().to_string(),
        start_date,
        end_date,
        initial_capital,
        final_value: state.portfolio_value,
        portfolio_values,
        trades,
        metrics,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::market_data::PriceView;
    use crate::models::TraceCategory;
    use crate::strategy_utils::drift_exceeded;
    use std::collections::BTreeMap;

    /// Holds a fixed allocation; rebalances when drift exceeds the band.
    #[derive(Debug)]
    struct FixedWeights {
        name: String,
        assets: Vec<String>,
        targets: WeightVector,
        drift_band: f64,
    }

    impl FixedWeights {
        fn new(targets: &[(&str, f64)], drift_band: f64) -> Self {
            Self {
                name: "fixed_weights".to_string(),
                assets: targets.iter().map(|(s, _)| s.to_string()).collect(),
                targets: targets
                    .iter()
                    .map(|(s, w)| (s.to_string(), *w))
                    .collect(),
                drift_band,
            }
        }
    }

    impl Strategy for FixedWeights {
        fn name(&self) -> &str {
            &self.name
        }

        fn assets(&self) -> &[String] {
            &self.assets
        }

        fn calculate_weights(&self, _data: &PriceView<'_>) -> Result<WeightVector> {
            Ok(self.targets.clone())
        }

        fn should_rebalance(&self, current: &WeightVector, target: &WeightVector) -> bool {
            drift_exceeded(current, target, &self.assets, self.drift_band)
        }
    }

    fn date(s: &str) -> NaiveDate {
        s.parse().unwrap()
    }

    fn constant_price_table(symbol: &str, price: f64, days: usize) -> PriceTable {
        let mut series = BTreeMap::new();
        let start = date("2024-01-01");
        for offset in 0..days {
            series.insert(
                start + chrono::Duration::days(offset as i64),
                price,
            );
        }
        let mut columns = BTreeMap::new();
        columns.insert(symbol.to_string(), series);
        PriceTable::from_columns(&columns)
    }

    fn run_flat_market() -> BacktestRun {
        let table = constant_price_table("SPY", 100.0, 10);
        let strategy = FixedWeights::new(&[("SPY", 1.0)], 0.10);
        let mut trace = TraceLog::new("fixed_weights", date("2024-01-01"), date("2024-01-10"));
        simulate(
            &strategy,
            &table,
            date("2024-01-01"),
            date("2024-01-10"),
            100_000.0,
            &EngineSettings::default(),
            &mut trace,
        )
        .unwrap()
    }

    #[test]
    fn flat_market_produces_zero_metrics() {
        let run = run_flat_market();
        assert_eq!(run.metrics.total_return, 0.0);
        assert_eq!(run.metrics.volatility, 0.0);
        assert_eq!(run.metrics.sharpe_ratio, 0.0);
        assert_eq!(run.metrics.max_drawdown, 0.0);
        assert!((run.final_value - 100_000.0).abs() < 1e-9);
        assert_eq!(run.portfolio_values.len(), 10);
        // Nine return observations from ten trajectory points.
        assert_eq!(run.metrics.num_trades, 9);
    }

    #[test]
    fn first_day_always_rebalances_and_later_flat_days_do_not() {
        let run = run_flat_market();
        assert_eq!(run.trades.len(), 1);
        assert_eq!(run.trades[0].trade_date, date("2024-01-01"));
        for record in &run.portfolio_values {
            assert!((record.weights.values().sum::<f64>() - 1.0).abs() < 1e-6);
        }
    }

    #[test]
    fn empty_price_table_is_fatal() {
        let table = PriceTable::empty();
        let strategy = FixedWeights::new(&[("SPY", 1.0)], 0.10);
        let mut trace = TraceLog::new("fixed_weights", date("2024-01-01"), date("2024-01-10"));
        let error = simulate(
            &strategy,
            &table,
            date("2024-01-01"),
            date("2024-01-10"),
            100_000.0,
            &EngineSettings::default(),
            &mut trace,
        )
        .unwrap_err();
        assert!(matches!(
            error.downcast_ref::<EngineError>(),
            Some(EngineError::DataUnavailable { .. })
        ));
    }

    #[test]
    fn date_range_outside_the_table_is_fatal() {
        let table = constant_price_table("SPY", 100.0, 5);
        let strategy = FixedWeights::new(&[("SPY", 1.0)], 0.10);
        let mut trace = TraceLog::new("fixed_weights", date("2030-01-01"), date("2030-02-01"));
        let error = simulate(
            &strategy,
            &table,
            date("2030-01-01"),
            date("2030-02-01"),
            100_000.0,
            &EngineSettings::default(),
            &mut trace,
        )
        .unwrap_err();
        assert!(matches!(
            error.downcast_ref::<EngineError>(),
            Some(EngineError::DataUnavailable { .. })
        ));
    }

    #[test]
    fn data_gaps_shrink_the_simulated_calendar() {
        let mut series = BTreeMap::new();
        for day in ["2024-01-01", "2024-01-02", "2024-01-09", "2024-01-10"] {
            series.insert(date(day), 100.0);
        }
        let mut columns = BTreeMap::new();
        columns.insert("SPY".to_string(), series);
        let table = PriceTable::from_columns(&columns);

        let strategy = FixedWeights::new(&[("SPY", 1.0)], 0.10);
        let mut trace = TraceLog::new("fixed_weights", date("2024-01-01"), date("2024-01-10"));
        let run = simulate(
            &strategy,
            &table,
            date("2024-01-01"),
            date("2024-01-10"),
            100_000.0,
            &EngineSettings::default(),
            &mut trace,
        )
        .unwrap();
        assert_eq!(run.portfolio_values.len(), 4);
        assert_eq!(run.metrics.num_trades, 3);
    }

    #[test]
    fn truncating_future_rows_does_not_change_past_output() {
        // Prices that drift enough to trigger mid-run rebalances.
        let mut aaa = BTreeMap::new();
        let mut bbb = BTreeMap::new();
        let start = date("2024-01-01");
        for offset in 0..20i64 {
            let day = start + chrono::Duration::days(offset);
            aaa.insert(day, 100.0 + 3.0 * offset as f64);
            bbb.insert(day, 100.0 - 2.0 * offset as f64);
        }
        let mut columns = BTreeMap::new();
        columns.insert("AAA".to_string(), aaa);
        columns.insert("BBB".to_string(), bbb);
        let table = PriceTable::from_columns(&columns);

        // Allocation tilts with realized momentum so targets keep moving
        // and mid-run rebalances actually happen.
        #[derive(Debug)]
        struct MomentumTilt {
            name: String,
            assets: Vec<String>,
        }
        impl Strategy for MomentumTilt {
            fn name(&self) -> &str {
                &self.name
            }
            fn assets(&self) -> &[String] {
                &self.assets
            }
            fn calculate_weights(&self, data: &PriceView<'_>) -> Result<WeightVector> {
                let closes = data.closes("AAA");
                let tilt = if closes.len() >= 2 {
                    let window = &closes[closes.len().saturating_sub(5)..];
                    (window.last().unwrap() / window.first().unwrap() - 1.0).clamp(-0.3, 0.3)
                } else {
                    0.0
                };
                let a = 0.5 + tilt;
                Ok([("AAA".to_string(), a), ("BBB".to_string(), 1.0 - a)]
                    .into_iter()
                    .collect())
            }
            fn should_rebalance(&self, current: &WeightVector, target: &WeightVector) -> bool {
                drift_exceeded(current, target, &self.assets, 0.01)
            }
        }

        let strategy = MomentumTilt {
            name: "momentum_tilt".to_string(),
            assets: vec!["AAA".to_string(), "BBB".to_string()],
        };
        let cutoff = date("2024-01-10");

        let mut trace_full = TraceLog::new("fixed_weights", start, date("2024-01-20"));
        let full = simulate(
            &strategy,
            &table,
            start,
            date("2024-01-20"),
            100_000.0,
            &EngineSettings::default(),
            &mut trace_full,
        )
        .unwrap();

        let truncated_table = table.restrict(start, cutoff);
        let mut trace_cut = TraceLog::new("fixed_weights", start, cutoff);
        let truncated = simulate(
            &strategy,
            &truncated_table,
            start,
            cutoff,
            100_000.0,
            &EngineSettings::default(),
            &mut trace_cut,
        )
        .unwrap();

        for (full_record, cut_record) in full
            .portfolio_values
            .iter()
            .zip(truncated.portfolio_values.iter())
        {
            assert_eq!(full_record, cut_record);
        }
        let full_trades_prefix: Vec<_> = full
            .trades
            .iter()
            .filter(|t| t.trade_date <= cutoff)
            .collect();
        assert_eq!(full_trades_prefix.len(), truncated.trades.len());
    }

    #[test]
    fn drift_breach_triggers_exactly_one_rebalance_event() {
        #[derive(Debug)]
        struct Flipping {
            name: String,
            assets: Vec<String>,
            drift_band: f64,
        }
        impl Strategy for Flipping {
            fn name(&self) -> &str {
                &self.name
            }
            fn assets(&self) -> &[String] {
                &self.assets
            }
            fn calculate_weights(&self, data: &PriceView<'_>) -> Result<WeightVector> {
                // Flip the allocation once five days of history exist.
                let (a, b) = if data.len() >= 5 { (0.2, 0.8) } else { (0.8, 0.2) };
                Ok([
                    ("AAA".to_string(), a),
                    ("BBB".to_string(), b),
                ]
                .into_iter()
                .collect())
            }
            fn should_rebalance(&self, current: &WeightVector, target: &WeightVector) -> bool {
                drift_exceeded(current, target, &self.assets, self.drift_band)
            }
        }

        let mut aaa = BTreeMap::new();
        let mut bbb = BTreeMap::new();
        let start = date("2024-01-01");
        for offset in 0..8i64 {
            let day = start + chrono::Duration::days(offset);
            aaa.insert(day, 50.0);
            bbb.insert(day, 20.0);
        }
        let mut columns = BTreeMap::new();
        columns.insert("AAA".to_string(), aaa);
        columns.insert("BBB".to_string(), bbb);
        let table = PriceTable::from_columns(&columns);

        let strategy = Flipping {
            name: "flipping".to_string(),
            assets: vec!["AAA".to_string(), "BBB".to_string()],
            drift_band: 0.10,
        };
        let mut trace = TraceLog::new("flipping", start, date("2024-01-08"));
        let run = simulate(
            &strategy,
            &table,
            start,
            date("2024-01-08"),
            100_000.0,
            &EngineSettings::default(),
            &mut trace,
        )
        .unwrap();

        let drift_events: Vec<_> = trace
            .events()
            .iter()
            .filter(|e| {
                e.category == TraceCategory::Rebalance
                    && e.message.starts_with("Drift-based rebalancing")
            })
            .collect();
        assert_eq!(drift_events.len(), 1);

        // The flip sells 60 points of AAA and buys 60 points of BBB.
        let flip_trades: Vec<_> = run
            .trades
            .iter()
            .filter(|t| t.trade_date == date("2024-01-05"))
            .collect();
        assert_eq!(flip_trades.len(), 2);
        let gross: f64 = flip_trades.iter().map(|t| t.value).sum();
        assert!((gross - 120_000.0).abs() < 1e-6);
        let signed: f64 = flip_trades
            .iter()
            .map(|t| match t.action {
                crate::models::TradeAction::Buy => t.value,
                crate::models::TradeAction::Sell => -t.value,
            })
            .sum();
        assert!(signed.abs() < 1e-6);
    }
}
