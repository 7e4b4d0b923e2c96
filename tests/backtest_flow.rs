use anyhow::Result;
use chrono::{Duration, NaiveDate};
use portfolio_engine::backtester::Backtester;
use portfolio_engine::config::EngineSettings;
use portfolio_engine::database::Database;
use portfolio_engine::market_data::PriceTable;
use portfolio_engine::models::{PerformanceMetrics, TraceCategory};
use portfolio_engine::provider::PriceProvider;
use portfolio_engine::status::BacktestStatus;
use portfolio_engine::store::ResultsStore;
use portfolio_engine::strategy::StrategyRegistry;
use std::collections::BTreeMap;
use uuid::Uuid;

const SIM_DAYS: usize = 300;

fn start_date() -> NaiveDate {
    "2023-01-02".parse().unwrap()
}

fn end_date() -> NaiveDate {
    start_date() + Duration::days(SIM_DAYS as i64 - 1)
}

/// Deterministic daily closes for every asset the bundled strategies use.
/// Each symbol oscillates with its own amplitude and drift so covariances,
/// trends and drawdowns are all non-degenerate.
fn sample_price_table() -> PriceTable {
    let specs: [(&str, f64, f64, f64); 8] = [
        ("TQQQ", 100.0, 0.030, 0.0008),
        ("TMF", 60.0, 0.010, 0.0001),
        ("DBMF", 30.0, 0.006, 0.0002),
        ("IAU", 40.0, 0.005, 0.0003),
        ("SGOV", 100.0, 0.0002, 0.0001),
        ("PDBC", 20.0, 0.007, 0.0002),
        ("SVOL", 22.0, 0.008, 0.0001),
        ("TAIL", 15.0, 0.004, -0.0002),
    ];
    let mut columns = BTreeMap::new();
    for (symbol, base, amplitude, drift) in specs {
        let mut series = BTreeMap::new();
        let mut price = base;
        for offset in 0..SIM_DAYS {
            let day = start_date() + Duration::days(offset as i64);
            // Period-7 oscillation staggered per symbol keeps pairs from
            // being perfectly correlated.
            let phase = (offset + symbol.len()) % 7;
            let swing = match phase {
                0 | 1 => amplitude,
                2 => 0.0,
                3 | 4 => -amplitude,
                _ => amplitude / 2.0,
            };
            price *= 1.0 + swing + drift;
            series.insert(day, price);
        }
        columns.insert(symbol.to_string(), series);
    }
    PriceTable::from_columns(&columns)
}

fn snapshot_provider() -> PriceProvider {
    PriceProvider::from_snapshot(sample_price_table())
}

#[tokio::test]
async fn single_strategy_run_persists_all_streams() -> Result<()> {
    let mut store = ResultsStore::in_memory();
    let mut provider = snapshot_provider();
    let registry = StrategyRegistry::builtin();
    let status = BacktestStatus::new();

    let summary = {
        let mut backtester = Backtester::new(
            &mut store,
            &mut provider,
            &registry,
            EngineSettings::default(),
            &status,
        );
        backtester
            .run_backtest("risk_parity", start_date(), end_date(), 100_000.0)
            .await?
    };

    assert_eq!(summary.strategy_name, "risk_parity");
    assert_eq!(summary.start_date, start_date());
    assert_eq!(summary.end_date, end_date());
    assert!(summary.final_value.is_finite());

    let summaries = store.results_summary().await?;
    assert_eq!(summaries.len(), 1);
    assert_eq!(summaries[0].metrics, summary.metrics);

    let daily = store.portfolio_values_for("risk_parity").await?;
    assert_eq!(daily.len(), SIM_DAYS);
    // Return observations are trajectory points minus one.
    assert_eq!(summary.metrics.num_trades as usize, SIM_DAYS - 1);
    for record in &daily {
        let total: f64 = record.weights.values().sum();
        assert!(
            (total - 1.0).abs() < 1e-6,
            "weights on {} sum to {}",
            record.date,
            total
        );
    }

    let trades = store.trades_for("risk_parity").await?;
    assert!(!trades.is_empty());
    assert!(trades.iter().any(|t| t.trade_date == start_date()));

    let traces = store.traces_for("risk_parity", None).await?;
    assert!(!traces.is_empty());
    assert!(traces
        .iter()
        .any(|e| e.category == TraceCategory::Backtest));
    assert!(traces
        .iter()
        .any(|e| e.category == TraceCategory::Performance));
    assert!(traces
        .iter()
        .any(|e| e.category == TraceCategory::Rebalance));
    Ok(())
}

#[tokio::test]
async fn rerunning_the_same_window_does_not_duplicate_rows() -> Result<()> {
    let mut store = ResultsStore::in_memory();
    let mut provider = snapshot_provider();
    let registry = StrategyRegistry::builtin();
    let status = BacktestStatus::new();

    for _ in 0..2 {
        let mut backtester = Backtester::new(
            &mut store,
            &mut provider,
            &registry,
            EngineSettings::default(),
            &status,
        );
        backtester
            .run_backtest("risk_parity", start_date(), end_date(), 100_000.0)
            .await?;
    }

    assert_eq!(store.results_summary().await?.len(), 1);
    assert_eq!(
        store.portfolio_values_for("risk_parity").await?.len(),
        SIM_DAYS
    );
    let first_run_trades = store.trades_for("risk_parity").await?.len();

    // A third run still adds nothing.
    {
        let mut backtester = Backtester::new(
            &mut store,
            &mut provider,
            &registry,
            EngineSettings::default(),
            &status,
        );
        backtester
            .run_backtest("risk_parity", start_date(), end_date(), 100_000.0)
            .await?;
    }
    assert_eq!(store.trades_for("risk_parity").await?.len(), first_run_trades);
    Ok(())
}

#[tokio::test]
async fn batch_run_records_errors_without_aborting() -> Result<()> {
    let mut store = ResultsStore::in_memory();
    let mut provider = snapshot_provider();
    let registry = StrategyRegistry::builtin();
    let status = BacktestStatus::new();

    let names = vec!["risk_parity".to_string(), "made_up_strategy".to_string()];
    let outcomes = {
        let mut backtester = Backtester::new(
            &mut store,
            &mut provider,
            &registry,
            EngineSettings::default(),
            &status,
        );
        backtester
            .run_all_strategies(Some(&names), start_date(), end_date(), 100_000.0)
            .await
    };

    assert_eq!(outcomes.len(), 2);
    let valid = outcomes["risk_parity"].as_ref().expect("valid strategy runs");
    assert!(valid.final_value.is_finite());
    let error = outcomes["made_up_strategy"]
        .as_ref()
        .expect_err("unknown strategy is an error");
    assert!(error.contains("not registered"));

    let snapshot = status.snapshot();
    assert_eq!(snapshot.total_runs, 1);
    assert_eq!(snapshot.failed_runs, 1);
    Ok(())
}

#[tokio::test]
async fn batch_run_covers_every_registered_strategy() -> Result<()> {
    let mut store = ResultsStore::in_memory();
    let mut provider = snapshot_provider();
    let registry = StrategyRegistry::builtin();
    let status = BacktestStatus::new();

    let outcomes = {
        let mut backtester = Backtester::new(
            &mut store,
            &mut provider,
            &registry,
            EngineSettings::default(),
            &status,
        );
        backtester
            .run_all_strategies(None, start_date(), end_date(), 100_000.0)
            .await
    };

    assert_eq!(outcomes.len(), registry.len());
    for (name, outcome) in &outcomes {
        let summary = outcome
            .as_ref()
            .unwrap_or_else(|error| panic!("{} failed: {}", name, error));
        assert!(summary.final_value.is_finite());
    }
    assert_eq!(store.results_summary().await?.len(), registry.len());
    Ok(())
}

#[tokio::test]
async fn missing_price_data_is_fatal_for_the_run() {
    let mut store = ResultsStore::in_memory();
    let mut provider = snapshot_provider();
    let registry = StrategyRegistry::builtin();
    let status = BacktestStatus::new();

    let far_future: NaiveDate = "2031-01-01".parse().unwrap();
    let error = {
        let mut backtester = Backtester::new(
            &mut store,
            &mut provider,
            &registry,
            EngineSettings::default(),
            &status,
        );
        backtester
            .run_backtest(
                "risk_parity",
                far_future,
                far_future + Duration::days(90),
                100_000.0,
            )
            .await
            .unwrap_err()
    };
    assert!(error.to_string().contains("no price data available"));
}

/// Exercises the relational store when a test database is configured.
/// Skipped silently otherwise, so the suite stays runnable offline.
#[tokio::test]
async fn postgres_store_round_trip_when_database_configured() -> Result<()> {
    dotenvy::dotenv().ok();
    let Ok(database_url) = std::env::var("DATABASE_URL") else {
        eprintln!("DATABASE_URL not set; skipping postgres round-trip test");
        return Ok(());
    };

    let db = Database::new(&database_url).await?;
    db.initialize_schema().await?;

    let strategy_name = format!("it_strategy_{}", Uuid::new_v4().simple());
    let (start, end) = (start_date(), end_date());
    let metrics = PerformanceMetrics {
        total_return: 0.12,
        annualized_return: 0.10,
        volatility: 0.18,
        sharpe_ratio: 0.55,
        max_drawdown: -0.07,
        calmar_ratio: 1.4,
        win_rate: 0.54,
        profit_factor: 1.8,
        avg_trade_return: 0.0004,
        num_trades: 299,
    };

    db.insert_run_summary(&strategy_name, start, end, &metrics)
        .await?;
    db.insert_run_summary(&strategy_name, start, end, &metrics)
        .await?;

    let rows: Vec<_> = db
        .results_summary()
        .await?
        .into_iter()
        .filter(|row| row.strategy_name == strategy_name)
        .collect();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].metrics, metrics);
    Ok(())
}
