use crate::backtester::Backtester;
use crate::commands::{parse_date_range, validate_initial_capital};
use crate::config::resolve_initial_capital;
use crate::context::AppContext;
use crate::status::BacktestStatus;
use anyhow::Result;
use std::path::Path;

pub async fn run(
    app: &AppContext,
    strategies: &[String],
    start_date_raw: &str,
    end_date_raw: &str,
    initial_capital: Option<f64>,
    data_file: Option<&Path>,
) -> Result<()> {
    let (start_date, end_date) = parse_date_range(start_date_raw, end_date_raw)?;
    let initial_capital = validate_initial_capital(
        initial_capital.unwrap_or_else(|| resolve_initial_capital(app.settings_map())),
    )?;

    let mut store = app.results_store().await;
    let mut provider = app.price_provider(data_file).await?;
    let registry = app.registry();
    let status = BacktestStatus::new();
    let mut backtester = Backtester::new(
        &mut store,
        &mut provider,
        &registry,
        app.settings().clone(),
        &status,
    );

    let selection: Option<&[String]> = if strategies.is_empty() {
        None
    } else {
        Some(strategies)
    };
    let outcomes = backtester
        .run_all_strategies(selection, start_date, end_date, initial_capital)
        .await;

    println!("\nBacktest completed for {} strategies", outcomes.len());
    for (strategy_name, outcome) in &outcomes {
        match outcome {
            Ok(summary) => println!(
                "{}: {:.2}% return, {:.2} Sharpe",
                strategy_name,
                summary.metrics.total_return * 100.0,
                summary.metrics.sharpe_ratio
            ),
            Err(error) => println!("{}: ERROR - {}", strategy_name, error),
        }
    }
    Ok(())
}
