use crate::context::AppContext;
use anyhow::Result;

pub async fn run(app: &AppContext) -> Result<()> {
    let store = app.results_store().await;
    let rows = store.results_summary().await?;
    if rows.is_empty() {
        println!("No results found");
        return Ok(());
    }

    println!(
        "{:<24} {:<12} {:<12} {:>9} {:>9} {:>8} {:>9} {:>8} {:>7}",
        "strategy", "start", "end", "return%", "annual%", "sharpe", "max_dd%", "win%", "obs"
    );
    for row in rows {
        println!(
            "{:<24} {:<12} {:<12} {:>9.2} {:>9.2} {:>8.2} {:>9.2} {:>8.1} {:>7}",
            row.strategy_name,
            row.start_date.to_string(),
            row.end_date.to_string(),
            row.metrics.total_return * 100.0,
            row.metrics.annualized_return * 100.0,
            row.metrics.sharpe_ratio,
            row.metrics.max_drawdown * 100.0,
            row.metrics.win_rate * 100.0,
            row.metrics.num_trades,
        );
    }
    Ok(())
}
