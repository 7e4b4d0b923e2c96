use crate::commands::parse_date_range;
use crate::context::AppContext;
use anyhow::{anyhow, Result};
use log::info;
use std::path::Path;

/// Fetch prices for the requested symbols and write a snapshot file that
/// later runs can use with `--data-file`, fully offline.
pub async fn run(
    app: &AppContext,
    symbols: &[String],
    start_date_raw: &str,
    end_date_raw: &str,
    output: &Path,
) -> Result<()> {
    if symbols.is_empty() {
        return Err(anyhow!("at least one symbol is required"));
    }
    let (start_date, end_date) = parse_date_range(start_date_raw, end_date_raw)?;

    let mut provider = app.price_provider(None).await?;
    let table = provider
        .get_price_data(symbols, start_date, end_date)
        .await?;
    if table.is_empty() {
        return Err(anyhow!(
            "no price data available for {:?} between {} and {}",
            symbols,
            start_date,
            end_date
        ));
    }

    table.save_snapshot(output)?;
    info!(
        "Exported {} symbols over {} dates to {}",
        table.symbols().len(),
        table.dates().len(),
        output.display()
    );
    Ok(())
}
