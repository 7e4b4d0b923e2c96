use crate::commands::parse_date;
use crate::context::AppContext;
use anyhow::Result;

pub async fn run(app: &AppContext, strategy_name: &str, date_raw: Option<&str>) -> Result<()> {
    let date = date_raw.map(|raw| parse_date(raw, "date")).transpose()?;
    let store = app.results_store().await;
    let events = store.traces_for(strategy_name, date).await?;
    if events.is_empty() {
        println!("No trace events found for {}", strategy_name);
        return Ok(());
    }

    for event in events {
        let data = event
            .data
            .map(|value| format!(" {}", value))
            .unwrap_or_default();
        println!(
            "{} [{:<7}] {:<11} {}{}",
            event.timestamp.format("%Y-%m-%d %H:%M:%S"),
            event.level.as_str(),
            event.category.as_str(),
            event.message,
            data
        );
    }
    Ok(())
}
