use crate::database::Database;
use crate::models::{DailyRecord, PerformanceMetrics, RunSummaryRow, Trade, TraceEvent};
use anyhow::Result;
use chrono::{NaiveDate, Utc};
use std::collections::BTreeMap;

/// Results persistence as the engine consumes it: four append streams, each
/// idempotent under its natural key, plus the read queries the CLI surfaces.
///
/// `Postgres` is the durable backend. `Memory` keeps the same key semantics
/// in process and backs offline runs and tests, mirroring how the engine
/// degrades when no database is configured.
pub enum ResultsStore {
    Postgres(Database),
    Memory(MemoryStore),
}

impl ResultsStore {
    pub fn in_memory() -> Self {
        ResultsStore::Memory(MemoryStore::default())
    }

    pub fn backend_label(&self) -> &'static str {
        match self {
            ResultsStore::Postgres(_) => "postgres",
            ResultsStore::Memory(_) => "memory",
        }
    }

    pub async fn insert_run_summary(
        &mut self,
        strategy_name: &str,
        start_date: NaiveDate,
        end_date: NaiveDate,
        metrics: &PerformanceMetrics,
    ) -> Result<()> {
        match self {
            ResultsStore::Postgres(db) => {
                db.insert_run_summary(strategy_name, start_date, end_date, metrics)
                    .await
            }
            ResultsStore::Memory(store) => {
                store.insert_run_summary(strategy_name, start_date, end_date, metrics);
                Ok(())
            }
        }
    }

    pub async fn insert_daily_values(
        &mut self,
        strategy_name: &str,
        records: &[DailyRecord],
    ) -> Result<()> {
        match self {
            ResultsStore::Postgres(db) => db.insert_daily_values(strategy_name, records).await,
            ResultsStore::Memory(store) => {
                store.insert_daily_values(strategy_name, records);
                Ok(())
            }
        }
    }

    pub async fn insert_trades(&mut self, strategy_name: &str, trades: &[Trade]) -> Result<()> {
        match self {
            ResultsStore::Postgres(db) => db.insert_trades(strategy_name, trades).await,
            ResultsStore::Memory(store) => {
                store.insert_trades(strategy_name, trades);
                Ok(())
            }
        }
    }

    /// Never fails; the postgres side logs and swallows write errors.
    pub async fn append_trace(&mut self, event: &TraceEvent) {
        match self {
            ResultsStore::Postgres(db) => db.append_trace(event).await,
            ResultsStore::Memory(store) => store.append_trace(event),
        }
    }

    pub async fn results_summary(&self) -> Result<Vec<RunSummaryRow>> {
        match self {
            ResultsStore::Postgres(db) => db.results_summary().await,
            ResultsStore::Memory(store) => Ok(store.results_summary()),
        }
    }

    pub async fn portfolio_values_for(&self, strategy_name: &str) -> Result<Vec<DailyRecord>> {
        match self {
            ResultsStore::Postgres(db) => db.portfolio_values_for(strategy_name).await,
            ResultsStore::Memory(store) => Ok(store.portfolio_values_for(strategy_name)),
        }
    }

    pub async fn trades_for(&self, strategy_name: &str) -> Result<Vec<Trade>> {
        match self {
            ResultsStore::Postgres(db) => db.trades_for(strategy_name).await,
            ResultsStore::Memory(store) => Ok(store.trades_for(strategy_name)),
        }
    }

    pub async fn traces_for(
        &self,
        strategy_name: &str,
        date: Option<NaiveDate>,
    ) -> Result<Vec<TraceEvent>> {
        match self {
            ResultsStore::Postgres(db) => db.traces_for(strategy_name, date).await,
            ResultsStore::Memory(store) => Ok(store.traces_for(strategy_name, date)),
        }
    }
}

/// In-process results store with the same natural-key idempotency as the
/// relational schema: the first write under a key wins, repeats are no-ops.
#[derive(Default)]
pub struct MemoryStore {
    summaries: BTreeMap<(String, NaiveDate, NaiveDate), RunSummaryRow>,
    daily_values: BTreeMap<(String, NaiveDate), DailyRecord>,
    trades: BTreeMap<(String, NaiveDate, String, String), Trade>,
    traces: Vec<TraceEvent>,
}

impl MemoryStore {
    fn insert_run_summary(
        &mut self,
        strategy_name: &str,
        start_date: NaiveDate,
        end_date: NaiveDate,
        metrics: &PerformanceMetrics,
    ) {
        self.summaries
            .entry((strategy_name.to_string(), start_date, end_date))
            .or_insert_with(|| RunSummaryRow {
                strategy_name: strategy_name.to_string(),
                start_date,
                end_date,
                metrics: metrics.clone(),
                created_at: Utc::now(),
            });
    }

    fn insert_daily_values(&mut self, strategy_name: &str, records: &[DailyRecord]) {
        for record in records {
            self.daily_values
                .entry((strategy_name.to_string(), record.date))
                .or_insert_with(|| record.clone());
        }
    }

    fn insert_trades(&mut self, strategy_name: &str, trades: &[Trade]) {
        for trade in trades {
            self.trades
                .entry((
                    strategy_name.to_string(),
                    trade.trade_date,
                    trade.symbol.clone(),
                    trade.action.as_str().to_string(),
                ))
                .or_insert_with(|| trade.clone());
        }
    }

    fn append_trace(&mut self, event: &TraceEvent) {
        self.traces.push(event.clone());
    }

    fn results_summary(&self) -> Vec<RunSummaryRow> {
        self.summaries.values().cloned().collect()
    }

    fn portfolio_values_for(&self, strategy_name: &str) -> Vec<DailyRecord> {
        self.daily_values
            .iter()
            .filter(|((name, _), _)| name == strategy_name)
            .map(|(_, record)| record.clone())
            .collect()
    }

    fn trades_for(&self, strategy_name: &str) -> Vec<Trade> {
        self.trades
            .iter()
            .filter(|((name, _, _, _), _)| name == strategy_name)
            .map(|(_, trade)| trade.clone())
            .collect()
    }

    fn traces_for(&self, strategy_name: &str, date: Option<NaiveDate>) -> Vec<TraceEvent> {
        self.traces
            .iter()
            .filter(|event| event.strategy_name == strategy_name)
            .filter(|event| match date {
                Some(date) => event.timestamp.date_naive() == date,
                None => true,
            })
            .cloned()
            .collect()
    }
}
