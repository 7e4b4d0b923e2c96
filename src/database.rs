use crate::models::{
    DailyRecord, PerformanceMetrics, RunSummaryRow, Trade, TradeAction, TraceEvent, WeightVector,
};
use anyhow::{anyhow, Context, Result};
use chrono::NaiveDate;
use log::{error, warn};
use serde_json::Value;
use std::str::FromStr;
use tokio_postgres::{Client, NoTls, Row};

pub struct Database {
    client: Client,
}

impl Database {
    pub async fn new<S: AsRef<str>>(database_url: S) -> Result<Self> {
        let database_url = database_url.as_ref().to_string();
        let (client, connection) = tokio_postgres::connect(&database_url, NoTls)
            .await
            .with_context(|| format!("failed to connect to PostgreSQL at {}", database_url))?;

        tokio::spawn(async move {
            if let Err(err) = connection.await {
                error!("PostgreSQL connection error: {}", err);
            }
        });

        Ok(Self { client })
    }

    /// Create the four result streams plus the price cache. Safe to call on
    /// every startup.
    pub async fn initialize_schema(&self) -> Result<()> {
        self.client
            .batch_execute(
                "CREATE TABLE IF NOT EXISTS backtest_results (
                     strategy_name TEXT NOT NULL,
                     start_date DATE NOT NULL,
                     end_date DATE NOT NULL,
                     total_return DOUBLE PRECISION NOT NULL,
                     annualized_return DOUBLE PRECISION NOT NULL,
                     volatility DOUBLE PRECISION NOT NULL,
                     sharpe_ratio DOUBLE PRECISION NOT NULL,
                     max_drawdown DOUBLE PRECISION NOT NULL,
                     calmar_ratio DOUBLE PRECISION NOT NULL,
                     win_rate DOUBLE PRECISION NOT NULL,
                     profit_factor DOUBLE PRECISION NOT NULL,
                     avg_trade_return DOUBLE PRECISION NOT NULL,
                     num_trades INTEGER NOT NULL,
                     created_at TIMESTAMPTZ NOT NULL DEFAULT CURRENT_TIMESTAMP,
                     PRIMARY KEY (strategy_name, start_date, end_date)
                 );
                 CREATE TABLE IF NOT EXISTS portfolio_values (
                     strategy_name TEXT NOT NULL,
                     date DATE NOT NULL,
                     portfolio_value DOUBLE PRECISION NOT NULL,
                     cash DOUBLE PRECISION NOT NULL,
                     weights JSONB NOT NULL,
                     created_at TIMESTAMPTZ NOT NULL DEFAULT CURRENT_TIMESTAMP,
                     PRIMARY KEY (strategy_name, date)
                 );
                 CREATE TABLE IF NOT EXISTS trades (
                     strategy_name TEXT NOT NULL,
                     trade_date DATE NOT NULL,
                     symbol TEXT NOT NULL,
                     action TEXT NOT NULL,
                     quantity DOUBLE PRECISION NOT NULL,
                     price DOUBLE PRECISION NOT NULL,
                     value DOUBLE PRECISION NOT NULL,
                     created_at TIMESTAMPTZ NOT NULL DEFAULT CURRENT_TIMESTAMP,
                     PRIMARY KEY (strategy_name, trade_date, symbol, action)
                 );
                 CREATE TABLE IF NOT EXISTS backtest_traces (
                     strategy_name TEXT NOT NULL,
                     start_date DATE NOT NULL,
                     end_date DATE NOT NULL,
                     trace_timestamp TIMESTAMPTZ NOT NULL,
                     level TEXT NOT NULL,
                     category TEXT NOT NULL,
                     message TEXT NOT NULL,
                     data JSONB,
                     created_at TIMESTAMPTZ NOT NULL DEFAULT CURRENT_TIMESTAMP
                 );
                 CREATE TABLE IF NOT EXISTS price_cache (
                     symbol TEXT NOT NULL,
                     date DATE NOT NULL,
                     price DOUBLE PRECISION NOT NULL,
                     fetched_at TIMESTAMPTZ NOT NULL DEFAULT CURRENT_TIMESTAMP,
                     PRIMARY KEY (symbol, date)
                 );
                 CREATE INDEX IF NOT EXISTS idx_portfolio_strategy_date
                     ON portfolio_values (strategy_name, date);
                 CREATE INDEX IF NOT EXISTS idx_trades_strategy_date
                     ON trades (strategy_name, trade_date);
                 CREATE INDEX IF NOT EXISTS idx_traces_strategy_dates
                     ON backtest_traces (strategy_name, start_date, end_date);
                 CREATE INDEX IF NOT EXISTS idx_traces_timestamp
                     ON backtest_traces (trace_timestamp);",
            )
            .await
            .context("failed to initialize results schema")?;
        Ok(())
    }

    /// Insert the run summary under its natural key. A re-run over the same
    /// strategy and window leaves the first row in place.
    pub async fn insert_run_summary(
        &self,
        strategy_name: &str,
        start_date: NaiveDate,
        end_date: NaiveDate,
        metrics: &PerformanceMetrics,
    ) -> Result<()> {
        self.client
            .execute(
                "INSERT INTO backtest_results (
                     strategy_name, start_date, end_date, total_return,
                     annualized_return, volatility, sharpe_ratio, max_drawdown,
                     calmar_ratio, win_rate, profit_factor, avg_trade_return, num_trades
                 ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13)
                 ON CONFLICT (strategy_name, start_date, end_date) DO NOTHING",
                &[
                    &strategy_name,
                    &start_date,
                    &end_date,
                    &metrics.total_return,
                    &metrics.annualized_return,
                    &metrics.volatility,
                    &metrics.sharpe_ratio,
                    &metrics.max_drawdown,
                    &metrics.calmar_ratio,
                    &metrics.win_rate,
                    &metrics.profit_factor,
                    &metrics.avg_trade_return,
                    &metrics.num_trades,
                ],
            )
            .await?;
        Ok(())
    }

    pub async fn insert_daily_values(
        &mut self,
        strategy_name: &str,
        records: &[DailyRecord],
    ) -> Result<()> {
        if records.is_empty() {
            return Ok(());
        }
        let tx = self.client.transaction().await?;
        let stmt = tx
            .prepare(
                "INSERT INTO portfolio_values (strategy_name, date, portfolio_value, cash, weights)
                 VALUES ($1, $2, $3, $4, $5)
                 ON CONFLICT (strategy_name, date) DO NOTHING",
            )
            .await?;
        for record in records {
            let weights = serde_json::to_value(&record.weights)?;
            tx.execute(
                &stmt,
                &[
                    &strategy_name,
                    &record.date,
                    &record.portfolio_value,
                    &record.cash,
                    &weights,
                ],
            )
            .await?;
        }
        tx.commit().await?;
        Ok(())
    }

    pub async fn insert_trades(&mut self, strategy_name: &str, trades: &[Trade]) -> Result<()> {
        if trades.is_empty() {
            return Ok(());
        }
        let tx = self.client.transaction().await?;
        let stmt = tx
            .prepare(
                "INSERT INTO trades (strategy_name, trade_date, symbol, action, quantity, price, value)
                 VALUES ($1, $2, $3, $4, $5, $6, $7)
                 ON CONFLICT (strategy_name, trade_date, symbol, action) DO NOTHING",
            )
            .await?;
        for trade in trades {
            let action = trade.action.as_str();
            tx.execute(
                &stmt,
                &[
                    &strategy_name,
                    &trade.trade_date,
                    &trade.symbol,
                    &action,
                    &trade.quantity,
                    &trade.price,
                    &trade.value,
                ],
            )
            .await?;
        }
        tx.commit().await?;
        Ok(())
    }

    /// Fire-and-forget trace persistence. A failed write is logged locally
    /// and swallowed so observability problems never fail a run.
    pub async fn append_trace(&self, event: &TraceEvent) {
        let level = event.level.as_str();
        let category = event.category.as_str();
        if let Err(err) = self
            .client
            .execute(
                "INSERT INTO backtest_traces
                     (strategy_name, start_date, end_date, trace_timestamp, level, category, message, data)
                 VALUES ($1, $2, $3, $4, $5, $6, $7, $8)",
                &[
                    &event.strategy_name,
                    &event.start_date,
                    &event.end_date,
                    &event.timestamp,
                    &level,
                    &category,
                    &event.message,
                    &event.data,
                ],
            )
            .await
        {
            warn!(
                "Failed to persist trace event for {}: {}",
                event.strategy_name, err
            );
        }
    }

    pub async fn results_summary(&self) -> Result<Vec<RunSummaryRow>> {
        let rows = self
            .client
            .query(
                "SELECT strategy_name, start_date, end_date, total_return,
                        annualized_return, volatility, sharpe_ratio, max_drawdown,
                        calmar_ratio, win_rate, profit_factor, avg_trade_return,
                        num_trades, created_at
                 FROM backtest_results
                 ORDER BY strategy_name, start_date DESC",
                &[],
            )
            .await?;
        rows.iter().map(parse_summary_row).collect()
    }

    pub async fn portfolio_values_for(&self, strategy_name: &str) -> Result<Vec<DailyRecord>> {
        let rows = self
            .client
            .query(
                "SELECT date, portfolio_value, cash, weights
                 FROM portfolio_values
                 WHERE strategy_name = $1
                 ORDER BY date",
                &[&strategy_name],
            )
            .await?;
        rows.iter()
            .map(|row| {
                let weights_json: Value = row.get(3);
                let weights: WeightVector = serde_json::from_value(weights_json)
                    .map_err(|err| anyhow!("Failed to parse stored weights: {}", err))?;
                Ok(DailyRecord {
                    date: row.get(0),
                    portfolio_value: row.get(1),
                    cash: row.get(2),
                    weights,
                })
            })
            .collect()
    }

    pub async fn trades_for(&self, strategy_name: &str) -> Result<Vec<Trade>> {
        let rows = self
            .client
            .query(
                "SELECT trade_date, symbol, action, quantity, price, value
                 FROM trades
                 WHERE strategy_name = $1
                 ORDER BY trade_date, symbol, action",
                &[&strategy_name],
            )
            .await?;
        rows.iter()
            .map(|row| {
                let action: String = row.get(2);
                Ok(Trade {
                    trade_date: row.get(0),
                    symbol: row.get(1),
                    action: TradeAction::from_str(&action)?,
                    quantity: row.get(3),
                    price: row.get(4),
                    value: row.get(5),
                })
            })
            .collect()
    }

    pub async fn traces_for(
        &self,
        strategy_name: &str,
        date: Option<NaiveDate>,
    ) -> Result<Vec<TraceEvent>> {
        let rows = match date {
            Some(date) => {
                self.client
                    .query(
                        "SELECT strategy_name, start_date, end_date, trace_timestamp,
                                level, category, message, data
                         FROM backtest_traces
                         WHERE strategy_name = $1
                           AND trace_timestamp::date = $2
                         ORDER BY trace_timestamp",
                        &[&strategy_name, &date],
                    )
                    .await?
            }
            None => {
                self.client
                    .query(
                        "SELECT strategy_name, start_date, end_date, trace_timestamp,
                                level, category, message, data
                         FROM backtest_traces
                         WHERE strategy_name = $1
                         ORDER BY trace_timestamp",
                        &[&strategy_name],
                    )
                    .await?
            }
        };
        rows.iter()
            .map(|row| {
                let level: String = row.get(4);
                let category: String = row.get(5);
                Ok(TraceEvent {
                    strategy_name: row.get(0),
                    start_date: row.get(1),
                    end_date: row.get(2),
                    timestamp: row.get(3),
                    level: level.parse()?,
                    category: category.parse()?,
                    message: row.get(6),
                    data: row.get(7),
                })
            })
            .collect()
    }

    /// Cached daily closes for the requested symbols within the range,
    /// keyed symbol then date.
    pub async fn cached_prices(
        &self,
        symbols: &[String],
        start_date: NaiveDate,
        end_date: NaiveDate,
    ) -> Result<std::collections::BTreeMap<String, std::collections::BTreeMap<NaiveDate, f64>>>
    {
        let rows = self
            .client
            .query(
                "SELECT symbol, date, price
                 FROM price_cache
                 WHERE symbol = ANY($1) AND date BETWEEN $2 AND $3
                 ORDER BY symbol, date",
                &[&symbols, &start_date, &end_date],
            )
            .await?;
        let mut columns: std::collections::BTreeMap<
            String,
            std::collections::BTreeMap<NaiveDate, f64>,
        > = std::collections::BTreeMap::new();
        for row in rows {
            let symbol: String = row.get(0);
            let date: NaiveDate = row.get(1);
            let price: f64 = row.get(2);
            columns.entry(symbol).or_default().insert(date, price);
        }
        Ok(columns)
    }

    pub async fn store_prices(
        &mut self,
        columns: &std::collections::BTreeMap<String, std::collections::BTreeMap<NaiveDate, f64>>,
    ) -> Result<()> {
        let tx = self.client.transaction().await?;
        let stmt = tx
            .prepare(
                "INSERT INTO price_cache (symbol, date, price)
                 VALUES ($1, $2, $3)
                 ON CONFLICT (symbol, date) DO UPDATE SET
                     price = EXCLUDED.price,
                     fetched_at = CURRENT_TIMESTAMP",
            )
            .await?;
        for (symbol, series) in columns {
            for (date, price) in series {
                tx.execute(&stmt, &[symbol, date, price]).await?;
            }
        }
        tx.commit().await?;
        Ok(())
    }
}

fn parse_summary_row(row: &Row) -> Result<RunSummaryRow> {
    Ok(RunSummaryRow {
        strategy_name: row.get(0),
        start_date: row.get(1),
        end_date: row.get(2),
        metrics: PerformanceMetrics {
            total_return: row.get(3),
            annualized_return: row.get(4),
            volatility: row.get(5),
            sharpe_ratio: row.get(6),
            max_drawdown: row.get(7),
            calmar_ratio: row.get(8),
            win_rate: row.get(9),
            profit_factor: row.get(10),
            avg_trade_return: row.get(11),
            num_trades: row.get(12),
        },
        created_at: row.get(13),
    })
}
