use crate::config::EngineSettings;
use crate::engine::simulate;
use crate::error::EngineError;
use crate::market_data::PriceTable;
use crate::models::{BacktestRun, BacktestSummary, TraceCategory, TraceLevel};
use crate::provider::PriceProvider;
use crate::retry::retry_store_operation;
use crate::status::BacktestStatus;
use crate::store::ResultsStore;
use crate::strategy::{Strategy, StrategyRegistry};
use crate::trace::TraceLog;
use anyhow::Result;
use chrono::NaiveDate;
use crossbeam_channel::{bounded, Receiver, Sender};
use log::{info, warn};
use serde_json::json;
use std::collections::BTreeMap;
use std::result::Result as StdResult;
use std::thread;
use std::time::Instant;
use uuid::Uuid;

struct StrategyRunTask {
    name: String,
    strategy: Box<dyn Strategy>,
    prices: PriceTable,
    start_date: NaiveDate,
    end_date: NaiveDate,
    initial_capital: f64,
}

struct StrategyRunResultMsg {
    name: String,
    duration_secs: f64,
    run: StdResult<BacktestRun, String>,
    trace: TraceLog,
}

/// Orchestrates backtest runs: resolves the strategy, pulls prices through
/// the provider, drives the simulation, and hands results to the store.
/// Batch runs fan strategies out across worker threads; each task owns its
/// own price table, portfolio state and trace buffer, so nothing is shared
/// between concurrent runs. Persistence stays sequential afterward.
pub struct Backtester<'a> {
    store: &'a mut ResultsStore,
    provider: &'a mut PriceProvider,
    registry: &'a StrategyRegistry,
    settings: EngineSettings,
    status: &'a BacktestStatus,
}

impl<'a> Backtester<'a> {
    pub fn new(
        store: &'a mut ResultsStore,
        provider: &'a mut PriceProvider,
        registry: &'a StrategyRegistry,
        settings: EngineSettings,
        status: &'a BacktestStatus,
    ) -> Self {
        Self {
            store,
            provider,
            registry,
            settings,
            status,
        }
    }

    /// Run one strategy over the window and persist the result. Fatal
    /// errors (unknown strategy, no price data, a strategy computation
    /// failure) surface to the caller; trace events collected before the
    /// failure are still flushed.
    pub async fn run_backtest(
        &mut self,
        strategy_name: &str,
        start_date: NaiveDate,
        end_date: NaiveDate,
        initial_capital: f64,
    ) -> Result<BacktestSummary> {
        let task = self
            .prepare_task(strategy_name, start_date, end_date, initial_capital)
            .await?;
        info!(
            "Running backtest for {} from {} to {}",
            strategy_name, start_date, end_date
        );

        let mut trace = TraceLog::new(strategy_name, start_date, end_date);
        record_run_start(&mut trace, strategy_name, initial_capital);
        match simulate(
            task.strategy.as_ref(),
            &task.prices,
            start_date,
            end_date,
            initial_capital,
            &self.settings,
            &mut trace,
        ) {
            Ok(run) => {
                self.persist_run(&run, trace).await?;
                info!(
                    "Completed backtest for {} (return {:.2}%, Sharpe {:.4})",
                    strategy_name,
                    run.metrics.total_return * 100.0,
                    run.metrics.sharpe_ratio
                );
                Ok(run.summary())
            }
            Err(error) => {
                self.flush_traces(trace).await;
                Err(error)
            }
        }
    }

    /// Run every requested strategy (or all registered ones), recording a
    /// per-strategy outcome. One strategy failing never aborts the batch;
    /// its slot carries the error string instead.
    pub async fn run_all_strategies(
        &mut self,
        strategy_names: Option<&[String]>,
        start_date: NaiveDate,
        end_date: NaiveDate,
        initial_capital: f64,
    ) -> BTreeMap<String, StdResult<BacktestSummary, String>> {
        let names: Vec<String> = match strategy_names {
            Some(list) => list.to_vec(),
            None => self.registry.names(),
        };
        let mut outcomes: BTreeMap<String, StdResult<BacktestSummary, String>> = BTreeMap::new();

        self.status
            .set_phase(format!("Preparing {} strategies", names.len()));
        let mut tasks: Vec<StrategyRunTask> = Vec::new();
        for name in &names {
            match self
                .prepare_task(name, start_date, end_date, initial_capital)
                .await
            {
                Ok(task) => tasks.push(task),
                Err(error) => {
                    warn!("Skipping backtest for {}: {}", name, error);
                    outcomes.insert(name.clone(), Err(error.to_string()));
                }
            }
        }

        if tasks.is_empty() {
            self.status.set_phase("No runnable strategies");
            self.status.set_progress(0, 0, outcomes.len(), None);
            return outcomes;
        }

        let total = tasks.len();
        let mut failures = outcomes.len();
        self.status
            .set_phase(format!("Backtesting {} strategies in parallel", total));
        self.status.set_progress(total, 0, failures, None);

        let num_workers = std::cmp::min(total, std::cmp::max(1, num_cpus::get()));
        info!(
            "Using {} worker thread{} for strategy backtests",
            num_workers,
            if num_workers == 1 { "" } else { "s" }
        );

        let (task_tx, task_rx): (Sender<StrategyRunTask>, Receiver<StrategyRunTask>) =
            bounded(total);
        let (result_tx, result_rx): (
            Sender<StrategyRunResultMsg>,
            Receiver<StrategyRunResultMsg>,
        ) = bounded(total);

        let mut handles = Vec::new();
        for _ in 0..num_workers {
            let rx = task_rx.clone();
            let result_tx = result_tx.clone();
            let settings = self.settings.clone();

            let handle = thread::spawn(move || {
                while let Ok(task) = rx.recv() {
                    let started = Instant::now();
                    let mut trace = TraceLog::new(&task.name, task.start_date, task.end_date);
                    record_run_start(&mut trace, &task.name, task.initial_capital);
                    let run = simulate(
                        task.strategy.as_ref(),
                        &task.prices,
                        task.start_date,
                        task.end_date,
                        task.initial_capital,
                        &settings,
                        &mut trace,
                    )
                    .map_err(|error| error.to_string());

                    let message = StrategyRunResultMsg {
                        name: task.name,
                        duration_secs: started.elapsed().as_secs_f64(),
                        run,
                        trace,
                    };
                    if result_tx.send(message).is_err() {
                        break;
                    }
                }
            });
            handles.push(handle);
        }

        for task in tasks {
            let name = task.name.clone();
            if task_tx.send(task).is_err() {
                warn!("Backtest worker pool shut down before {} was queued", name);
                outcomes.insert(name, Err("worker pool unavailable".to_string()));
                failures += 1;
            }
        }
        drop(task_tx);
        drop(result_tx);

        let mut completed = 0usize;
        let mut pending_persistence: Vec<StrategyRunResultMsg> = Vec::new();
        while let Ok(message) = result_rx.recv() {
            completed += 1;
            match &message.run {
                Ok(run) => {
                    info!(
                        "Completed backtest for {} (return {:.2}%, Sharpe {:.4}, {:.1}s)",
                        message.name,
                        run.metrics.total_return * 100.0,
                        run.metrics.sharpe_ratio,
                        message.duration_secs
                    );
                    self.status.set_phase(format!(
                        "Completed {}/{} strategies (awaiting persistence; last: {})",
                        completed, total, message.name
                    ));
                    self.status.set_progress(
                        total,
                        completed,
                        failures,
                        Some(run.metrics.sharpe_ratio),
                    );
                }
                Err(error) => {
                    warn!("Backtest failed for {}: {}", message.name, error);
                    failures += 1;
                    self.status.set_phase(format!(
                        "Completed {}/{} strategies (last failure: {})",
                        completed, total, message.name
                    ));
                    self.status.set_progress(total, completed, failures, None);
                }
            }
            pending_persistence.push(message);
        }

        for handle in handles {
            let _ = handle.join();
        }

        let successes = pending_persistence
            .iter()
            .filter(|message| message.run.is_ok())
            .count();
        if successes > 0 {
            info!(
                "Persisting {} backtest result{} sequentially",
                successes,
                if successes == 1 { "" } else { "s" }
            );
        }
        for message in pending_persistence {
            let StrategyRunResultMsg {
                name, run, trace, ..
            } = message;
            match run {
                Ok(run) => match self.persist_run(&run, trace).await {
                    Ok(()) => {
                        outcomes.insert(name, Ok(run.summary()));
                    }
                    Err(error) => {
                        warn!("Failed to persist backtest results for {}: {}", name, error);
                        failures += 1;
                        outcomes.insert(name, Err(error.to_string()));
                    }
                },
                Err(error) => {
                    self.flush_traces(trace).await;
                    outcomes.insert(name, Err(error));
                }
            }
        }

        if failures == 0 {
            self.status.set_phase("Backtesting completed successfully");
        } else {
            warn!(
                "Backtesting completed with {} failure{}",
                failures,
                if failures == 1 { "" } else { "s" }
            );
            self.status.set_phase(format!(
                "Completed with {} failure{}",
                failures,
                if failures == 1 { "" } else { "s" }
            ));
        }
        self.status.set_progress(total, completed, failures, None);

        outcomes
    }

    async fn prepare_task(
        &mut self,
        strategy_name: &str,
        start_date: NaiveDate,
        end_date: NaiveDate,
        initial_capital: f64,
    ) -> Result<StrategyRunTask> {
        let strategy = self.registry.create_default(strategy_name)?;
        let prices = self
            .provider
            .get_price_data(strategy.assets(), start_date, end_date)
            .await?;
        if prices.is_empty() {
            return Err(EngineError::DataUnavailable {
                symbols: strategy.assets().to_vec(),
                start: start_date,
                end: end_date,
            }
            .into());
        }
        Ok(StrategyRunTask {
            name: strategy_name.to_string(),
            strategy,
            prices,
            start_date,
            end_date,
            initial_capital,
        })
    }

    async fn persist_run(&mut self, run: &BacktestRun, trace: TraceLog) -> Result<()> {
        let context = format!("persisting backtest results for {}", run.strategy_name);
        retry_store_operation!(context, async {
            self.store
                .insert_run_summary(
                    &run.strategy_name,
                    run.start_date,
                    run.end_date,
                    &run.metrics,
                )
                .await?;
            self.store
                .insert_daily_values(&run.strategy_name, &run.portfolio_values)
                .await?;
            self.store
                .insert_trades(&run.strategy_name, &run.trades)
                .await
        })?;
        self.flush_traces(trace).await;
        Ok(())
    }

    async fn flush_traces(&mut self, trace: TraceLog) {
        for event in trace.into_events() {
            self.store.append_trace(&event).await;
        }
    }
}

fn record_run_start(trace: &mut TraceLog, strategy_name: &str, initial_capital: f64) {
    let trace_id = format!("{}_{}", strategy_name, Uuid::new_v4());
    trace.record(
        TraceLevel::Info,
        TraceCategory::Backtest,
        format!("Starting backtest for {}", strategy_name),
        Some(json!({
            "traceId": trace_id,
            "initialCapital": initial_capital,
        })),
    );
}
