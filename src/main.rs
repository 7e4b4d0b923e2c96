use anyhow::Result;
use clap::{Parser, Subcommand};
use log::info;
use portfolio_engine::commands::{backtest, backtest_all, export_prices, summary, traces};
use portfolio_engine::context::AppContext;
use std::env;
use std::path::PathBuf;

const DEFAULT_START_DATE: &str = "2020-01-01";
const DEFAULT_END_DATE: &str = "2024-12-31";

#[derive(Parser)]
#[command(name = "portfolio-engine")]
#[command(about = "Multi-asset portfolio backtesting engine")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Backtest a single strategy over a date range
    Backtest {
        /// Registered strategy name
        strategy: String,
        /// Start date in YYYY-MM-DD format
        #[arg(long = "start-date", default_value = DEFAULT_START_DATE)]
        start_date: String,
        /// End date in YYYY-MM-DD format
        #[arg(long = "end-date", default_value = DEFAULT_END_DATE)]
        end_date: String,
        /// Starting capital (defaults to BACKTEST_INITIAL_CAPITAL or 100000)
        #[arg(long = "initial-capital")]
        initial_capital: Option<f64>,
        /// Price snapshot file for offline runs
        #[arg(long = "data-file", value_name = "PATH")]
        data_file: Option<PathBuf>,
    },
    /// Backtest all registered strategies (or a comma-separated subset)
    BacktestAll {
        /// Strategies to run; empty means every registered strategy
        #[arg(long, value_delimiter = ',', num_args = 0..)]
        strategies: Vec<String>,
        /// Start date in YYYY-MM-DD format
        #[arg(long = "start-date", default_value = DEFAULT_START_DATE)]
        start_date: String,
        /// End date in YYYY-MM-DD format
        #[arg(long = "end-date", default_value = DEFAULT_END_DATE)]
        end_date: String,
        /// Starting capital for each run
        #[arg(long = "initial-capital")]
        initial_capital: Option<f64>,
        /// Price snapshot file for offline runs
        #[arg(long = "data-file", value_name = "PATH")]
        data_file: Option<PathBuf>,
    },
    /// Print stored run summaries
    Summary,
    /// Print trace events for a strategy
    Traces {
        /// Registered strategy name
        strategy: String,
        /// Only events recorded on this day (YYYY-MM-DD)
        #[arg(long)]
        date: Option<String>,
    },
    /// Fetch prices and save a snapshot file for offline runs
    ExportPrices {
        /// Comma-separated ticker symbols
        #[arg(value_delimiter = ',', num_args = 1..)]
        symbols: Vec<String>,
        /// Start date in YYYY-MM-DD format
        #[arg(long = "start-date", default_value = DEFAULT_START_DATE)]
        start_date: String,
        /// End date in YYYY-MM-DD format
        #[arg(long = "end-date", default_value = DEFAULT_END_DATE)]
        end_date: String,
        /// Destination file for the snapshot
        #[arg(short, long = "output", value_name = "PATH")]
        output: PathBuf,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let database_url = env::var("DATABASE_URL").ok();
    let app = AppContext::initialize(database_url)?;

    info!("Starting portfolio engine. Backtests are simulations, not investment advice.");

    match cli.command {
        Commands::Backtest {
            strategy,
            start_date,
            end_date,
            initial_capital,
            data_file,
        } => {
            backtest::run(
                &app,
                &strategy,
                &start_date,
                &end_date,
                initial_capital,
                data_file.as_deref(),
            )
            .await?;
        }
        Commands::BacktestAll {
            strategies,
            start_date,
            end_date,
            initial_capital,
            data_file,
        } => {
            backtest_all::run(
                &app,
                &strategies,
                &start_date,
                &end_date,
                initial_capital,
                data_file.as_deref(),
            )
            .await?;
        }
        Commands::Summary => {
            summary::run(&app).await?;
        }
        Commands::Traces { strategy, date } => {
            traces::run(&app, &strategy, date.as_deref()).await?;
        }
        Commands::ExportPrices {
            symbols,
            start_date,
            end_date,
            output,
        } => {
            export_prices::run(&app, &symbols, &start_date, &end_date, &output).await?;
        }
    }

    Ok(())
}
