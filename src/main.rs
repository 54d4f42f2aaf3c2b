use clap::Parser;
use thiserror::Error;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;
use winter::backtest::{load_tick_csv, report, ReplayConfig, ReplayDriver, ReplayError};
use winter::cli::{Cli, Mode};
use winter::config::{Config, ConfigError};
use winter::live::{FeedError, LiveConfig, LiveDriver, TcpJsonSource};
use winter::strategy::{default_factory, ExecutionMode, Strategy, StrategyFactory};

const TRADES_CSV: &str = "winter_trades.csv";
const BACKTEST_REPORT: &str = "backtest_report.html";
const GRAPHS_REPORT: &str = "trade_result_graphs.html";

/// Strategy used when the CLI and config file are both silent.
const DEFAULT_STRATEGY: &str = "stat-arb";

#[derive(Debug, Error)]
enum WinterError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Replay(#[from] ReplayError),
    #[error(transparent)]
    Feed(#[from] FeedError),
    #[error("unknown strategy '{id}'; available: {available}")]
    UnknownStrategy { id: String, available: String },
}

fn main() {
    let cli = Cli::parse();

    let filter = EnvFilter::try_new(&cli.verbose)
        .unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    if let Err(e) = run(cli) {
        error!("{e}");
        std::process::exit(1);
    }
}

fn run(cli: Cli) -> Result<(), WinterError> {
    let config = load_config(&cli)?;
    match cli.mode() {
        Mode::Backtest { strategy, csv } => {
            run_replay(&cli, &config, strategy, &csv, false)
        }
        Mode::Trade { strategy, csv } => {
            run_replay(&cli, &config, strategy, &csv, true)
        }
        Mode::Live => run_live(&cli, &config),
    }
}

/// A missing default config file is fine (run on defaults); a missing
/// explicitly-requested one is fatal.
fn load_config(cli: &Cli) -> Result<Config, WinterError> {
    match Config::load_from_file(&cli.config) {
        Ok(config) => {
            info!(file = %cli.config, keys = config.len(), "configuration loaded");
            Ok(config)
        }
        Err(e) if cli.config == "winter_strategies.conf" => {
            warn!("no configuration file found, using defaults ({e})");
            Ok(Config::new())
        }
        Err(e) => Err(e.into()),
    }
}

fn build_strategy(
    factory: &StrategyFactory,
    id: &str,
    config: &Config,
) -> Result<Box<dyn Strategy>, WinterError> {
    factory
        .create(id, config)
        .ok_or_else(|| WinterError::UnknownStrategy {
            id: id.to_string(),
            available: factory.registered_ids().join(", "),
        })
}

fn run_replay(
    cli: &Cli,
    config: &Config,
    strategy_id: Option<String>,
    csv: &str,
    throughput_mode: bool,
) -> Result<(), WinterError> {
    // Deterministic replay wants inline stat-arb processing; the
    // throughput mode exercises the full parallel fan-out.
    let mode = if throughput_mode {
        ExecutionMode::Parallel
    } else {
        ExecutionMode::Deterministic
    };
    let factory = default_factory(mode);
    let id = strategy_id
        .or_else(|| config.get("strategy").map(str::to_string))
        .unwrap_or_else(|| DEFAULT_STRATEGY.to_string());
    let strategy = build_strategy(&factory, &id, config)?;
    info!(strategy = %id, file = csv, throughput_mode, "starting replay");

    let replay_config = ReplayConfig {
        initial_balance: cli.initial_balance,
        throughput_mode,
        ..Default::default()
    };
    let ticks = load_tick_csv(csv, replay_config.parse_threads)?;
    let driver = ReplayDriver::new(replay_config);
    let result = driver.run(ticks, strategy);

    report::write_trades_csv(
        TRADES_CSV,
        &result.recording.rows,
        result.initial_balance,
        result.final_balance,
    )?;
    report::write_backtest_html(BACKTEST_REPORT, &result)?;
    report::write_graphs_html(GRAPHS_REPORT, &result)?;

    let pnl = result.final_balance - result.initial_balance;
    println!("=== Replay Results ===");
    println!("Initial Balance: ${:.2}", result.initial_balance);
    println!("Final Balance:   ${:.2}", result.final_balance);
    println!(
        "P&L:             ${:.2} ({:+.2}%)",
        pnl,
        result.metrics.total_return * 100.0
    );
    println!("Total Trades:    {}", result.trade_count);
    println!("Sharpe Ratio:    {:.2}", result.metrics.sharpe_ratio);
    println!("Max Drawdown:    {:.2}%", result.metrics.max_drawdown * 100.0);
    println!("Ticks Replayed:  {}", result.ticks_fed);
    println!("Reports: {TRADES_CSV}, {BACKTEST_REPORT}, {GRAPHS_REPORT}");
    Ok(())
}

fn run_live(cli: &Cli, config: &Config) -> Result<(), WinterError> {
    let factory = default_factory(ExecutionMode::Parallel);
    let id = config
        .get("strategy")
        .unwrap_or(DEFAULT_STRATEGY)
        .to_string();
    let strategy = build_strategy(&factory, &id, config)?;
    info!(strategy = %id, endpoint = %cli.socket_endpoint, "starting live session");

    let source = TcpJsonSource::connect(&cli.socket_endpoint)?;
    let driver = LiveDriver::new(LiveConfig {
        initial_balance: cli.initial_balance,
        ..Default::default()
    });
    let summary = driver.run(source, strategy)?;

    report::write_trades_csv(
        TRADES_CSV,
        &summary.recording.rows,
        summary.initial_balance,
        summary.final_balance,
    )?;

    let pnl = summary.final_balance - summary.initial_balance;
    println!("=== Simulation Results ===");
    println!("Initial Balance: ${:.2}", summary.initial_balance);
    println!("Final Balance:   ${:.2}", summary.final_balance);
    println!(
        "P&L:             ${:.2} ({:+.2}%)",
        pnl,
        pnl / summary.initial_balance * 100.0
    );
    println!("Total Trades:    {}", summary.trade_count);
    println!("Data Points:     {}", summary.ticks_fed);
    println!("Dropped Ticks:   {}", summary.ticks_dropped);
    println!("Trade log: {TRADES_CSV}");
    Ok(())
}
