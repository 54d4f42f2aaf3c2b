//! CLI argument parsing using clap.

use clap::Parser;

/// Winter — low-latency tick-driven trading engine
#[derive(Parser, Debug)]
#[command(name = "winter", version, about, long_about = None)]
pub struct Cli {
    /// Pub/sub tick source for live mode
    #[arg(long, default_value = "tcp://127.0.0.1:5555")]
    pub socket_endpoint: String,

    /// Starting cash balance
    #[arg(long, default_value_t = 5_000_000.0)]
    pub initial_balance: f64,

    /// Replay a historical tick CSV deterministically:
    /// `--backtest [STRATEGY] <CSV>`
    #[arg(long, num_args = 1..=2, value_names = ["STRATEGY", "CSV"])]
    pub backtest: Option<Vec<String>>,

    /// Replay a tick CSV at full parallel throughput:
    /// `--trade [STRATEGY] <CSV>`
    #[arg(long, num_args = 1..=2, value_names = ["STRATEGY", "CSV"])]
    pub trade: Option<Vec<String>>,

    /// Strategy configuration file
    #[arg(long, default_value = "winter_strategies.conf")]
    pub config: String,

    /// Log verbosity (error, warn, info, debug, trace)
    #[arg(long, default_value = "info")]
    pub verbose: String,
}

/// What the process has been asked to do.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Mode {
    /// Deterministic replay of a tick file.
    Backtest { strategy: Option<String>, csv: String },
    /// Parallel-throughput replay of a tick file.
    Trade { strategy: Option<String>, csv: String },
    /// Subscribe to the live endpoint.
    Live,
}

impl Cli {
    /// Resolve the run mode. With one value the argument is the CSV path;
    /// with two it is `STRATEGY CSV`.
    pub fn mode(&self) -> Mode {
        fn split(args: &[String]) -> (Option<String>, String) {
            match args {
                [csv] => (None, csv.clone()),
                [strategy, csv, ..] => (Some(strategy.clone()), csv.clone()),
                [] => (None, String::new()),
            }
        }
        if let Some(args) = &self.backtest {
            let (strategy, csv) = split(args);
            Mode::Backtest { strategy, csv }
        } else if let Some(args) = &self.trade {
            let (strategy, csv) = split(args);
            Mode::Trade { strategy, csv }
        } else {
            Mode::Live
        }
    }
}
