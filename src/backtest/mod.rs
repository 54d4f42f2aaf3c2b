//! Replay driver: run the live pipeline against a historical tick file.
//!
//! The CSV is read once, transformed to ticks in order-preserving parallel
//! batches, stably sorted by timestamp, then fed through the engine. In
//! deterministic mode every tick is pushed and the pipeline drained before
//! the next, so two runs over the same file produce identical trade logs
//! and equity curves. Throughput mode skips the per-tick drain and accepts
//! whatever interleaving the workers produce.

pub mod report;

use crate::analytics::{PerformanceAnalyzer, PerformanceMetrics};
use crate::engine::{Engine, EngineConfig};
use crate::record::{RecorderSnapshot, TradeRecorder};
use crate::strategy::Strategy;
use crate::types::Tick;
use chrono::{NaiveDateTime, NaiveTime};
use std::path::Path;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;
use thiserror::Error;
use tracing::{info, warn};

#[derive(Debug, Error)]
pub enum ReplayError {
    #[error("failed to read tick file '{path}': {source}")]
    Io {
        path: String,
        source: std::io::Error,
    },
    #[error("failed to parse tick file '{path}': {source}")]
    Csv {
        path: String,
        source: csv::Error,
    },
    #[error("tick file '{0}' contained no usable rows")]
    Empty(String),
    #[error("failed to write report '{path}': {source}")]
    Report {
        path: String,
        source: std::io::Error,
    },
}

#[derive(Debug, Clone)]
pub struct ReplayConfig {
    pub initial_balance: f64,
    pub engine: EngineConfig,
    /// Feed batches without draining between ticks (the `--trade` mode).
    pub throughput_mode: bool,
    pub strategy_core: Option<usize>,
    pub execution_core: Option<usize>,
    /// Threads used for the parse stage.
    pub parse_threads: usize,
}

impl Default for ReplayConfig {
    fn default() -> Self {
        Self {
            initial_balance: 5_000_000.0,
            engine: EngineConfig::default(),
            throughput_mode: false,
            strategy_core: Some(0),
            execution_core: Some(1),
            parse_threads: std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(1),
        }
    }
}

/// Outcome of a replay run.
pub struct ReplayReport {
    pub initial_balance: f64,
    pub final_balance: f64,
    pub trade_count: i32,
    pub ticks_fed: usize,
    pub metrics: PerformanceMetrics,
    pub recording: RecorderSnapshot,
}

/// Load the tick CSV: header skipped, columns
/// `time, symbol, market_center, price, size, ...`. Rows with an empty
/// time/symbol/price/size field or unparseable numerics are skipped.
pub fn load_tick_csv(path: impl AsRef<Path>, parse_threads: usize) -> Result<Vec<Tick>, ReplayError> {
    let path = path.as_ref();
    let path_str = path.display().to_string();

    let mut reader = csv::ReaderBuilder::new()
        .has_headers(true)
        .flexible(true)
        .from_path(path)
        .map_err(|e| {
            if e.is_io_error() {
                ReplayError::Io {
                    path: path_str.clone(),
                    source: std::io::Error::other(e),
                }
            } else {
                ReplayError::Csv {
                    path: path_str.clone(),
                    source: e,
                }
            }
        })?;

    let mut records = Vec::new();
    for record in reader.records() {
        match record {
            Ok(r) => records.push(r),
            Err(e) => warn!(error = %e, "skipping unreadable CSV record"),
        }
    }
    info!(rows = records.len(), file = %path_str, "read tick file");

    // Order-preserving parallel transform: each chunk keeps its slot.
    let threads = parse_threads.max(1).min(records.len().max(1));
    let chunk_size = records.len().div_ceil(threads);
    let mut parsed: Vec<Option<(Option<i64>, Tick)>> = Vec::with_capacity(records.len());
    if chunk_size == 0 {
        return Err(ReplayError::Empty(path_str));
    }
    std::thread::scope(|scope| {
        let handles: Vec<_> = records
            .chunks(chunk_size)
            .map(|chunk| scope.spawn(move || chunk.iter().map(parse_record).collect::<Vec<_>>()))
            .collect();
        for handle in handles {
            parsed.extend(handle.join().expect("parse worker panicked"));
        }
    });

    // Sequential timestamps where the source column would not parse,
    // assigned in file order so the subsequent sort is reproducible.
    let mut ticks = Vec::with_capacity(parsed.len());
    for (index, entry) in parsed.into_iter().flatten().enumerate() {
        let (parsed_ts, mut tick) = entry;
        tick.timestamp = parsed_ts.unwrap_or(index as i64);
        ticks.push(tick);
    }
    if ticks.is_empty() {
        return Err(ReplayError::Empty(path_str));
    }

    ticks.sort_by_key(|t| t.timestamp);
    info!(ticks = ticks.len(), "tick file parsed and sorted");
    Ok(ticks)
}

/// Parse one CSV record into `(source timestamp, tick)`. `None` drops the
/// row.
fn parse_record(record: &csv::StringRecord) -> Option<(Option<i64>, Tick)> {
    let time = record.get(0)?.trim();
    let symbol = record.get(1)?.trim();
    let price_str = record.get(3)?.trim();
    let size_str = record.get(4)?.trim();
    if time.is_empty() || symbol.is_empty() || price_str.is_empty() || size_str.is_empty() {
        return None;
    }
    let price: f64 = price_str.parse().ok()?;
    let volume: i32 = size_str.parse().ok()?;
    if !price.is_finite() || price <= 0.0 || volume < 0 {
        return None;
    }
    Some((parse_timestamp(time), Tick::new(symbol, price, volume, 0)))
}

/// Microseconds from a `time` column value. Understands full datetimes
/// and bare times-of-day; anything else falls back to sequence numbering.
fn parse_timestamp(raw: &str) -> Option<i64> {
    for format in ["%Y-%m-%d %H:%M:%S%.f", "%Y-%m-%dT%H:%M:%S%.f"] {
        if let Ok(dt) = NaiveDateTime::parse_from_str(raw, format) {
            return Some(dt.and_utc().timestamp_micros());
        }
    }
    if let Ok(t) = NaiveTime::parse_from_str(raw, "%H:%M:%S%.f") {
        let micros = t.signed_duration_since(NaiveTime::MIN).num_microseconds();
        return micros;
    }
    None
}

pub struct ReplayDriver {
    config: ReplayConfig,
}

impl ReplayDriver {
    pub fn new(config: ReplayConfig) -> Self {
        Self { config }
    }

    /// Drive `ticks` through a fresh engine running `strategy`.
    pub fn run(&self, ticks: Vec<Tick>, strategy: Box<dyn Strategy>) -> ReplayReport {
        let cfg = &self.config;
        let mut engine = Engine::new(cfg.engine.clone());
        engine.portfolio().write().expect("book lock").set_cash(cfg.initial_balance);
        engine.add_strategy(strategy);

        // The recorder stamps rows with the timestamp of the tick being
        // fed, published here by the feed loop.
        let current_ts = Arc::new(AtomicI64::new(0));
        let label_ts = Arc::clone(&current_ts);
        let recorder = TradeRecorder::new(cfg.initial_balance, move || {
            label_ts.load(Ordering::Acquire).to_string()
        });
        let callback_recorder = recorder.clone();
        engine.set_fill_callback(move |event| callback_recorder.record_fill(event));

        engine.start(cfg.strategy_core, cfg.execution_core);

        let total = ticks.len();
        let mut fed = 0usize;
        for tick in ticks {
            current_ts.store(tick.timestamp, Ordering::Release);
            recorder.observe_tick(&tick);

            // The replay producer never sheds load; it spins until the
            // ring takes the tick.
            let mut pending = tick;
            loop {
                match engine.offer_tick(pending) {
                    Ok(()) => break,
                    Err(rejected) => {
                        pending = rejected;
                        std::thread::yield_now();
                    }
                }
            }
            fed += 1;
            if !cfg.throughput_mode {
                engine.drain();
            }
            if fed % 1_000_000 == 0 {
                info!(fed, total, "replay progress");
            }
        }

        engine.drain();
        engine.stop();

        let portfolio = engine.portfolio();
        let book = portfolio.read().expect("book lock");
        let final_balance = book.total_value();
        let trade_count = book.trade_count();
        drop(book);

        let recording = recorder.snapshot();
        let mut analyzer = PerformanceAnalyzer::new(0.0);
        for &point in &recording.equity {
            analyzer.add_equity_point(point);
        }
        for trade in &recording.closed {
            analyzer.add_trade(trade.clone());
        }
        let metrics = analyzer.calculate();

        info!(
            trades = trade_count,
            final_balance,
            ticks = fed,
            "replay complete"
        );
        ReplayReport {
            initial_balance: cfg.initial_balance,
            final_balance,
            trade_count,
            ticks_fed: fed,
            metrics,
            recording,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn parse_record_skips_bad_rows() {
        let make = |fields: &[&str]| csv::StringRecord::from(fields.to_vec());
        assert!(parse_record(&make(&["t", "AAPL", "X", "100.5", "3"])).is_some());
        assert!(parse_record(&make(&["", "AAPL", "X", "100.5", "3"])).is_none());
        assert!(parse_record(&make(&["t", "", "X", "100.5", "3"])).is_none());
        assert!(parse_record(&make(&["t", "AAPL", "X", "", "3"])).is_none());
        assert!(parse_record(&make(&["t", "AAPL", "X", "abc", "3"])).is_none());
        assert!(parse_record(&make(&["t", "AAPL", "X", "100.5", "x"])).is_none());
        assert!(parse_record(&make(&["t", "AAPL", "X", "-5", "3"])).is_none());
        assert!(parse_record(&make(&["t", "AAPL"])).is_none());
    }

    #[test]
    fn timestamps_parse_or_fall_back() {
        assert!(parse_timestamp("2021-03-04 09:30:00.250").is_some());
        assert!(parse_timestamp("09:30:00.250").is_some());
        assert_eq!(parse_timestamp("not-a-time"), None);
    }

    #[test]
    fn load_csv_assigns_sequential_timestamps() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("ticks.csv");
        let mut f = std::fs::File::create(&path).unwrap();
        writeln!(f, "Time,Symbol,Market Center,Price,Size").unwrap();
        writeln!(f, "a,AAPL,X,100.0,5").unwrap();
        writeln!(f, "b,MSFT,X,50.0,2").unwrap();
        writeln!(f, ",BAD,X,1.0,1").unwrap();
        writeln!(f, "c,AAPL,X,101.0,1").unwrap();
        drop(f);

        let ticks = load_tick_csv(&path, 2).unwrap();
        assert_eq!(ticks.len(), 3);
        let stamps: Vec<i64> = ticks.iter().map(|t| t.timestamp).collect();
        assert_eq!(stamps, vec![0, 1, 2]);
        assert_eq!(ticks[2].symbol, "AAPL");
        assert_eq!(ticks[2].price, 101.0);
    }

    #[test]
    fn empty_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("empty.csv");
        std::fs::write(&path, "Time,Symbol,Market Center,Price,Size\n").unwrap();
        assert!(matches!(
            load_tick_csv(&path, 1),
            Err(ReplayError::Empty(_))
        ));
    }
}
