//! Live driver: stream ticks from a pub/sub endpoint into the engine.
//!
//! The subscriber itself is an external collaborator; this module owns
//! the contract ([`TickSource`]) and a plain TCP implementation that
//! reads newline-delimited JSON objects of the form
//! `{"Symbol": "AAPL", "Price": 101.5, "Size": 3}`. Extra fields are
//! ignored, malformed records are skipped, and timestamps are synthesized
//! at receipt (wall-clock microseconds).

use crate::engine::{Engine, EngineConfig};
use crate::pipeline::TickPool;
use crate::record::{RecorderSnapshot, TradeRecorder};
use crate::strategy::Strategy;
use crate::types::Tick;
use chrono::Utc;
use serde::Deserialize;
use std::io::{BufRead, BufReader};
use std::net::TcpStream;
use thiserror::Error;
use tracing::{info, warn};

#[derive(Debug, Error)]
pub enum FeedError {
    #[error("invalid endpoint '{0}': expected tcp://host:port")]
    BadEndpoint(String),
    #[error("failed to connect to '{endpoint}': {source}")]
    Connect {
        endpoint: String,
        source: std::io::Error,
    },
    #[error("feed read error: {0}")]
    Read(#[from] std::io::Error),
}

/// A source of live ticks. `Ok(None)` is a clean end of stream.
pub trait TickSource {
    fn next_tick(&mut self, pool: &mut TickPool) -> Result<Option<Tick>, FeedError>;
}

/// Wire format of one tick. Unknown fields are ignored by serde.
#[derive(Debug, Deserialize)]
struct WireTick {
    #[serde(rename = "Symbol")]
    symbol: String,
    #[serde(rename = "Price")]
    price: f64,
    #[serde(rename = "Size")]
    size: i32,
}

/// Newline-delimited JSON over TCP.
pub struct TcpJsonSource {
    reader: BufReader<TcpStream>,
    line: String,
    skipped: u64,
}

impl TcpJsonSource {
    /// Connect to a `tcp://host:port` endpoint.
    pub fn connect(endpoint: &str) -> Result<Self, FeedError> {
        let address = endpoint
            .strip_prefix("tcp://")
            .ok_or_else(|| FeedError::BadEndpoint(endpoint.to_string()))?;
        if address.is_empty() {
            return Err(FeedError::BadEndpoint(endpoint.to_string()));
        }
        info!(endpoint, "connecting to market data socket");
        let stream = TcpStream::connect(address).map_err(|source| FeedError::Connect {
            endpoint: endpoint.to_string(),
            source,
        })?;
        info!(endpoint, "connected to market data socket");
        Ok(Self {
            reader: BufReader::new(stream),
            line: String::new(),
            skipped: 0,
        })
    }
}

impl TickSource for TcpJsonSource {
    fn next_tick(&mut self, pool: &mut TickPool) -> Result<Option<Tick>, FeedError> {
        loop {
            self.line.clear();
            let read = self.reader.read_line(&mut self.line)?;
            if read == 0 {
                info!(skipped = self.skipped, "market data stream closed");
                return Ok(None);
            }
            let trimmed = self.line.trim();
            if trimmed.is_empty() {
                continue;
            }
            match serde_json::from_str::<WireTick>(trimmed) {
                Ok(wire) if wire.price > 0.0 && wire.size >= 0 => {
                    let timestamp = Utc::now().timestamp_micros();
                    return Ok(Some(pool.acquire(&wire.symbol, wire.price, wire.size, timestamp)));
                }
                Ok(_) => {
                    self.skipped += 1;
                }
                Err(e) => {
                    self.skipped += 1;
                    if self.skipped % 1_000 == 1 {
                        warn!(error = %e, skipped = self.skipped, "skipping malformed tick");
                    }
                }
            }
        }
    }
}

/// Summary of a live session.
pub struct LiveSummary {
    pub initial_balance: f64,
    pub final_balance: f64,
    pub trade_count: i32,
    pub ticks_fed: u64,
    pub ticks_dropped: u64,
    pub recording: RecorderSnapshot,
}

#[derive(Debug, Clone)]
pub struct LiveConfig {
    pub initial_balance: f64,
    pub engine: EngineConfig,
    pub strategy_core: Option<usize>,
    pub execution_core: Option<usize>,
}

impl Default for LiveConfig {
    fn default() -> Self {
        Self {
            initial_balance: 5_000_000.0,
            engine: EngineConfig::default(),
            strategy_core: Some(0),
            execution_core: Some(1),
        }
    }
}

pub struct LiveDriver {
    config: LiveConfig,
}

impl LiveDriver {
    pub fn new(config: LiveConfig) -> Self {
        Self { config }
    }

    /// Pump the source into the engine until the stream ends or the book
    /// runs out of cash. Ticks the ring rejects are shed (drop counter);
    /// consumed ticks are recycled through the pool.
    pub fn run(
        &self,
        mut source: impl TickSource,
        strategy: Box<dyn Strategy>,
    ) -> Result<LiveSummary, FeedError> {
        let cfg = &self.config;
        let mut engine = Engine::new(cfg.engine.clone());
        engine
            .portfolio()
            .write()
            .expect("book lock")
            .set_cash(cfg.initial_balance);
        engine.add_strategy(strategy);

        let recorder = TradeRecorder::new(cfg.initial_balance, || {
            Utc::now().format("%H:%M:%S").to_string()
        });
        let callback_recorder = recorder.clone();
        engine.set_fill_callback(move |event| callback_recorder.record_fill(event));

        engine.start(cfg.strategy_core, cfg.execution_core);
        info!(balance = cfg.initial_balance, "live session started");

        let mut pool = TickPool::new();
        let mut ticks_fed = 0u64;
        while let Some(tick) = source.next_tick(&mut pool)? {
            recorder.observe_tick(&tick);
            engine.process_tick(tick);
            ticks_fed += 1;
            engine.reclaim(&mut pool);

            // A dry book means every further buy is rejected anyway.
            if ticks_fed % 1_024 == 0 {
                let cash = engine.portfolio().read().expect("book lock").cash();
                if cash <= 0.0 {
                    warn!("out of funds, stopping live session");
                    break;
                }
            }
        }

        engine.drain();
        engine.stop();

        let stats = engine.stats();
        let portfolio = engine.portfolio();
        let book = portfolio.read().expect("book lock");
        let summary = LiveSummary {
            initial_balance: cfg.initial_balance,
            final_balance: book.total_value(),
            trade_count: book.trade_count(),
            ticks_fed,
            ticks_dropped: stats.ticks_dropped,
            recording: recorder.snapshot(),
        };
        info!(
            trades = summary.trade_count,
            final_balance = summary.final_balance,
            dropped = summary.ticks_dropped,
            "live session complete"
        );
        Ok(summary)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use std::net::TcpListener;

    /// Scripted in-memory source for driver tests.
    struct VecSource(Vec<Tick>);

    impl TickSource for VecSource {
        fn next_tick(&mut self, _pool: &mut TickPool) -> Result<Option<Tick>, FeedError> {
            if self.0.is_empty() {
                Ok(None)
            } else {
                Ok(Some(self.0.remove(0)))
            }
        }
    }

    struct NullStrategy;
    impl Strategy for NullStrategy {
        fn name(&self) -> &str {
            "Null"
        }
        fn process_tick(&mut self, _tick: &Tick) -> Vec<crate::types::Signal> {
            Vec::new()
        }
    }

    #[test]
    fn endpoint_validation() {
        assert!(matches!(
            TcpJsonSource::connect("ipc:///tmp/x"),
            Err(FeedError::BadEndpoint(_))
        ));
        assert!(matches!(
            TcpJsonSource::connect("tcp://"),
            Err(FeedError::BadEndpoint(_))
        ));
    }

    #[test]
    fn tcp_source_parses_and_skips() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        let server = std::thread::spawn(move || {
            let (mut stream, _) = listener.accept().unwrap();
            writeln!(stream, r#"{{"Symbol":"AAPL","Price":101.5,"Size":3}}"#).unwrap();
            writeln!(stream, "not json at all").unwrap();
            writeln!(stream, r#"{{"Symbol":"BAD","Price":-1,"Size":3}}"#).unwrap();
            writeln!(
                stream,
                r#"{{"Symbol":"MSFT","Price":50.25,"Size":7,"Extra":"ignored"}}"#
            )
            .unwrap();
        });

        let mut source = TcpJsonSource::connect(&format!("tcp://{addr}")).unwrap();
        let mut pool = TickPool::new();

        let t1 = source.next_tick(&mut pool).unwrap().unwrap();
        assert_eq!(t1.symbol, "AAPL");
        assert_eq!(t1.price, 101.5);
        assert_eq!(t1.volume, 3);
        assert!(t1.timestamp > 0);

        // The junk line and the negative price are skipped.
        let t2 = source.next_tick(&mut pool).unwrap().unwrap();
        assert_eq!(t2.symbol, "MSFT");
        assert_eq!(t2.volume, 7);

        assert!(source.next_tick(&mut pool).unwrap().is_none());
        server.join().unwrap();
    }

    #[test]
    fn live_driver_runs_to_stream_end() {
        let ticks: Vec<Tick> = (0..50)
            .map(|i| Tick::new("AAPL", 100.0 + i as f64 * 0.01, 1, i))
            .collect();
        let driver = LiveDriver::new(LiveConfig {
            initial_balance: 10_000.0,
            strategy_core: None,
            execution_core: None,
            ..Default::default()
        });
        let summary = driver.run(VecSource(ticks), Box::new(NullStrategy)).unwrap();
        assert_eq!(summary.ticks_fed, 50);
        assert_eq!(summary.trade_count, 0);
        assert_eq!(summary.final_balance, 10_000.0);
    }
}
