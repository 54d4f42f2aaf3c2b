//! End-to-end scenarios for the event pipeline: scripted strategies feed
//! the real engine with both workers running, and a channel-backed fill
//! callback synchronizes the assertions.

use std::collections::VecDeque;
use std::sync::mpsc;
use std::time::Duration;
use winter::engine::{Engine, EngineConfig, FillEvent};
use winter::strategy::Strategy;
use winter::types::{Order, OrderSide, Signal, SignalKind, Tick};

/// Emits a pre-scripted signal kind per tick, priced off the tick.
struct ScriptedStrategy {
    script: VecDeque<SignalKind>,
}

impl ScriptedStrategy {
    fn new(kinds: &[SignalKind]) -> Self {
        Self {
            script: kinds.iter().copied().collect(),
        }
    }
}

impl Strategy for ScriptedStrategy {
    fn name(&self) -> &str {
        "Scripted"
    }

    fn process_tick(&mut self, tick: &Tick) -> Vec<Signal> {
        match self.script.pop_front() {
            Some(kind) => vec![Signal::new(&tick.symbol, kind, 1.0, tick.price)],
            None => Vec::new(),
        }
    }
}

fn engine_with_callback(
    cash: f64,
    strategy: Box<dyn Strategy>,
) -> (Engine, mpsc::Receiver<FillEvent>) {
    let mut engine = Engine::new(EngineConfig::default());
    engine.portfolio().write().unwrap().set_cash(cash);
    engine.add_strategy(strategy);
    let (tx, rx) = mpsc::channel();
    engine.set_fill_callback(move |event: &FillEvent| {
        tx.send(event.clone()).expect("test receiver alive");
    });
    (engine, rx)
}

const FILL_WAIT: Duration = Duration::from_secs(5);

#[test]
fn basic_buy_then_sell_to_flat() {
    // S1: one BUY@100 against 10k cash sizes to floor(1000/100) = 10.
    let strategy = ScriptedStrategy::new(&[SignalKind::Buy, SignalKind::Sell]);
    let (mut engine, fills) = engine_with_callback(10_000.0, Box::new(strategy));
    engine.start(None, None);

    assert!(engine.process_tick(Tick::new("AAPL", 100.0, 1, 1)));
    let fill = fills.recv_timeout(FILL_WAIT).expect("buy fill");
    assert_eq!(fill.order.side, OrderSide::Buy);
    assert_eq!(fill.order.quantity, 10);
    assert_eq!(fill.order.price, 100.0);
    assert_eq!(fill.cash_after, 9_000.0);
    assert_eq!(fill.position_after, 10);
    engine.drain();

    {
        let portfolio = engine.portfolio();
        let book = portfolio.read().unwrap();
        assert_eq!(book.position("AAPL"), 10);
        assert_eq!(book.cash(), 9_000.0);
        assert_eq!(book.trade_count(), 1);
        let trade = &book.trades()[0];
        assert_eq!(trade.side, OrderSide::Buy);
        assert_eq!(trade.quantity, 10);
        assert_eq!(trade.price, 100.0);
    }

    // S2: SELL@110 flattens, realizing 10 * (110 - 100) = 100.
    assert!(engine.process_tick(Tick::new("AAPL", 110.0, 1, 2)));
    let fill = fills.recv_timeout(FILL_WAIT).expect("sell fill");
    assert_eq!(fill.order.side, OrderSide::Sell);
    assert_eq!(fill.order.quantity, 10);
    assert_eq!(fill.realized_pnl, 100.0);
    assert_eq!(fill.cash_after, 10_100.0);
    assert_eq!(fill.position_after, 0);
    engine.drain();
    engine.stop();

    let portfolio = engine.portfolio();
    let book = portfolio.read().unwrap();
    assert_eq!(book.position("AAPL"), 0);
    assert!(book.positions().is_empty());
    assert_eq!(book.cash(), 10_100.0);
    assert_eq!(book.trade_count(), 2);
    let sell = &book.trades()[1];
    assert_eq!(sell.side, OrderSide::Sell);
    assert_eq!(sell.realized_pnl, 100.0);
    assert_eq!(sell.price, 110.0);
}

#[test]
fn oversell_reconciles_to_held_quantity() {
    // S3: the book holds 5; an order for 10 fills partially for 5 with
    // the order quantity mutated, and no error surfaces.
    let strategy = ScriptedStrategy::new(&[]);
    let (mut engine, fills) = engine_with_callback(0.0, Box::new(strategy));
    engine
        .portfolio()
        .write()
        .unwrap()
        .add_position("AAPL", 5, 500.0);
    engine.start(None, None);

    assert!(engine.submit_order(Order::new("AAPL", OrderSide::Sell, 10, 100.0)));
    let fill = fills.recv_timeout(FILL_WAIT).expect("partial fill");
    assert_eq!(fill.order.quantity, 5, "order mutated to held quantity");
    assert_eq!(fill.realized_pnl, 5.0 * (100.0 - 100.0));
    assert_eq!(fill.position_after, 0);
    engine.drain();

    // A second sell against the now-empty book is silently dropped.
    assert!(engine.submit_order(Order::new("AAPL", OrderSide::Sell, 10, 100.0)));
    engine.drain();
    assert!(fills.recv_timeout(Duration::from_millis(200)).is_err());

    engine.stop();
    let portfolio = engine.portfolio();
    let book = portfolio.read().unwrap();
    assert!(book.positions().is_empty());
    assert_eq!(book.cash(), 500.0);
    assert_eq!(engine.stats().fills, 1);
}

#[test]
fn exit_signal_flattens_long_position() {
    let strategy = ScriptedStrategy::new(&[SignalKind::Buy, SignalKind::Exit]);
    let (mut engine, fills) = engine_with_callback(10_000.0, Box::new(strategy));
    engine.start(None, None);

    engine.process_tick(Tick::new("MSFT", 50.0, 1, 1));
    let fill = fills.recv_timeout(FILL_WAIT).expect("buy fill");
    assert_eq!(fill.order.quantity, 20); // floor(1000 / 50)
    engine.drain();

    engine.process_tick(Tick::new("MSFT", 55.0, 1, 2));
    let fill = fills.recv_timeout(FILL_WAIT).expect("exit fill");
    assert_eq!(fill.order.side, OrderSide::Sell);
    assert_eq!(fill.order.quantity, 20);
    assert_eq!(fill.realized_pnl, 100.0);
    engine.drain();
    engine.stop();

    let portfolio = engine.portfolio();
    assert!(portfolio.read().unwrap().positions().is_empty());
}

#[test]
fn neutral_signals_are_idempotent() {
    let strategy = ScriptedStrategy::new(&[SignalKind::Neutral, SignalKind::Neutral]);
    let (mut engine, fills) = engine_with_callback(10_000.0, Box::new(strategy));
    engine.start(None, None);

    engine.process_tick(Tick::new("KO", 60.0, 1, 1));
    engine.process_tick(Tick::new("KO", 61.0, 1, 2));
    engine.drain();
    engine.stop();

    assert!(fills.recv_timeout(Duration::from_millis(100)).is_err());
    let stats = engine.stats();
    assert_eq!(stats.orders_submitted, 0);
    assert_eq!(stats.fills, 0);
    let portfolio = engine.portfolio();
    let book = portfolio.read().unwrap();
    assert_eq!(book.cash(), 10_000.0);
    assert_eq!(book.trade_count(), 0);
}

#[test]
fn buy_is_skipped_when_cash_would_go_negative() {
    // Sizing floors to zero quantity at this price; no order is created.
    let strategy = ScriptedStrategy::new(&[SignalKind::Buy]);
    let (mut engine, fills) = engine_with_callback(50.0, Box::new(strategy));
    engine.start(None, None);

    engine.process_tick(Tick::new("BRK", 1_000.0, 1, 1));
    engine.drain();
    engine.stop();

    assert!(fills.recv_timeout(Duration::from_millis(100)).is_err());
    assert_eq!(engine.stats().orders_submitted, 0);
    let portfolio = engine.portfolio();
    assert_eq!(portfolio.read().unwrap().cash(), 50.0);
}

#[test]
fn tick_ring_overflow_sheds_and_counts() {
    // S4: capacity 4, workers never started. Four pushes land, the fifth
    // is rejected, and exactly one drop is counted.
    let engine = Engine::new(EngineConfig {
        tick_queue_capacity: 4,
        ..Default::default()
    });
    for i in 0..4 {
        assert!(engine.process_tick(Tick::new("SPY", 400.0, 1, i)));
    }
    assert!(!engine.process_tick(Tick::new("SPY", 400.0, 1, 4)));
    let stats = engine.stats();
    assert_eq!(stats.ticks_accepted, 4);
    assert_eq!(stats.ticks_dropped, 1);
}

#[test]
fn fill_callbacks_preserve_order_ring_order() {
    let strategy = ScriptedStrategy::new(&[SignalKind::Buy, SignalKind::Buy, SignalKind::Buy]);
    let (mut engine, fills) = engine_with_callback(1_000_000.0, Box::new(strategy));
    engine.start(None, None);

    for (i, symbol) in ["A1", "B2", "C3"].iter().enumerate() {
        engine.process_tick(Tick::new(*symbol, 10.0, 1, i as i64));
        engine.drain();
    }
    engine.stop();

    let symbols: Vec<String> = (0..3)
        .map(|_| fills.recv_timeout(FILL_WAIT).unwrap().order.symbol)
        .collect();
    assert_eq!(symbols, vec!["A1", "B2", "C3"]);
}
