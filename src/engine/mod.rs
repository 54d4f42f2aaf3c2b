//! The event engine.
//!
//! Owns the two rings and the book, and runs the two pipeline workers:
//!
//! ```text
//! producer ──▶ tick ring ──▶ strategy worker ──▶ order ring ──▶ execution worker ──▶ book
//!                                                                      │
//!                                                                 fill callback
//! ```
//!
//! The strategy worker is the sole consumer of the tick ring and the sole
//! producer of the order ring; the execution worker is the sole consumer of
//! the order ring and the sole writer of the book. Ticks are consumed in
//! push order, orders retain their tick's arrival order, and fill callbacks
//! fire in order-ring pop order.
//!
//! Overflow never blocks: a full ring rejects the push and a drop counter
//! advances. `stop` is the only cancellation point; workers finish the
//! batch they already popped and exit.

use crate::pipeline::{pin_current_thread, SpscRing, TickPool};
use crate::portfolio::Portfolio;
use crate::strategy::Strategy;
use crate::types::{Order, OrderSide, Signal, SignalKind, Tick};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, RwLock};
use std::thread::JoinHandle;
use std::time::Duration;
use tracing::{info, warn};

/// Drop-counter values at which a diagnostic line is emitted.
const DROP_LOG_INTERVAL: u64 = 10_000;
/// Idle back-off for the worker loops.
const IDLE_SLEEP: Duration = Duration::from_micros(50);

/// Engine tuning. Queue capacities are fixed at `start`.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    pub tick_queue_capacity: usize,
    pub order_queue_capacity: usize,
    /// Maximum ticks (and orders) a worker handles per scheduling turn.
    pub batch_size: usize,
    /// Fraction of free cash a single BUY signal may commit.
    pub max_position_pct: f64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            tick_queue_capacity: 100_000,
            order_queue_capacity: 50_000,
            batch_size: 1_000,
            max_position_pct: 0.10,
        }
    }
}

/// Everything a driver needs to know about one accepted fill.
///
/// Delivered synchronously on the execution worker, after the book mutation
/// and after the book lock has been released. The callback must not block;
/// the execution pipeline stalls while it runs.
#[derive(Debug, Clone)]
pub struct FillEvent {
    /// The order as filled. On a partial fill the quantity is the filled
    /// amount, not the requested one.
    pub order: Order,
    /// Realized P&L of this fill; zero for buys.
    pub realized_pnl: f64,
    pub cash_after: f64,
    pub position_after: i32,
    /// Mark-to-cost portfolio value after the fill.
    pub total_value_after: f64,
}

pub type FillCallback = Box<dyn FnMut(&FillEvent) + Send>;

#[derive(Debug, Default)]
struct Counters {
    ticks_accepted: AtomicU64,
    ticks_dropped: AtomicU64,
    ticks_processed: AtomicU64,
    orders_submitted: AtomicU64,
    orders_dropped: AtomicU64,
    orders_applied: AtomicU64,
    fills: AtomicU64,
}

/// Snapshot of the engine's pipeline counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EngineStats {
    pub ticks_accepted: u64,
    pub ticks_dropped: u64,
    pub ticks_processed: u64,
    pub orders_submitted: u64,
    pub orders_dropped: u64,
    pub orders_applied: u64,
    pub fills: u64,
}

pub struct Engine {
    config: EngineConfig,
    tick_ring: Arc<SpscRing<Tick>>,
    order_ring: Arc<SpscRing<Order>>,
    /// Consumed ticks flow back to the producer here so its pool can
    /// recycle them. Hand-off by ring, never by shared pool access.
    recycle_ring: Arc<SpscRing<Tick>>,
    portfolio: Arc<RwLock<Portfolio>>,
    strategies: Vec<Box<dyn Strategy>>,
    fill_callback: Option<FillCallback>,
    running: Arc<AtomicBool>,
    counters: Arc<Counters>,
    strategy_handle: Option<JoinHandle<()>>,
    execution_handle: Option<JoinHandle<()>>,
}

impl Engine {
    pub fn new(config: EngineConfig) -> Self {
        let tick_ring = Arc::new(SpscRing::new(config.tick_queue_capacity));
        let order_ring = Arc::new(SpscRing::new(config.order_queue_capacity));
        let recycle_ring = Arc::new(SpscRing::new(config.tick_queue_capacity));
        Self {
            config,
            tick_ring,
            order_ring,
            recycle_ring,
            portfolio: Arc::new(RwLock::new(Portfolio::new())),
            strategies: Vec::new(),
            fill_callback: None,
            running: Arc::new(AtomicBool::new(false)),
            counters: Arc::new(Counters::default()),
            strategy_handle: None,
            execution_handle: None,
        }
    }

    /// Replace the configuration. Queue capacities take effect by
    /// rebuilding the rings, so anything still queued is discarded;
    /// rejected while the engine is running.
    pub fn configure(&mut self, config: EngineConfig) {
        if self.running.load(Ordering::Acquire) {
            warn!("configure ignored: engine running");
            return;
        }
        self.tick_ring = Arc::new(SpscRing::new(config.tick_queue_capacity));
        self.order_ring = Arc::new(SpscRing::new(config.order_queue_capacity));
        self.recycle_ring = Arc::new(SpscRing::new(config.tick_queue_capacity));
        self.counters = Arc::new(Counters::default());
        self.config = config;
    }

    /// Shared handle to the book. Read it only while the engine is stopped
    /// or from inside the fill callback.
    pub fn portfolio(&self) -> Arc<RwLock<Portfolio>> {
        Arc::clone(&self.portfolio)
    }

    /// Append a strategy. Must happen before `start`.
    pub fn add_strategy(&mut self, strategy: Box<dyn Strategy>) {
        if self.running.load(Ordering::Acquire) {
            warn!("add_strategy ignored: engine already running");
            return;
        }
        self.strategies.push(strategy);
    }

    /// Install the fill callback. Runs on the execution worker; must not
    /// block or take locks the producer side holds.
    pub fn set_fill_callback(&mut self, callback: impl FnMut(&FillEvent) + Send + 'static) {
        self.fill_callback = Some(Box::new(callback));
    }

    /// Producer-side push onto the tick ring. Never blocks; returns whether
    /// the tick was accepted. Concurrent producers must serialize their
    /// pushes (the batch API does).
    pub fn process_tick(&self, tick: Tick) -> bool {
        match self.tick_ring.push(tick) {
            Ok(()) => {
                self.counters.ticks_accepted.fetch_add(1, Ordering::Release);
                true
            }
            Err(rejected) => {
                let drops = self.counters.ticks_dropped.fetch_add(1, Ordering::Relaxed) + 1;
                if drops % DROP_LOG_INTERVAL == 1 {
                    warn!(symbol = %rejected.symbol, drops, "tick ring full, dropping data");
                }
                false
            }
        }
    }

    /// Push without the drop policy: a rejected tick is handed back so a
    /// patient producer (the replay driver) can retry instead of shedding
    /// load. Does not advance the drop counter.
    pub fn offer_tick(&self, tick: Tick) -> Result<(), Tick> {
        match self.tick_ring.push(tick) {
            Ok(()) => {
                self.counters.ticks_accepted.fetch_add(1, Ordering::Release);
                Ok(())
            }
            Err(rejected) => Err(rejected),
        }
    }

    /// Inject a pre-sized order directly onto the order ring, bypassing
    /// signal sizing. Callers must serialize with the strategy worker's
    /// own pushes (drivers that size their own orders, tests). Returns
    /// whether the order was accepted.
    pub fn submit_order(&self, order: Order) -> bool {
        match self.order_ring.push(order) {
            Ok(()) => {
                self.counters.orders_submitted.fetch_add(1, Ordering::Release);
                true
            }
            Err(rejected) => {
                let drops = self.counters.orders_dropped.fetch_add(1, Ordering::Relaxed) + 1;
                if drops % DROP_LOG_INTERVAL == 1 {
                    warn!(symbol = %rejected.symbol, drops, "order ring full, dropping order");
                }
                false
            }
        }
    }

    /// Fan a batch of ticks into the ring, serialized by this call.
    /// Returns the number accepted.
    pub fn process_tick_batch(&self, batch: Vec<Tick>) -> usize {
        batch
            .into_iter()
            .map(|t| self.process_tick(t) as usize)
            .sum()
    }

    /// Spawn the strategy and execution workers, pinning each to the given
    /// core when one is provided. Pinning failures are logged and ignored.
    pub fn start(&mut self, strategy_core: Option<usize>, execution_core: Option<usize>) {
        if self.running.swap(true, Ordering::AcqRel) {
            warn!("engine already running");
            return;
        }

        let strategies = std::mem::take(&mut self.strategies);
        let callback = self.fill_callback.take();

        let strategy_ctx = StrategyWorker {
            tick_ring: Arc::clone(&self.tick_ring),
            order_ring: Arc::clone(&self.order_ring),
            recycle_ring: Arc::clone(&self.recycle_ring),
            portfolio: Arc::clone(&self.portfolio),
            running: Arc::clone(&self.running),
            counters: Arc::clone(&self.counters),
            batch_size: self.config.batch_size,
            max_position_pct: self.config.max_position_pct,
            strategies,
        };
        self.strategy_handle = Some(
            std::thread::Builder::new()
                .name("winter-strategy".into())
                .spawn(move || {
                    if let Some(core) = strategy_core {
                        pin_current_thread(core);
                    }
                    strategy_ctx.run();
                })
                .expect("spawn strategy worker"),
        );

        let execution_ctx = ExecutionWorker {
            order_ring: Arc::clone(&self.order_ring),
            portfolio: Arc::clone(&self.portfolio),
            running: Arc::clone(&self.running),
            counters: Arc::clone(&self.counters),
            batch_size: self.config.batch_size,
            callback,
        };
        self.execution_handle = Some(
            std::thread::Builder::new()
                .name("winter-execution".into())
                .spawn(move || {
                    if let Some(core) = execution_core {
                        pin_current_thread(core);
                    }
                    execution_ctx.run();
                })
                .expect("spawn execution worker"),
        );

        info!("engine started");
    }

    /// Cooperative shutdown: workers finish their current batch and exit;
    /// this joins them. The engine is one-shot — strategies and the fill
    /// callback move into the workers at `start`.
    pub fn stop(&mut self) {
        if !self.running.swap(false, Ordering::AcqRel) {
            return;
        }
        if let Some(h) = self.strategy_handle.take() {
            let _ = h.join();
        }
        if let Some(h) = self.execution_handle.take() {
            let _ = h.join();
        }
        info!("engine stopped");
    }

    /// True when every accepted tick has been processed and every
    /// submitted order applied. The replay driver uses this to feed the
    /// pipeline tick-by-tick deterministically.
    pub fn is_quiescent(&self) -> bool {
        let c = &self.counters;
        c.ticks_processed.load(Ordering::Acquire) == c.ticks_accepted.load(Ordering::Acquire)
            && c.orders_applied.load(Ordering::Acquire)
                == c.orders_submitted.load(Ordering::Acquire)
    }

    /// Busy-wait (with yields) until the pipeline is quiescent.
    pub fn drain(&self) {
        while !self.is_quiescent() {
            std::thread::yield_now();
        }
    }

    /// Move consumed ticks back into the producer's pool. Call from the
    /// producer thread; returns the number of ticks reclaimed.
    pub fn reclaim(&self, pool: &mut TickPool) -> usize {
        let mut reclaimed = 0;
        while let Some(tick) = self.recycle_ring.pop() {
            pool.release(tick);
            reclaimed += 1;
        }
        reclaimed
    }

    pub fn stats(&self) -> EngineStats {
        let c = &self.counters;
        EngineStats {
            ticks_accepted: c.ticks_accepted.load(Ordering::Acquire),
            ticks_dropped: c.ticks_dropped.load(Ordering::Acquire),
            ticks_processed: c.ticks_processed.load(Ordering::Acquire),
            orders_submitted: c.orders_submitted.load(Ordering::Acquire),
            orders_dropped: c.orders_dropped.load(Ordering::Acquire),
            orders_applied: c.orders_applied.load(Ordering::Acquire),
            fills: c.fills.load(Ordering::Acquire),
        }
    }
}

impl Drop for Engine {
    fn drop(&mut self) {
        self.stop();
    }
}

struct StrategyWorker {
    tick_ring: Arc<SpscRing<Tick>>,
    order_ring: Arc<SpscRing<Order>>,
    recycle_ring: Arc<SpscRing<Tick>>,
    portfolio: Arc<RwLock<Portfolio>>,
    running: Arc<AtomicBool>,
    counters: Arc<Counters>,
    batch_size: usize,
    max_position_pct: f64,
    strategies: Vec<Box<dyn Strategy>>,
}

impl StrategyWorker {
    fn run(mut self) {
        info!(strategies = self.strategies.len(), "strategy worker started");
        for s in &mut self.strategies {
            s.initialize();
        }

        let mut batch = Vec::with_capacity(self.batch_size);
        while self.running.load(Ordering::Acquire) {
            batch.clear();
            while batch.len() < self.batch_size {
                match self.tick_ring.pop() {
                    Some(t) => batch.push(t),
                    None => break,
                }
            }

            if batch.is_empty() {
                std::thread::sleep(IDLE_SLEEP);
                continue;
            }

            for tick in &batch {
                for idx in 0..self.strategies.len() {
                    if !self.strategies[idx].is_enabled() {
                        continue;
                    }
                    let signals = self.strategies[idx].process_tick(tick);
                    for signal in signals {
                        self.dispatch(&signal);
                    }
                }
                self.counters.ticks_processed.fetch_add(1, Ordering::Release);
            }

            // Offer the consumed ticks back to the producer's pool. A
            // full recycle ring just means they deallocate normally.
            for tick in batch.drain(..) {
                let _ = self.recycle_ring.push(tick);
            }
        }

        for s in &mut self.strategies {
            s.shutdown();
        }
        info!("strategy worker exited");
    }

    /// Convert a signal into a sized order and push it onto the order
    /// ring. Neutral signals and unaffordable or empty sizings are
    /// skipped silently; the strategy may retry on the next tick.
    fn dispatch(&self, signal: &Signal) {
        if signal.kind == SignalKind::Neutral || signal.price <= 0.0 {
            return;
        }

        let order = {
            let book = self.portfolio.read().expect("book lock poisoned");
            match signal.kind {
                SignalKind::Buy => {
                    let cash = book.cash();
                    let budget = (cash * self.max_position_pct).min(cash);
                    let quantity = (budget / signal.price).floor() as i32;
                    if quantity <= 0 || quantity as f64 * signal.price > cash {
                        return;
                    }
                    Order::new(&signal.symbol, OrderSide::Buy, quantity, signal.price)
                }
                SignalKind::Sell => {
                    let held = book.position(&signal.symbol);
                    if held <= 0 {
                        return;
                    }
                    Order::new(&signal.symbol, OrderSide::Sell, held, signal.price)
                }
                SignalKind::Exit => {
                    let position = book.position(&signal.symbol);
                    if position == 0 {
                        return;
                    }
                    let side = if position > 0 {
                        OrderSide::Sell
                    } else {
                        OrderSide::Buy
                    };
                    Order::new(&signal.symbol, side, position.abs(), signal.price)
                }
                SignalKind::Neutral => unreachable!(),
            }
        };

        match self.order_ring.push(order) {
            Ok(()) => {
                self.counters.orders_submitted.fetch_add(1, Ordering::Release);
            }
            Err(rejected) => {
                let drops = self.counters.orders_dropped.fetch_add(1, Ordering::Relaxed) + 1;
                if drops % DROP_LOG_INTERVAL == 1 {
                    warn!(symbol = %rejected.symbol, drops, "order ring full, dropping order");
                }
            }
        }
    }
}

struct ExecutionWorker {
    order_ring: Arc<SpscRing<Order>>,
    portfolio: Arc<RwLock<Portfolio>>,
    running: Arc<AtomicBool>,
    counters: Arc<Counters>,
    batch_size: usize,
    callback: Option<FillCallback>,
}

impl ExecutionWorker {
    fn run(mut self) {
        info!("execution worker started");
        let mut batch = Vec::with_capacity(self.batch_size);
        while self.running.load(Ordering::Acquire) {
            batch.clear();
            while batch.len() < self.batch_size {
                match self.order_ring.pop() {
                    Some(o) => batch.push(o),
                    None => break,
                }
            }

            if batch.is_empty() {
                std::thread::sleep(IDLE_SLEEP);
                continue;
            }

            for order in batch.drain(..) {
                self.apply(order);
            }
        }
        info!("execution worker exited");
    }

    fn apply(&mut self, order: Order) {
        let event = match order.side {
            OrderSide::Buy => self.apply_buy(order),
            OrderSide::Sell => self.apply_sell(order),
        };
        // Callback runs outside the book lock so it may read the book.
        if let Some(event) = event {
            self.counters.fills.fetch_add(1, Ordering::Release);
            if let Some(cb) = self.callback.as_mut() {
                cb(&event);
            }
        }
        self.counters.orders_applied.fetch_add(1, Ordering::Release);
    }

    fn apply_buy(&self, order: Order) -> Option<FillEvent> {
        let cost = order.total_value();
        let mut book = self.portfolio.write().expect("book lock poisoned");
        if book.cash() < cost {
            warn!(symbol = %order.symbol, cost, cash = book.cash(), "insufficient cash for order");
            return None;
        }
        book.reduce_cash(cost);
        book.add_position(&order.symbol, order.quantity, cost);
        Some(FillEvent {
            realized_pnl: 0.0,
            cash_after: book.cash(),
            position_after: book.position(&order.symbol),
            total_value_after: book.total_value(),
            order,
        })
    }

    fn apply_sell(&self, mut order: Order) -> Option<FillEvent> {
        let mut book = self.portfolio.write().expect("book lock poisoned");
        let held = book.position(&order.symbol);
        if held <= 0 {
            // No position at all: nothing to reconcile against.
            return None;
        }
        if held < order.quantity {
            // Oversell: fill what is actually held and report the
            // modified quantity through the callback.
            info!(
                symbol = %order.symbol,
                requested = order.quantity,
                available = held,
                "partial position, selling available quantity"
            );
            order.quantity = held;
        }
        let realized = book.reduce_position(&order.symbol, order.quantity, order.price);
        book.add_cash(order.total_value());
        Some(FillEvent {
            realized_pnl: realized,
            cash_after: book.cash(),
            position_after: book.position(&order.symbol),
            total_value_after: book.total_value(),
            order,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn overflow_rejects_and_counts() {
        // Ring capacity 4, workers never started: the fifth push must be
        // rejected and counted, and the ring must stay at capacity.
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
    fn batch_push_reports_accepted_count() {
        let engine = Engine::new(EngineConfig {
            tick_queue_capacity: 3,
            ..Default::default()
        });
        let batch: Vec<Tick> = (0..5).map(|i| Tick::new("QQQ", 300.0, 1, i)).collect();
        assert_eq!(engine.process_tick_batch(batch), 3);
        assert_eq!(engine.stats().ticks_dropped, 2);
    }

    #[test]
    fn stopped_engine_is_quiescent_when_empty() {
        let engine = Engine::new(EngineConfig::default());
        assert!(engine.is_quiescent());
    }

    #[test]
    fn configure_rebuilds_rings_and_resets_counters() {
        let mut engine = Engine::new(EngineConfig::default());
        engine.process_tick(Tick::new("SPY", 400.0, 1, 0));
        engine.configure(EngineConfig {
            tick_queue_capacity: 2,
            ..Default::default()
        });
        assert!(engine.is_quiescent(), "counters reset with the rings");
        assert!(engine.process_tick(Tick::new("SPY", 400.0, 1, 1)));
        assert!(engine.process_tick(Tick::new("SPY", 400.0, 1, 2)));
        assert!(!engine.process_tick(Tick::new("SPY", 400.0, 1, 3)));
    }
}
