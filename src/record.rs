//! Driver-side trade recording.
//!
//! Both drivers install a [`TradeRecorder`] as the engine's fill callback:
//! it keeps the human-facing trade rows for `winter_trades.csv`, the
//! per-fill equity curve, and the closed round-trips the analyzer needs
//! for MFE/MAE and win-rate statistics.
//!
//! The recorder also watches raw ticks on the producer side to maintain
//! per-symbol z-scores (reported alongside each fill, as the signal
//! context) and the unrealized excursion of open lots.

use crate::analytics::ClosedTrade;
use crate::engine::FillEvent;
use crate::math::RollingWindow;
use crate::types::{OrderSide, Tick};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

/// Window used for the reported per-symbol z-score.
const Z_WINDOW: usize = 20;

/// One row of `winter_trades.csv`.
#[derive(Debug, Clone)]
pub struct TradeRow {
    pub time: String,
    pub symbol: String,
    pub side: OrderSide,
    pub quantity: i32,
    pub price: f64,
    pub value: f64,
    /// Realized P&L; only sells carry one.
    pub pnl: Option<f64>,
    pub z_score: f64,
}

#[derive(Debug, Clone, Copy)]
struct OpenLot {
    quantity: i32,
    avg_price: f64,
    max_favorable: f64,
    max_adverse: f64,
}

#[derive(Default)]
struct RecorderState {
    rows: Vec<TradeRow>,
    equity: Vec<f64>,
    closed: Vec<ClosedTrade>,
    lots: HashMap<String, OpenLot>,
    z_scores: HashMap<String, f64>,
    windows: HashMap<String, RollingWindow>,
}

/// Everything recorded over one run.
pub struct RecorderSnapshot {
    pub rows: Vec<TradeRow>,
    pub equity: Vec<f64>,
    pub closed: Vec<ClosedTrade>,
}

type TimeLabelFn = Box<dyn Fn() -> String + Send + Sync>;

struct Inner {
    state: Mutex<RecorderState>,
    /// Stamps each fill row. Replay injects the current tick sequence so
    /// runs are reproducible; live injects a wall-clock formatter.
    time_label: TimeLabelFn,
}

#[derive(Clone)]
pub struct TradeRecorder {
    inner: Arc<Inner>,
}

impl TradeRecorder {
    pub fn new(initial_balance: f64, time_label: impl Fn() -> String + Send + Sync + 'static) -> Self {
        let mut state = RecorderState::default();
        state.equity.push(initial_balance);
        Self {
            inner: Arc::new(Inner {
                state: Mutex::new(state),
                time_label: Box::new(time_label),
            }),
        }
    }

    /// Producer-side per-tick bookkeeping: z-score windows and the
    /// excursion of any open lot in this symbol.
    pub fn observe_tick(&self, tick: &Tick) {
        let mut state = self.inner.state.lock().expect("recorder lock");
        let window = state
            .windows
            .entry(tick.symbol.clone())
            .or_insert_with(|| RollingWindow::new(Z_WINDOW));
        window.push(tick.price);
        let z = window.z_score(tick.price);
        state.z_scores.insert(tick.symbol.clone(), z);

        if let Some(lot) = state.lots.get_mut(&tick.symbol) {
            let unrealized = (tick.price - lot.avg_price) * lot.quantity as f64;
            if unrealized > lot.max_favorable {
                lot.max_favorable = unrealized;
            }
            if -unrealized > lot.max_adverse {
                lot.max_adverse = -unrealized;
            }
        }
    }

    /// Fill-callback entry point: records the trade row, the equity
    /// point, and closes round-trips on sells.
    pub fn record_fill(&self, event: &FillEvent) {
        let time = (self.inner.time_label)();
        let mut state = self.inner.state.lock().expect("recorder lock");
        let order = &event.order;
        let z_score = state.z_scores.get(&order.symbol).copied().unwrap_or(0.0);

        match order.side {
            OrderSide::Buy => {
                let lot = state.lots.entry(order.symbol.clone()).or_insert(OpenLot {
                    quantity: 0,
                    avg_price: 0.0,
                    max_favorable: 0.0,
                    max_adverse: 0.0,
                });
                let total = lot.quantity + order.quantity;
                lot.avg_price = (lot.avg_price * lot.quantity as f64
                    + order.price * order.quantity as f64)
                    / total as f64;
                lot.quantity = total;
            }
            OrderSide::Sell => {
                if let Some(lot) = state.lots.get_mut(&order.symbol) {
                    let entry_price = lot.avg_price;
                    let (max_favorable, max_adverse) = (lot.max_favorable, lot.max_adverse);
                    lot.quantity -= order.quantity;
                    let gone = lot.quantity <= 0;
                    if gone {
                        state.lots.remove(&order.symbol);
                    }
                    state.closed.push(ClosedTrade {
                        symbol: order.symbol.clone(),
                        entry_price,
                        exit_price: order.price,
                        quantity: order.quantity as f64,
                        max_favorable,
                        max_adverse,
                        is_long: true,
                    });
                }
            }
        }

        state.rows.push(TradeRow {
            time,
            symbol: order.symbol.clone(),
            side: order.side,
            quantity: order.quantity,
            price: order.price,
            value: order.total_value(),
            pnl: match order.side {
                OrderSide::Sell => Some(event.realized_pnl),
                OrderSide::Buy => None,
            },
            z_score,
        });
        state.equity.push(event.total_value_after);
    }

    pub fn snapshot(&self) -> RecorderSnapshot {
        let state = self.inner.state.lock().expect("recorder lock");
        RecorderSnapshot {
            rows: state.rows.clone(),
            equity: state.equity.clone(),
            closed: state.closed.clone(),
        }
    }

    pub fn fill_count(&self) -> usize {
        self.inner.state.lock().expect("recorder lock").rows.len()
    }
}
