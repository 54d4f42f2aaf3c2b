//! The book: cash, positions and the trade log.
//!
//! Accounting is average-cost. Buying adds to the lot cost; selling
//! realizes P&L against the average cost and leaves the remaining lot's
//! average cost unchanged. A position whose quantity reaches zero is
//! removed from the map.
//!
//! The book is single-writer: only the execution worker mutates it.
//! Drivers read it after the engine has stopped, or through the fill
//! callback which runs on the execution worker.

use crate::types::OrderSide;
use std::collections::HashMap;
use tracing::warn;

/// An open lot for one symbol.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Position {
    pub quantity: i32,
    /// Total cost of the lot. `quantity > 0` implies `cost > 0`.
    pub cost: f64,
}

impl Position {
    pub fn average_cost(&self) -> f64 {
        if self.quantity > 0 {
            self.cost / self.quantity as f64
        } else {
            0.0
        }
    }
}

/// One accepted fill, appended to the trade log by the book.
#[derive(Debug, Clone, PartialEq)]
pub struct Trade {
    pub symbol: String,
    pub side: OrderSide,
    pub quantity: i32,
    /// Execution price. For sells this is the order price, not the
    /// average cost.
    pub price: f64,
    /// Cost basis moved by this trade.
    pub cost: f64,
    /// Realized P&L; zero for buys.
    pub realized_pnl: f64,
    /// Monotonic fill sequence number. Deterministic across replays;
    /// drivers attach wall-clock times to their own records.
    pub timestamp: i64,
}

#[derive(Debug, Default)]
pub struct Portfolio {
    cash: f64,
    positions: HashMap<String, Position>,
    trades: Vec<Trade>,
    trade_count: i32,
    fill_seq: i64,
}

impl Portfolio {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_cash(&mut self, amount: f64) {
        self.cash = amount;
    }

    pub fn cash(&self) -> f64 {
        self.cash
    }

    pub fn add_cash(&mut self, amount: f64) {
        self.cash += amount;
    }

    /// Deduct cash. Warns when the balance goes negative but still
    /// applies; the engine is responsible for rejecting such buys.
    pub fn reduce_cash(&mut self, amount: f64) {
        self.cash -= amount;
        if self.cash < 0.0 {
            warn!(cash = self.cash, "portfolio cash balance negative");
        }
    }

    pub fn position(&self, symbol: &str) -> i32 {
        self.positions.get(symbol).map_or(0, |p| p.quantity)
    }

    pub fn position_cost(&self, symbol: &str) -> f64 {
        self.positions.get(symbol).map_or(0.0, |p| p.cost)
    }

    pub fn positions(&self) -> &HashMap<String, Position> {
        &self.positions
    }

    /// Add a bought lot and record the BUY trade at `cost / quantity`.
    pub fn add_position(&mut self, symbol: &str, quantity: i32, cost: f64) {
        debug_assert!(quantity > 0 && cost >= 0.0);
        let entry = self
            .positions
            .entry(symbol.to_string())
            .or_insert(Position {
                quantity: 0,
                cost: 0.0,
            });
        entry.quantity += quantity;
        entry.cost += cost;

        self.record_trade(Trade {
            symbol: symbol.to_string(),
            side: OrderSide::Buy,
            quantity,
            price: cost / quantity as f64,
            cost,
            realized_pnl: 0.0,
            timestamp: 0,
        });
    }

    /// Sell `quantity` at `price` against the existing lot.
    ///
    /// The cost basis released is `quantity * average_cost`, so the
    /// average cost of whatever remains is untouched. Returns the realized
    /// P&L, which is also recorded on the SELL trade. Selling more than is
    /// held is a caller bug; the engine reconciles oversells before
    /// calling this.
    pub fn reduce_position(&mut self, symbol: &str, quantity: i32, price: f64) -> f64 {
        debug_assert!(quantity > 0);
        let Some(pos) = self.positions.get_mut(symbol) else {
            debug_assert!(false, "reduce_position on unknown symbol {symbol}");
            return 0.0;
        };
        debug_assert!(pos.quantity >= quantity, "oversell reached the book");

        let avg_cost = pos.average_cost();
        let cost_basis = quantity as f64 * avg_cost;
        let realized = quantity as f64 * (price - avg_cost);

        pos.quantity -= quantity;
        pos.cost -= cost_basis;
        if pos.quantity <= 0 {
            self.positions.remove(symbol);
        }

        self.record_trade(Trade {
            symbol: symbol.to_string(),
            side: OrderSide::Sell,
            quantity,
            price,
            cost: cost_basis,
            realized_pnl: realized,
            timestamp: 0,
        });
        realized
    }

    fn record_trade(&mut self, mut trade: Trade) {
        self.fill_seq += 1;
        trade.timestamp = self.fill_seq;
        self.trades.push(trade);
        self.trade_count += 1;
    }

    /// Cash plus the cost basis of open positions (mark-to-cost). Marking
    /// to market is the caller's job when current prices are known.
    pub fn total_value(&self) -> f64 {
        self.cash + self.positions.values().map(|p| p.cost).sum::<f64>()
    }

    pub fn trade_count(&self) -> i32 {
        self.trade_count
    }

    pub fn trades(&self) -> &[Trade] {
        &self.trades
    }
}
