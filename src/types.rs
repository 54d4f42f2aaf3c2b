//! Common Types Module
//!
//! Shared value types that flow through the event pipeline. Kept in one
//! module to avoid circular dependencies between the engine, the book and
//! the strategies.

use serde::{Deserialize, Serialize};

/// Order side (buy or sell)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum OrderSide {
    Buy,
    Sell,
}

impl std::fmt::Display for OrderSide {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            OrderSide::Buy => write!(f, "BUY"),
            OrderSide::Sell => write!(f, "SELL"),
        }
    }
}

/// Order type. Only market-like fills are simulated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OrderType {
    #[default]
    Market,
}

/// One observation of price and volume for a symbol at a point in time.
///
/// Ticks are immutable once built. Storage is recycled through
/// [`crate::pipeline::TickPool`] on the producer side; hand-off to the
/// strategy worker is by value through the tick ring.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Tick {
    /// The trading symbol (e.g., "AAPL").
    pub symbol: String,
    /// Trade price. Always positive for a valid tick.
    pub price: f64,
    /// Trade size. Zero is allowed (quote-only feeds).
    pub volume: i32,
    /// Microseconds since the epoch, or a sequence number in replay.
    pub timestamp: i64,
}

impl Tick {
    pub fn new(symbol: impl Into<String>, price: f64, volume: i32, timestamp: i64) -> Self {
        Self {
            symbol: symbol.into(),
            price,
            volume,
            timestamp,
        }
    }
}

/// What a strategy wants the engine to do about one symbol.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignalKind {
    Buy,
    Sell,
    /// Flatten whatever position exists, long or short.
    Exit,
    /// No action. Produces no order and no state change.
    Neutral,
}

/// A trade intent emitted by a strategy, consumed by the engine in the same
/// scheduling turn. Quantity is decided later by the engine.
#[derive(Debug, Clone, PartialEq)]
pub struct Signal {
    pub symbol: String,
    pub kind: SignalKind,
    /// Signal conviction in `[0, 1]`.
    pub strength: f64,
    /// Reference price the signal was computed at.
    pub price: f64,
}

impl Signal {
    pub fn new(symbol: impl Into<String>, kind: SignalKind, strength: f64, price: f64) -> Self {
        Self {
            symbol: symbol.into(),
            kind,
            strength: strength.clamp(0.0, 1.0),
            price,
        }
    }
}

/// A sized order produced by the engine from a signal.
#[derive(Debug, Clone, PartialEq)]
pub struct Order {
    pub symbol: String,
    pub side: OrderSide,
    pub kind: OrderType,
    pub quantity: i32,
    pub price: f64,
}

impl Order {
    pub fn new(symbol: impl Into<String>, side: OrderSide, quantity: i32, price: f64) -> Self {
        Self {
            symbol: symbol.into(),
            side,
            kind: OrderType::Market,
            quantity,
            price,
        }
    }

    /// Notional value of the order.
    pub fn total_value(&self) -> f64 {
        self.quantity as f64 * self.price
    }
}
