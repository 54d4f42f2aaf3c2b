//! Fixed-block tick pool.
//!
//! Ticks move through the ring by value, so what the pool amortizes is the
//! allocation behind each tick (chiefly the symbol `String`). Released ticks
//! keep their heap capacity and are handed back out on the next `acquire`.
//! The free list grows a block at a time and never shrinks.
//!
//! The pool is single-threaded by design: each producer owns one. Cross-
//! thread hand-off happens through the ring, never through shared pool
//! access.

use crate::types::Tick;

const DEFAULT_BLOCK_SIZE: usize = 4096;

#[derive(Debug)]
pub struct TickPool {
    free: Vec<Tick>,
    block_size: usize,
    /// Total ticks ever created by this pool, for diagnostics.
    allocated: usize,
}

impl TickPool {
    pub fn new() -> Self {
        Self::with_block_size(DEFAULT_BLOCK_SIZE)
    }

    pub fn with_block_size(block_size: usize) -> Self {
        assert!(block_size > 0);
        let mut pool = Self {
            free: Vec::new(),
            block_size,
            allocated: 0,
        };
        pool.grow();
        pool
    }

    fn grow(&mut self) {
        self.free.reserve(self.block_size);
        for _ in 0..self.block_size {
            self.free.push(Tick::default());
        }
        self.allocated += self.block_size;
    }

    /// Take a recycled tick and fill it in. O(1) unless the pool has to
    /// grow by a block.
    pub fn acquire(&mut self, symbol: &str, price: f64, volume: i32, timestamp: i64) -> Tick {
        let mut tick = match self.free.pop() {
            Some(t) => t,
            None => {
                self.grow();
                self.free.pop().expect("grow added a block")
            }
        };
        tick.symbol.clear();
        tick.symbol.push_str(symbol);
        tick.price = price;
        tick.volume = volume;
        tick.timestamp = timestamp;
        tick
    }

    /// Return a tick to the pool. The symbol buffer keeps its capacity.
    pub fn release(&mut self, tick: Tick) {
        self.free.push(tick);
    }

    /// Ticks currently sitting in the free list.
    pub fn available(&self) -> usize {
        self.free.len()
    }

    /// Total ticks ever allocated (free + in flight).
    pub fn allocated(&self) -> usize {
        self.allocated
    }
}

impl Default for TickPool {
    fn default() -> Self {
        Self::new()
    }
}
