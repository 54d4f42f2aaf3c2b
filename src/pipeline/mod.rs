//! Lock-free plumbing between the pipeline stages.
//!
//! The engine owns two [`SpscRing`]s (ticks in, orders out), recycles tick
//! allocations through a [`TickPool`], and pins its workers with
//! [`pin_current_thread`]. Nothing here blocks: a full ring rejects the
//! push and the producer moves on.

mod affinity;
mod pool;
mod ring;

pub use affinity::pin_current_thread;
pub use pool::TickPool;
pub use ring::SpscRing;
