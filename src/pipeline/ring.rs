//! Bounded single-producer/single-consumer ring.
//!
//! A thin wrapper over `crossbeam_queue::ArrayQueue` that fixes the contract
//! the pipeline relies on: fixed capacity chosen at construction, push that
//! rejects instead of blocking, pop that returns empty instead of waiting.
//! The queue itself is MPMC-safe; the engine keeps each side single-threaded
//! so FIFO order is total.
//!
//! Drop policy lives with the producer: on a rejected push the caller bumps
//! a drop counter and continues. Under sustained overload the system loses
//! the tail of the stream, it never stalls upstream.

use crossbeam_queue::ArrayQueue;

pub struct SpscRing<T> {
    queue: ArrayQueue<T>,
}

impl<T> SpscRing<T> {
    /// Create a ring with a fixed capacity. Panics on zero capacity.
    pub fn new(capacity: usize) -> Self {
        Self {
            queue: ArrayQueue::new(capacity),
        }
    }

    /// Push an item. `Err` returns the item when the ring is full; a
    /// rejected push leaves the ring untouched.
    #[inline]
    pub fn push(&self, item: T) -> Result<(), T> {
        self.queue.push(item)
    }

    /// Pop the oldest item, or `None` when empty.
    #[inline]
    pub fn pop(&self) -> Option<T> {
        self.queue.pop()
    }

    /// Observational only; may be stale by the time it is read.
    #[inline]
    pub fn len(&self) -> usize {
        self.queue.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }

    #[inline]
    pub fn capacity(&self) -> usize {
        self.queue.capacity()
    }
}
