//! Backpressure policy for outbound queues.
//!
//! The outbound queue capacity is the only throttle in the relay. When a
//! destination's queue is full, new payloads for it are dropped. What
//! happens to a destination that keeps dropping is configurable:
//! - `evict_after_drops: None` tolerates it indefinitely.
//! - `evict_after_drops: Some(n)` evicts it after `n` drops in a row.

/// Default number of payloads a connection may have queued.
pub const DEFAULT_QUEUE_CAPACITY: usize = 256;

/// How outbound queues are sized and how slow consumers are treated.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BackpressurePolicy {
    /// Outbound queue capacity per connection.
    pub queue_capacity: usize,

    /// Evict a destination after this many consecutive drops.
    pub evict_after_drops: Option<u32>,
}

impl Default for BackpressurePolicy {
    fn default() -> Self {
        BackpressurePolicy {
            queue_capacity: DEFAULT_QUEUE_CAPACITY,
            evict_after_drops: None,
        }
    }
}

impl BackpressurePolicy {
    pub fn new(queue_capacity: usize, evict_after_drops: Option<u32>) -> Self {
        BackpressurePolicy {
            queue_capacity: queue_capacity.max(1),
            evict_after_drops: evict_after_drops.filter(|n| *n > 0),
        }
    }

    /// Whether a destination with `consecutive_drops` should be evicted.
    pub fn should_evict(&self, consecutive_drops: u32) -> bool {
        match self.evict_after_drops {
            Some(limit) => consecutive_drops >= limit,
            None => false,
        }
    }
}
