// SPDX-License-Identifier: Apache-2.0

//! Lightweight, single-threaded counters and gauges for the streaming
//! core's ambient observability.
//!
//! The reference pack's telemetry stack (`otap-df-telemetry`) is built
//! around a multi-threaded metrics registry and reporter that assumes a
//! pipeline of independently scheduled nodes; this crate's single-actor,
//! `Rc<RefCell<_>>` concurrency model (§5) has no concurrent writers to
//! reconcile, so plain `Cell`-backed counters play the same role without
//! the registry machinery. `tracing` remains the event-level log surface;
//! these are the cumulative counters a tick-driven collector would sample.

use std::cell::Cell;

/// A monotonically increasing counter.
#[derive(Debug, Default)]
pub struct Counter(Cell<u64>);

impl Counter {
    /// Creates a counter starting at zero.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds `n` to the counter.
    pub fn add(&self, n: u64) {
        self.0.set(self.0.get() + n);
    }

    /// Current value.
    #[must_use]
    pub fn get(&self) -> u64 {
        self.0.get()
    }
}

/// A point-in-time value that can move up or down.
#[derive(Debug, Default)]
pub struct Gauge(Cell<i64>);

impl Gauge {
    /// Creates a gauge starting at zero.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Overwrites the gauge's value.
    pub fn set(&self, value: i64) {
        self.0.set(value);
    }

    /// Current value.
    #[must_use]
    pub fn get(&self) -> i64 {
        self.0.get()
    }
}

/// Per-stream-manager counters, sampled by a tick-driven collector rather
/// than pushed eagerly on every event.
#[derive(Debug, Default)]
pub struct StreamMetrics {
    /// Total batches shipped across every outbound path.
    pub batches_emitted: Counter,
    /// Total batches accepted across every inbound path.
    pub batches_received: Counter,
    /// Total `ack_batch` messages forced by the low watermark or the tick.
    pub acks_forced: Counter,
    /// Total paths torn down via `forced_close`/`forced_drop`.
    pub forced_terminations: Counter,
    /// Current buffered element count, as last reported by the downstream
    /// manager's `buffered()`.
    pub buffered: Gauge,
    /// Current aggregate outbound credit, as last reported by
    /// `total_credit()`.
    pub total_credit: Gauge,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counter_accumulates() {
        let c = Counter::new();
        c.add(3);
        c.add(4);
        assert_eq!(c.get(), 7);
    }

    #[test]
    fn gauge_overwrites() {
        let g = Gauge::new();
        g.set(5);
        g.set(-2);
        assert_eq!(g.get(), -2);
    }
}
