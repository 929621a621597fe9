//! Internal metrics for monitoring the coordination machine.
//!
//! Plain atomic counters and gauges; whatever exporter the embedding
//! process runs can poll [`CoordinationMetrics::snapshot`].

use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};

/// A monotonically increasing counter.
#[derive(Debug, Default)]
pub struct Counter {
    value: AtomicU64,
}

impl Counter {
    /// Create a counter at zero.
    pub const fn new() -> Self {
        Self {
            value: AtomicU64::new(0),
        }
    }

    /// Increment the counter by 1.
    pub fn inc(&self) {
        self.value.fetch_add(1, Ordering::Relaxed);
    }

    /// Get the current value.
    pub fn get(&self) -> u64 {
        self.value.load(Ordering::Relaxed)
    }
}

/// A gauge that can move in both directions.
#[derive(Debug, Default)]
pub struct Gauge {
    value: AtomicI64,
}

impl Gauge {
    /// Create a gauge at zero.
    pub const fn new() -> Self {
        Self {
            value: AtomicI64::new(0),
        }
    }

    /// Set the gauge to a specific value.
    pub fn set(&self, value: i64) {
        self.value.store(value, Ordering::Relaxed);
    }

    /// Get the current value.
    pub fn get(&self) -> i64 {
        self.value.load(Ordering::Relaxed)
    }
}

/// Metrics kept by one host's coordination machine.
#[derive(Debug, Default)]
pub struct CoordinationMetrics {
    /// Structurally valid messages dispatched to the current state.
    pub messages_dispatched: Counter,
    /// Messages rejected at the validation boundary.
    pub messages_rejected: Counter,
    /// Timer firings delivered to the current state.
    pub timers_fired: Counter,
    /// Timer firings discarded because the machine had moved on.
    pub timers_stale: Counter,
    /// State transitions applied.
    pub transitions: Counter,
    /// Assignment recomputations performed by this host.
    pub rebalances: Counter,
    /// Buckets currently owned by this host.
    pub owned_buckets: Gauge,
    /// 1 while this host is the leader, 0 otherwise.
    pub is_leader: Gauge,
}

impl CoordinationMetrics {
    /// Create a zeroed metrics set.
    pub fn new() -> Self {
        Self::default()
    }

    /// Point-in-time copy of every metric.
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            messages_dispatched: self.messages_dispatched.get(),
            messages_rejected: self.messages_rejected.get(),
            timers_fired: self.timers_fired.get(),
            timers_stale: self.timers_stale.get(),
            transitions: self.transitions.get(),
            rebalances: self.rebalances.get(),
            owned_buckets: self.owned_buckets.get(),
            is_leader: self.is_leader.get(),
        }
    }
}

/// Point-in-time view of [`CoordinationMetrics`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MetricsSnapshot {
    pub messages_dispatched: u64,
    pub messages_rejected: u64,
    pub timers_fired: u64,
    pub timers_stale: u64,
    pub transitions: u64,
    pub rebalances: u64,
    pub owned_buckets: i64,
    pub is_leader: i64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counter_increments() {
        let counter = Counter::new();
        assert_eq!(counter.get(), 0);
        counter.inc();
        counter.inc();
        assert_eq!(counter.get(), 2);
    }

    #[test]
    fn test_gauge_moves_both_ways() {
        let gauge = Gauge::new();
        gauge.set(42);
        assert_eq!(gauge.get(), 42);
        gauge.set(-1);
        assert_eq!(gauge.get(), -1);
    }

    #[test]
    fn test_snapshot_reflects_current_values() {
        let metrics = CoordinationMetrics::new();
        metrics.transitions.inc();
        metrics.owned_buckets.set(128);

        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.transitions, 1);
        assert_eq!(snapshot.owned_buckets, 128);
        assert_eq!(snapshot.messages_dispatched, 0);
    }
}
