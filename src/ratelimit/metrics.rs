//! Metrics collaborator notified by the limiter.

use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};

use super::state::Drained;
use crate::error::LimiterError;

/// Receives admission and maintenance events from a limiter.
///
/// Callbacks run outside the limiter's state locks and must not block.
pub trait MetricsSink<K, R>: Send + Sync {
    fn on_admitted(&self, key: &K);

    fn on_throttled(&self, key: &K);

    /// A leaky-bucket item left the queue.
    fn on_drained(&self, _item: &Drained<K, R>) {}

    /// A key was evicted after being idle past the ttl.
    fn on_evicted(&self, _key: &K) {}

    /// A maintenance tick failed; the loop keeps running.
    fn on_tick_error(&self, _error: &LimiterError) {}
}

/// Sink that ignores every event.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopMetrics;

impl<K, R> MetricsSink<K, R> for NoopMetrics {
    fn on_admitted(&self, _key: &K) {}

    fn on_throttled(&self, _key: &K) {}
}

/// Lock-free event counters owned by one limiter.
#[derive(Debug, Default)]
pub struct CounterMetrics {
    admitted: AtomicU64,
    throttled: AtomicU64,
    drained: AtomicU64,
    evicted: AtomicU64,
    tick_errors: AtomicU64,
}

/// Point-in-time copy of [`CounterMetrics`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct MetricsSnapshot {
    pub admitted: u64,
    pub throttled: u64,
    pub drained: u64,
    pub evicted: u64,
    pub tick_errors: u64,
}

impl CounterMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            admitted: self.admitted.load(Ordering::Relaxed),
            throttled: self.throttled.load(Ordering::Relaxed),
            drained: self.drained.load(Ordering::Relaxed),
            evicted: self.evicted.load(Ordering::Relaxed),
            tick_errors: self.tick_errors.load(Ordering::Relaxed),
        }
    }
}

impl<K, R> MetricsSink<K, R> for CounterMetrics {
    fn on_admitted(&self, _key: &K) {
        self.admitted.fetch_add(1, Ordering::Relaxed);
    }

    fn on_throttled(&self, _key: &K) {
        self.throttled.fetch_add(1, Ordering::Relaxed);
    }

    fn on_drained(&self, _item: &Drained<K, R>) {
        self.drained.fetch_add(1, Ordering::Relaxed);
    }

    fn on_evicted(&self, _key: &K) {
        self.evicted.fetch_add(1, Ordering::Relaxed);
    }

    fn on_tick_error(&self, _error: &LimiterError) {
        self.tick_errors.fetch_add(1, Ordering::Relaxed);
    }
}
