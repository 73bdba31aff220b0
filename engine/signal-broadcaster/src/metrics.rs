//! Metrics collection for the signal broadcaster

use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BroadcasterMetricsSnapshot {
    pub signals_received: u64,
    pub batches_delivered: u64,
    pub backpressure_faults: u64,
    pub consumers_dropped: u64,
    pub late_batches: u64,
}

#[derive(Debug, Default)]
pub struct BroadcasterMetrics {
    signals_received: AtomicU64,
    batches_delivered: AtomicU64,
    backpressure_faults: AtomicU64,
    consumers_dropped: AtomicU64,
    late_batches: AtomicU64,
}

impl BroadcasterMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_signal(&self) {
        self.signals_received.fetch_add(1, Ordering::Relaxed);
        metrics::increment_counter!("broadcaster_signals_received_total");
    }

    pub fn record_batch(&self, consumers: usize) {
        self.batches_delivered.fetch_add(1, Ordering::Relaxed);
        metrics::increment_counter!("broadcaster_batches_delivered_total");
        metrics::gauge!("broadcaster_consumers", consumers as f64);
    }

    pub fn record_backpressure(&self) {
        self.backpressure_faults.fetch_add(1, Ordering::Relaxed);
        metrics::increment_counter!("broadcaster_backpressure_faults_total");
    }

    pub fn record_dropped_consumer(&self) {
        self.consumers_dropped.fetch_add(1, Ordering::Relaxed);
        metrics::increment_counter!("broadcaster_consumers_dropped_total");
    }

    /// How far behind the clock a batch went out
    pub fn record_delivery_lag(&self, lag: chrono::Duration) {
        let seconds = lag.num_milliseconds().max(0) as f64 / 1_000.0;
        metrics::gauge!("broadcaster_delivery_lag_seconds", seconds);
    }

    pub fn set_late_batches(&self, late: u64) {
        self.late_batches.store(late, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> BroadcasterMetricsSnapshot {
        BroadcasterMetricsSnapshot {
            signals_received: self.signals_received.load(Ordering::Relaxed),
            batches_delivered: self.batches_delivered.load(Ordering::Relaxed),
            backpressure_faults: self.backpressure_faults.load(Ordering::Relaxed),
            consumers_dropped: self.consumers_dropped.load(Ordering::Relaxed),
            late_batches: self.late_batches.load(Ordering::Relaxed),
        }
    }
}
