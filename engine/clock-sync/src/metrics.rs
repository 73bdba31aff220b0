//! Metrics collection for the clock synchronizer

use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};

use crate::synchronizer::ClockEstimate;

/// Point-in-time view of the synchronizer counters
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncMetricsSnapshot {
    pub attempts: u64,
    pub successes: u64,
    pub failures: u64,
    pub last_skew_us: i64,
    pub last_delay_us: i64,
}

/// Counters for synchronization rounds, mirrored to the `metrics` facade
#[derive(Debug, Default)]
pub struct SyncMetrics {
    attempts: AtomicU64,
    successes: AtomicU64,
    failures: AtomicU64,
    last_skew_us: AtomicI64,
    last_delay_us: AtomicI64,
}

impl SyncMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_attempt(&self) {
        self.attempts.fetch_add(1, Ordering::Relaxed);
        metrics::increment_counter!("clock_sync_attempts_total");
    }

    pub fn record_success(&self, estimate: &ClockEstimate) {
        let skew_us = estimate.skew.num_microseconds().unwrap_or(i64::MAX);
        let delay_us = estimate.delay.num_microseconds().unwrap_or(i64::MAX);
        self.successes.fetch_add(1, Ordering::Relaxed);
        self.last_skew_us.store(skew_us, Ordering::Relaxed);
        self.last_delay_us.store(delay_us, Ordering::Relaxed);
        metrics::gauge!("clock_sync_skew_us", skew_us as f64);
        metrics::gauge!("clock_sync_delay_us", delay_us as f64);
    }

    pub fn record_failure(&self) {
        self.failures.fetch_add(1, Ordering::Relaxed);
        metrics::increment_counter!("clock_sync_failures_total");
    }

    pub fn snapshot(&self) -> SyncMetricsSnapshot {
        SyncMetricsSnapshot {
            attempts: self.attempts.load(Ordering::Relaxed),
            successes: self.successes.load(Ordering::Relaxed),
            failures: self.failures.load(Ordering::Relaxed),
            last_skew_us: self.last_skew_us.load(Ordering::Relaxed),
            last_delay_us: self.last_delay_us.load(Ordering::Relaxed),
        }
    }
}
