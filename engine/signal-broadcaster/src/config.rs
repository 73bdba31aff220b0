//! Configuration for the signal broadcaster

use crate::{
    DEFAULT_BACKPRESSURE_TIMEOUT_MS, DEFAULT_PRODUCER_CAPACITY, DEFAULT_QUEUE_CAPACITY,
    DEFAULT_STRAGGLER_TIMEOUT_MS,
};
use serde::{Deserialize, Serialize};
use std::time::Duration;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BroadcasterConfig {
    /// Depth of each consumer's batch queue
    pub queue_capacity: usize,

    /// Depth of each producer's signal queue
    pub producer_capacity: usize,

    /// Signals at most this far apart may share a batch (0 = identical timestamps only)
    pub coalesce_window_ms: u64,

    /// How long one send may wait on a full consumer queue
    pub backpressure_timeout_ms: u64,

    /// Release held signals this long after they arrived, even if a producer lags behind
    pub straggler_timeout_ms: Option<u64>,
}

impl Default for BroadcasterConfig {
    fn default() -> Self {
        Self {
            queue_capacity: DEFAULT_QUEUE_CAPACITY,
            producer_capacity: DEFAULT_PRODUCER_CAPACITY,
            coalesce_window_ms: 0,
            backpressure_timeout_ms: DEFAULT_BACKPRESSURE_TIMEOUT_MS,
            straggler_timeout_ms: Some(DEFAULT_STRAGGLER_TIMEOUT_MS),
        }
    }
}

impl BroadcasterConfig {
    pub fn coalesce_window(&self) -> chrono::Duration {
        chrono::Duration::milliseconds(self.coalesce_window_ms as i64)
    }

    pub fn backpressure_timeout(&self) -> Duration {
        Duration::from_millis(self.backpressure_timeout_ms)
    }

    pub fn straggler_timeout(&self) -> Option<Duration> {
        self.straggler_timeout_ms.map(Duration::from_millis)
    }
}
