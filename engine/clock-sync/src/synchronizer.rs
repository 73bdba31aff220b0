//! Skew and delay estimation against a [`ClockAuthority`]

use chrono::Duration;
use futures::StreamExt;
use parking_lot::RwLock;
use session_core::{TimeSource, Timestamp};
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::authority::ClockAuthority;
use crate::config::SyncConfig;
use crate::error::{ClockSyncError, SyncResult};
use crate::metrics::SyncMetrics;

/// Result of one successful synchronization round
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ClockEstimate {
    /// Authority time minus local time at the sync mark
    pub skew: Duration,

    /// Estimated one-way latency, assumed symmetric
    pub delay: Duration,

    /// Local time at which the round completed
    pub measured_at: Timestamp,
}

impl ClockEstimate {
    /// Estimated authority time for a local instant
    pub fn adjust(&self, local: Timestamp) -> Timestamp {
        local + self.skew + self.delay
    }

    /// Total correction applied by [`ClockEstimate::adjust`]
    pub fn offset(&self) -> Duration {
        self.skew + self.delay
    }
}

/// Estimates and holds the clock correction for one client process.
///
/// Rounds are single-flight: a caller arriving while a round is running waits for it
/// and then runs its own.
pub struct ClockSynchronizer<A> {
    authority: A,
    local: Arc<dyn TimeSource>,
    config: SyncConfig,
    estimate: Arc<RwLock<Option<ClockEstimate>>>,
    in_flight: tokio::sync::Mutex<()>,
    metrics: SyncMetrics,
}

impl<A: ClockAuthority> ClockSynchronizer<A> {
    pub fn new(authority: A, local: Arc<dyn TimeSource>, config: SyncConfig) -> Self {
        Self {
            authority,
            local,
            config,
            estimate: Arc::new(RwLock::new(None)),
            in_flight: tokio::sync::Mutex::new(()),
            metrics: SyncMetrics::new(),
        }
    }

    pub fn config(&self) -> &SyncConfig {
        &self.config
    }

    pub fn metrics(&self) -> &SyncMetrics {
        &self.metrics
    }

    /// Latest estimate, if any round has succeeded
    pub fn estimate(&self) -> Option<ClockEstimate> {
        *self.estimate.read()
    }

    /// Run one synchronization round.
    ///
    /// On failure the previous estimate stays in place and the error is returned to the
    /// caller, which decides whether to retry.
    pub async fn synchronize(&self) -> SyncResult<ClockEstimate> {
        let _round = self.in_flight.lock().await;
        self.metrics.record_attempt();

        match self.measure().await {
            Ok(estimate) => {
                *self.estimate.write() = Some(estimate);
                self.metrics.record_success(&estimate);
                info!(
                    skew_ms = estimate.skew.num_milliseconds(),
                    delay_ms = estimate.delay.num_milliseconds(),
                    "Clock synchronized"
                );
                Ok(estimate)
            }
            Err(e) => {
                self.metrics.record_failure();
                warn!("Clock synchronization failed, keeping previous estimate: {}", e);
                Err(e)
            }
        }
    }

    /// Estimated authority time for a local instant
    pub fn adjust(&self, local: Timestamp) -> SyncResult<Timestamp> {
        self.estimate().map(|e| e.adjust(local)).ok_or(ClockSyncError::NotSynchronized)
    }

    /// Estimated authority time right now
    pub fn adjusted_now(&self) -> SyncResult<Timestamp> {
        self.adjust(self.local.now())
    }

    /// A [`TimeSource`] that follows every later resynchronization
    pub fn time_source(&self) -> SyncResult<AdjustedClock> {
        if self.estimate().is_none() {
            return Err(ClockSyncError::NotSynchronized);
        }
        Ok(AdjustedClock { local: Arc::clone(&self.local), estimate: Arc::clone(&self.estimate) })
    }

    async fn measure(&self) -> SyncResult<ClockEstimate> {
        let timeout = self.config.call_timeout();

        let (mark, server) = tokio::time::timeout(timeout, self.sync_exchange())
            .await
            .map_err(|_| ClockSyncError::Timeout { call: "Sync", timeout })??;
        let skew = server - mark;

        let request_at = self.local.now() + skew;
        let reply = tokio::time::timeout(timeout, self.authority.delay())
            .await
            .map_err(|_| ClockSyncError::Timeout { call: "Delay", timeout })??;
        let delay = (reply - request_at) / 2;

        debug!("Sync mark {} server {} delay reply {}", mark, server, reply);
        Ok(ClockEstimate { skew, delay, measured_at: self.local.now() })
    }

    /// Returns (T_mark, T_server)
    async fn sync_exchange(&self) -> SyncResult<(Timestamp, Timestamp)> {
        let mut replies = self.authority.sync().await?;
        let mut mark = None;
        let mut server = None;
        let mut received = 0usize;

        while let Some(reply) = replies.next().await {
            let reply = reply?;
            received += 1;
            match received {
                1 => {
                    mark = Some(self.local.now());
                    if reply.timestamp.is_some() {
                        return Err(ClockSyncError::ProtocolViolation(
                            "first sync message carries a payload".to_string(),
                        ));
                    }
                }
                2 => {
                    let timestamp = reply.timestamp.ok_or_else(|| {
                        ClockSyncError::ProtocolViolation(
                            "second sync message carries no timestamp".to_string(),
                        )
                    })?;
                    server = Some(timestamp);
                }
                _ => {
                    return Err(ClockSyncError::ProtocolViolation(format!(
                        "authority sent {} sync messages, expected 2",
                        received
                    )));
                }
            }
        }

        match (mark, server) {
            (Some(mark), Some(server)) => Ok((mark, server)),
            _ => Err(ClockSyncError::IncompleteSync { received }),
        }
    }
}

/// Local clock corrected by the synchronizer's current estimate
#[derive(Clone)]
pub struct AdjustedClock {
    local: Arc<dyn TimeSource>,
    estimate: Arc<RwLock<Option<ClockEstimate>>>,
}

impl TimeSource for AdjustedClock {
    fn now(&self) -> Timestamp {
        let local = self.local.now();
        // Only handed out once an estimate exists, and estimates are never removed.
        match *self.estimate.read() {
            Some(estimate) => estimate.adjust(local),
            None => local,
        }
    }
}
