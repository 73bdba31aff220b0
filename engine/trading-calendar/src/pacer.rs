//! Real-time pacing of a generated event sequence

use serde::{Deserialize, Serialize};
use session_core::{Signal, TimeSource, Timestamp};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::generator::SessionEvents;
use crate::DEFAULT_MAX_SLEEP_MS;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PacerConfig {
    /// Longest single sleep before the clock is read again. Bounds how late an event
    /// can be after the clock estimate moves.
    pub max_sleep_ms: u64,

    /// Drop sessions that already finished when the pacer starts
    pub skip_completed_sessions: bool,
}

impl Default for PacerConfig {
    fn default() -> Self {
        Self { max_sleep_ms: DEFAULT_MAX_SLEEP_MS, skip_completed_sessions: true }
    }
}

impl PacerConfig {
    pub fn max_sleep(&self) -> Duration {
        Duration::from_millis(self.max_sleep_ms)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PacerExit {
    /// Every event was sent
    Completed,
    /// The cancellation token fired
    Cancelled,
    /// The receiving side went away
    OutputClosed,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PacerReport {
    pub exit: PacerExit,
    pub emitted: u64,
    pub skipped_sessions: usize,
}

/// Emits one exchange's events as their timestamps come due on a [`TimeSource`]
pub struct EventPacer {
    events: SessionEvents,
    clock: Arc<dyn TimeSource>,
    output: mpsc::Sender<Signal>,
    config: PacerConfig,
}

impl EventPacer {
    pub fn new(
        events: SessionEvents,
        clock: Arc<dyn TimeSource>,
        output: mpsc::Sender<Signal>,
        config: PacerConfig,
    ) -> Self {
        Self { events, clock, output, config }
    }

    pub async fn run(mut self, cancel: CancellationToken) -> PacerReport {
        let exchange = self.events.exchange().clone();
        let skipped_sessions = if self.config.skip_completed_sessions {
            self.events.skip_completed_sessions(self.clock.now())
        } else {
            0
        };
        if skipped_sessions > 0 {
            info!("Pacer for {} skipped {} completed session(s)", exchange, skipped_sessions);
        }

        let mut emitted = 0u64;
        let exit = loop {
            let Some((timestamp, event)) = self.events.next() else {
                break PacerExit::Completed;
            };

            if !self.wait_until(timestamp, &cancel).await {
                break PacerExit::Cancelled;
            }

            let signal = Signal::new(timestamp, event, exchange.clone());
            tokio::select! {
                _ = cancel.cancelled() => break PacerExit::Cancelled,
                sent = self.output.send(signal) => {
                    if sent.is_err() {
                        warn!("Pacer for {} lost its output channel", exchange);
                        break PacerExit::OutputClosed;
                    }
                }
            }

            emitted += 1;
            debug!("{} {} at {}", exchange, event, timestamp);
        };

        info!("Pacer for {} stopped: {:?} after {} event(s)", exchange, exit, emitted);
        PacerReport { exit, emitted, skipped_sessions }
    }

    /// Sleep in bounded slices until `due`. False if cancelled first.
    async fn wait_until(&self, due: Timestamp, cancel: &CancellationToken) -> bool {
        loop {
            if cancel.is_cancelled() {
                return false;
            }
            let remaining = match (due - self.clock.now()).to_std() {
                Ok(remaining) if !remaining.is_zero() => remaining,
                // Already due
                _ => return true,
            };

            tokio::select! {
                _ = cancel.cancelled() => return false,
                _ = tokio::time::sleep(remaining.min(self.config.max_sleep())) => {}
            }
        }
    }
}
