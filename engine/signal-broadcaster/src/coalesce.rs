//! Ordering and grouping of released signals into batches

use chrono::Duration;
use session_core::{Batch, Signal, Timestamp};
use std::collections::HashSet;
use tokio::time::Instant;
use tracing::warn;

/// Holds signals until they are safe to release and turns them into batches.
///
/// Released signals are sorted by timestamp, lifecycle order and exchange, then grouped
/// greedily: a batch spans at most `window` from its first signal and carries at most
/// one signal per exchange. Batch timestamps never go backwards.
#[derive(Debug, Clone)]
pub struct Coalescer {
    window: Duration,
    /// Held signals with the local instant they were received
    pending: Vec<(Signal, Instant)>,
    last_delivered: Option<Timestamp>,
    clamped: u64,
}

impl Coalescer {
    pub fn new(window: Duration) -> Self {
        Self { window, pending: Vec::new(), last_delivered: None, clamped: 0 }
    }

    pub fn window(&self) -> Duration {
        self.window
    }

    pub fn push(&mut self, signal: Signal) {
        self.push_received(signal, Instant::now());
    }

    pub fn push_received(&mut self, signal: Signal, received: Instant) {
        self.pending.push((signal, received));
    }

    pub fn pending(&self) -> usize {
        self.pending.len()
    }

    /// Timestamp of the oldest held signal
    pub fn oldest_pending(&self) -> Option<Timestamp> {
        self.pending.iter().map(|(s, _)| s.timestamp).min()
    }

    /// Local instant the longest-held signal arrived
    pub fn earliest_received(&self) -> Option<Instant> {
        self.pending.iter().map(|(_, received)| *received).min()
    }

    /// Latest source timestamp among signals received at or before `cutoff`
    pub fn received_through(&self, cutoff: Instant) -> Option<Timestamp> {
        self.pending
            .iter()
            .filter(|(_, received)| *received <= cutoff)
            .map(|(s, _)| s.timestamp)
            .max()
    }

    /// Batches whose timestamp had to be raised to keep delivery ordered
    pub fn clamped(&self) -> u64 {
        self.clamped
    }

    /// Release every held signal for which `ready` holds, up to the first that is not
    pub fn release(&mut self, ready: impl Fn(&Signal) -> bool) -> Vec<Batch> {
        self.pending.sort_by(|(a, _), (b, _)| a.sort_key().cmp(&b.sort_key()));
        let cut = self.pending.iter().position(|(s, _)| !ready(s)).unwrap_or(self.pending.len());
        if cut == 0 {
            return Vec::new();
        }
        let released: Vec<Signal> = self.pending.drain(..cut).map(|(signal, _)| signal).collect();
        self.group(released)
    }

    /// Release everything regardless of watermarks
    pub fn flush(&mut self) -> Vec<Batch> {
        self.release(|_| true)
    }

    fn group(&mut self, released: Vec<Signal>) -> Vec<Batch> {
        let mut batches = Vec::new();
        let mut current: Vec<Signal> = Vec::new();
        let mut exchanges = HashSet::new();

        for signal in released {
            let starts_new = match current.first() {
                Some(first) => {
                    signal.timestamp - first.timestamp > self.window
                        || exchanges.contains(&signal.exchange)
                }
                None => false,
            };
            if starts_new {
                batches.extend(self.seal(std::mem::take(&mut current)));
                exchanges.clear();
            }
            exchanges.insert(signal.exchange.clone());
            current.push(signal);
        }
        batches.extend(self.seal(current));
        batches
    }

    fn seal(&mut self, signals: Vec<Signal>) -> Option<Batch> {
        let mut batch = match Batch::from_signals(signals) {
            Ok(batch) => batch,
            // Only an empty group can fail: one signal per exchange rules out duplicates
            Err(_) => return None,
        };

        if let Some(floor) = self.last_delivered {
            if batch.clamp_timestamp(floor) {
                self.clamped += 1;
                warn!("Late {} batch raised to {} to keep delivery ordered", batch.event(), floor);
            }
        }
        self.last_delivered = Some(batch.timestamp());
        Some(batch)
    }
}
