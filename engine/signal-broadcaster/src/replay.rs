//! Deterministic merge of generated sessions, for backtests and replays

use chrono::Duration;
use session_core::{Batch, ExchangeId, Signal, Timestamp};
use std::collections::VecDeque;
use std::iter::Peekable;
use trading_calendar::SessionEvents;

use crate::coalesce::Coalescer;

/// Merge several exchanges' event sequences into ordered batches without real time.
///
/// Uses the same grouping rules as the live broadcaster. Because every upcoming event
/// is visible, a signal is released as soon as no stream can still produce anything
/// inside its window.
pub fn merge_sessions(
    streams: impl IntoIterator<Item = SessionEvents>,
    window: Duration,
) -> MergedSessions {
    let streams: Vec<_> = streams
        .into_iter()
        .map(|events| (events.exchange().clone(), events.peekable()))
        .collect();
    MergedSessions {
        streams,
        coalescer: Coalescer::new(window),
        ready: VecDeque::new(),
        finished: false,
    }
}

pub struct MergedSessions {
    streams: Vec<(ExchangeId, Peekable<SessionEvents>)>,
    coalescer: Coalescer,
    ready: VecDeque<Batch>,
    finished: bool,
}

impl MergedSessions {
    /// Next signal across all streams in (timestamp, event, exchange) order
    fn pull(&mut self) -> Option<Signal> {
        let idx = self
            .streams
            .iter_mut()
            .enumerate()
            .filter_map(|(idx, (exchange, events))| {
                events.peek().map(|(ts, event)| ((*ts, *event, exchange.clone()), idx))
            })
            .min()
            .map(|(_, idx)| idx)?;

        let (exchange, events) = &mut self.streams[idx];
        events.next().map(|(timestamp, event)| Signal::new(timestamp, event, exchange.clone()))
    }

    /// Earliest timestamp any stream can still produce
    fn horizon(&mut self) -> Option<Timestamp> {
        self.streams.iter_mut().filter_map(|(_, events)| events.peek().map(|(ts, _)| *ts)).min()
    }
}

impl Iterator for MergedSessions {
    type Item = Batch;

    fn next(&mut self) -> Option<Batch> {
        loop {
            if let Some(batch) = self.ready.pop_front() {
                return Some(batch);
            }
            if self.finished {
                return None;
            }

            match self.pull() {
                Some(signal) => self.coalescer.push(signal),
                None => {
                    self.finished = true;
                    self.ready.extend(self.coalescer.flush());
                    continue;
                }
            }

            if let Some(horizon) = self.horizon() {
                let window = self.coalescer.window();
                let released = self.coalescer.release(|s| s.timestamp + window < horizon);
                self.ready.extend(released);
            }
        }
    }
}
