//! Batches: timestamp-grouped signals delivered to controllables together

use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use thiserror::Error;

use crate::event::{Event, Signal, UnknownEventError};
use crate::types::{ExchangeId, Timestamp};

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum BatchError {
    #[error("batch has no signals")]
    Empty,

    #[error("batch holds {event} for {exchange} more than once")]
    DuplicateSignal { event: Event, exchange: ExchangeId },

    #[error("representative event {0} does not occur in the batch")]
    MissingRepresentative(Event),

    #[error(transparent)]
    UnknownEvent(#[from] UnknownEventError),

    #[error("malformed batch payload: {0}")]
    Malformed(String),
}

/// A non-empty set of signals sharing one delivery timestamp.
///
/// No two signals carry the same (event, exchange) pair, and the representative event
/// always occurs among the signals.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Batch {
    timestamp: Timestamp,
    event: Event,
    signals: Vec<Signal>,
}

impl Batch {
    pub fn new(
        timestamp: Timestamp,
        event: Event,
        signals: Vec<Signal>,
    ) -> Result<Self, BatchError> {
        if signals.is_empty() {
            return Err(BatchError::Empty);
        }

        let mut seen = HashSet::with_capacity(signals.len());
        for signal in &signals {
            if !seen.insert((signal.event, &signal.exchange)) {
                return Err(BatchError::DuplicateSignal {
                    event: signal.event,
                    exchange: signal.exchange.clone(),
                });
            }
        }

        if !signals.iter().any(|s| s.event == event) {
            return Err(BatchError::MissingRepresentative(event));
        }

        Ok(Self { timestamp, event, signals })
    }

    /// Batch of already ordered signals: the latest timestamp wins and the first
    /// signal's event is representative.
    pub fn from_signals(signals: Vec<Signal>) -> Result<Self, BatchError> {
        let first = signals.first().ok_or(BatchError::Empty)?;
        let event = first.event;
        let timestamp = signals.iter().map(|s| s.timestamp).max().unwrap_or(first.timestamp);
        Self::new(timestamp, event, signals)
    }

    /// Single-signal batch
    pub fn single(signal: Signal) -> Self {
        Self { timestamp: signal.timestamp, event: signal.event, signals: vec![signal] }
    }

    pub fn timestamp(&self) -> Timestamp {
        self.timestamp
    }

    pub fn event(&self) -> Event {
        self.event
    }

    pub fn signals(&self) -> &[Signal] {
        &self.signals
    }

    pub fn len(&self) -> usize {
        self.signals.len()
    }

    pub fn is_empty(&self) -> bool {
        self.signals.is_empty()
    }

    /// Moves the delivery timestamp forward to `floor` if it lies before it
    pub fn clamp_timestamp(&mut self, floor: Timestamp) -> bool {
        if self.timestamp < floor {
            self.timestamp = floor;
            true
        } else {
            false
        }
    }

    pub fn into_parts(self) -> (Timestamp, Event, Vec<Signal>) {
        (self.timestamp, self.event, self.signals)
    }
}

/// Wire form of a signal, event kept as its tag
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawSignal {
    pub timestamp: Timestamp,
    pub event: String,
    pub exchange: String,
}

/// Wire form of a batch as it crosses process boundaries
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawBatch {
    pub timestamp: Timestamp,
    pub event: String,
    pub signals: Vec<RawSignal>,
}

impl RawBatch {
    pub fn from_json(payload: &str) -> Result<Self, BatchError> {
        serde_json::from_str(payload).map_err(|e| BatchError::Malformed(e.to_string()))
    }

    pub fn to_json(&self) -> Result<String, BatchError> {
        serde_json::to_string(self).map_err(|e| BatchError::Malformed(e.to_string()))
    }
}

impl From<&Batch> for RawBatch {
    fn from(batch: &Batch) -> Self {
        Self {
            timestamp: batch.timestamp,
            event: batch.event.as_tag().to_string(),
            signals: batch
                .signals
                .iter()
                .map(|s| RawSignal {
                    timestamp: s.timestamp,
                    event: s.event.as_tag().to_string(),
                    exchange: s.exchange.to_string(),
                })
                .collect(),
        }
    }
}

impl TryFrom<RawBatch> for Batch {
    type Error = BatchError;

    fn try_from(raw: RawBatch) -> Result<Self, Self::Error> {
        let event: Event = raw.event.parse()?;
        let signals = raw
            .signals
            .into_iter()
            .map(|s| {
                Ok(Signal {
                    timestamp: s.timestamp,
                    event: s.event.parse()?,
                    exchange: ExchangeId::from(s.exchange),
                })
            })
            .collect::<Result<Vec<_>, UnknownEventError>>()?;
        Batch::new(raw.timestamp, event, signals)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use chrono::Utc;

    fn ts(minute: u32) -> Timestamp {
        Utc.with_ymd_and_hms(2024, 3, 4, 14, minute, 0).unwrap()
    }

    #[test]
    fn test_empty_batch_rejected() {
        assert_eq!(Batch::new(ts(0), Event::Bar, vec![]), Err(BatchError::Empty));
        assert_eq!(Batch::from_signals(vec![]), Err(BatchError::Empty));
    }

    #[test]
    fn test_duplicate_pair_rejected() {
        let signals =
            vec![Signal::new(ts(0), Event::Bar, "A"), Signal::new(ts(0), Event::Bar, "A")];
        assert!(matches!(
            Batch::new(ts(0), Event::Bar, signals),
            Err(BatchError::DuplicateSignal { .. })
        ));
    }

    #[test]
    fn test_same_exchange_different_events_allowed() {
        let signals =
            vec![Signal::new(ts(0), Event::Bar, "A"), Signal::new(ts(0), Event::MinuteEnd, "A")];
        let batch = Batch::new(ts(0), Event::Bar, signals).unwrap();
        assert_eq!(batch.len(), 2);
    }

    #[test]
    fn test_representative_must_be_present() {
        let signals = vec![Signal::new(ts(0), Event::Bar, "A")];
        assert_eq!(
            Batch::new(ts(0), Event::SessionEnd, signals),
            Err(BatchError::MissingRepresentative(Event::SessionEnd))
        );
    }

    #[test]
    fn test_from_signals_takes_latest_timestamp() {
        let signals =
            vec![Signal::new(ts(0), Event::Bar, "A"), Signal::new(ts(1), Event::Bar, "B")];
        let batch = Batch::from_signals(signals).unwrap();
        assert_eq!(batch.timestamp(), ts(1));
        assert_eq!(batch.event(), Event::Bar);
    }

    #[test]
    fn test_raw_batch_with_unknown_tag_fails() {
        let at = ts(0).to_rfc3339();
        let signal = format!(r#"{{"timestamp":"{at}","event":"HALT","exchange":"A"}}"#);
        let payload = format!(r#"{{"timestamp":"{at}","event":"BAR","signals":[{signal}]}}"#);
        let raw = RawBatch::from_json(&payload).unwrap();
        let err = Batch::try_from(raw).unwrap_err();
        assert_eq!(err, BatchError::UnknownEvent(UnknownEventError { tag: "HALT".to_string() }));
    }

    #[test]
    fn test_raw_batch_decodes() {
        let batch = Batch::single(Signal::new(ts(3), Event::SessionStart, "NYSE"));
        let json = RawBatch::from(&batch).to_json().unwrap();
        let decoded = Batch::try_from(RawBatch::from_json(&json).unwrap()).unwrap();
        assert_eq!(decoded, batch);
    }
}
