use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

use crate::types::{ExchangeId, Timestamp};

/// Session-lifecycle event.
///
/// Variants are declared in lifecycle order, so the derived `Ord` is the tie-breaker
/// used wherever signals sharing a timestamp must be ordered deterministically.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "&'static str")]
pub enum Event {
    SessionStart,
    BeforeTradingStart,
    Bar,
    MinuteEnd,
    TradeEnd,
    SessionEnd,
}

impl Event {
    pub const ALL: [Event; 6] = [
        Event::SessionStart,
        Event::BeforeTradingStart,
        Event::Bar,
        Event::MinuteEnd,
        Event::TradeEnd,
        Event::SessionEnd,
    ];

    /// Wire tag of this event
    pub fn as_tag(&self) -> &'static str {
        match self {
            Event::SessionStart => "SESSION_START",
            Event::BeforeTradingStart => "BEFORE_TRADING_START",
            Event::Bar => "BAR",
            Event::MinuteEnd => "MINUTE_END",
            Event::TradeEnd => "TRADE_END",
            Event::SessionEnd => "SESSION_END",
        }
    }

    /// True for the per-minute events forwarded to strategies while trading
    pub fn is_minute(&self) -> bool {
        matches!(self, Event::Bar | Event::TradeEnd)
    }
}

impl fmt::Display for Event {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_tag())
    }
}

/// A wire tag outside the closed event set
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("unknown event tag `{tag}`")]
pub struct UnknownEventError {
    pub tag: String,
}

impl FromStr for Event {
    type Err = UnknownEventError;

    fn from_str(tag: &str) -> Result<Self, Self::Err> {
        Event::ALL
            .iter()
            .copied()
            .find(|event| event.as_tag() == tag)
            .ok_or_else(|| UnknownEventError { tag: tag.to_string() })
    }
}

impl TryFrom<String> for Event {
    type Error = UnknownEventError;

    fn try_from(tag: String) -> Result<Self, Self::Error> {
        tag.parse()
    }
}

impl From<Event> for &'static str {
    fn from(event: Event) -> Self {
        event.as_tag()
    }
}

/// One event for one exchange at one instant
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Signal {
    pub timestamp: Timestamp,
    pub event: Event,
    pub exchange: ExchangeId,
}

impl Signal {
    pub fn new(timestamp: Timestamp, event: Event, exchange: impl Into<ExchangeId>) -> Self {
        Self { timestamp, event, exchange: exchange.into() }
    }

    /// Total order used by the merge: timestamp, then lifecycle order, then exchange
    pub fn sort_key(&self) -> (Timestamp, Event, &ExchangeId) {
        (self.timestamp, self.event, &self.exchange)
    }
}
