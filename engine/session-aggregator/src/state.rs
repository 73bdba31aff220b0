//! Aggregator states and transitions

use serde::{Deserialize, Serialize};
use session_core::{Batch, Event, ExchangeId};
use std::collections::BTreeSet;
use std::fmt;

use crate::config::TradingEntry;
use crate::hooks::SessionUpdate;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AggregatorState {
    /// Not started yet; ignores everything
    Dormant,
    Closed,
    /// A session started, but on none of our exchanges
    PendingOpen,
    PreMarket,
    /// `closed` subscribed exchanges have ended their session so far
    Trading { closed: usize },
    /// A malformed batch was seen; terminal
    Faulted,
}

impl fmt::Display for AggregatorState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AggregatorState::Dormant => f.write_str("DORMANT"),
            AggregatorState::Closed => f.write_str("CLOSED"),
            AggregatorState::PendingOpen => f.write_str("PENDING_OPEN"),
            AggregatorState::PreMarket => f.write_str("PRE_MARKET"),
            AggregatorState::Trading { closed } => write!(f, "TRADING({closed} closed)"),
            AggregatorState::Faulted => f.write_str("FAULTED"),
        }
    }
}

pub(crate) type Transition = (AggregatorState, Option<SessionUpdate>);

/// What an aggregator is subscribed to and how it enters trading
pub(crate) struct Scope<'a> {
    pub exchanges: &'a BTreeSet<ExchangeId>,
    pub entry: TradingEntry,
}

impl Scope<'_> {
    /// Subscribed signals carrying `event`
    fn matches(&self, batch: &Batch, event: Event) -> Vec<(Event, ExchangeId)> {
        batch
            .signals()
            .iter()
            .filter(|s| s.event == event && self.exchanges.contains(&s.exchange))
            .map(|s| (s.event, s.exchange.clone()))
            .collect()
    }

    fn has_trading_signal(&self, batch: &Batch) -> bool {
        batch.signals().iter().any(|s| {
            self.exchanges.contains(&s.exchange)
                && (s.event.is_minute() || s.event == Event::SessionEnd)
        })
    }
}

impl AggregatorState {
    pub(crate) fn on_batch(self, scope: &Scope<'_>, batch: &Batch) -> Transition {
        match self {
            AggregatorState::Dormant | AggregatorState::Faulted => (self, None),
            AggregatorState::Closed if batch.event() != Event::SessionStart => (self, None),
            AggregatorState::Closed | AggregatorState::PendingOpen => Self::open(scope, batch),
            AggregatorState::PreMarket => Self::pre_market(scope, batch),
            AggregatorState::Trading { closed } => Self::trade(closed, scope, batch),
        }
    }

    fn open(scope: &Scope<'_>, batch: &Batch) -> Transition {
        let starts = scope.matches(batch, Event::SessionStart);
        if starts.is_empty() {
            return (AggregatorState::PendingOpen, None);
        }
        let update = SessionUpdate::new(batch.timestamp(), Event::SessionStart, starts);
        (AggregatorState::PreMarket, Some(update))
    }

    fn pre_market(scope: &Scope<'_>, batch: &Batch) -> Transition {
        let markers = scope.matches(batch, Event::BeforeTradingStart);
        if !markers.is_empty() {
            let next = match scope.entry {
                TradingEntry::AfterBeforeTradingStart => AggregatorState::Trading { closed: 0 },
                TradingEntry::OnFirstMinute | TradingEntry::Never => AggregatorState::PreMarket,
            };
            let update = SessionUpdate::new(batch.timestamp(), Event::BeforeTradingStart, markers);
            return (next, Some(update));
        }

        if scope.entry != TradingEntry::Never && scope.has_trading_signal(batch) {
            return Self::trade(0, scope, batch);
        }
        (AggregatorState::PreMarket, None)
    }

    fn trade(mut closed: usize, scope: &Scope<'_>, batch: &Batch) -> Transition {
        let mut forward = Vec::new();

        for signal in batch.signals().iter().filter(|s| scope.exchanges.contains(&s.exchange)) {
            match signal.event {
                Event::SessionEnd => {
                    closed += 1;
                    if closed >= scope.exchanges.len() {
                        let update =
                            SessionUpdate::new(batch.timestamp(), Event::SessionEnd, Vec::new());
                        return (AggregatorState::Closed, Some(update));
                    }
                }
                Event::Bar | Event::TradeEnd => {
                    forward.push((signal.event, signal.exchange.clone()))
                }
                Event::SessionStart | Event::BeforeTradingStart | Event::MinuteEnd => {}
            }
        }

        let next = AggregatorState::Trading { closed };
        if forward.is_empty() {
            (next, None)
        } else {
            (next, Some(SessionUpdate::new(batch.timestamp(), batch.event(), forward)))
        }
    }
}
