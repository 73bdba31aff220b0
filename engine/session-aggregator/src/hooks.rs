//! Strategy-facing output of an aggregator

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use session_core::{Event, ExchangeId, Timestamp};

/// One step of a controllable's session lifecycle
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionUpdate {
    pub timestamp: Timestamp,
    pub event: Event,
    /// Subscribed (event, exchange) pairs behind this update; empty for the final close
    pub signals: Vec<(Event, ExchangeId)>,
}

impl SessionUpdate {
    pub fn new(timestamp: Timestamp, event: Event, signals: Vec<(Event, ExchangeId)>) -> Self {
        Self { timestamp, event, signals }
    }

    /// Carries per-minute data for the strategy
    pub fn has_minute_signals(&self) -> bool {
        self.signals.iter().any(|(event, _)| event.is_minute())
    }
}

/// Strategy execution collaborator
#[async_trait]
pub trait StrategyHooks: Send {
    async fn on_session_start(&mut self, update: &SessionUpdate);

    async fn on_before_trading_start(&mut self, update: &SessionUpdate);

    async fn on_bar(&mut self, update: &SessionUpdate);

    async fn on_session_end(&mut self, update: &SessionUpdate);
}

/// Route an update to the matching hook.
///
/// Updates carrying minute signals always go to `on_bar`, whichever event represented
/// the batch they came from.
pub async fn dispatch<H: StrategyHooks + ?Sized>(hooks: &mut H, update: &SessionUpdate) {
    if update.has_minute_signals() {
        hooks.on_bar(update).await;
        return;
    }

    match update.event {
        Event::SessionStart => hooks.on_session_start(update).await,
        Event::BeforeTradingStart => hooks.on_before_trading_start(update).await,
        Event::SessionEnd => hooks.on_session_end(update).await,
        Event::Bar | Event::MinuteEnd | Event::TradeEnd => hooks.on_bar(update).await,
    }
}
