//! Configuration for session aggregators

use serde::{Deserialize, Serialize};

/// When a controllable in pre-market starts trading
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TradingEntry {
    /// Right after the pre-market marker has been forwarded
    #[default]
    AfterBeforeTradingStart,
    /// On the first subscribed minute or close signal
    OnFirstMinute,
    /// Never; the controllable only sees session starts and pre-market markers
    Never,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AggregatorConfig {
    pub trading_entry: TradingEntry,
}
