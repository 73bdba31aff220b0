//! # Session Aggregator
//!
//! Turns the shared stream of multi-exchange batches into one controllable's own
//! session lifecycle.
//!
//! Each controllable subscribes to a set of exchanges. Its aggregator opens the session
//! when the first subscribed exchange starts, forwards minute events while trading, and
//! reports the close only once every subscribed exchange has closed.
//!
//! ```text
//! DORMANT --start--> CLOSED --SESSION_START--> PRE_MARKET --entry--> TRADING
//!                      |                                               |
//!                      +--(foreign start)--> PENDING_OPEN              |
//!                      ^-------------- all subscribed closed ----------+
//! ```

pub mod aggregator;
pub mod config;
pub mod controllable;
pub mod error;
pub mod hooks;
pub mod state;

#[cfg(test)]
mod tests;

pub use aggregator::SessionAggregator;
pub use config::{AggregatorConfig, TradingEntry};
pub use controllable::{Controllable, ControllableExit, ControllableSummary};
pub use error::{AggregateError, AggregateResult};
pub use hooks::{dispatch, SessionUpdate, StrategyHooks};
pub use state::AggregatorState;
