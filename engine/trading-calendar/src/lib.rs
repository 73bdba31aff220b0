//! # Trading Calendar
//!
//! Per-exchange trading calendars and the machinery that turns them into
//! session-lifecycle events.
//!
//! - [`TradingCalendar`] answers which dates are sessions and when each one opens and
//!   closes, in exchange-local time resolved to UTC.
//! - [`generate`] lazily expands a calendar and a date range into the ordered
//!   `(timestamp, Event)` sequence for that exchange.
//! - [`EventPacer`] replays such a sequence against a [`session_core::TimeSource`],
//!   emitting each event as its timestamp arrives.

pub mod builtin;
pub mod calendar;
pub mod error;
pub mod generator;
pub mod pacer;
pub mod provider;
pub mod spec;

pub use builtin::{always_open, nyse, nyse_early_closes, nyse_holidays};
pub use calendar::{Session, TradingCalendar};
pub use error::{CalendarError, CalendarResult};
pub use generator::{generate, GeneratorConfig, SessionEvents};
pub use pacer::{EventPacer, PacerConfig, PacerExit, PacerReport};
pub use provider::{CalendarProvider, StaticCalendarProvider};
pub use spec::{CalendarSpec, EarlyClose};

/// Minutes between the default before-trading-start marker and market open
pub const DEFAULT_BEFORE_TRADING_START_LEAD_MINUTES: i64 = 15;

/// Longest single sleep taken by the pacer before re-reading its clock
pub const DEFAULT_MAX_SLEEP_MS: u64 = 1_000;
