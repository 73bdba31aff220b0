//! Session Core - shared data model of the session control plane
//!
//! Every component of the control plane speaks in terms of the types defined here:
//! exchanges, the closed set of session-lifecycle [`Event`]s, per-exchange [`Signal`]s
//! and the timestamp-grouped [`Batch`]es delivered to controllables.
//!
//! The crate also owns the [`TimeSource`] seam used to inject clocks into the
//! synchronizer, the pacers and the broadcaster.

pub mod batch;
pub mod event;
pub mod time;
pub mod types;

pub use batch::{Batch, BatchError, RawBatch, RawSignal};
pub use event::{Event, Signal, UnknownEventError};
pub use time::{ManualClock, SystemClock, TimeSource};
pub use types::{ControllableId, ExchangeId, Timestamp};

/// Wire tag of the exchange used by the round-the-clock built-in calendar
pub const ALWAYS_OPEN_EXCHANGE: &str = "24/7";

/// Wire tag of the New York Stock Exchange built-in calendar
pub const NYSE_EXCHANGE: &str = "NYSE";
