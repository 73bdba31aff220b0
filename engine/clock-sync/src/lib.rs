//! # Clock Sync
//!
//! Aligns a client process's clock with a time authority without trusting either side.
//!
//! One synchronization round runs two calls against the authority:
//!
//! 1. A streaming `Sync` call. The authority answers with exactly two messages, the first
//!    empty and the second carrying its current time. The client marks its local time
//!    when the first message lands; `skew = T_server - T_mark`.
//! 2. A unary `Delay` call. The client stamps the request with `local_now + skew`, and
//!    half the distance to the authority's reply is the one-way `delay`.
//!
//! Adjusted time is `local + skew + delay`. A failed round never clobbers the previous
//! estimate, and nothing is adjusted before a first round succeeds.

pub mod authority;
pub mod client;
pub mod config;
pub mod error;
pub mod messages;
pub mod metrics;
pub mod server;
pub mod synchronizer;


pub use authority::{ClockAuthority, SyncReply, SyncStream, TimeAuthority};
pub use client::WsAuthority;
pub use config::SyncConfig;
pub use error::{ClockSyncError, SyncResult};
pub use metrics::{SyncMetrics, SyncMetricsSnapshot};
pub use server::AuthorityServer;
pub use synchronizer::{AdjustedClock, ClockEstimate, ClockSynchronizer};

pub use session_core::{ManualClock, SystemClock, TimeSource};

/// Current version of the clock synchronizer
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Default timeout applied to each authority call
pub const DEFAULT_CALL_TIMEOUT_MS: u64 = 5_000;

/// Default address the authority server binds to
pub const DEFAULT_AUTHORITY_BIND: &str = "127.0.0.1:8095";
