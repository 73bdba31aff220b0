//! # Signal Broadcaster
//!
//! Merges the paced per-exchange signal streams into one timestamp-ordered stream of
//! [`session_core::Batch`]es and delivers every batch to every registered controllable.
//!
//! The broadcaster does not filter by subscription; each controllable's aggregator
//! decides what is relevant to it. Consumers sit behind bounded queues, so a slow
//! consumer slows the broadcaster down; one that stays full past the backpressure
//! timeout is deregistered and its queue closes.

pub mod broadcaster;
pub mod coalesce;
pub mod config;
pub mod error;
pub mod metrics;
pub mod registry;
pub mod replay;

pub use broadcaster::{BroadcastReport, BroadcasterBuilder, SignalBroadcaster};
pub use coalesce::Coalescer;
pub use config::BroadcasterConfig;
pub use error::{BroadcastError, BroadcastResult};
pub use metrics::{BroadcasterMetrics, BroadcasterMetricsSnapshot};
pub use registry::{Subscription, SubscriptionRegistry};
pub use replay::{merge_sessions, MergedSessions};

/// Default per-consumer queue depth
pub const DEFAULT_QUEUE_CAPACITY: usize = 1024;

/// Default per-producer input queue depth
pub const DEFAULT_PRODUCER_CAPACITY: usize = 256;

/// Default time a send may wait on a full consumer queue
pub const DEFAULT_BACKPRESSURE_TIMEOUT_MS: u64 = 5_000;

/// Default age after which held signals are released regardless of lagging producers
pub const DEFAULT_STRAGGLER_TIMEOUT_MS: u64 = 1_000;
