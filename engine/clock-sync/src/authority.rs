//! The time authority seam

use async_trait::async_trait;
use futures::stream::{self, BoxStream, StreamExt};
use session_core::{TimeSource, Timestamp};
use std::sync::Arc;

use crate::error::SyncResult;

/// One message of the streaming `Sync` call
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SyncReply {
    pub timestamp: Option<Timestamp>,
}

impl SyncReply {
    pub fn mark() -> Self {
        Self { timestamp: None }
    }

    pub fn at(timestamp: Timestamp) -> Self {
        Self { timestamp: Some(timestamp) }
    }
}

/// Lazily produced `Sync` messages. The client reads the local clock as each item lands.
pub type SyncStream = BoxStream<'static, SyncResult<SyncReply>>;

/// Server side of clock synchronization
#[async_trait]
pub trait ClockAuthority: Send + Sync {
    /// Open the streaming `Sync` call
    async fn sync(&self) -> SyncResult<SyncStream>;

    /// Unary `Delay` call returning the authority's current time
    async fn delay(&self) -> SyncResult<Timestamp>;
}

#[async_trait]
impl<A: ClockAuthority + ?Sized> ClockAuthority for Arc<A> {
    async fn sync(&self) -> SyncResult<SyncStream> {
        (**self).sync().await
    }

    async fn delay(&self) -> SyncResult<Timestamp> {
        (**self).delay().await
    }
}

/// In-process authority reading any [`TimeSource`]
#[derive(Clone)]
pub struct TimeAuthority {
    source: Arc<dyn TimeSource>,
}

impl TimeAuthority {
    pub fn new(source: Arc<dyn TimeSource>) -> Self {
        Self { source }
    }

    pub fn now(&self) -> Timestamp {
        self.source.now()
    }

    /// The two `Sync` messages; the timestamp is read only when the second is polled
    pub fn sync_stream(&self) -> SyncStream {
        let source = Arc::clone(&self.source);
        stream::once(async { Ok(SyncReply::mark()) })
            .chain(stream::once(async move { Ok(SyncReply::at(source.now())) }))
            .boxed()
    }
}

#[async_trait]
impl ClockAuthority for TimeAuthority {
    async fn sync(&self) -> SyncResult<SyncStream> {
        Ok(self.sync_stream())
    }

    async fn delay(&self) -> SyncResult<Timestamp> {
        Ok(self.source.now())
    }
}
