//! JSON frames exchanged with the authority over WebSocket

use serde::{Deserialize, Serialize};
use session_core::Timestamp;

/// Request sent by the client, one per connection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AuthorityRequest {
    Sync,
    Delay,
}

/// Frame sent by the authority
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AuthorityResponse {
    /// One of the two `Sync` messages; only the second carries a timestamp
    SyncReply { timestamp: Option<Timestamp> },
    DelayReply { timestamp: Timestamp },
    Error { message: String },
}
