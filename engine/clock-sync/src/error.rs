//! Error types for clock synchronization

use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ClockSyncError {
    #[error("Transport error: {0}")]
    Transport(String),

    #[error("{call} call timed out after {timeout:?}")]
    Timeout { call: &'static str, timeout: Duration },

    #[error("Sync stream ended after {received} message(s), expected 2")]
    IncompleteSync { received: usize },

    #[error("Protocol violation: {0}")]
    ProtocolViolation(String),

    #[error("No clock estimate yet; synchronize first")]
    NotSynchronized,

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<tokio_tungstenite::tungstenite::Error> for ClockSyncError {
    fn from(err: tokio_tungstenite::tungstenite::Error) -> Self {
        ClockSyncError::Transport(err.to_string())
    }
}

pub type SyncResult<T> = Result<T, ClockSyncError>;
