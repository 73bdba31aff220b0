//! Error types for session aggregation

use session_core::{BatchError, ControllableId, UnknownEventError};
use signal_broadcaster::BroadcastError;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AggregateError {
    #[error(transparent)]
    UnknownEvent(#[from] UnknownEventError),

    #[error("Malformed batch: {0}")]
    MalformedBatch(BatchError),

    #[error("Aggregator faulted earlier and rejects further batches")]
    Faulted,

    #[error("Controllable {0} subscribed to no exchanges")]
    NoExchanges(ControllableId),

    #[error(transparent)]
    Subscription(#[from] BroadcastError),
}

impl From<BatchError> for AggregateError {
    fn from(err: BatchError) -> Self {
        match err {
            BatchError::UnknownEvent(unknown) => AggregateError::UnknownEvent(unknown),
            other => AggregateError::MalformedBatch(other),
        }
    }
}

pub type AggregateResult<T> = Result<T, AggregateError>;
