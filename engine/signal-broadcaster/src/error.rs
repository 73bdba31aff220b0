//! Error types for the signal broadcaster

use session_core::ControllableId;
use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum BroadcastError {
    #[error("Controllable {controllable} did not drain its queue within {waited:?}")]
    BackpressureTimeout { controllable: ControllableId, waited: Duration },

    #[error("Controllable {0} is already registered")]
    AlreadyRegistered(ControllableId),

    #[error("Controllable {0} subscribed to no exchanges")]
    EmptySubscription(ControllableId),
}

pub type BroadcastResult<T> = Result<T, BroadcastError>;
