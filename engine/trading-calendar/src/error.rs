//! Error types for calendars and event generation

use chrono::{NaiveDate, NaiveDateTime};
use chrono_tz::Tz;
use session_core::ExchangeId;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CalendarError {
    #[error("{exchange} has no sessions between {start} and {end}")]
    NoSessions { exchange: ExchangeId, start: NaiveDate, end: NaiveDate },

    #[error("{local} does not exist in {timezone}")]
    Unlocalizable { local: NaiveDateTime, timezone: Tz },

    #[error("No calendar registered for exchange {0}")]
    UnknownExchange(ExchangeId),

    #[error("Invalid calendar definition: {0}")]
    InvalidSpec(String),
}

pub type CalendarResult<T> = Result<T, CalendarError>;
