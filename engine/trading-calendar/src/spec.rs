//! Serializable calendar definitions
//!
//! ```toml
//! exchange = "XLON"
//! timezone = "Europe/London"
//! open = "08:01:00"
//! close = "16:30:00"
//! weekend = ["Sat", "Sun"]
//! holidays = ["2024-12-25", "2024-12-26"]
//!
//! [[early_closes]]
//! date = "2024-12-24"
//! close = "12:30:00"
//! ```

use chrono::{NaiveDate, NaiveTime, Weekday};
use chrono_tz::Tz;
use serde::{Deserialize, Serialize};

use crate::calendar::TradingCalendar;
use crate::error::{CalendarError, CalendarResult};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EarlyClose {
    pub date: NaiveDate,
    pub close: NaiveTime,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CalendarSpec {
    pub exchange: String,

    /// IANA zone name, e.g. `America/New_York`
    pub timezone: String,

    pub open: NaiveTime,
    pub close: NaiveTime,

    #[serde(default = "default_weekend")]
    pub weekend: Vec<Weekday>,

    #[serde(default)]
    pub holidays: Vec<NaiveDate>,

    #[serde(default)]
    pub early_closes: Vec<EarlyClose>,

    #[serde(default)]
    pub execution_offset_open_minutes: i64,

    #[serde(default)]
    pub execution_offset_close_minutes: i64,
}

fn default_weekend() -> Vec<Weekday> {
    vec![Weekday::Sat, Weekday::Sun]
}

impl CalendarSpec {
    pub fn from_toml_str(content: &str) -> CalendarResult<Self> {
        toml::from_str(content).map_err(|e| CalendarError::InvalidSpec(e.to_string()))
    }

    /// Load a calendar definition from a TOML file
    pub fn from_file(path: &str) -> CalendarResult<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| CalendarError::InvalidSpec(format!("cannot read {path}: {e}")))?;
        Self::from_toml_str(&content)
    }

    pub fn build(&self) -> CalendarResult<TradingCalendar> {
        let timezone: Tz = self.timezone.parse().map_err(|e| {
            CalendarError::InvalidSpec(format!("unknown timezone `{}`: {}", self.timezone, e))
        })?;

        Ok(TradingCalendar::new(self.exchange.as_str(), timezone, self.open, self.close)?
            .with_weekend(self.weekend.iter().copied())
            .with_holidays(self.holidays.iter().copied())
            .with_early_closes(self.early_closes.iter().map(|c| (c.date, c.close)))?
            .with_execution_offsets(
                self.execution_offset_open_minutes,
                self.execution_offset_close_minutes,
            )?)
    }
}

impl TryFrom<&CalendarSpec> for TradingCalendar {
    type Error = CalendarError;

    fn try_from(spec: &CalendarSpec) -> Result<Self, Self::Error> {
        spec.build()
    }
}
