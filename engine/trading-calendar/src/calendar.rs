//! The trading calendar model

use chrono::{Datelike, Duration, LocalResult, NaiveDate, NaiveTime, TimeZone, Timelike, Weekday};
use chrono_tz::Tz;
use session_core::{ExchangeId, Timestamp};
use std::collections::{BTreeMap, BTreeSet};

use crate::error::{CalendarError, CalendarResult};
use crate::DEFAULT_BEFORE_TRADING_START_LEAD_MINUTES;

/// One trading day on one exchange, resolved to UTC
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Session {
    pub exchange: ExchangeId,
    pub date: NaiveDate,
    /// Start of the session date: local midnight, or the first valid instant when
    /// midnight falls in a DST gap
    pub label: Timestamp,
    pub market_open: Timestamp,
    pub market_close: Timestamp,
    /// First minute with data available
    pub execution_open: Timestamp,
    /// Last minute with data available
    pub execution_close: Timestamp,
}

impl Session {
    /// Execution minutes, lazily.
    ///
    /// With minute emission every minute from execution open up to execution close,
    /// otherwise only the execution close.
    pub fn minutes(&self, minute_emission: bool) -> impl Iterator<Item = Timestamp> + '_ {
        let (first, last) = if minute_emission {
            (self.execution_open, self.last_minute(true))
        } else {
            (self.execution_close, self.execution_close)
        };
        std::iter::successors(Some(first), |minute| Some(*minute + Duration::minutes(1)))
            .take_while(move |minute| *minute <= last)
    }

    /// Timestamp of the last execution minute
    pub fn last_minute(&self, minute_emission: bool) -> Timestamp {
        if !minute_emission {
            return self.execution_close;
        }
        let whole = (self.execution_close - self.execution_open).num_minutes().max(0);
        self.execution_open + Duration::minutes(whole)
    }
}

/// Session dates and open/close times for one exchange.
///
/// A date is a session unless it falls on a weekend day or a holiday. Early closes
/// override the regular close for their date.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TradingCalendar {
    exchange: ExchangeId,
    timezone: Tz,
    open_time: NaiveTime,
    close_time: NaiveTime,
    weekend: [bool; 7],
    holidays: BTreeSet<NaiveDate>,
    early_closes: BTreeMap<NaiveDate, NaiveTime>,
    execution_offset_open: Duration,
    execution_offset_close: Duration,
}

impl TradingCalendar {
    /// Regular Monday to Friday calendar without holidays
    pub fn new(
        exchange: impl Into<ExchangeId>,
        timezone: Tz,
        open_time: NaiveTime,
        close_time: NaiveTime,
    ) -> CalendarResult<Self> {
        let exchange = exchange.into();
        if close_time <= open_time {
            return Err(CalendarError::InvalidSpec(format!(
                "{} closes at {} which is not after its open at {}",
                exchange, close_time, open_time
            )));
        }

        let mut weekend = [false; 7];
        weekend[Weekday::Sat.num_days_from_monday() as usize] = true;
        weekend[Weekday::Sun.num_days_from_monday() as usize] = true;

        Ok(Self {
            exchange,
            timezone,
            open_time,
            close_time,
            weekend,
            holidays: BTreeSet::new(),
            early_closes: BTreeMap::new(),
            execution_offset_open: Duration::zero(),
            execution_offset_close: Duration::zero(),
        })
    }

    pub fn with_weekend(mut self, days: impl IntoIterator<Item = Weekday>) -> Self {
        self.weekend = [false; 7];
        for day in days {
            self.weekend[day.num_days_from_monday() as usize] = true;
        }
        self
    }

    pub fn with_holidays(mut self, holidays: impl IntoIterator<Item = NaiveDate>) -> Self {
        self.holidays.extend(holidays);
        self
    }

    pub fn with_early_closes(
        mut self,
        closes: impl IntoIterator<Item = (NaiveDate, NaiveTime)>,
    ) -> CalendarResult<Self> {
        for (date, close) in closes {
            if close <= self.open_time {
                return Err(CalendarError::InvalidSpec(format!(
                    "early close {} on {} is not after the open at {}",
                    close, date, self.open_time
                )));
            }
            self.check_execution_window(close)?;
            self.early_closes.insert(date, close);
        }
        Ok(self)
    }

    /// Minutes added to market open and close to get the execution bounds.
    ///
    /// Both bounds must stay on the session date and the window must not invert, on
    /// regular days and early closes alike.
    pub fn with_execution_offsets(
        mut self,
        open_minutes: i64,
        close_minutes: i64,
    ) -> CalendarResult<Self> {
        self.execution_offset_open = Duration::minutes(open_minutes);
        self.execution_offset_close = Duration::minutes(close_minutes);
        self.check_execution_window(self.close_time)?;
        for close in self.early_closes.values() {
            self.check_execution_window(*close)?;
        }
        Ok(self)
    }

    fn check_execution_window(&self, close_time: NaiveTime) -> CalendarResult<()> {
        let seconds = |time: NaiveTime, offset: Duration| {
            i64::from(time.num_seconds_from_midnight()) + offset.num_seconds()
        };
        let open = seconds(self.open_time, self.execution_offset_open);
        let close = seconds(close_time, self.execution_offset_close);

        if open < 0 || close >= 24 * 60 * 60 {
            return Err(CalendarError::InvalidSpec(format!(
                "{} execution offsets ({} / {} min) move the window off the session date",
                self.exchange,
                self.execution_offset_open.num_minutes(),
                self.execution_offset_close.num_minutes()
            )));
        }
        if open > close {
            return Err(CalendarError::InvalidSpec(format!(
                "{} execution window inverts: opens {} min after the open, closes {} min after {}",
                self.exchange,
                self.execution_offset_open.num_minutes(),
                self.execution_offset_close.num_minutes(),
                close_time
            )));
        }
        Ok(())
    }

    pub fn exchange(&self) -> &ExchangeId {
        &self.exchange
    }

    pub fn timezone(&self) -> Tz {
        self.timezone
    }

    pub fn open_time(&self) -> NaiveTime {
        self.open_time
    }

    pub fn close_time(&self) -> NaiveTime {
        self.close_time
    }

    pub fn is_holiday(&self, date: NaiveDate) -> bool {
        self.holidays.contains(&date)
    }

    pub fn is_session(&self, date: NaiveDate) -> bool {
        !self.weekend[date.weekday().num_days_from_monday() as usize] && !self.is_holiday(date)
    }

    /// Session dates in `[start, end]`, ascending
    pub fn sessions_in_range(&self, start: NaiveDate, end: NaiveDate) -> Vec<NaiveDate> {
        if start > end {
            return Vec::new();
        }
        start.iter_days().take_while(|d| *d <= end).filter(|d| self.is_session(*d)).collect()
    }

    /// First session on or after `date`, looking at most a year ahead
    pub fn next_session(&self, date: NaiveDate) -> Option<NaiveDate> {
        date.iter_days().take(366).find(|d| self.is_session(*d))
    }

    /// Resolve an exchange-local wall time to UTC.
    ///
    /// Times skipped by a DST transition are rejected. Times repeated by one resolve to
    /// the earlier instant.
    pub fn localize(&self, date: NaiveDate, time: NaiveTime) -> CalendarResult<Timestamp> {
        let local = date.and_time(time);
        match self.timezone.from_local_datetime(&local) {
            LocalResult::Single(dt) => Ok(dt.with_timezone(&chrono::Utc)),
            LocalResult::Ambiguous(earliest, _) => Ok(earliest.with_timezone(&chrono::Utc)),
            LocalResult::None => {
                Err(CalendarError::Unlocalizable { local, timezone: self.timezone })
            }
        }
    }

    /// First instant of `date` in the exchange timezone.
    ///
    /// Where a DST change skips midnight this is the instant the clocks jump.
    pub fn start_of_day(&self, date: NaiveDate) -> CalendarResult<Timestamp> {
        let midnight = date.and_time(NaiveTime::MIN);
        let mut local = midnight;
        while local.date() == date {
            match self.timezone.from_local_datetime(&local) {
                LocalResult::Single(dt) => return Ok(dt.with_timezone(&chrono::Utc)),
                LocalResult::Ambiguous(earliest, _) => {
                    return Ok(earliest.with_timezone(&chrono::Utc))
                }
                LocalResult::None => local += Duration::minutes(1),
            }
        }
        Err(CalendarError::Unlocalizable { local: midnight, timezone: self.timezone })
    }

    pub fn market_open(&self, date: NaiveDate) -> CalendarResult<Timestamp> {
        self.localize(date, self.open_time)
    }

    pub fn market_close(&self, date: NaiveDate) -> CalendarResult<Timestamp> {
        let close = self.early_closes.get(&date).copied().unwrap_or(self.close_time);
        self.localize(date, close)
    }

    pub fn execution_open(&self, date: NaiveDate) -> CalendarResult<Timestamp> {
        Ok(self.market_open(date)? + self.execution_offset_open)
    }

    pub fn execution_close(&self, date: NaiveDate) -> CalendarResult<Timestamp> {
        Ok(self.market_close(date)? + self.execution_offset_close)
    }

    /// Full session for `date`, or `NoSessions` if the exchange is shut that day
    pub fn session(&self, date: NaiveDate) -> CalendarResult<Session> {
        if !self.is_session(date) {
            let exchange = self.exchange.clone();
            return Err(CalendarError::NoSessions { exchange, start: date, end: date });
        }

        let session = Session {
            exchange: self.exchange.clone(),
            date,
            label: self.start_of_day(date)?,
            market_open: self.market_open(date)?,
            market_close: self.market_close(date)?,
            execution_open: self.execution_open(date)?,
            execution_close: self.execution_close(date)?,
        };
        // Wall-clock checks at build time can still be undone by a DST shift that day
        if session.execution_open < session.label
            || session.execution_close < session.execution_open
        {
            return Err(CalendarError::InvalidSpec(format!(
                "{} execution window on {} runs from {} to {}, before the session starts at {}",
                self.exchange, date, session.execution_open, session.execution_close, session.label
            )));
        }
        Ok(session)
    }

    /// Execution minutes of a session, collected
    pub fn minutes_for_session(&self, session: &Session, minute_emission: bool) -> Vec<Timestamp> {
        session.minutes(minute_emission).collect()
    }

    /// Open time of day minus fifteen minutes, never earlier than local midnight
    pub fn default_before_trading_start(&self) -> NaiveTime {
        let (time, wrapped) = self
            .open_time
            .overflowing_sub_signed(Duration::minutes(DEFAULT_BEFORE_TRADING_START_LEAD_MINUTES));
        if wrapped != 0 {
            NaiveTime::MIN
        } else {
            time
        }
    }
}
