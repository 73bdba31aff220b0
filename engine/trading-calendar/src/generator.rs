//! Calendar event generation
//!
//! Each session expands to
//!
//! 1. `SESSION_START` at the session label (start of the local session date),
//! 2. the minute events (`BAR`, plus `MINUTE_END` under minute emission), with
//!    `BEFORE_TRADING_START` spliced in before the first minute at or after the
//!    pre-market marker,
//! 3. `SESSION_END` at the last minute.
//!
//! A marker falling strictly after the last minute is dropped for that session.

use chrono::{NaiveDate, NaiveTime};
use serde::{Deserialize, Serialize};
use session_core::{Event, ExchangeId, Timestamp};
use std::collections::VecDeque;

use crate::calendar::{Session, TradingCalendar};
use crate::error::{CalendarError, CalendarResult};

/// Generator settings shared by every exchange of a deployment
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct GeneratorConfig {
    /// Pre-market marker time of day; each calendar's default when unset
    pub before_trading_start: Option<NaiveTime>,

    /// Emit every minute instead of one bar per session
    pub minute_emission: bool,
}

impl Default for GeneratorConfig {
    fn default() -> Self {
        Self { before_trading_start: None, minute_emission: true }
    }
}

impl GeneratorConfig {
    pub fn generate(
        &self,
        calendar: &TradingCalendar,
        start: NaiveDate,
        end: NaiveDate,
    ) -> CalendarResult<SessionEvents> {
        generate(calendar, start, end, self.before_trading_start, self.minute_emission)
    }
}

#[derive(Debug, Clone)]
struct PlannedSession {
    session: Session,
    before_trading_start: Timestamp,
}

/// Expand `calendar` over `[start, end]` into its ordered event sequence.
///
/// Sessions and their pre-market markers are resolved up front, so calendar gaps and
/// unlocalizable marker times surface here instead of mid-iteration. Minutes are only
/// computed when the iterator reaches their session.
pub fn generate(
    calendar: &TradingCalendar,
    start: NaiveDate,
    end: NaiveDate,
    before_trading_start: Option<NaiveTime>,
    minute_emission: bool,
) -> CalendarResult<SessionEvents> {
    let dates = calendar.sessions_in_range(start, end);
    if dates.is_empty() {
        return Err(CalendarError::NoSessions { exchange: calendar.exchange().clone(), start, end });
    }

    let bts_time = before_trading_start.unwrap_or_else(|| calendar.default_before_trading_start());
    let sessions = dates
        .into_iter()
        .map(|date| {
            let session = calendar.session(date)?;
            let before_trading_start = calendar.localize(date, bts_time)?;
            Ok(PlannedSession { session, before_trading_start })
        })
        .collect::<CalendarResult<VecDeque<_>>>()?;

    Ok(SessionEvents {
        exchange: calendar.exchange().clone(),
        minute_emission,
        sessions,
        pending: VecDeque::new(),
    })
}

/// Lazy, restartable (`Clone`) event sequence for one exchange
#[derive(Debug, Clone)]
pub struct SessionEvents {
    exchange: ExchangeId,
    minute_emission: bool,
    sessions: VecDeque<PlannedSession>,
    pending: VecDeque<(Timestamp, Event)>,
}

impl SessionEvents {
    pub fn exchange(&self) -> &ExchangeId {
        &self.exchange
    }

    /// Sessions not yet started by the iterator
    pub fn remaining_sessions(&self) -> impl Iterator<Item = &Session> {
        self.sessions.iter().map(|planned| &planned.session)
    }

    /// True between a session's first and last event
    pub fn in_session(&self) -> bool {
        !self.pending.is_empty()
    }

    /// Drop upcoming sessions that finished before `now`.
    ///
    /// Only whole sessions are dropped, and never the one being iterated.
    pub fn skip_completed_sessions(&mut self, now: Timestamp) -> usize {
        let mut skipped = 0;
        while let Some(next) = self.sessions.front() {
            if next.session.last_minute(self.minute_emission) >= now {
                break;
            }
            self.sessions.pop_front();
            skipped += 1;
        }
        skipped
    }

    fn expand(&mut self, planned: PlannedSession) {
        let minute_events: &[Event] =
            if self.minute_emission { &[Event::Bar, Event::MinuteEnd] } else { &[Event::Bar] };
        let PlannedSession { session, before_trading_start } = planned;
        let last_minute = session.last_minute(self.minute_emission);

        // A marker after the last minute is dropped
        let mut marker = (before_trading_start <= last_minute).then_some(before_trading_start);

        self.pending.push_back((session.label, Event::SessionStart));
        for minute in session.minutes(self.minute_emission) {
            if let Some(bts) = marker.filter(|bts| *bts <= minute) {
                self.pending.push_back((bts, Event::BeforeTradingStart));
                marker = None;
            }
            for event in minute_events {
                self.pending.push_back((minute, *event));
            }
        }
        self.pending.push_back((last_minute, Event::SessionEnd));
    }
}

impl Iterator for SessionEvents {
    type Item = (Timestamp, Event);

    fn next(&mut self) -> Option<Self::Item> {
        while self.pending.is_empty() {
            let planned = self.sessions.pop_front()?;
            self.expand(planned);
        }
        self.pending.pop_front()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone, Utc};
    use proptest::prelude::*;

    fn d(y: i32, m: u32, day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, day).unwrap()
    }

    fn t(h: u32, m: u32) -> NaiveTime {
        NaiveTime::from_hms_opt(h, m, 0).unwrap()
    }

    /// 09:30 to 16:00 US/Eastern, no holidays
    fn regular() -> TradingCalendar {
        TradingCalendar::new("XNYS", chrono_tz::US::Eastern, t(9, 30), t(16, 0)).unwrap()
    }

    fn utc(y: i32, m: u32, day: u32, h: u32, min: u32) -> Timestamp {
        Utc.with_ymd_and_hms(y, m, day, h, min, 0).unwrap()
    }

    /// Monday 2024-03-04 on the regular calendar
    fn monday(bts: Option<NaiveTime>, minute_emission: bool) -> Vec<(Timestamp, Event)> {
        generate(&regular(), d(2024, 3, 4), d(2024, 3, 4), bts, minute_emission).unwrap().collect()
    }

    #[test]
    fn test_marker_after_close_is_dropped() {
        // 2024-03-04 is a Monday, EST
        let events = monday(Some(t(16, 5)), true);

        assert!(events.iter().all(|(_, e)| *e != Event::BeforeTradingStart));
        assert_eq!(events[0], (utc(2024, 3, 4, 5, 0), Event::SessionStart));
        assert_eq!(events[1], (utc(2024, 3, 4, 14, 30), Event::Bar));
        assert_eq!(events[2], (utc(2024, 3, 4, 14, 30), Event::MinuteEnd));

        let n = events.len();
        assert_eq!(events[n - 3], (utc(2024, 3, 4, 21, 0), Event::Bar));
        assert_eq!(events[n - 2], (utc(2024, 3, 4, 21, 0), Event::MinuteEnd));
        assert_eq!(events[n - 1], (utc(2024, 3, 4, 21, 0), Event::SessionEnd));
        // SESSION_START + 391 minutes x 2 + SESSION_END
        assert_eq!(n, 1 + 391 * 2 + 1);
    }

    #[test]
    fn test_marker_before_open_precedes_first_bar() {
        let events = monday(Some(t(9, 15)), true);

        assert_eq!(events[0].1, Event::SessionStart);
        assert_eq!(events[1], (utc(2024, 3, 4, 14, 15), Event::BeforeTradingStart));
        assert_eq!(events[2], (utc(2024, 3, 4, 14, 30), Event::Bar));
    }

    #[test]
    fn test_marker_inside_session_splits_minutes() {
        let events = monday(Some(t(10, 0)), false);
        // Daily mode: the only minute is the close, which follows the marker
        assert_eq!(
            events,
            vec![
                (utc(2024, 3, 4, 5, 0), Event::SessionStart),
                (utc(2024, 3, 4, 15, 0), Event::BeforeTradingStart),
                (utc(2024, 3, 4, 21, 0), Event::Bar),
                (utc(2024, 3, 4, 21, 0), Event::SessionEnd),
            ]
        );

        let minutely = monday(Some(t(10, 0)), true);
        let marker = minutely.iter().position(|(_, e)| *e == Event::BeforeTradingStart).unwrap();
        assert_eq!(minutely[marker - 1], (utc(2024, 3, 4, 14, 59), Event::MinuteEnd));
        assert_eq!(minutely[marker + 1], (utc(2024, 3, 4, 15, 0), Event::Bar));
    }

    #[test]
    fn test_marker_on_last_minute_is_kept() {
        let events = monday(Some(t(16, 0)), false);
        assert_eq!(events[1], (utc(2024, 3, 4, 21, 0), Event::BeforeTradingStart));
        assert_eq!(events.last().unwrap().1, Event::SessionEnd);
    }

    #[test]
    fn test_default_marker_is_fifteen_minutes_before_open() {
        let events: Vec<_> = GeneratorConfig::default()
            .generate(&regular(), d(2024, 3, 4), d(2024, 3, 4))
            .unwrap()
            .collect();
        assert_eq!(events[1], (utc(2024, 3, 4, 14, 15), Event::BeforeTradingStart));
    }

    #[test]
    fn test_no_sessions_in_range() {
        // Saturday and Sunday only
        let err = generate(&regular(), d(2024, 3, 2), d(2024, 3, 3), None, true).unwrap_err();
        assert!(matches!(err, CalendarError::NoSessions { .. }));
    }

    #[test]
    fn test_sessions_emitted_one_after_another() {
        let events: Vec<_> =
            generate(&regular(), d(2024, 3, 1), d(2024, 3, 4), None, false).unwrap().collect();
        let starts: Vec<_> = events
            .iter()
            .filter(|(_, e)| *e == Event::SessionStart)
            .map(|(ts, _)| *ts)
            .collect();
        assert_eq!(starts, vec![utc(2024, 3, 1, 5, 0), utc(2024, 3, 4, 5, 0)]);
        assert_eq!(events.len(), 8);
        assert_eq!(events[3].1, Event::SessionEnd);
        assert_eq!(events[4].1, Event::SessionStart);
    }

    #[test]
    fn test_every_session_has_start_and_end() {
        let calendar = regular().with_execution_offsets(-15, 30).unwrap();
        let events: Vec<_> =
            generate(&calendar, d(2024, 3, 4), d(2024, 3, 5), None, true).unwrap().collect();
        let starts = events.iter().filter(|(_, e)| *e == Event::SessionStart).count();
        let ends = events.iter().filter(|(_, e)| *e == Event::SessionEnd).count();
        assert_eq!((starts, ends), (2, 2));
        // The pre-market marker lands on the first execution minute
        assert_eq!(events[1], (utc(2024, 3, 4, 14, 15), Event::BeforeTradingStart));
        assert_eq!(events[2], (utc(2024, 3, 4, 14, 15), Event::Bar));
        assert!(events.windows(2).all(|w| w[0].0 <= w[1].0 || w[1].1 == Event::SessionStart));
    }

    #[test]
    fn test_year_of_always_open_minutes_starts_promptly() {
        let calendar = TradingCalendar::new("X24", chrono_tz::UTC, t(0, 0), t(23, 59))
            .unwrap()
            .with_weekend(Vec::<chrono::Weekday>::new());
        let mut events = generate(&calendar, d(2024, 1, 1), d(2024, 12, 31), None, true).unwrap();
        assert_eq!(events.remaining_sessions().count(), 366);
        assert_eq!(events.next(), Some((utc(2024, 1, 1, 0, 0), Event::SessionStart)));
        // Only the current session has been expanded
        assert!(events.pending.len() <= 1 + 1 + 1440 * 2 + 1);
    }

    #[test]
    fn test_clone_restarts() {
        let events = generate(&regular(), d(2024, 3, 4), d(2024, 3, 8), None, true).unwrap();
        let first: Vec<_> = events.clone().collect();
        let second: Vec<_> = events.collect();
        assert_eq!(first, second);
    }

    #[test]
    fn test_skip_completed_sessions() {
        let mut events = generate(&regular(), d(2024, 3, 4), d(2024, 3, 6), None, false).unwrap();
        // Midday on the 5th: only the 4th is over
        assert_eq!(events.skip_completed_sessions(utc(2024, 3, 5, 17, 0)), 1);
        assert_eq!(events.next().unwrap(), (utc(2024, 3, 5, 5, 0), Event::SessionStart));
        assert!(events.in_session());
        assert_eq!(events.skip_completed_sessions(utc(2030, 1, 1, 0, 0)), 1);
        assert_eq!(events.remaining_sessions().count(), 0);
        // The session already underway still runs to its end
        assert_eq!(events.last().unwrap().1, Event::SessionEnd);
    }

    proptest! {
        #[test]
        fn prop_events_ordered_and_session_end_last(
            start_offset in 0i64..400,
            span in 0i64..10,
            bts_minutes in 0u32..(24 * 60),
            minute_emission in any::<bool>(),
        ) {
            let start = d(2023, 1, 2) + Duration::days(start_offset);
            let end = start + Duration::days(span);
            let bts = NaiveTime::from_hms_opt(bts_minutes / 60, bts_minutes % 60, 0).unwrap();

            let calendar = regular();
            let generated = generate(&calendar, start, end, Some(bts), minute_emission);
            // A marker inside the spring-forward gap cannot be localized
            let Ok(events) = generated else { return Ok(()); };

            let events: Vec<_> = events.collect();
            let mut in_session = false;
            let mut saw_marker = false;
            let mut previous: Option<Timestamp> = None;

            for (ts, event) in events {
                match event {
                    Event::SessionStart => {
                        prop_assert!(!in_session);
                        in_session = true;
                        saw_marker = false;
                        previous = None;
                    }
                    Event::BeforeTradingStart => {
                        prop_assert!(in_session);
                        prop_assert!(!saw_marker);
                        saw_marker = true;
                    }
                    Event::SessionEnd => {
                        prop_assert!(in_session);
                        in_session = false;
                    }
                    _ => prop_assert!(in_session),
                }
                if let Some(prev) = previous {
                    prop_assert!(ts >= prev);
                }
                previous = Some(ts);
            }
            prop_assert!(!in_session);
        }
    }
}
