//! Built-in calendars

use chrono::{Datelike, Duration, NaiveDate, NaiveTime, Weekday};
use session_core::{ALWAYS_OPEN_EXCHANGE, NYSE_EXCHANGE};

use crate::calendar::TradingCalendar;
use crate::error::CalendarResult;

/// Years covered by the rule-generated NYSE holiday tables
const NYSE_YEARS: std::ops::RangeInclusive<i32> = 1990..=2100;

fn hm(hour: u32, minute: u32) -> CalendarResult<NaiveTime> {
    NaiveTime::from_hms_opt(hour, minute, 0)
        .ok_or_else(|| {
            crate::CalendarError::InvalidSpec(format!("invalid time {hour:02}:{minute:02}"))
        })
}

/// New York Stock Exchange: 09:31 to 16:00 US/Eastern, first minute bar at 09:31
pub fn nyse() -> CalendarResult<TradingCalendar> {
    let holidays = NYSE_YEARS.flat_map(nyse_holidays);
    let early_close = hm(13, 0)?;
    let early_closes = NYSE_YEARS.flat_map(nyse_early_closes).map(|date| (date, early_close));

    TradingCalendar::new(NYSE_EXCHANGE, chrono_tz::US::Eastern, hm(9, 31)?, hm(16, 0)?)?
        .with_holidays(holidays)
        .with_early_closes(early_closes)
}

/// Round-the-clock venue: every day is a session from 00:00 to 23:59 UTC
pub fn always_open() -> CalendarResult<TradingCalendar> {
    let calendar =
        TradingCalendar::new(ALWAYS_OPEN_EXCHANGE, chrono_tz::UTC, hm(0, 0)?, hm(23, 59)?)?;
    Ok(calendar.with_weekend(Vec::<Weekday>::new()))
}

fn date(year: i32, month: u32, day: u32) -> Option<NaiveDate> {
    NaiveDate::from_ymd_opt(year, month, day)
}

/// The `n`th `weekday` of a month, 1-based
fn nth_weekday(year: i32, month: u32, weekday: Weekday, n: u8) -> Option<NaiveDate> {
    NaiveDate::from_weekday_of_month_opt(year, month, weekday, n)
}

fn last_weekday(year: i32, month: u32, weekday: Weekday) -> Option<NaiveDate> {
    let first_of_next = if month == 12 { date(year + 1, 1, 1)? } else { date(year, month + 1, 1)? };
    let mut day = first_of_next.pred_opt()?;
    while day.weekday() != weekday {
        day = day.pred_opt()?;
    }
    Some(day)
}

/// Saturday holidays move to Friday, Sunday holidays to Monday
fn observed(day: NaiveDate) -> NaiveDate {
    match day.weekday() {
        Weekday::Sat => day - Duration::days(1),
        Weekday::Sun => day + Duration::days(1),
        _ => day,
    }
}

/// Western Easter Sunday (anonymous Gregorian algorithm)
fn easter_sunday(year: i32) -> Option<NaiveDate> {
    let a = year % 19;
    let b = year / 100;
    let c = year % 100;
    let d = b / 4;
    let e = b % 4;
    let f = (b + 8) / 25;
    let g = (b - f + 1) / 3;
    let h = (19 * a + b - d - g + 15) % 30;
    let i = c / 4;
    let k = c % 4;
    let l = (32 + 2 * e + 2 * i - h - k) % 7;
    let m = (a + 11 * h + 22 * l) / 451;
    let month = (h + l - 7 * m + 114) / 31;
    let day = (h + l - 7 * m + 114) % 31 + 1;
    date(year, month as u32, day as u32)
}

/// Regular NYSE full-day closures for `year`
pub fn nyse_holidays(year: i32) -> Vec<NaiveDate> {
    let mut days = Vec::with_capacity(10);

    // New Year's Day on a Saturday is not observed on the Friday before
    if let Some(new_year) = date(year, 1, 1) {
        if new_year.weekday() != Weekday::Sat {
            days.push(observed(new_year));
        }
    }
    if year >= 1998 {
        days.extend(nth_weekday(year, 1, Weekday::Mon, 3));
    }
    days.extend(nth_weekday(year, 2, Weekday::Mon, 3));
    days.extend(easter_sunday(year).map(|easter| easter - Duration::days(2)));
    days.extend(last_weekday(year, 5, Weekday::Mon));
    if year >= 2022 {
        days.extend(date(year, 6, 19).map(observed));
    }
    days.extend(date(year, 7, 4).map(observed));
    days.extend(nth_weekday(year, 9, Weekday::Mon, 1));
    days.extend(nth_weekday(year, 11, Weekday::Thu, 4));
    days.extend(date(year, 12, 25).map(observed));

    days
}

/// NYSE 13:00 closes: July 3rd, the day after Thanksgiving and Christmas Eve,
/// whenever they fall on a regular weekday session
pub fn nyse_early_closes(year: i32) -> Vec<NaiveDate> {
    let holidays = nyse_holidays(year);
    let candidates = [
        date(year, 7, 3),
        nth_weekday(year, 11, Weekday::Thu, 4).map(|thanksgiving| thanksgiving + Duration::days(1)),
        date(year, 12, 24),
    ];

    candidates
        .into_iter()
        .flatten()
        .filter(|day| !matches!(day.weekday(), Weekday::Sat | Weekday::Sun))
        .filter(|day| !holidays.contains(day))
        .collect()
}
