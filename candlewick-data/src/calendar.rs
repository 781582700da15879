use chrono::{DateTime, Duration, NaiveDate, NaiveTime, TimeZone, Utc, Weekday};
use chrono_tz::America::New_York;
use thiserror::Error;

/// A named market calendar. Determines the session table
/// [`Calendar::sessions`] produces.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash)]
pub enum Market {
    /// Regular US equity session, 09:30-16:00 America/New_York, weekends
    /// and US equity holidays removed.
    Nyse,
    /// Sunday 17:00 through Friday 17:00 America/New_York, represented as
    /// one 24h interval per calendar day in that window.
    CmeFx,
    /// One continuous interval per calendar day, always open.
    AlwaysOpen,
}

#[derive(Debug, Error, Eq, PartialEq)]
pub enum CalendarError {
    #[error("calendar range end {end} is before start {start}")]
    InvertedRange { start: NaiveDate, end: NaiveDate },
}

/// A precomputed, ordered table of `(market_open, market_close)` UTC
/// intervals for a [`Market`] over `[start, end]`.
///
/// `now_session` is O(log N) via binary search, as required by `spec.md`.
#[derive(Debug, Clone)]
pub struct SessionTable {
    sessions: Vec<(DateTime<Utc>, DateTime<Utc>)>,
}

impl SessionTable {
    /// Index of the session whose `[open, close)` interval contains `now`,
    /// if any.
    pub fn session_at(&self, now: DateTime<Utc>) -> Option<usize> {
        let idx = self.sessions.partition_point(|(_, close)| *close <= now);
        self.sessions
            .get(idx)
            .filter(|(open, close)| *open <= now && now < *close)
            .map(|_| idx)
    }

    pub fn is_open(&self, now: DateTime<Utc>) -> bool {
        self.session_at(now).is_some()
    }

    /// The first session whose open is strictly after `now`.
    pub fn next_session_after(&self, now: DateTime<Utc>) -> Option<&(DateTime<Utc>, DateTime<Utc>)> {
        let idx = self.sessions.partition_point(|(open, _)| *open <= now);
        self.sessions.get(idx)
    }

    /// The first session whose close is at or after `now`.
    pub fn session_closing_at_or_after(
        &self,
        now: DateTime<Utc>,
    ) -> Option<&(DateTime<Utc>, DateTime<Utc>)> {
        let idx = self.sessions.partition_point(|(_, close)| *close < now);
        self.sessions.get(idx)
    }

    pub fn sessions(&self) -> &[(DateTime<Utc>, DateTime<Utc>)] {
        &self.sessions
    }
}

/// Computes session tables for the supported [`Market`]s.
pub struct Calendar;

impl Calendar {
    pub fn sessions(
        market: Market,
        start: NaiveDate,
        end: NaiveDate,
    ) -> Result<SessionTable, CalendarError> {
        if end < start {
            return Err(CalendarError::InvertedRange { start, end });
        }

        let sessions = match market {
            Market::Nyse => nyse_sessions(start, end),
            Market::CmeFx => cme_fx_sessions(start, end),
            Market::AlwaysOpen => always_open_sessions(start, end),
        };

        Ok(SessionTable { sessions })
    }
}

fn nyse_sessions(start: NaiveDate, end: NaiveDate) -> Vec<(DateTime<Utc>, DateTime<Utc>)> {
    let open_time = NaiveTime::from_hms_opt(9, 30, 0).unwrap();
    let close_time = NaiveTime::from_hms_opt(16, 0, 0).unwrap();

    each_day(start, end)
        .filter(|day| !is_weekend(*day))
        .filter(|day| !is_nyse_holiday(*day))
        .map(|day| {
            (
                to_utc(day, open_time),
                to_utc(day, close_time),
            )
        })
        .collect()
}

fn cme_fx_sessions(start: NaiveDate, end: NaiveDate) -> Vec<(DateTime<Utc>, DateTime<Utc>)> {
    let daily_open = NaiveTime::from_hms_opt(17, 0, 0).unwrap();

    each_day(start, end)
        .filter(|day| day.weekday() != Weekday::Sat)
        .filter(|day| {
            // The week's single continuous session runs Sun 17:00 through
            // Fri 17:00; there is no session opening on Friday evening.
            day.weekday() != Weekday::Fri
        })
        .map(|day| {
            let open = to_utc(day, daily_open);
            let close = open + Duration::hours(24);
            (open, close)
        })
        .collect()
}

fn always_open_sessions(start: NaiveDate, end: NaiveDate) -> Vec<(DateTime<Utc>, DateTime<Utc>)> {
    each_day(start, end)
        .map(|day| {
            let open = Utc.from_utc_datetime(&day.and_hms_opt(0, 0, 0).unwrap());
            (open, open + Duration::days(1))
        })
        .collect()
}

fn each_day(start: NaiveDate, end: NaiveDate) -> impl Iterator<Item = NaiveDate> {
    let mut day = start;
    std::iter::from_fn(move || {
        if day > end {
            None
        } else {
            let current = day;
            day += Duration::days(1);
            Some(current)
        }
    })
}

fn is_weekend(day: NaiveDate) -> bool {
    matches!(day.weekday(), Weekday::Sat | Weekday::Sun)
}

fn to_utc(day: NaiveDate, time: NaiveTime) -> DateTime<Utc> {
    New_York
        .from_local_datetime(&day.and_time(time))
        .single()
        .unwrap_or_else(|| New_York.from_local_datetime(&day.and_time(time)).earliest().unwrap())
        .with_timezone(&Utc)
}

/// US equity market holidays observed by NYSE, with weekend-observance
/// shifting (a holiday landing on Saturday is observed the prior Friday;
/// on Sunday, the following Monday).
fn is_nyse_holiday(day: NaiveDate) -> bool {
    let year = day.year();
    nyse_holidays(year).contains(&day)
}

use chrono::Datelike;

fn nyse_holidays(year: i32) -> Vec<NaiveDate> {
    let mut holidays = vec![
        observed(NaiveDate::from_ymd_opt(year, 1, 1).unwrap()),
        nth_weekday(year, 1, Weekday::Mon, 3),  // Martin Luther King Jr. Day
        nth_weekday(year, 2, Weekday::Mon, 3),  // Washington's Birthday
        good_friday(year),
        last_weekday(year, 5, Weekday::Mon),    // Memorial Day
        observed(NaiveDate::from_ymd_opt(year, 7, 4).unwrap()),
        nth_weekday(year, 9, Weekday::Mon, 1),  // Labor Day
        nth_weekday(year, 11, Weekday::Thu, 4), // Thanksgiving
        observed(NaiveDate::from_ymd_opt(year, 12, 25).unwrap()),
    ];

    if year >= 2022 {
        holidays.push(observed(NaiveDate::from_ymd_opt(year, 6, 19).unwrap())); // Juneteenth
    }

    holidays
}

/// Shift a fixed-date holiday that falls on a weekend to the nearest
/// business day (Saturday -> Friday, Sunday -> Monday).
fn observed(date: NaiveDate) -> NaiveDate {
    match date.weekday() {
        Weekday::Sat => date - Duration::days(1),
        Weekday::Sun => date + Duration::days(1),
        _ => date,
    }
}

fn nth_weekday(year: i32, month: u32, weekday: Weekday, n: u32) -> NaiveDate {
    let first_of_month = NaiveDate::from_ymd_opt(year, month, 1).unwrap();
    let offset = (7 + weekday.num_days_from_monday() as i64
        - first_of_month.weekday().num_days_from_monday() as i64)
        % 7;
    first_of_month + Duration::days(offset + 7 * (n as i64 - 1))
}

fn last_weekday(year: i32, month: u32, weekday: Weekday) -> NaiveDate {
    let next_month_first = if month == 12 {
        NaiveDate::from_ymd_opt(year + 1, 1, 1).unwrap()
    } else {
        NaiveDate::from_ymd_opt(year, month + 1, 1).unwrap()
    };
    let last_of_month = next_month_first - Duration::days(1);
    let offset = (last_of_month.weekday().num_days_from_monday() as i64
        - weekday.num_days_from_monday() as i64
        + 7)
        % 7;
    last_of_month - Duration::days(offset)
}

/// Anonymous Gregorian algorithm for the date of Easter Sunday; Good
/// Friday is two days prior.
fn good_friday(year: i32) -> NaiveDate {
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
    let easter = NaiveDate::from_ymd_opt(year, month as u32, day as u32).unwrap();
    easter - Duration::days(2)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn nyse_sessions_skip_weekends() {
        let start = NaiveDate::from_ymd_opt(2024, 1, 6).unwrap(); // Saturday
        let end = NaiveDate::from_ymd_opt(2024, 1, 8).unwrap(); // Monday
        let table = Calendar::sessions(Market::Nyse, start, end).unwrap();
        assert_eq!(table.sessions().len(), 1);
    }

    #[test]
    fn nyse_sessions_skip_new_years_day() {
        let start = NaiveDate::from_ymd_opt(2024, 1, 1).unwrap();
        let end = NaiveDate::from_ymd_opt(2024, 1, 2).unwrap();
        let table = Calendar::sessions(Market::Nyse, start, end).unwrap();
        assert_eq!(table.sessions().len(), 1);
    }

    #[test]
    fn nyse_open_close_times_respect_dst() {
        // 2024-07-01 is EDT (UTC-4): open 13:30 UTC, close 20:00 UTC.
        let day = NaiveDate::from_ymd_opt(2024, 7, 1).unwrap();
        let table = Calendar::sessions(Market::Nyse, day, day).unwrap();
        let (open, close) = table.sessions()[0];
        assert_eq!(open.format("%H:%M").to_string(), "13:30");
        assert_eq!(close.format("%H:%M").to_string(), "20:00");
    }

    #[test]
    fn session_at_is_found_via_binary_search() {
        let start = NaiveDate::from_ymd_opt(2024, 1, 2).unwrap();
        let end = NaiveDate::from_ymd_opt(2024, 1, 5).unwrap();
        let table = Calendar::sessions(Market::Nyse, start, end).unwrap();
        let (open, _) = table.sessions()[2];
        assert_eq!(table.session_at(open + Duration::minutes(5)), Some(2));
        assert_eq!(table.session_at(open - Duration::minutes(5)), None);
    }

    #[test]
    fn always_open_has_no_gaps() {
        let start = NaiveDate::from_ymd_opt(2024, 1, 1).unwrap();
        let end = NaiveDate::from_ymd_opt(2024, 1, 3).unwrap();
        let table = Calendar::sessions(Market::AlwaysOpen, start, end).unwrap();
        assert_eq!(table.sessions().len(), 3);
        for pair in table.sessions().windows(2) {
            assert_eq!(pair[0].1, pair[1].0);
        }
    }

    #[test]
    fn inverted_range_is_an_error() {
        let start = NaiveDate::from_ymd_opt(2024, 1, 5).unwrap();
        let end = NaiveDate::from_ymd_opt(2024, 1, 1).unwrap();
        assert!(Calendar::sessions(Market::Nyse, start, end).is_err());
    }
}
