//! Australian-Eastern business time.
//!
//! Offsets are UTC+10 (standard) and UTC+11 (daylight saving). Daylight saving
//! is decided per local calendar day: on or after the first Sunday of October,
//! or before the first Sunday of April. Transitions are therefore rounded to
//! whole days; callers tolerate a one-day drift at the boundaries.

use chrono::{
    DateTime, Datelike, Duration, FixedOffset, NaiveDate, NaiveDateTime, NaiveTime, TimeZone,
    Timelike, Utc,
};

use crate::model::DayOfWeek;

pub const STANDARD_OFFSET_HOURS: i32 = 10;
pub const DAYLIGHT_OFFSET_HOURS: i32 = 11;
pub const DEFAULT_DAYS_BEFORE: i64 = 14;
pub const DEFAULT_DAYS_AFTER: i64 = 3;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LocalParts {
    pub year: i32,
    pub month: u32,
    pub day: u32,
    pub weekday: DayOfWeek,
    pub hour: u32,
    pub minute: u32,
    pub second: u32,
    pub offset_hours: i32,
}

impl LocalParts {
    pub fn date(&self) -> Option<NaiveDate> {
        NaiveDate::from_ymd_opt(self.year, self.month, self.day)
    }

    pub fn minutes_since_midnight(&self) -> u32 {
        self.hour * 60 + self.minute
    }
}

/// Inclusive UTC bounds of a post search.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SearchWindow {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

impl SearchWindow {
    pub fn contains(&self, instant: DateTime<Utc>) -> bool {
        instant >= self.start && instant <= self.end
    }
}

fn first_sunday(year: i32, month: u32) -> Option<NaiveDate> {
    let first = NaiveDate::from_ymd_opt(year, month, 1)?;
    let shift = (7 - first.weekday().num_days_from_sunday()) % 7;
    first.checked_add_signed(Duration::days(i64::from(shift)))
}

pub fn is_daylight_saving(local_date: NaiveDate) -> bool {
    let year = local_date.year();
    match (first_sunday(year, 4), first_sunday(year, 10)) {
        (Some(ends), Some(starts)) => local_date < ends || local_date >= starts,
        _ => false,
    }
}

fn offset_hours(hours: i32) -> FixedOffset {
    FixedOffset::east_opt(hours * 3600).expect("business offsets are within a day")
}

pub fn offset_for_local_date(local_date: NaiveDate) -> FixedOffset {
    if is_daylight_saving(local_date) {
        offset_hours(DAYLIGHT_OFFSET_HOURS)
    } else {
        offset_hours(STANDARD_OFFSET_HOURS)
    }
}

pub fn offset_for_instant(instant: DateTime<Utc>) -> FixedOffset {
    let standard = instant.with_timezone(&offset_hours(STANDARD_OFFSET_HOURS));
    offset_for_local_date(standard.date_naive())
}

pub fn to_local(instant: DateTime<Utc>) -> DateTime<FixedOffset> {
    instant.with_timezone(&offset_for_instant(instant))
}

pub fn local_parts(instant: DateTime<Utc>) -> LocalParts {
    let local = to_local(instant);
    LocalParts {
        year: local.year(),
        month: local.month(),
        day: local.day(),
        weekday: local.weekday().into(),
        hour: local.hour(),
        minute: local.minute(),
        second: local.second(),
        offset_hours: local.offset().local_minus_utc() / 3600,
    }
}

pub fn local_date(instant: DateTime<Utc>) -> NaiveDate {
    to_local(instant).date_naive()
}

pub fn local_weekday(instant: DateTime<Utc>) -> DayOfWeek {
    to_local(instant).weekday().into()
}

pub fn utc_weekday(instant: DateTime<Utc>) -> DayOfWeek {
    instant.weekday().into()
}

/// "YYYY-MM" of the instant in business time, the partition key of `byPostMonth`.
pub fn year_month(instant: DateTime<Utc>) -> String {
    to_local(instant).format("%Y-%m").to_string()
}

pub fn format_local_date(instant: DateTime<Utc>) -> String {
    local_date(instant).format("%Y-%m-%d").to_string()
}

/// Converts a business-local wall-clock time to UTC.
pub fn local_to_utc(date: NaiveDate, time: NaiveTime) -> Option<DateTime<Utc>> {
    offset_for_local_date(date)
        .from_local_datetime(&date.and_time(time))
        .single()
        .map(|dt| dt.with_timezone(&Utc))
}

/// Post search window around a game start.
///
/// The start is local midnight `days_before` days before the local start
/// date; the end is 23:59:59 local `days_after` days after it. Negative
/// deltas yield `None`.
pub fn post_search_window(
    game_start: DateTime<Utc>,
    days_before: i64,
    days_after: i64,
) -> Option<SearchWindow> {
    if days_before < 0 || days_after < 0 {
        return None;
    }
    let start_date = local_date(game_start);
    let first_day = start_date.checked_sub_signed(Duration::days(days_before))?;
    let last_day = start_date.checked_add_signed(Duration::days(days_after))?;
    let start = local_to_utc(first_day, NaiveTime::from_hms_opt(0, 0, 0)?)?;
    let end = local_to_utc(last_day, NaiveTime::from_hms_opt(23, 59, 59)?)?;
    Some(SearchWindow { start, end })
}

/// Every local "YYYY-MM" touched by the UTC range, in order.
pub fn year_months_between(start: DateTime<Utc>, end: DateTime<Utc>) -> Vec<String> {
    if start > end {
        return Vec::new();
    }
    let first = local_date(start);
    let last = local_date(end);
    let (mut year, mut month) = (first.year(), first.month());
    let mut out = Vec::new();
    while (year, month) <= (last.year(), last.month()) {
        out.push(format!("{year:04}-{month:02}"));
        if month == 12 {
            year += 1;
            month = 1;
        } else {
            month += 1;
        }
    }
    out
}

/// Signed number of local calendar days from `a` to `b`.
pub fn local_day_difference(a: DateTime<Utc>, b: DateTime<Utc>) -> i64 {
    (local_date(b) - local_date(a)).num_days()
}

pub fn parse_instant(raw: &str) -> Option<DateTime<Utc>> {
    let raw = raw.trim();
    if raw.is_empty() {
        return None;
    }
    if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        return Some(dt.with_timezone(&Utc));
    }
    if let Ok(naive) = NaiveDateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S%.f") {
        return Some(Utc.from_utc_datetime(&naive));
    }
    let date = NaiveDate::parse_from_str(raw, "%Y-%m-%d").ok()?;
    local_to_utc(date, NaiveTime::from_hms_opt(0, 0, 0)?)
}

/// Bare dates are taken as business-local; full timestamps are converted.
pub fn parse_local_date(raw: &str) -> Option<NaiveDate> {
    let raw = raw.trim();
    if let Ok(date) = NaiveDate::parse_from_str(raw, "%Y-%m-%d") {
        return Some(date);
    }
    parse_instant(raw).map(local_date)
}

/// Minutes since midnight for an "HH:MM" (or "HH:MM:SS") string.
pub fn parse_clock_minutes(raw: &str) -> Option<u32> {
    let mut parts = raw.trim().split(':');
    let hour: u32 = parts.next()?.trim().parse().ok()?;
    let minute: u32 = parts.next()?.trim().parse().ok()?;
    if hour > 23 || minute > 59 {
        return None;
    }
    Some(hour * 60 + minute)
}

pub fn local_clock(instant: DateTime<Utc>) -> String {
    to_local(instant).format("%H:%M").to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn utc(raw: &str) -> DateTime<Utc> {
        DateTime::parse_from_rfc3339(raw).unwrap().with_timezone(&Utc)
    }

    #[test]
    fn winter_uses_standard_offset() {
        let parts = local_parts(utc("2024-06-15T10:00:00Z"));
        assert_eq!(parts.offset_hours, 10);
        assert_eq!((parts.year, parts.month, parts.day), (2024, 6, 15));
        assert_eq!(parts.hour, 20);
        assert_eq!(parts.weekday, DayOfWeek::Saturday);
    }

    #[test]
    fn summer_uses_daylight_offset_and_rolls_the_date() {
        let parts = local_parts(utc("2024-01-10T14:30:00Z"));
        assert_eq!(parts.offset_hours, 11);
        assert_eq!((parts.month, parts.day, parts.hour, parts.minute), (1, 11, 1, 30));
    }

    #[test]
    fn daylight_boundaries_follow_first_sundays() {
        // 2024: DST ends Sunday 7 April, starts Sunday 6 October.
        assert!(is_daylight_saving(NaiveDate::from_ymd_opt(2024, 4, 6).unwrap()));
        assert!(!is_daylight_saving(NaiveDate::from_ymd_opt(2024, 4, 7).unwrap()));
        assert!(!is_daylight_saving(NaiveDate::from_ymd_opt(2024, 10, 5).unwrap()));
        assert!(is_daylight_saving(NaiveDate::from_ymd_opt(2024, 10, 6).unwrap()));
    }

    #[test]
    fn search_window_spans_local_midnight_to_end_of_day() {
        let window = post_search_window(utc("2024-06-15T10:00:00Z"), 14, 3).unwrap();
        // local 2024-06-01 00:00 +10 and 2024-06-18 23:59:59 +10
        assert_eq!(window.start, utc("2024-05-31T14:00:00Z"));
        assert_eq!(window.end, utc("2024-06-18T13:59:59Z"));
    }

    #[test]
    fn search_window_includes_fourteen_days_before_but_not_fifteen() {
        let start = utc("2024-06-15T10:00:00Z");
        let window = post_search_window(start, DEFAULT_DAYS_BEFORE, DEFAULT_DAYS_AFTER).unwrap();
        assert!(window.contains(utc("2024-05-31T14:30:00Z")));
        assert!(!window.contains(utc("2024-05-31T13:30:00Z")));
        assert!(window.contains(utc("2024-06-18T13:00:00Z")));
        assert!(!window.contains(utc("2024-06-18T14:00:01Z")));
    }

    #[test]
    fn negative_deltas_are_rejected() {
        assert!(post_search_window(utc("2024-06-15T10:00:00Z"), -1, 3).is_none());
    }

    #[test]
    fn year_months_cover_local_range() {
        let months = year_months_between(utc("2023-11-30T14:00:00Z"), utc("2024-02-01T00:00:00Z"));
        assert_eq!(months, vec!["2023-12", "2024-01", "2024-02"]);
        assert!(year_months_between(utc("2024-02-01T00:00:00Z"), utc("2024-01-01T00:00:00Z")).is_empty());
    }

    #[test]
    fn day_difference_uses_local_calendar() {
        // Same UTC day, different local days.
        let a = utc("2024-06-15T13:00:00Z");
        let b = utc("2024-06-15T15:00:00Z");
        assert_eq!(local_day_difference(a, b), 1);
    }

    #[test]
    fn parsing_accepts_dates_and_timestamps() {
        assert_eq!(
            parse_local_date("2024-06-14"),
            NaiveDate::from_ymd_opt(2024, 6, 14)
        );
        assert_eq!(
            parse_local_date("2024-06-14T20:00:00Z"),
            NaiveDate::from_ymd_opt(2024, 6, 15)
        );
        assert_eq!(parse_instant("2024-06-15"), Some(utc("2024-06-14T14:00:00Z")));
        assert!(parse_instant("not a date").is_none());
        assert_eq!(parse_clock_minutes("19:30"), Some(1170));
        assert!(parse_clock_minutes("25:00").is_none());
    }

    #[test]
    fn year_month_is_local() {
        assert_eq!(year_month(utc("2024-06-30T15:00:00Z")), "2024-07");
    }
}
