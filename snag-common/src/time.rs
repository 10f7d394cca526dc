//! Timestamp utilities
//!
//! Storage format, end-of-day due dates and the `DD.MM.YYYY` date format
//! used in conversations.

use chrono::{DateTime, Duration, FixedOffset, NaiveDate, NaiveTime, SecondsFormat, TimeZone, Utc};
use once_cell::sync::Lazy;
use regex::Regex;

static DUE_DATE_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^(\d{2})\.(\d{2})\.(\d{4})$").expect("static regex"));

/// Get current UTC timestamp
pub fn now() -> DateTime<Utc> {
    Utc::now()
}

/// Convert milliseconds to duration
pub fn millis_to_duration(millis: u64) -> std::time::Duration {
    std::time::Duration::from_millis(millis)
}

/// Encode a timestamp for storage
///
/// Fixed width (millisecond precision, `Z` suffix) so that lexical order in
/// SQL comparisons equals chronological order.
pub fn to_db(ts: &DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Millis, true)
}

/// Decode a stored timestamp
pub fn from_db(s: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(s)
        .ok()
        .map(|dt| dt.with_timezone(&Utc))
}

fn offset(utc_offset_minutes: i32) -> FixedOffset {
    FixedOffset::east_opt(utc_offset_minutes * 60)
        .unwrap_or_else(|| FixedOffset::east_opt(0).expect("zero offset"))
}

/// 23:59:59 local time on `date`, as UTC
pub fn end_of_local_day(date: NaiveDate, utc_offset_minutes: i32) -> DateTime<Utc> {
    let eod = NaiveTime::from_hms_opt(23, 59, 59).expect("valid time");
    let local = date.and_time(eod);
    offset(utc_offset_minutes)
        .from_local_datetime(&local)
        .single()
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or_else(|| Utc.from_utc_datetime(&local))
}

/// Local calendar date of a UTC instant
pub fn local_date(ts: &DateTime<Utc>, utc_offset_minutes: i32) -> NaiveDate {
    ts.with_timezone(&offset(utc_offset_minutes)).date_naive()
}

/// End of the local day `days` days after `from` (0 = today)
pub fn due_in_days(from: &DateTime<Utc>, days: i64, utc_offset_minutes: i32) -> DateTime<Utc> {
    let today = local_date(from, utc_offset_minutes);
    end_of_local_day(today + Duration::days(days), utc_offset_minutes)
}

/// Parse a strict `DD.MM.YYYY` date into an end-of-day due timestamp
///
/// Returns `None` for anything not matching the pattern exactly or naming a
/// calendar date that does not exist (e.g. `31.02.2025`).
pub fn parse_due_date(input: &str, utc_offset_minutes: i32) -> Option<DateTime<Utc>> {
    let caps = DUE_DATE_RE.captures(input.trim())?;
    let day: u32 = caps[1].parse().ok()?;
    let month: u32 = caps[2].parse().ok()?;
    let year: i32 = caps[3].parse().ok()?;
    let date = NaiveDate::from_ymd_opt(year, month, day)?;
    Some(end_of_local_day(date, utc_offset_minutes))
}

/// Human-readable date (`DD.MM.YYYY`) in local time
pub fn format_date(ts: &DateTime<Utc>, utc_offset_minutes: i32) -> String {
    local_date(ts, utc_offset_minutes).format("%d.%m.%Y").to_string()
}
