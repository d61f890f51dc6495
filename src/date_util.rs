use chrono::{DateTime, Datelike, Local, NaiveDate, NaiveDateTime, NaiveTime};

const NAIVE_DATETIME_FORMATS: &[&str] = &[
    "%Y-%m-%dT%H:%M:%S%.f",
    "%Y-%m-%dT%H:%M:%S",
    "%Y-%m-%d %H:%M:%S",
    "%Y-%m-%dT%H:%M",
    "%Y-%m-%d %H:%M",
];

/// True when `s` is exactly `YYYY-MM-DD` (digits only, no time part).
pub fn is_iso_date(s: &str) -> bool {
    let b = s.as_bytes();
    b.len() == 10
        && b[4] == b'-'
        && b[7] == b'-'
        && b.iter()
            .enumerate()
            .all(|(i, c)| i == 4 || i == 7 || c.is_ascii_digit())
}

/// Parse a date-only value as a local calendar date.
///
/// Date-only values are never routed through a UTC timestamp, so
/// `2025-01-01` is January 1st whatever the host offset is.
pub fn parse_local_date(s: &str) -> Option<NaiveDate> {
    let s = s.trim();
    if !is_iso_date(s) {
        return None;
    }
    NaiveDate::parse_from_str(s, "%Y-%m-%d").ok()
}

/// Parse a date or date-time value into local wall-clock time.
///
/// Strict ISO dates become local midnight. Offset-carrying timestamps are
/// converted to the local zone; naive timestamps are taken as already local.
pub fn parse_timestamp(s: &str) -> Option<NaiveDateTime> {
    let s = s.trim();
    if s.is_empty() {
        return None;
    }
    if let Some(d) = parse_local_date(s) {
        return d.and_hms_opt(0, 0, 0);
    }
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Some(dt.with_timezone(&Local).naive_local());
    }
    NAIVE_DATETIME_FORMATS
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(s, fmt).ok())
}

/// English ordinal suffix for a day of month.
pub fn ordinal_suffix(day: u32) -> &'static str {
    match (day % 10, day % 100) {
        (_, 11..=13) => "th",
        (1, _) => "st",
        (2, _) => "nd",
        (3, _) => "rd",
        _ => "th",
    }
}

/// Logseq's default journal title format, e.g. `January 2nd, 2025`.
pub fn format_journal_date(d: NaiveDate) -> String {
    format!(
        "{} {}{}, {}",
        d.format("%B"),
        d.day(),
        ordinal_suffix(d.day()),
        d.year()
    )
}

/// Read back a journal date, optionally followed by `HH:MM` as written in
/// due properties.
pub fn parse_journal_date(s: &str) -> Option<(NaiveDate, Option<NaiveTime>)> {
    let mut parts = s.split_whitespace();
    let month = parts.next()?;
    let day = parts
        .next()?
        .strip_suffix(',')?
        .trim_end_matches(|c: char| c.is_ascii_alphabetic());
    let year = parts.next()?;
    let time = match parts.next() {
        Some(t) => Some(NaiveTime::parse_from_str(t, "%H:%M").ok()?),
        None => None,
    };
    if parts.next().is_some() {
        return None;
    }
    let date = NaiveDate::parse_from_str(&format!("{month} {day:0>2} {year}"), "%B %d %Y").ok()?;
    Some((date, time))
}

/// Format a raw date string as a journal date; unparseable input yields "".
pub fn format_date_str(raw: &str) -> String {
    parse_timestamp(raw)
        .map(|dt| format_journal_date(dt.date()))
        .unwrap_or_default()
}

/// `YYYY-MM-DD HH:MM`, the normalised timestamp used in properties.
pub fn format_timestamp(dt: NaiveDateTime) -> String {
    dt.format("%Y-%m-%d %H:%M").to_string()
}

pub fn normalize_timestamp(raw: &str) -> Option<String> {
    parse_timestamp(raw).map(format_timestamp)
}
