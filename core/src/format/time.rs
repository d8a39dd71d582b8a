// Date and relative time formatting

use super::duration::plural;
use chrono::{DateTime, NaiveDateTime, Utc};

const MINUTES_PER_HOUR: i64 = 60;
const MINUTES_PER_DAY: i64 = 1_440;
const MINUTES_PER_MONTH: i64 = 43_200;
const MINUTES_PER_YEAR: i64 = 525_600;

/// Parse an ISO-8601 timestamp; values without an offset are taken as UTC
pub fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    let raw = raw.trim();
    if let Ok(parsed) = DateTime::parse_from_rfc3339(raw) {
        return Some(parsed.with_timezone(&Utc));
    }
    NaiveDateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S%.f")
        .ok()
        .map(|naive| naive.and_utc())
}

/// `01 Mar 2024`
pub fn f_date(ts: DateTime<Utc>) -> String {
    ts.format("%d %b %Y").to_string()
}

/// `01 Mar 2024 2:05 PM`
pub fn f_date_time(ts: DateTime<Utc>) -> String {
    ts.format("%d %b %Y %-I:%M %p").to_string()
}

/// `2:05 PM`
pub fn f_time(ts: DateTime<Utc>) -> String {
    ts.format("%-I:%M %p").to_string()
}

/// Milliseconds since the Unix epoch
pub fn f_timestamp(ts: DateTime<Utc>) -> i64 {
    ts.timestamp_millis()
}

/// Relative time against the current clock
pub fn f_relative_time(ts: DateTime<Utc>) -> String {
    f_relative_time_from(ts, Utc::now())
}

/// Future timestamps get a compact countdown (`in about 1 hour 30 min`);
/// past ones fall back to [`f_to_now_from`]
pub fn f_relative_time_from(ts: DateTime<Utc>, now: DateTime<Utc>) -> String {
    if ts <= now {
        return f_to_now_from(ts, now);
    }

    // Rounded to the nearest minute
    let minutes = ((ts - now).num_seconds() + 30) / 60;
    let hours = minutes / MINUTES_PER_HOUR;
    let rest = minutes % MINUTES_PER_HOUR;

    match (hours, rest) {
        (0, 0) => "in less than a minute".to_string(),
        (0, m) => format!("in {} min", m),
        (h, 0) => format!("in about {}", plural(h as u64, "hour")),
        (h, m) => format!("in about {} {} min", plural(h as u64, "hour"), m),
    }
}

/// Distance to now with a suffix, e.g. `about 2 hours ago`
pub fn f_to_now(ts: DateTime<Utc>) -> String {
    f_to_now_from(ts, Utc::now())
}

pub fn f_to_now_from(ts: DateTime<Utc>, now: DateTime<Utc>) -> String {
    if ts > now {
        format!("in {}", format_distance((ts - now).num_seconds()))
    } else {
        format!("{} ago", format_distance((now - ts).num_seconds()))
    }
}

/// Approximate wording for a distance in seconds
pub fn format_distance(seconds: i64) -> String {
    let seconds = seconds.abs();
    if seconds < 30 {
        return "less than a minute".to_string();
    }

    let minutes = (seconds as f64 / 60.0).round() as i64;
    let round_div = |unit: i64| (minutes as f64 / unit as f64).round() as u64;

    if minutes < 2 {
        "1 minute".to_string()
    } else if minutes < 45 {
        plural(minutes as u64, "minute")
    } else if minutes < 90 {
        "about 1 hour".to_string()
    } else if minutes < MINUTES_PER_DAY {
        format!("about {}", plural(round_div(MINUTES_PER_HOUR), "hour"))
    } else if minutes < 2_520 {
        "1 day".to_string()
    } else if minutes < MINUTES_PER_MONTH {
        plural(round_div(MINUTES_PER_DAY), "day")
    } else if minutes < 2 * MINUTES_PER_MONTH {
        format!("about {}", plural(round_div(MINUTES_PER_MONTH), "month"))
    } else if minutes < MINUTES_PER_YEAR {
        plural(round_div(MINUTES_PER_MONTH), "month")
    } else {
        format!("about {}", plural(round_div(MINUTES_PER_YEAR), "year"))
    }
}
