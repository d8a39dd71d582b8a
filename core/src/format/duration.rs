/// ISO-8601 duration formatting
///
/// Only the time-of-day subset is understood: `PT#H#M#S`, every component
/// optional, components in that order, seconds possibly fractional.

/// Shown by [`f_duration`] when no duration is available
pub const NOT_AVAILABLE: &str = "N/A";

/// Shown by [`f_duration_simple`] when no duration is available
pub const EMPTY_CLOCK: &str = "00:00";

/// Shown by [`f_duration`] when the input cannot be parsed
pub const ZERO_SECONDS: &str = "0 seconds";

const MS_PER_SECOND: f64 = 1_000.0;
const MS_PER_MINUTE: f64 = 60_000.0;
const MS_PER_HOUR: f64 = 3_600_000.0;

/// Parse `PT#H#M#S` into milliseconds
pub fn parse_iso_duration(input: &str) -> Option<u64> {
    let body = input.trim().strip_prefix("PT")?;

    let mut total_ms = 0.0;
    let mut number = String::new();
    let mut last_rank = 0;

    for ch in body.chars() {
        match ch {
            '0'..='9' | '.' => number.push(ch),
            'H' | 'M' | 'S' => {
                let (rank, unit_ms) = match ch {
                    'H' => (1, MS_PER_HOUR),
                    'M' => (2, MS_PER_MINUTE),
                    _ => (3, MS_PER_SECOND),
                };
                // Components must appear once each, in H, M, S order
                if number.is_empty() || rank <= last_rank {
                    return None;
                }
                if ch != 'S' && number.contains('.') {
                    return None;
                }
                let value: f64 = number.parse().ok()?;
                total_ms += value * unit_ms;
                number.clear();
                last_rank = rank;
            }
            _ => return None,
        }
    }

    if !number.is_empty() {
        return None;
    }

    Some(total_ms.round() as u64)
}

fn parse_present(input: Option<&str>) -> Option<Result<u64, ()>> {
    let raw = input.map(str::trim).filter(|s| !s.is_empty())?;
    Some(parse_iso_duration(raw).ok_or(()))
}

/// Clock form: `H:MM:SS` with hours, `M:SS` without
pub fn f_duration_simple(input: Option<&str>) -> String {
    match parse_present(input) {
        Some(Ok(ms)) => format_clock(ms),
        _ => EMPTY_CLOCK.to_string(),
    }
}

/// Humanized form, e.g. `45 seconds` or `about 2 hours and 5 minutes`
pub fn f_duration(input: Option<&str>) -> String {
    match parse_present(input) {
        None => NOT_AVAILABLE.to_string(),
        Some(Err(())) => ZERO_SECONDS.to_string(),
        Some(Ok(ms)) => humanize_ms(ms),
    }
}

/// Render milliseconds as a clock string
pub fn format_clock(ms: u64) -> String {
    let total_seconds = ms / 1_000;
    let hours = total_seconds / 3_600;
    let minutes = (total_seconds % 3_600) / 60;
    let seconds = total_seconds % 60;

    if hours > 0 {
        format!("{}:{:02}:{:02}", hours, minutes, seconds)
    } else {
        format!("{}:{:02}", minutes, seconds)
    }
}

/// Render milliseconds as an approximate phrase
pub fn humanize_ms(ms: u64) -> String {
    let total_seconds = ms / 1_000;
    let total_minutes = total_seconds / 60;
    let total_hours = total_minutes / 60;
    let days = total_hours / 24;

    if total_seconds < 60 {
        plural(total_seconds, "second")
    } else if total_minutes < 60 {
        format!("about {}", plural(total_minutes, "minute"))
    } else if total_hours < 24 {
        with_remainder(total_hours, "hour", total_minutes % 60, "minute")
    } else {
        with_remainder(days, "day", total_hours % 24, "hour")
    }
}

fn with_remainder(major: u64, major_unit: &str, minor: u64, minor_unit: &str) -> String {
    if minor == 0 {
        format!("about {}", plural(major, major_unit))
    } else {
        format!(
            "about {} and {}",
            plural(major, major_unit),
            plural(minor, minor_unit)
        )
    }
}

pub(crate) fn plural(count: u64, unit: &str) -> String {
    if count == 1 {
        format!("1 {}", unit)
    } else {
        format!("{} {}s", count, unit)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_full_duration() {
        assert_eq!(parse_iso_duration("PT2H30M15S"), Some(9_015_000));
        assert_eq!(parse_iso_duration("PT45S"), Some(45_000));
        assert_eq!(parse_iso_duration("PT1M"), Some(60_000));
        assert_eq!(parse_iso_duration("PT0.5S"), Some(500));
        assert_eq!(parse_iso_duration("PT"), Some(0));
    }

    #[test]
    fn test_parse_rejects_malformed() {
        assert_eq!(parse_iso_duration(""), None);
        assert_eq!(parse_iso_duration("2:30:15"), None);
        assert_eq!(parse_iso_duration("P1D"), None);
        assert_eq!(parse_iso_duration("PT5M2H"), None);
        assert_eq!(parse_iso_duration("PT5"), None);
        assert_eq!(parse_iso_duration("PTH"), None);
        assert_eq!(parse_iso_duration("PT1.5H"), None);
        assert_eq!(parse_iso_duration("PT1H1H"), None);
    }

    #[test]
    fn test_simple_format() {
        assert_eq!(f_duration_simple(Some("PT2H30M15S")), "2:30:15");
        assert_eq!(f_duration_simple(Some("PT45S")), "0:45");
        assert_eq!(f_duration_simple(Some("PT12M3S")), "12:03");
        assert_eq!(f_duration_simple(Some("PT25H")), "25:00:00");
    }

    #[test]
    fn test_simple_format_fallbacks() {
        assert_eq!(f_duration_simple(None), "00:00");
        assert_eq!(f_duration_simple(Some("")), "00:00");
        assert_eq!(f_duration_simple(Some("soon")), "00:00");
    }

    #[test]
    fn test_humanized_format() {
        assert_eq!(f_duration(Some("PT45S")), "45 seconds");
        assert_eq!(f_duration(Some("PT1S")), "1 second");
        assert_eq!(f_duration(Some("PT5M20S")), "about 5 minutes");
        assert_eq!(f_duration(Some("PT2H5M")), "about 2 hours and 5 minutes");
        assert_eq!(f_duration(Some("PT1H")), "about 1 hour");
        assert_eq!(f_duration(Some("PT27H")), "about 1 day and 3 hours");
        assert_eq!(f_duration(Some("PT48H")), "about 2 days");
    }

    #[test]
    fn test_humanized_fallbacks() {
        assert_eq!(f_duration(None), "N/A");
        assert_eq!(f_duration(Some("  ")), "N/A");
        assert_eq!(f_duration(Some("garbage")), "0 seconds");
    }

    #[test]
    fn test_formatting_is_deterministic() {
        for input in ["PT2H30M15S", "PT45S", "PT3M", "PT10H0M1S"] {
            assert_eq!(f_duration(Some(input)), f_duration(Some(input)));
            assert_eq!(f_duration_simple(Some(input)), f_duration_simple(Some(input)));
        }
    }
}
