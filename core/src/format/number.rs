// Number formatting for OEE figures

/// Ratio in [0,1] as a percentage with one decimal, e.g. `85.3%`
pub fn f_percent(ratio: f64) -> String {
    if !ratio.is_finite() {
        return "N/A".to_string();
    }
    format!("{:.1}%", ratio * 100.0)
}

/// Signed percentage-point change, e.g. `+2.1%` or `-0.4%`
pub fn f_delta(ratio: f64) -> String {
    if !ratio.is_finite() {
        return "N/A".to_string();
    }
    let points = (ratio * 1_000.0).round() / 10.0;
    if points > 0.0 {
        format!("+{:.1}%", points)
    } else if points < 0.0 {
        format!("{:.1}%", points)
    } else {
        "0.0%".to_string()
    }
}

/// Integer with thousands separators, e.g. `12,345`
pub fn f_number(value: i64) -> String {
    let digits = value.unsigned_abs().to_string();
    let mut grouped = String::with_capacity(digits.len() + digits.len() / 3 + 1);

    for (i, ch) in digits.chars().enumerate() {
        if i > 0 && (digits.len() - i) % 3 == 0 {
            grouped.push(',');
        }
        grouped.push(ch);
    }

    if value < 0 {
        format!("-{}", grouped)
    } else {
        grouped
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_percent() {
        assert_eq!(f_percent(0.853), "85.3%");
        assert_eq!(f_percent(1.0), "100.0%");
        assert_eq!(f_percent(f64::NAN), "N/A");
    }

    #[test]
    fn test_delta_sign() {
        assert_eq!(f_delta(0.021), "+2.1%");
        assert_eq!(f_delta(-0.004), "-0.4%");
        assert_eq!(f_delta(0.0), "0.0%");
        assert_eq!(f_delta(-0.0001), "0.0%");
    }

    #[test]
    fn test_number_grouping() {
        assert_eq!(f_number(0), "0");
        assert_eq!(f_number(999), "999");
        assert_eq!(f_number(12_345), "12,345");
        assert_eq!(f_number(-1_234_567), "-1,234,567");
    }
}
