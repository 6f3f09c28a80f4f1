/// Formats seconds as `MM:SS`, or `HH:MM:SS` once an hour is reached.
///
/// Negative and non-finite input formats as `00:00`.
pub fn format_duration(seconds: f64) -> String {
    if !seconds.is_finite() || seconds <= 0.0 {
        return "00:00".to_string();
    }
    let total = seconds.round() as u64;
    let hours = total / 3600;
    let minutes = (total % 3600) / 60;
    let secs = total % 60;
    if hours > 0 {
        format!("{:02}:{:02}:{:02}", hours, minutes, secs)
    } else {
        format!("{:02}:{:02}", minutes, secs)
    }
}

/// Resolves an ffprobe rate such as `24000/1001` to frames per second,
/// rounded to two decimals. Anything unparseable yields `0.0`.
pub fn parse_frame_rate(rate: &str) -> f64 {
    let rate = rate.trim();
    let value = match rate.split_once('/') {
        Some((num, den)) => match (num.trim().parse::<f64>(), den.trim().parse::<f64>()) {
            (Ok(num), Ok(den)) if den != 0.0 => num / den,
            _ => 0.0,
        },
        None => rate.parse::<f64>().unwrap_or(0.0),
    };
    if value.is_finite() && value > 0.0 {
        round2(value)
    } else {
        0.0
    }
}

pub fn format_size_mb(bytes: u64) -> f64 {
    round2(bytes as f64 / (1024.0 * 1024.0))
}

fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

#[cfg(test)]
mod tests {
    use super::*;

    fn reparse(formatted: &str) -> u64 {
        formatted
            .split(':')
            .map(|p| p.parse::<u64>().unwrap())
            .fold(0, |acc, p| acc * 60 + p)
    }

    #[test]
    fn duration_formats() {
        assert_eq!(format_duration(0.0), "00:00");
        assert_eq!(format_duration(7.4), "00:07");
        assert_eq!(format_duration(59.0), "00:59");
        assert_eq!(format_duration(600.0), "10:00");
        assert_eq!(format_duration(3661.0), "01:01:01");
        assert_eq!(format_duration(-3.0), "00:00");
        assert_eq!(format_duration(f64::NAN), "00:00");
    }

    #[test]
    fn duration_reparses_to_nearest_second() {
        for s in [1.0, 42.6, 599.4, 3599.5, 3600.0, 86399.0, 90061.2] {
            let back = reparse(&format_duration(s));
            assert!((back as f64 - s).abs() <= 0.5, "{} -> {}", s, back);
        }
    }

    #[test]
    fn frame_rates() {
        assert!((parse_frame_rate("24000/1001") - 23.98).abs() < 0.01);
        assert_eq!(parse_frame_rate("30/1"), 30.0);
        assert_eq!(parse_frame_rate("25"), 25.0);
        assert_eq!(parse_frame_rate("0/0"), 0.0);
        assert_eq!(parse_frame_rate("abc"), 0.0);
        assert_eq!(parse_frame_rate("30/x"), 0.0);
        assert_eq!(parse_frame_rate(""), 0.0);
        assert_eq!(parse_frame_rate("-30/1"), 0.0);
    }

    #[test]
    fn sizes_in_mb() {
        assert_eq!(format_size_mb(0), 0.0);
        assert_eq!(format_size_mb(1024 * 1024), 1.0);
        assert_eq!(format_size_mb(1_572_864), 1.5);
        assert_eq!(format_size_mb(2048), 0.0);
    }
}
