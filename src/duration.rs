//! Durations on the command line.
//!
//! Everything else in chanflux counts milliseconds, so a bare number is
//! taken as milliseconds and formatting never goes below them.

use std::time::Duration;

use anyhow::{bail, Context, Result};

fn unit_millis(unit: &str) -> Option<f64> {
    match unit {
        "" | "ms" => Some(1.0),
        "s" => Some(1_000.0),
        "m" => Some(60_000.0),
        "h" => Some(3_600_000.0),
        _ => None,
    }
}

/// Parse `"250"`, `"250ms"`, `"1.5s"`, `"2m"` or `"1h"`.
pub fn parse_duration(text: &str) -> Result<Duration> {
    let text = text.trim();
    let split = text
        .find(|c: char| !(c.is_ascii_digit() || c == '.'))
        .unwrap_or(text.len());
    let (number, unit) = text.split_at(split);

    let Some(scale) = unit_millis(unit.trim()) else {
        bail!("unknown unit '{}' in duration '{}'", unit.trim(), text);
    };
    let value: f64 = number
        .parse()
        .with_context(|| format!("invalid duration '{}'", text))?;
    Duration::try_from_secs_f64(value * scale / 1_000.0)
        .with_context(|| format!("duration '{}' is out of range", text))
}

/// Render in the largest unit that keeps the value readable, e.g. `250ms`,
/// `1.5s`, `2m`.
pub fn format_duration(d: Duration) -> String {
    let millis = d.as_secs_f64() * 1_000.0;
    let (value, unit) = if millis >= 3_600_000.0 {
        (millis / 3_600_000.0, "h")
    } else if millis >= 60_000.0 {
        (millis / 60_000.0, "m")
    } else if millis >= 1_000.0 {
        (millis / 1_000.0, "s")
    } else {
        (millis, "ms")
    };

    let rounded = (value * 100.0).round() / 100.0;
    format!("{}{}", rounded, unit)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bare_numbers_are_milliseconds() {
        assert_eq!(parse_duration("250").unwrap(), Duration::from_millis(250));
        assert_eq!(parse_duration("250ms").unwrap(), Duration::from_millis(250));
    }

    #[test]
    fn larger_units() {
        assert_eq!(parse_duration("1.5s").unwrap(), Duration::from_millis(1500));
        assert_eq!(parse_duration(" 2m ").unwrap(), Duration::from_secs(120));
        assert_eq!(parse_duration("1h").unwrap(), Duration::from_secs(3600));
    }

    #[test]
    fn rejects_garbage() {
        assert!(parse_duration("soon").is_err());
        assert!(parse_duration("-5s").is_err());
        assert!(parse_duration("5d").is_err());
        assert!(parse_duration("").is_err());
        assert!(parse_duration("99999999999999999999999h").is_err());
    }

    #[test]
    fn formats_in_largest_unit() {
        assert_eq!(format_duration(Duration::ZERO), "0ms");
        assert_eq!(format_duration(Duration::from_millis(250)), "250ms");
        assert_eq!(format_duration(Duration::from_millis(1500)), "1.5s");
        assert_eq!(format_duration(Duration::from_secs(120)), "2m");
    }
}
