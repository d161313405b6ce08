use std::time::Duration;

use crate::errors::{ExchangeError, Result};

/// Parses a compact human duration such as `1h45min`, `30s`, `2d12h` or
/// `500ms`. Units may be chained in decreasing order of magnitude.
pub fn parse_duration(input: &str) -> Result<Duration> {
    let input = input.trim();
    if input.is_empty() {
        return Err(ExchangeError::InvalidArgument(
            "empty duration string".into(),
        ));
    }
    let mut total = Duration::ZERO;
    let mut rest = input;
    while !rest.is_empty() {
        let digits_end = rest
            .bytes()
            .position(|byte| !byte.is_ascii_digit())
            .unwrap_or(rest.len());
        if digits_end == 0 {
            return Err(ExchangeError::InvalidArgument(format!(
                "invalid duration '{input}': expected a number at '{rest}'"
            )));
        }
        let number: u64 = rest[..digits_end].parse().map_err(|_| {
            ExchangeError::InvalidArgument(format!("invalid duration number in '{input}'"))
        })?;
        rest = &rest[digits_end..];
        let unit_end = rest
            .bytes()
            .position(|byte| byte.is_ascii_digit())
            .unwrap_or(rest.len());
        let unit = &rest[..unit_end];
        rest = &rest[unit_end..];
        let step = match unit {
            "w" => Duration::from_secs(number * 604_800),
            "d" => Duration::from_secs(number * 86_400),
            "h" => Duration::from_secs(number * 3_600),
            "min" | "m" => Duration::from_secs(number * 60),
            "s" | "" => Duration::from_secs(number),
            "ms" => Duration::from_millis(number),
            _ => {
                return Err(ExchangeError::InvalidArgument(format!(
                    "unknown duration unit '{unit}' in '{input}'"
                )))
            }
        };
        total += step;
    }
    Ok(total)
}

/// Formats a duration with its two most significant units, e.g. `1h45min`.
pub fn format_duration(duration: Duration) -> String {
    const UNITS: [(&str, u64); 6] = [
        ("w", 604_800_000),
        ("d", 86_400_000),
        ("h", 3_600_000),
        ("min", 60_000),
        ("s", 1_000),
        ("ms", 1),
    ];
    let mut millis = duration.as_millis() as u64;
    if millis == 0 {
        return "0s".into();
    }
    let mut out = String::new();
    let mut printed = 0;
    for (unit, unit_millis) in UNITS {
        let count = millis / unit_millis;
        if count > 0 {
            out.push_str(&format!("{count}{unit}"));
            millis -= count * unit_millis;
            printed += 1;
            if printed == 2 {
                break;
            }
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_chained_units() {
        assert_eq!(parse_duration("1h45min").unwrap(), Duration::from_secs(6300));
        assert_eq!(parse_duration("30s").unwrap(), Duration::from_secs(30));
        assert_eq!(parse_duration("2d12h").unwrap(), Duration::from_secs(216_000));
        assert_eq!(parse_duration("500ms").unwrap(), Duration::from_millis(500));
        assert_eq!(parse_duration("15").unwrap(), Duration::from_secs(15));
    }

    #[test]
    fn rejects_garbage() {
        assert!(parse_duration("").is_err());
        assert!(parse_duration("h").is_err());
        assert!(parse_duration("3x").is_err());
    }

    #[test]
    fn formats_two_units() {
        assert_eq!(format_duration(Duration::from_secs(6300)), "1h45min");
        assert_eq!(format_duration(Duration::from_millis(3500)), "3s500ms");
        assert_eq!(format_duration(Duration::ZERO), "0s");
    }

    #[test]
    fn round_trips() {
        for input in ["1h45min", "3s500ms", "2w", "1d4h"] {
            let duration = parse_duration(input).unwrap();
            assert_eq!(parse_duration(&format_duration(duration)).unwrap(), duration);
        }
    }
}
