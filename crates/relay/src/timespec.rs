//! Offset/duration parsing for `90`, `90s`, `1m30s`, `1h2m3s`, `500ms`.

use std::time::Duration;

/// Parse a time value. A bare number is seconds and may be fractional.
pub fn parse_timespec(input: &str) -> Result<Duration, String> {
    let s = input.trim();
    if s.is_empty() {
        return Err("empty time value".to_string());
    }
    if let Ok(secs) = s.parse::<f64>() {
        return seconds(secs, input);
    }

    let mut total = Duration::ZERO;
    let mut rest = s;
    while !rest.is_empty() {
        let digits = rest
            .find(|c: char| !(c.is_ascii_digit() || c == '.'))
            .ok_or_else(|| format!("missing unit in time value {input:?}"))?;
        if digits == 0 {
            return Err(format!("expected a number in time value {input:?}"));
        }
        let value: f64 = rest[..digits]
            .parse()
            .map_err(|_| format!("bad number in time value {input:?}"))?;
        rest = &rest[digits..];

        let unit_len = rest
            .find(|c: char| c.is_ascii_digit() || c == '.')
            .unwrap_or(rest.len());
        let scale = match &rest[..unit_len] {
            "h" => 3600.0,
            "m" => 60.0,
            "s" => 1.0,
            "ms" => 0.001,
            other => return Err(format!("unknown unit {other:?} in time value {input:?}")),
        };
        rest = &rest[unit_len..];
        total += seconds(value * scale, input)?;
    }
    Ok(total)
}

fn seconds(secs: f64, input: &str) -> Result<Duration, String> {
    Duration::try_from_secs_f64(secs).map_err(|_| format!("invalid time value {input:?}"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_plain_seconds() {
        assert_eq!(parse_timespec("90"), Ok(Duration::from_secs(90)));
        assert_eq!(parse_timespec("2.5"), Ok(Duration::from_millis(2500)));
    }

    #[test]
    fn parses_unit_groups() {
        assert_eq!(parse_timespec("90s"), Ok(Duration::from_secs(90)));
        assert_eq!(parse_timespec("1m30s"), Ok(Duration::from_secs(90)));
        assert_eq!(parse_timespec("1h2m3s"), Ok(Duration::from_secs(3723)));
        assert_eq!(parse_timespec("250ms"), Ok(Duration::from_millis(250)));
    }

    #[test]
    fn rejects_garbage() {
        assert!(parse_timespec("").is_err());
        assert!(parse_timespec("abc").is_err());
        assert!(parse_timespec("10x").is_err());
        assert!(parse_timespec("1m30").is_err());
        assert!(parse_timespec("-5").is_err());
    }
}
