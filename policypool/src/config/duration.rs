//! Human-readable duration parsing (e.g., "1500ms", "60s", "5m").

use std::time::Duration;

use thiserror::Error;

/// Error parsing a duration string.
#[derive(Debug, Error, PartialEq, Eq)]
#[error("Invalid duration '{input}' - expected format like '500ms', '60s', or '5m'")]
pub struct DurationParseError {
    input: String,
}

impl DurationParseError {
    fn new(input: impl Into<String>) -> Self {
        Self {
            input: input.into(),
        }
    }
}

/// Parse a human-readable duration.
///
/// Supports:
/// - `ms` suffix (milliseconds)
/// - `s` suffix or a bare number (seconds)
/// - `m` suffix (minutes)
/// - Case-insensitive, whitespace tolerant
///
/// # Examples
///
/// ```
/// use std::time::Duration;
/// use policypool::config::parse_duration;
///
/// assert_eq!(parse_duration("1500ms").unwrap(), Duration::from_millis(1500));
/// assert_eq!(parse_duration("60s").unwrap(), Duration::from_secs(60));
/// assert_eq!(parse_duration("2 m").unwrap(), Duration::from_secs(120));
/// assert_eq!(parse_duration("5").unwrap(), Duration::from_secs(5));
/// ```
pub fn parse_duration(s: &str) -> Result<Duration, DurationParseError> {
    let trimmed = s.trim();
    if trimmed.is_empty() {
        return Err(DurationParseError::new(s));
    }
    let lower = trimmed.to_lowercase();

    let (number, millis_per_unit) = if let Some(n) = lower.strip_suffix("ms") {
        (n, 1)
    } else if let Some(n) = lower.strip_suffix('s') {
        (n, 1_000)
    } else if let Some(n) = lower.strip_suffix('m') {
        (n, 60_000)
    } else {
        (lower.as_str(), 1_000)
    };

    let value: u64 = number
        .trim()
        .parse()
        .map_err(|_| DurationParseError::new(s))?;
    value
        .checked_mul(millis_per_unit)
        .map(Duration::from_millis)
        .ok_or_else(|| DurationParseError::new(s))
}

/// Format a duration in the largest unit that represents it exactly.
///
/// # Examples
///
/// ```
/// use std::time::Duration;
/// use policypool::config::format_duration;
///
/// assert_eq!(format_duration(Duration::from_millis(1500)), "1500ms");
/// assert_eq!(format_duration(Duration::from_secs(60)), "1m");
/// assert_eq!(format_duration(Duration::from_secs(45)), "45s");
/// ```
pub fn format_duration(duration: Duration) -> String {
    let millis = duration.as_millis();
    if millis == 0 {
        "0s".to_string()
    } else if millis % 60_000 == 0 {
        format!("{}m", millis / 60_000)
    } else if millis % 1_000 == 0 {
        format!("{}s", millis / 1_000)
    } else {
        format!("{}ms", millis)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_units() {
        assert_eq!(parse_duration("250ms").unwrap(), Duration::from_millis(250));
        assert_eq!(parse_duration("250MS").unwrap(), Duration::from_millis(250));
        assert_eq!(parse_duration("3s").unwrap(), Duration::from_secs(3));
        assert_eq!(parse_duration("3").unwrap(), Duration::from_secs(3));
        assert_eq!(parse_duration("10m").unwrap(), Duration::from_secs(600));
        assert_eq!(parse_duration("0s").unwrap(), Duration::ZERO);
    }

    #[test]
    fn test_parse_whitespace() {
        assert_eq!(parse_duration("  5 s ").unwrap(), Duration::from_secs(5));
        assert_eq!(parse_duration("100 ms").unwrap(), Duration::from_millis(100));
    }

    #[test]
    fn test_parse_invalid() {
        assert!(parse_duration("").is_err());
        assert!(parse_duration("fast").is_err());
        assert!(parse_duration("1.5s").is_err());
        assert!(parse_duration("-1s").is_err());
        assert!(parse_duration("2h").is_err());
    }

    #[test]
    fn test_format_picks_largest_exact_unit() {
        assert_eq!(format_duration(Duration::ZERO), "0s");
        assert_eq!(format_duration(Duration::from_millis(500)), "500ms");
        assert_eq!(format_duration(Duration::from_secs(90)), "90s");
        assert_eq!(format_duration(Duration::from_secs(300)), "5m");
    }
}
