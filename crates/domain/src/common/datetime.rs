//! RFC3339 timestamp parsing for stored rows.

use chrono::{DateTime, Utc};

/// Parses an RFC3339 timestamp string into UTC.
///
/// ```
/// use talekeeper_domain::common::parse_datetime;
/// use chrono::Datelike;
///
/// let dt = parse_datetime("2024-01-15T10:30:00Z").expect("valid timestamp");
/// assert_eq!(dt.year(), 2024);
/// ```
pub fn parse_datetime(s: &str) -> Result<DateTime<Utc>, chrono::ParseError> {
    DateTime::parse_from_rfc3339(s).map(|dt| dt.with_timezone(&Utc))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Datelike, Timelike};

    #[test]
    fn test_parse_datetime_converts_to_utc() {
        let dt = parse_datetime("2024-01-15T10:30:00+05:00").expect("valid");
        assert_eq!(dt.day(), 15);
        assert_eq!(dt.hour(), 5);
    }

    #[test]
    fn test_parse_datetime_invalid() {
        assert!(parse_datetime("not-a-date").is_err());
        assert!(parse_datetime("2024-01-15").is_err());
    }
}
