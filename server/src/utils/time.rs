//! Time utility functions

use chrono::{DateTime, TimeZone, Utc};

/// Convert nanoseconds since Unix epoch to DateTime<Utc>
pub fn nanos_to_datetime(nanos: u64) -> DateTime<Utc> {
    let secs = (nanos / 1_000_000_000) as i64;
    let nsecs = (nanos % 1_000_000_000) as u32;
    Utc.timestamp_opt(secs, nsecs).single().unwrap_or_else(|| {
        tracing::warn!(nanos, "Invalid timestamp, using epoch");
        DateTime::UNIX_EPOCH
    })
}

/// Convert nanoseconds since Unix epoch to ISO 8601 string (microsecond precision)
pub fn nanos_to_iso(nanos: u64) -> String {
    nanos_to_datetime(nanos).to_rfc3339_opts(chrono::SecondsFormat::Micros, true)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Datelike;

    #[test]
    fn test_nanos_to_datetime_epoch() {
        let dt = nanos_to_datetime(0);
        assert_eq!(dt.year(), 1970);
        assert_eq!(dt.month(), 1);
        assert_eq!(dt.day(), 1);
    }

    #[test]
    fn test_nanos_to_datetime_with_subsecond() {
        let dt = nanos_to_datetime(1_500_000_000);
        assert_eq!(dt.timestamp(), 1);
        assert_eq!(dt.timestamp_subsec_nanos(), 500_000_000);
    }

    #[test]
    fn test_nanos_to_iso_micro_precision() {
        // 2024-01-01 00:00:00.123456789 UTC
        let nanos = 1_704_067_200_123_456_789_u64;
        assert_eq!(nanos_to_iso(nanos), "2024-01-01T00:00:00.123456Z");
    }
}
