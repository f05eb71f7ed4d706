//! Wall-clock helpers shared by the clock authority and payload builders.

use core::fmt::{self, Write};

use chrono::{DateTime, Datelike, FixedOffset, TimeZone, Timelike};

/// Instant with the UTC offset it was observed in.
pub type Timestamp = DateTime<FixedOffset>;

/// Writes `2024-05-01T10:00:00-04:00`, dropping sub-second precision.
pub fn write_iso8601<W: Write>(out: &mut W, ts: &Timestamp) -> fmt::Result {
    write!(
        out,
        "{:04}-{:02}-{:02}T{:02}:{:02}:{:02}",
        ts.year(),
        ts.month(),
        ts.day(),
        ts.hour(),
        ts.minute(),
        ts.second()
    )?;
    write_offset(out, *ts.offset())
}

fn write_offset<W: Write>(out: &mut W, offset: FixedOffset) -> fmt::Result {
    let secs = offset.local_minus_utc();
    let sign = if secs < 0 { '-' } else { '+' };
    let minutes = secs.unsigned_abs() / 60;
    write!(out, "{}{:02}:{:02}", sign, minutes / 60, minutes % 60)
}

/// Parses RFC 3339 as served by Baby Buddy and the time service.
///
/// A trailing `Z` is accepted as UTC.
pub fn parse_timestamp(text: &str) -> Option<Timestamp> {
    DateTime::parse_from_rfc3339(text.trim()).ok()
}

/// Rebuilds a timestamp from its unix seconds and offset minutes.
pub fn from_unix(secs: i64, offset_minutes: i16) -> Option<Timestamp> {
    let offset = offset_from_minutes(offset_minutes)?;
    offset.timestamp_opt(secs, 0).single()
}

pub fn offset_from_minutes(minutes: i16) -> Option<FixedOffset> {
    FixedOffset::east_opt(i32::from(minutes) * 60)
}

pub fn offset_minutes(offset: FixedOffset) -> i16 {
    (offset.local_minus_utc() / 60) as i16
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn iso8601_keeps_negative_offset() {
        let ts = parse_timestamp("2024-05-01T10:00:00.455-04:00").unwrap();
        let mut out = heapless::String::<32>::new();
        write_iso8601(&mut out, &ts).unwrap();
        assert_eq!(out.as_str(), "2024-05-01T10:00:00-04:00");
    }

    #[test]
    fn zulu_suffix_parses_as_utc() {
        let ts = parse_timestamp("2024-05-01T14:00:00Z").unwrap();
        assert_eq!(ts.offset().local_minus_utc(), 0);
        assert_eq!(ts, parse_timestamp("2024-05-01T10:00:00-04:00").unwrap());
    }

    #[test]
    fn unix_round_trip_preserves_offset() {
        let ts = parse_timestamp("2025-01-02T03:04:05+05:30").unwrap();
        let back = from_unix(ts.timestamp(), offset_minutes(*ts.offset())).unwrap();
        assert_eq!(back.offset().local_minus_utc(), 5 * 3600 + 1800);
        assert_eq!(back.naive_local(), ts.naive_local());
    }

    #[test]
    fn garbage_is_rejected() {
        assert!(parse_timestamp("yesterday").is_none());
        assert!(offset_from_minutes(i16::MAX).is_none());
    }
}
