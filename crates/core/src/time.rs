#![forbid(unsafe_code)]

use time::OffsetDateTime;
use time::format_description::well_known::Rfc3339;

/// Current UTC instant as an RFC3339 string. Every persisted timestamp in a
/// root uses this format so lexicographic order equals chronological order.
pub fn now_rfc3339() -> String {
    OffsetDateTime::now_utc()
        .format(&Rfc3339)
        .unwrap_or_else(|_| "1970-01-01T00:00:00Z".to_string())
}

pub fn now_ms() -> i64 {
    let nanos = OffsetDateTime::now_utc().unix_timestamp_nanos();
    let ms = nanos / 1_000_000i128;
    if ms <= 0 {
        0
    } else if ms >= i64::MAX as i128 {
        i64::MAX
    } else {
        ms as i64
    }
}

pub fn ms_to_rfc3339(ts_ms: i64) -> String {
    let nanos = (ts_ms as i128) * 1_000_000i128;
    let dt = OffsetDateTime::from_unix_timestamp_nanos(nanos).unwrap_or(OffsetDateTime::UNIX_EPOCH);
    dt.format(&Rfc3339)
        .unwrap_or_else(|_| "1970-01-01T00:00:00Z".to_string())
}

/// Parse an RFC3339 timestamp back to unix milliseconds; 0 on parse failure
/// (older roots may carry empty strings in optional timestamp slots).
pub fn rfc3339_to_ms(ts: &str) -> i64 {
    match OffsetDateTime::parse(ts, &Rfc3339) {
        Ok(dt) => (dt.unix_timestamp_nanos() / 1_000_000i128) as i64,
        Err(_) => 0,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rfc3339_round_trip_preserves_millis_order() {
        let a = now_ms();
        let s = ms_to_rfc3339(a);
        let b = rfc3339_to_ms(&s);
        assert!((a - b).abs() < 1000, "{a} vs {b}");
    }

    #[test]
    fn bad_timestamp_parses_to_zero() {
        assert_eq!(rfc3339_to_ms(""), 0);
        assert_eq!(rfc3339_to_ms("not-a-time"), 0);
    }
}
