//! Timestamp conversion between `SystemTime` and the "seconds since epoch"
//! float the v1 wire protocol uses (spec §4.4).

use std::time::{Duration, SystemTime, UNIX_EPOCH};

const NANOS_PER_SEC: f64 = 1_000_000_000.0;

/// Encode an instant as seconds-since-epoch, folding in nanosecond
/// precision via division by 10⁹, the way §4.4 specifies.
pub fn encode_timestamp(instant: SystemTime) -> f64 {
    let since_epoch = instant
        .duration_since(UNIX_EPOCH)
        .unwrap_or(Duration::ZERO);
    since_epoch.as_secs() as f64 + f64::from(since_epoch.subsec_nanos()) / NANOS_PER_SEC
}

/// Decode a seconds-since-epoch float back into a `SystemTime`.
pub fn decode_timestamp(seconds: f64) -> SystemTime {
    let whole_secs = seconds.trunc() as u64;
    let nanos = (seconds.fract() * NANOS_PER_SEC).round() as u32;
    UNIX_EPOCH + Duration::new(whole_secs, nanos)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_at_nanosecond_precision() {
        let original = UNIX_EPOCH + Duration::new(1_700_000_000, 123_456_789);
        let encoded = encode_timestamp(original);
        let decoded = decode_timestamp(encoded);
        let diff = decoded
            .duration_since(original)
            .unwrap_or_else(|e| e.duration());
        assert!(diff < Duration::from_nanos(1_000), "diff was {diff:?}");
    }

    #[test]
    fn encodes_whole_seconds_with_zero_fraction() {
        let original = UNIX_EPOCH + Duration::new(42, 0);
        assert_eq!(encode_timestamp(original), 42.0);
    }
}
