//! Conversions for the two `DateTime` on-disk representations:
//! `date_time_ticks` (100-ns ticks since `0001-01-01`) and `unix_seconds`
//! (signed 32-bit seconds since the Unix epoch, saturating).
//!
//! Both are plain integer codecs over [`std::time::SystemTime`], no
//! calendar crate is pulled in, since nothing here needs more than epoch
//! arithmetic.

use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// 100-ns ticks per second, the unit `date_time_ticks` counts in.
pub const TICKS_PER_SECOND: i64 = 10_000_000;

/// Ticks between `0001-01-01T00:00:00` and the Unix epoch.
const TICKS_AT_UNIX_EPOCH: i64 = 621_355_968_000_000_000;

/// Converts a [`SystemTime`] to `date_time_ticks`: 100-ns ticks since
/// `0001-01-01`. Sub-100ns precision is truncated.
pub fn ticks_from_system_time(t: SystemTime) -> i64 {
    let (sign, duration) = match t.duration_since(UNIX_EPOCH) {
        Ok(d) => (1i64, d),
        Err(e) => (-1i64, e.duration()),
    };
    let secs_ticks = sign * duration.as_secs() as i64 * TICKS_PER_SECOND;
    let subsec_ticks = sign * (duration.subsec_nanos() / 100) as i64;
    TICKS_AT_UNIX_EPOCH + secs_ticks + subsec_ticks
}

/// Converts `date_time_ticks` back to a [`SystemTime`].
pub fn ticks_to_system_time(ticks: i64) -> SystemTime {
    let since_epoch = ticks - TICKS_AT_UNIX_EPOCH;
    let secs = since_epoch.div_euclid(TICKS_PER_SECOND);
    let rem_ticks = since_epoch.rem_euclid(TICKS_PER_SECOND);
    let duration = Duration::new(secs.unsigned_abs(), (rem_ticks * 100) as u32);
    if secs >= 0 {
        UNIX_EPOCH + duration
    } else {
        UNIX_EPOCH - duration
    }
}

/// Converts a [`SystemTime`] to `unix_seconds`: signed 32-bit seconds since
/// `1970-01-01`, saturating to `i32::MIN`/`i32::MAX` outside that range.
/// Sub-second precision is truncated.
pub fn unix_seconds_from_system_time(t: SystemTime) -> i32 {
    let signed_secs: i64 = match t.duration_since(UNIX_EPOCH) {
        Ok(d) => d.as_secs() as i64,
        Err(e) => -(e.duration().as_secs() as i64),
    };
    signed_secs.clamp(i32::MIN as i64, i32::MAX as i64) as i32
}

/// Converts `unix_seconds` back to a [`SystemTime`]. `0` round-trips to the
/// epoch exactly.
pub fn unix_seconds_to_system_time(seconds: i32) -> SystemTime {
    if seconds >= 0 {
        UNIX_EPOCH + Duration::from_secs(seconds as u64)
    } else {
        UNIX_EPOCH - Duration::from_secs((-(seconds as i64)) as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unix_seconds_epoch_round_trips_to_zero() {
        assert_eq!(unix_seconds_from_system_time(UNIX_EPOCH), 0);
        assert_eq!(unix_seconds_to_system_time(0), UNIX_EPOCH);
    }

    #[test]
    fn unix_seconds_saturates_above_i32_max() {
        let far_future = UNIX_EPOCH + Duration::from_secs(i32::MAX as u64 + 1_000);
        assert_eq!(unix_seconds_from_system_time(far_future), i32::MAX);
    }

    #[test]
    fn unix_seconds_truncates_sub_second_precision() {
        let t = UNIX_EPOCH + Duration::new(5, 999_999_999);
        assert_eq!(unix_seconds_from_system_time(t), 5);
    }

    #[test]
    fn ticks_round_trip_at_second_granularity() {
        let t = UNIX_EPOCH + Duration::from_secs(1_700_000_000);
        let ticks = ticks_from_system_time(t);
        let back = ticks_to_system_time(ticks);
        assert_eq!(back, t);
    }

    #[test]
    fn ticks_before_unix_epoch_are_negative_offsets() {
        let t = UNIX_EPOCH - Duration::from_secs(3600);
        let ticks = ticks_from_system_time(t);
        assert!(ticks < TICKS_AT_UNIX_EPOCH);
        assert_eq!(ticks_to_system_time(ticks), t);
    }
}

#[cfg(test)]
mod round_trip_law {
    use super::*;
    use proptest::prelude::*;

    proptest! {
        /// `from_unix_seconds ∘ to_unix_seconds = id` on every date in
        /// `[1970-01-01, 2038-01-19T03:14:07]`.
        #[test]
        fn unix_seconds_round_trips_within_32_bit_range(seconds in 0i32..=i32::MAX) {
            let t = unix_seconds_to_system_time(seconds);
            prop_assert_eq!(unix_seconds_from_system_time(t), seconds);
        }

        /// Ticks round-trip at second granularity for any second offset
        /// (positive or negative) reachable from the Unix epoch within
        /// `i32`'s range, covering `date_time_ticks`' pre-1970 domain that
        /// `unix_seconds` cannot represent at all.
        #[test]
        fn ticks_round_trip_for_any_second_offset(offset_secs in i32::MIN..=i32::MAX) {
            let t = if offset_secs >= 0 {
                UNIX_EPOCH + Duration::from_secs(offset_secs as u64)
            } else {
                UNIX_EPOCH - Duration::from_secs((-(offset_secs as i64)) as u64)
            };
            let ticks = ticks_from_system_time(t);
            prop_assert_eq!(ticks_to_system_time(ticks), t);
        }
    }
}
