//! Tick-based time base shared by frames and the store.
//!
//! A tick is 100 ns. Tick zero is the Unix epoch (UTC). All calendar
//! bucketing in the store is done in UTC.

use chrono::{DateTime, Utc};

/// Timestamp in 100 ns ticks since the Unix epoch.
pub type Ticks = i64;

/// Number of ticks in one second.
pub const TICKS_PER_SECOND: Ticks = 10_000_000;

/// Number of ticks in one millisecond.
pub const TICKS_PER_MILLISECOND: Ticks = 10_000;

/// Convert ticks to a UTC timestamp.
pub fn to_datetime(ticks: Ticks) -> DateTime<Utc> {
    let secs = ticks.div_euclid(TICKS_PER_SECOND);
    let nanos = (ticks.rem_euclid(TICKS_PER_SECOND) * 100) as u32;
    // i64 ticks span roughly +/- 29k years, well inside chrono's range.
    DateTime::from_timestamp(secs, nanos).unwrap_or_default()
}

/// Convert a UTC timestamp to ticks (sub-tick precision is truncated).
///
/// Saturates at `Ticks::MIN`/`Ticks::MAX` outside the representable range.
pub fn from_datetime(dt: DateTime<Utc>) -> Ticks {
    let secs = dt.timestamp();
    secs.checked_mul(TICKS_PER_SECOND)
        .and_then(|ticks| ticks.checked_add(Ticks::from(dt.timestamp_subsec_nanos() / 100)))
        .unwrap_or(if secs < 0 { Ticks::MIN } else { Ticks::MAX })
}

/// Start of the whole second containing `ticks`.
pub fn floor_second(ticks: Ticks) -> Ticks {
    ticks - ticks.rem_euclid(TICKS_PER_SECOND)
}

/// Convert a tick span to seconds.
pub fn ticks_to_seconds(ticks: Ticks) -> f64 {
    ticks as f64 / TICKS_PER_SECOND as f64
}

/// Convert seconds to ticks, rounding to the nearest tick.
pub fn seconds_to_ticks(seconds: f64) -> Ticks {
    (seconds * TICKS_PER_SECOND as f64).round() as Ticks
}
