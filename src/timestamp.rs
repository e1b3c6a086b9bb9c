//! Classification of raw numeric time values found in realtime feeds.
//!
//! GTFS-Realtime stop time events are supposed to carry POSIX timestamps,
//! but feeds in the wild sometimes put schedule-style seconds-since-midnight
//! into the same field. The two ranges are far apart, so a cutoff heuristic
//! separates them; values between the ranges cannot be interpreted safely.

/// Interpretation of a raw time value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimestampKind {
    /// Seconds since local midnight of the service day. May exceed 86400
    /// for trips that run past midnight.
    TimeOfDay,
    /// Seconds since the Unix epoch.
    Absolute,
    /// Neither interpretation is safe. Callers fall back to the
    /// time-of-day reading and log the value.
    Indeterminate,
}

/// Classify a raw time value.
///
/// `time_of_day_ceiling` is the largest value still accepted as a
/// time-of-day (48:00:00 by default), `epoch_cutoff` the smallest value
/// read as a Unix timestamp (2001-09-09 by default). Both cutoffs come
/// from configuration so agencies with unusual feeds can move them.
pub fn classify_timestamp(value: i64, time_of_day_ceiling: i64, epoch_cutoff: i64) -> TimestampKind {
    if value >= epoch_cutoff {
        TimestampKind::Absolute
    } else if (0..=time_of_day_ceiling).contains(&value) {
        TimestampKind::TimeOfDay
    } else {
        TimestampKind::Indeterminate
    }
}
