//! Aggregation-period arithmetic.
//!
//! Samples accumulate in fixed five-minute windows whose boundaries are
//! truncations of Unix time to 300-second multiples. Everything that
//! derives a bucket key goes through [`period_start`].

use std::time::Duration;

use chrono::{DateTime, Utc};

/// Length of one aggregation window.
pub const AGGREGATION_PERIOD: Duration = Duration::from_secs(300);

/// Aggregation window length in whole seconds.
pub(crate) const PERIOD_SECS: i64 = AGGREGATION_PERIOD.as_secs() as i64;

/// Buckets outlive their period by one more, so a late flush of the
/// previous period can still read them.
pub const BUCKET_TTL: Duration = Duration::from_secs(2 * AGGREGATION_PERIOD.as_secs());

/// Start of the aggregation window containing `at`, shifted by `offset`
/// whole windows.
///
/// `period_start(now, -1)` is the start of the window a periodic tick
/// should flush.
#[must_use]
pub fn period_start(at: DateTime<Utc>, offset: i64) -> DateTime<Utc> {
    let secs = at.timestamp();
    let start = secs - secs.rem_euclid(PERIOD_SECS) + offset * PERIOD_SECS;
    // Out of range only for offsets in the hundreds of millennia.
    DateTime::from_timestamp(start, 0).unwrap_or(DateTime::<Utc>::MIN_UTC)
}
