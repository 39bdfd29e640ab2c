// Copyright 2026 U.S. Federal Government (in countries where recognized)
// SPDX-License-Identifier: Apache-2.0

//! Clock drift detection.
//!
//! Drift is advisory: an out-of-sync device is counted and logged, and still gets
//! its response.

use chrono::{DateTime, TimeDelta, Utc};

use crate::unix_time;

/// Default tolerance before a device clock is considered out of sync.
pub const DEFAULT_TOLERANCE_HOURS: i64 = 2;

/// True iff `sample` lies strictly outside `reference ± tolerance_hours`.
///
/// The window boundaries themselves are in sync. A tolerance too large to represent
/// never flags.
pub fn is_out_of_sync(
    sample: DateTime<Utc>,
    reference: DateTime<Utc>,
    tolerance_hours: i64,
) -> bool {
    let Some(tolerance) = tolerance_hours.checked_abs().and_then(TimeDelta::try_hours) else {
        return false;
    };
    let too_late = reference
        .checked_add_signed(tolerance)
        .is_some_and(|upper| sample > upper);
    let too_early = reference
        .checked_sub_signed(tolerance)
        .is_some_and(|lower| sample < lower);
    too_late || too_early
}

/// Signed drift of `sample` relative to `reference`, in whole seconds.
pub fn drift_seconds(sample: DateTime<Utc>, reference: DateTime<Utc>) -> i64 {
    (sample - reference).num_seconds()
}

/// Convert a Unix instant to a UTC date-time.
pub fn to_datetime(instant: unix_time::Instant) -> DateTime<Utc> {
    let nanos = instant
        .as_nanos()
        .clamp(i64::MIN as i128, i64::MAX as i128) as i64;
    DateTime::from_timestamp_nanos(nanos)
}
