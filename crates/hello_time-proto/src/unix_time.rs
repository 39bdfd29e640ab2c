//! Unix-epoch instants and their conversion to and from NTP timestamps.
//!
//! Wire timestamps carry 32 bits of seconds since 1900, so the era is recovered
//! against a nearby pivot (the server clock) when reading them back.

use crate::protocol;
use std::time;

/// The number of seconds from 1st January 1900 UTC to the start of the Unix epoch.
pub const EPOCH_DELTA: i64 = 2_208_988_800;

/// The number of seconds in one NTP era (2^32 seconds, approximately 136 years).
///
/// Era 0 spans from 1900-01-01 00:00:00 UTC to 2036-02-07 06:28:15 UTC.
pub const ERA_SECONDS: i64 = 4_294_967_296;

const NANOS_PER_SEC: u64 = 1_000_000_000;

/// NTP fraction (units of 2^-32 s) to nanoseconds, rounding down.
fn fraction_to_nanos(fraction: u32) -> u32 {
    ((u64::from(fraction) * NANOS_PER_SEC) >> 32) as u32
}

/// Nanoseconds (below one second) to an NTP fraction, rounding to nearest.
fn nanos_to_fraction(nanos: u32) -> u32 {
    let scaled = (u64::from(nanos) << 32) + NANOS_PER_SEC / 2;
    (scaled / NANOS_PER_SEC).min(u64::from(u32::MAX)) as u32
}

/// An instant relative to the Unix epoch, in seconds with the fractional part in nanoseconds.
///
/// If the **Instant** describes some moment prior to the epoch, both the `secs` and
/// `subsec_nanos` components are negative.
///
/// The server captures its receive and transmit times as an `Instant` and converts them to
/// [`protocol::TimestampFormat`] for the wire.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Ord, PartialOrd)]
pub struct Instant {
    secs: i64,
    subsec_nanos: i32,
}

impl Instant {
    /// Create a new **Instant** given its `secs` and `subsec_nanos` components.
    ///
    /// To indicate a time following the epoch, both components must be positive; prior to it,
    /// both must be negative. Violating these invariants will result in a **panic!**.
    pub fn new(secs: i64, subsec_nanos: i32) -> Instant {
        if secs > 0 && subsec_nanos < 0 {
            panic!("invalid instant: secs was positive but subsec_nanos was negative");
        }
        if secs < 0 && subsec_nanos > 0 {
            panic!("invalid instant: secs was negative but subsec_nanos was positive");
        }
        Instant { secs, subsec_nanos }
    }

    /// The current system time.
    ///
    /// ## Example
    ///
    /// ```
    /// println!("{:?}", time_proto::unix_time::Instant::now());
    /// ```
    pub fn now() -> Self {
        match time::SystemTime::now().duration_since(time::UNIX_EPOCH) {
            Ok(duration) => Instant::new(duration.as_secs() as i64, duration.subsec_nanos() as i32),
            Err(sys_time_err) => {
                let before = sys_time_err.duration();
                Instant::new(-(before.as_secs() as i64), -(before.subsec_nanos() as i32))
            }
        }
    }

    /// The "seconds" component of the **Instant**.
    pub fn secs(&self) -> i64 {
        self.secs
    }

    /// The fractional component of the **Instant** in nanoseconds.
    pub fn subsec_nanos(&self) -> i32 {
        self.subsec_nanos
    }

    /// Nanoseconds since the Unix epoch (negative before it).
    pub fn as_nanos(&self) -> i128 {
        self.secs as i128 * 1_000_000_000 + self.subsec_nanos as i128
    }
}

/// Given a raw 32-bit NTP seconds value and a pivot `Instant`, return the absolute NTP
/// seconds by selecting the era closest to the pivot.
///
/// Assumes the timestamp is within half an era (~68 years) of the pivot.
fn era_aware_ntp_seconds(raw_seconds: u32, pivot: &Instant) -> i64 {
    let pivot_ntp = pivot.secs + EPOCH_DELTA;
    let raw = raw_seconds as i64;

    let pivot_era = pivot_ntp.div_euclid(ERA_SECONDS);
    let candidate = pivot_era * ERA_SECONDS + raw;

    let diff = candidate - pivot_ntp;
    if diff > ERA_SECONDS / 2 {
        candidate - ERA_SECONDS
    } else if diff < -(ERA_SECONDS / 2) {
        candidate + ERA_SECONDS
    } else {
        candidate
    }
}

/// Convert a [`protocol::TimestampFormat`] to an [`Instant`] using the given pivot
/// for era disambiguation.
///
/// Device clock readings are resolved against the server receive time so that a
/// timestamp just past the 2036 rollover is not read as 1900.
pub fn timestamp_to_instant(ts: protocol::TimestampFormat, pivot: &Instant) -> Instant {
    let secs = era_aware_ntp_seconds(ts.seconds, pivot) - EPOCH_DELTA;
    let nanos = fraction_to_nanos(ts.fraction) as i32;
    if secs < 0 && nanos > 0 {
        // Negative instants carry a negative fraction.
        Instant::new(secs + 1, nanos - NANOS_PER_SEC as i32)
    } else {
        Instant::new(secs, nanos)
    }
}

impl From<protocol::TimestampFormat> for Instant {
    /// Converts using the current system time as the era pivot.
    fn from(t: protocol::TimestampFormat) -> Self {
        timestamp_to_instant(t, &Instant::now())
    }
}

impl From<Instant> for protocol::TimestampFormat {
    /// Truncates to era-relative seconds; read it back with [`timestamp_to_instant`].
    fn from(t: Instant) -> Self {
        let nanos = t.as_nanos();
        let secs = nanos.div_euclid(NANOS_PER_SEC as i128) as i64 + EPOCH_DELTA;
        let subsec = nanos.rem_euclid(NANOS_PER_SEC as i128) as u32;
        protocol::TimestampFormat {
            seconds: secs.rem_euclid(ERA_SECONDS) as u32,
            fraction: nanos_to_fraction(subsec),
        }
    }
}
