use core::fmt;

use super::ConstPackedSizeBytes;

/// **NTP Timestamp Format** - a 32-bit unsigned seconds field spanning 136 years and a 32-bit
/// fraction field resolving 232 picoseconds.
///
/// The prime epoch is 0 h 1 January 1900 UTC, when all bits are zero. Devices carry the
/// timestamp as a single 64-bit integer with the seconds in the high word.
///
/// ### Layout
///
/// ```ignore
///  0                   1                   2                   3
///  0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1
/// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
/// |                            Seconds                            |
/// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
/// |                            Fraction                           |
/// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
/// ```
#[repr(C)]
#[derive(Clone, Copy, Debug, Default, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub struct TimestampFormat {
    /// Seconds since 1900-01-01 00:00:00 UTC (32-bit unsigned).
    pub seconds: u32,
    /// Fractional seconds (32-bit unsigned, resolution of ~232 picoseconds).
    pub fraction: u32,
}

impl TimestampFormat {
    /// Returns true when both the seconds and fraction are zero.
    pub fn is_zero(&self) -> bool {
        self.seconds == 0 && self.fraction == 0
    }

    /// Read a timestamp from 8 network-order bytes.
    pub fn from_be_bytes(bytes: [u8; 8]) -> Self {
        u64::from_be_bytes(bytes).into()
    }

    /// Write the timestamp as 8 network-order bytes.
    pub fn to_be_bytes(self) -> [u8; 8] {
        u64::from(self).to_be_bytes()
    }
}

impl ConstPackedSizeBytes for TimestampFormat {
    const PACKED_SIZE_BYTES: usize = 8;
}

impl From<u64> for TimestampFormat {
    fn from(value: u64) -> Self {
        TimestampFormat {
            seconds: (value >> 32) as u32,
            fraction: value as u32,
        }
    }
}

impl From<TimestampFormat> for u64 {
    fn from(ts: TimestampFormat) -> u64 {
        ((ts.seconds as u64) << 32) | ts.fraction as u64
    }
}

impl fmt::Display for TimestampFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{:08x}", self.seconds, self.fraction)
    }
}

/// The time packet exchanged between a device and the server (`NTPDataPacket` on the wire).
///
/// Every field is optional and presence is significant: a request must carry
/// `origin_ts`, and `receive_ts`/`transmit_ts` are only ever set by the server.
/// Each value is an NTP timestamp packed into a `u64` (see [`TimestampFormat`]).
#[derive(Clone, Copy, PartialEq, Eq, ::prost::Message)]
pub struct TimePacket {
    /// Time the device clock was last set or corrected.
    #[prost(fixed64, optional, tag = "1")]
    pub reference_ts: Option<u64>,
    /// Device clock reading when the request departed.
    #[prost(fixed64, optional, tag = "2")]
    pub origin_ts: Option<u64>,
    /// Server time when the request arrived.
    #[prost(fixed64, optional, tag = "3")]
    pub receive_ts: Option<u64>,
    /// Server time when the response departed.
    #[prost(fixed64, optional, tag = "4")]
    pub transmit_ts: Option<u64>,
}

impl TimePacket {
    /// The reference timestamp, if present.
    pub fn reference_timestamp(&self) -> Option<TimestampFormat> {
        self.reference_ts.map(TimestampFormat::from)
    }

    /// The origin timestamp, if present.
    pub fn origin_timestamp(&self) -> Option<TimestampFormat> {
        self.origin_ts.map(TimestampFormat::from)
    }

    /// The receive timestamp, if present.
    pub fn receive_timestamp(&self) -> Option<TimestampFormat> {
        self.receive_ts.map(TimestampFormat::from)
    }

    /// The transmit timestamp, if present.
    pub fn transmit_timestamp(&self) -> Option<TimestampFormat> {
        self.transmit_ts.map(TimestampFormat::from)
    }
}
