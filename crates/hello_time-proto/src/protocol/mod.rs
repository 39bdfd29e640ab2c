//! Types that describe a time synchronization exchange.
//!
//! [`TimestampFormat`] is the 64-bit NTP timestamp from RFC 5905 and
//! [`TimePacket`] is the protobuf message carried inside a signed envelope.

/// Responses larger than this are logged as oversized (but still sent).
pub const MAX_RESPONSE_SIZE: usize = 2048;

/// Types that have a constant size when written to or read from bytes.
pub trait ConstPackedSizeBytes {
    /// The constant size in bytes when this type is packed for network transmission.
    const PACKED_SIZE_BYTES: usize;
}

mod types;

pub use self::types::*;
