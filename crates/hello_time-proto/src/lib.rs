// Copyright 2026 U.S. Federal Government (in countries where recognized)
// SPDX-License-Identifier: Apache-2.0

//! Time packet types and the signed envelope wire format used by sensor
//! devices to synchronize their clocks over HTTP.
//!
//! A request or response body on the wire is an [`envelope::Envelope`]: a
//! protobuf-encoded [`protocol::TimePacket`] followed by a fixed-length
//! HMAC-SHA256 tag computed over the packet bytes with the device key.

#![deny(unsafe_code)]
#![warn(missing_docs)]

/// Error types for envelope parsing, verification, and signing.
pub mod error;

/// Envelope codec: split, decode, verify, and sign the wire format.
pub mod envelope;

/// NTP timestamp and time packet types.
pub mod protocol;

/// Unix time conversion utilities for NTP timestamps.
pub mod unix_time;
