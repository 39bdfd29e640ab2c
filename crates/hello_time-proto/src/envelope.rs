// Copyright 2026 U.S. Federal Government (in countries where recognized)
// SPDX-License-Identifier: Apache-2.0

//! The signed envelope wire format.
//!
//! ```text
//! [body: variable (protobuf TimePacket)][tag: 32 bytes HMAC-SHA256(key, body)]
//! ```
//!
//! The tag covers the body bytes only. Keys are exactly [`KEY_LEN`] bytes.
//!
//! # Examples
//!
//! ```
//! use time_proto::envelope::{self, Envelope};
//! use time_proto::protocol::TimePacket;
//!
//! let key = [7u8; envelope::KEY_LEN];
//! let packet = TimePacket { origin_ts: Some(1), ..TimePacket::default() };
//! let signed = envelope::sign(&envelope::encode_packet(&packet), &key).unwrap();
//!
//! let parsed = Envelope::parse(&signed).unwrap();
//! assert!(parsed.verify(&key).is_ok());
//! assert_eq!(parsed.decode_body().unwrap(), packet);
//! ```

use hmac::{Hmac, Mac};
use prost::Message;
use sha2::Sha256;

use crate::error::{AuthError, DecodeError, SigningError};
use crate::protocol::TimePacket;

type HmacSha256 = Hmac<Sha256>;

/// Length of the trailing authentication tag.
pub const TAG_LEN: usize = 32;

/// Length of a device key.
pub const KEY_LEN: usize = 16;

/// A parsed, immutable envelope: body bytes followed by the authentication tag.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Envelope {
    bytes: Vec<u8>,
    body_len: usize,
}

impl Envelope {
    /// Split raw request bytes into body and tag.
    ///
    /// Fails only when fewer than [`TAG_LEN`] bytes are supplied; an empty body is allowed.
    pub fn parse(raw: &[u8]) -> Result<Envelope, DecodeError> {
        if raw.len() < TAG_LEN {
            return Err(DecodeError::EnvelopeTooShort {
                needed: TAG_LEN,
                available: raw.len(),
            });
        }
        Ok(Envelope {
            bytes: raw.to_vec(),
            body_len: raw.len() - TAG_LEN,
        })
    }

    /// The signed body bytes.
    pub fn body(&self) -> &[u8] {
        &self.bytes[..self.body_len]
    }

    /// The authentication tag.
    pub fn tag(&self) -> &[u8] {
        &self.bytes[self.body_len..]
    }

    /// Total envelope length in bytes.
    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    /// Always false: an envelope carries at least its tag.
    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    /// Decode the body as a [`TimePacket`].
    pub fn decode_body(&self) -> Result<TimePacket, DecodeError> {
        Ok(TimePacket::decode(self.body())?)
    }

    /// Check the tag against `key` in constant time.
    pub fn verify(&self, key: &[u8]) -> Result<(), AuthError> {
        if key.is_empty() {
            return Err(AuthError::MissingKey);
        }
        if key.len() != KEY_LEN {
            return Err(AuthError::InvalidKeyLength { actual: key.len() });
        }
        let mut mac = HmacSha256::new_from_slice(key)
            .map_err(|_| AuthError::InvalidKeyLength { actual: key.len() })?;
        mac.update(self.body());
        mac.verify_slice(self.tag())
            .map_err(|_| AuthError::TagMismatch)
    }
}

/// Serialize a packet into body bytes.
pub fn encode_packet(packet: &TimePacket) -> Vec<u8> {
    packet.encode_to_vec()
}

/// Sign `body` with `key`, returning `body || tag`.
pub fn sign(body: &[u8], key: &[u8]) -> Result<Vec<u8>, SigningError> {
    let tag = compute_tag(body, key)?;
    let mut signed = Vec::with_capacity(body.len() + TAG_LEN);
    signed.extend_from_slice(body);
    signed.extend_from_slice(&tag);
    Ok(signed)
}

fn compute_tag(body: &[u8], key: &[u8]) -> Result<[u8; TAG_LEN], SigningError> {
    let invalid = || SigningError::InvalidKeyLength {
        expected: KEY_LEN,
        actual: key.len(),
    };
    if key.len() != KEY_LEN {
        return Err(invalid());
    }
    let mut mac = HmacSha256::new_from_slice(key).map_err(|_| invalid())?;
    mac.update(body);
    Ok(mac.finalize().into_bytes().into())
}
