// Copyright 2026 U.S. Federal Government (in countries where recognized)
// SPDX-License-Identifier: Apache-2.0

//! Error types for the envelope codec.
//!
//! The three types map onto distinct outcomes for a caller: a [`DecodeError`] means the
//! client sent malformed bytes, an [`AuthError`] means the bytes were well formed but not
//! signed with the expected key, and a [`SigningError`] means the server could not produce
//! a response with the key it holds.

use core::fmt;

/// Errors raised while splitting an envelope or decoding its body.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum DecodeError {
    /// The envelope is shorter than the trailing authentication tag.
    EnvelopeTooShort {
        /// Number of bytes needed.
        needed: usize,
        /// Number of bytes available.
        available: usize,
    },
    /// The body is not a valid time packet encoding.
    MalformedBody(String),
}

/// Errors raised when an envelope fails authentication.
///
/// A missing or malformed key is reported here rather than as a decode failure:
/// the request itself may be perfectly valid.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum AuthError {
    /// No key material was supplied.
    MissingKey,
    /// The supplied key is not [`KEY_LEN`](crate::envelope::KEY_LEN) bytes long.
    InvalidKeyLength {
        /// Length of the supplied key.
        actual: usize,
    },
    /// The recomputed tag does not match the envelope tag.
    TagMismatch,
}

/// Errors raised while signing an outbound body.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum SigningError {
    /// The signing key has the wrong length.
    InvalidKeyLength {
        /// Required key length.
        expected: usize,
        /// Length of the supplied key.
        actual: usize,
    },
}

impl fmt::Display for DecodeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DecodeError::EnvelopeTooShort { needed, available } => {
                write!(f, "envelope too short: needed {needed} bytes, got {available}")
            }
            DecodeError::MalformedBody(detail) => write!(f, "malformed time packet: {detail}"),
        }
    }
}

impl fmt::Display for AuthError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AuthError::MissingKey => write!(f, "no key available for verification"),
            AuthError::InvalidKeyLength { actual } => {
                write!(f, "verification key has invalid length {actual}")
            }
            AuthError::TagMismatch => write!(f, "signature mismatch"),
        }
    }
}

impl fmt::Display for SigningError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SigningError::InvalidKeyLength { expected, actual } => {
                write!(f, "signing key must be {expected} bytes, got {actual}")
            }
        }
    }
}

impl std::error::Error for DecodeError {}
impl std::error::Error for AuthError {}
impl std::error::Error for SigningError {}

impl From<prost::DecodeError> for DecodeError {
    fn from(err: prost::DecodeError) -> DecodeError {
        DecodeError::MalformedBody(err.to_string())
    }
}
