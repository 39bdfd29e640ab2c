// Copyright 2026 U.S. Federal Government (in countries where recognized)
// SPDX-License-Identifier: Apache-2.0

//! Error types for the time synchronization service.
//!
//! Every pipeline failure is a [`TimeSyncError`]. It knows the HTTP status it maps to,
//! the short opaque body returned to the device, and a symbolic reason code for logs:
//!
//! ```
//! use axum::http::StatusCode;
//! use time_server::error::{TimeSyncError, ValidationError};
//!
//! let err = TimeSyncError::from(ValidationError::EmptyOriginTimestamp);
//! assert_eq!(err.status(), StatusCode::BAD_REQUEST);
//! assert_eq!(err.client_message(), "empty origin timestamp");
//! assert_eq!(err.reason(), "empty-origin-ts");
//! ```

// Re-export codec error types so callers only need this module.
pub use time_proto::error::{AuthError, DecodeError, SigningError};

use std::fmt;

use axum::http::StatusCode;

/// Errors that end a time sync request without a signed response.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum TimeSyncError {
    /// The envelope could not be split or its body could not be decoded.
    Decode {
        /// Which stage rejected the bytes.
        stage: DecodeStage,
        /// The underlying codec error.
        source: DecodeError,
    },
    /// The request decoded but is not acceptable.
    Validation(ValidationError),
    /// The envelope tag did not verify under the resolved key.
    Auth(AuthError),
    /// The response could not be signed.
    Signing(SigningError),
}

/// The decode stage that failed.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum DecodeStage {
    /// Splitting the raw bytes into body and tag.
    Envelope,
    /// Decoding the body as a time packet.
    Body,
}

/// Semantic rejections of a well-formed request.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum ValidationError {
    /// The request carried no origin timestamp.
    EmptyOriginTimestamp,
    /// No key is available for the device under the applicable lookup policy.
    KeyNotFound,
    /// The key store could not answer.
    KeyStore(KeyStoreError),
}

/// Failures of the key backend.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum KeyStoreError {
    /// The backend did not answer within the external call timeout.
    Timeout,
    /// The backend reported an error.
    Backend(String),
}

/// Invalid service configuration.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum ConfigError {
    /// A CIDR range could not be parsed.
    InvalidCidr {
        /// The offending value.
        value: String,
    },
    /// A key is not valid hex.
    InvalidKeyHex {
        /// Device the key belongs to (or `default`).
        device_id: String,
        /// Detail from the hex decoder.
        detail: String,
    },
    /// A key decoded to the wrong number of bytes.
    InvalidKeyLength {
        /// Device the key belongs to (or `default`).
        device_id: String,
        /// Decoded length.
        actual: usize,
    },
    /// A numeric setting is out of range.
    InvalidValue {
        /// Setting name.
        field: &'static str,
        /// Detail about why it is invalid.
        detail: String,
    },
    /// The configuration sources could not be read or deserialized.
    Load(String),
}

// ── Status and reason mapping ───────────────────────────────────────

impl TimeSyncError {
    /// HTTP status returned to the device.
    pub fn status(&self) -> StatusCode {
        match self {
            TimeSyncError::Decode { .. } | TimeSyncError::Validation(_) => StatusCode::BAD_REQUEST,
            TimeSyncError::Auth(_) => StatusCode::UNAUTHORIZED,
            TimeSyncError::Signing(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Opaque plain-text body returned to the device.
    pub fn client_message(&self) -> &'static str {
        match self {
            TimeSyncError::Decode { .. } => "bad request",
            TimeSyncError::Validation(ValidationError::EmptyOriginTimestamp) => {
                "empty origin timestamp"
            }
            TimeSyncError::Validation(_) | TimeSyncError::Auth(_) | TimeSyncError::Signing(_) => {
                ""
            }
        }
    }

    /// Symbolic reason code for logs.
    pub fn reason(&self) -> &'static str {
        match self {
            TimeSyncError::Decode {
                stage: DecodeStage::Envelope,
                ..
            } => "bad-envelope",
            TimeSyncError::Decode {
                stage: DecodeStage::Body,
                ..
            } => "bad-body",
            TimeSyncError::Validation(ValidationError::EmptyOriginTimestamp) => "empty-origin-ts",
            TimeSyncError::Validation(_) => "key-store-failure",
            TimeSyncError::Auth(_) => "signature-mismatch",
            TimeSyncError::Signing(_) => "signing-failure",
        }
    }
}

// ── Display implementations ─────────────────────────────────────────

impl fmt::Display for TimeSyncError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TimeSyncError::Decode { source, .. } => write!(f, "decode error: {source}"),
            TimeSyncError::Validation(e) => write!(f, "validation error: {e}"),
            TimeSyncError::Auth(e) => write!(f, "authentication error: {e}"),
            TimeSyncError::Signing(e) => write!(f, "signing error: {e}"),
        }
    }
}

impl fmt::Display for ValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ValidationError::EmptyOriginTimestamp => write!(f, "request has no origin timestamp"),
            ValidationError::KeyNotFound => write!(f, "no key found for device"),
            ValidationError::KeyStore(e) => write!(f, "key store failure: {e}"),
        }
    }
}

impl fmt::Display for KeyStoreError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            KeyStoreError::Timeout => write!(f, "key store timed out"),
            KeyStoreError::Backend(msg) => write!(f, "key store backend error: {msg}"),
        }
    }
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigError::InvalidCidr { value } => write!(f, "invalid CIDR range '{value}'"),
            ConfigError::InvalidKeyHex { device_id, detail } => {
                write!(f, "key for '{device_id}' is not valid hex: {detail}")
            }
            ConfigError::InvalidKeyLength { device_id, actual } => {
                write!(f, "key for '{device_id}' has invalid length {actual}")
            }
            ConfigError::InvalidValue { field, detail } => {
                write!(f, "invalid value for '{field}': {detail}")
            }
            ConfigError::Load(msg) => write!(f, "failed to load configuration: {msg}"),
        }
    }
}

// ── Error trait implementations ─────────────────────────────────────

impl std::error::Error for TimeSyncError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            TimeSyncError::Decode { source, .. } => Some(source),
            TimeSyncError::Validation(e) => Some(e),
            TimeSyncError::Auth(e) => Some(e),
            TimeSyncError::Signing(e) => Some(e),
        }
    }
}

impl std::error::Error for ValidationError {}
impl std::error::Error for KeyStoreError {}
impl std::error::Error for ConfigError {}

// ── From conversions ────────────────────────────────────────────────

impl From<ValidationError> for TimeSyncError {
    fn from(err: ValidationError) -> TimeSyncError {
        TimeSyncError::Validation(err)
    }
}

impl From<KeyStoreError> for ValidationError {
    fn from(err: KeyStoreError) -> ValidationError {
        ValidationError::KeyStore(err)
    }
}

impl From<AuthError> for TimeSyncError {
    fn from(err: AuthError) -> TimeSyncError {
        TimeSyncError::Auth(err)
    }
}

impl From<SigningError> for TimeSyncError {
    fn from(err: SigningError) -> TimeSyncError {
        TimeSyncError::Signing(err)
    }
}

impl From<config::ConfigError> for ConfigError {
    fn from(err: config::ConfigError) -> ConfigError {
        ConfigError::Load(err.to_string())
    }
}

// ── Tests ───────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    fn envelope_error() -> TimeSyncError {
        TimeSyncError::Decode {
            stage: DecodeStage::Envelope,
            source: DecodeError::EnvelopeTooShort {
                needed: 32,
                available: 3,
            },
        }
    }

    #[test]
    fn test_decode_errors_are_bad_request() {
        let e = envelope_error();
        assert_eq!(e.status(), StatusCode::BAD_REQUEST);
        assert_eq!(e.client_message(), "bad request");
        assert_eq!(e.reason(), "bad-envelope");

        let e = TimeSyncError::Decode {
            stage: DecodeStage::Body,
            source: DecodeError::MalformedBody("truncated".to_string()),
        };
        assert_eq!(e.status(), StatusCode::BAD_REQUEST);
        assert_eq!(e.reason(), "bad-body");
    }

    #[test]
    fn test_key_failures_are_opaque_bad_request() {
        for e in [
            TimeSyncError::from(ValidationError::KeyNotFound),
            TimeSyncError::from(ValidationError::from(KeyStoreError::Timeout)),
        ] {
            assert_eq!(e.status(), StatusCode::BAD_REQUEST);
            assert_eq!(e.client_message(), "");
            assert_eq!(e.reason(), "key-store-failure");
        }
    }

    #[test]
    fn test_auth_error_is_unauthorized() {
        let e = TimeSyncError::from(AuthError::TagMismatch);
        assert_eq!(e.status(), StatusCode::UNAUTHORIZED);
        assert_eq!(e.client_message(), "");
        assert_eq!(e.reason(), "signature-mismatch");
    }

    #[test]
    fn test_signing_error_is_internal() {
        let e = TimeSyncError::from(SigningError::InvalidKeyLength {
            expected: 16,
            actual: 0,
        });
        assert_eq!(e.status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(e.client_message(), "");
        assert_eq!(e.reason(), "signing-failure");
    }

    #[test]
    fn test_display_messages() {
        assert_eq!(
            envelope_error().to_string(),
            "decode error: envelope too short: needed 32 bytes, got 3"
        );
        assert_eq!(
            KeyStoreError::Backend("throttled".to_string()).to_string(),
            "key store backend error: throttled"
        );
        assert_eq!(
            ConfigError::InvalidCidr {
                value: "10.0.0.0/40".to_string()
            }
            .to_string(),
            "invalid CIDR range '10.0.0.0/40'"
        );
    }

    #[test]
    fn test_source_chain() {
        let e = TimeSyncError::from(AuthError::MissingKey);
        let source = std::error::Error::source(&e).unwrap();
        assert_eq!(source.to_string(), "no key available for verification");
    }
}
