// Copyright 2026 U.S. Federal Government (in countries where recognized)
// SPDX-License-Identifier: Apache-2.0

//! Time synchronization endpoint for networked sensor devices.
//!
//! A device sends a signed time packet over HTTP carrying its own clock reading; the
//! service verifies it with the device's key and answers with a signed packet
//! carrying receive and transmit timestamps (an NTP-like exchange over HTTP).
//!
//! The request pipeline lives in [`time_sync`] and is independent of the transport.
//! [`server`] exposes it over axum, [`health`] compares the local clock with upstream
//! NTP, and [`config`] loads the service settings.

#![warn(missing_docs)]

// Re-export protocol types from time_proto for convenience.
pub use time_proto::{envelope, protocol, unix_time};

/// Service configuration (file + environment).
pub mod config;

/// Error types for the pipeline and configuration.
pub mod error;

/// Upstream NTP health check.
pub mod health;

/// HTTP routes, middleware and serving.
pub mod server;

/// Transport-independent time sync logic.
///
/// Provides device identity, key resolution, drift detection, collaborator traits,
/// and the request pipeline.
pub mod time_sync;
