// Copyright 2026 U.S. Federal Government (in countries where recognized)
// SPDX-License-Identifier: Apache-2.0

//! Health check comparing the local clock with upstream NTP servers.
//!
//! Hosts are queried in order with a minimal SNTP client exchange; the first host
//! that answers decides the result. The check is healthy iff the local clock is
//! within the tolerance of that server's transmit timestamp.

use std::io;
use std::net::SocketAddr;
use std::time::Duration;

use serde::Serialize;
use tokio::net::UdpSocket;
use tracing::{debug, error};

use crate::protocol::{ConstPackedSizeBytes, TimestampFormat};
use crate::unix_time;

/// Size of an NTPv4 header without extensions.
const SNTP_PACKET_LEN: usize = 48;

/// LI = 0, VN = 4, Mode = 3 (client).
const CLIENT_FIRST_BYTE: u8 = 0x23;

const MODE_SERVER: u8 = 4;

const ORIGIN_OFFSET: usize = 24;
const TRANSMIT_OFFSET: usize = 40;

/// Message when no upstream server answered.
pub const NTP_UNREACHABLE: &str = "Failed to get NTP time.";

/// Message when the local clock is outside the tolerance.
pub const NTP_MISMATCH: &str = "Server time does not match NTP.";

/// Result of one health check run.
#[derive(Clone, Debug, Eq, PartialEq, Serialize)]
pub struct HealthReport {
    /// Whether the check passed.
    pub healthy: bool,
    /// Failure message, if any.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    /// Upstream host that answered.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub host: Option<String>,
    /// Local clock minus upstream transmit time, in milliseconds.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub offset_ms: Option<i64>,
}

/// Upstream NTP comparison check.
#[derive(Clone, Debug)]
pub struct NtpHealthCheck {
    hosts: Vec<String>,
    tolerance: Duration,
    timeout: Duration,
}

impl NtpHealthCheck {
    /// Query `hosts` (`host:port`) in order, each bounded by `timeout`.
    pub fn new(hosts: Vec<String>, tolerance: Duration, timeout: Duration) -> Self {
        NtpHealthCheck {
            hosts,
            tolerance,
            timeout,
        }
    }

    /// Run the check.
    pub async fn check(&self) -> HealthReport {
        for host in &self.hosts {
            match tokio::time::timeout(self.timeout, query_transmit_time(host)).await {
                Ok(Ok(upstream)) => return self.compare(host, upstream),
                Ok(Err(e)) => error!(host = %host, error = %e, "error=ntp_host"),
                Err(_) => error!(host = %host, error = "timed out", "error=ntp_host"),
            }
        }
        HealthReport {
            healthy: false,
            message: Some(NTP_UNREACHABLE.to_string()),
            host: None,
            offset_ms: None,
        }
    }

    fn compare(&self, host: &str, upstream: unix_time::Instant) -> HealthReport {
        let local = unix_time::Instant::now();
        let offset_nanos = local.as_nanos() - upstream.as_nanos();
        let offset_ms = (offset_nanos / 1_000_000) as i64;
        let healthy = offset_nanos.unsigned_abs() < self.tolerance.as_nanos();
        debug!(host, offset_ms, healthy, "action=ntp-health-check");
        HealthReport {
            healthy,
            message: (!healthy).then(|| NTP_MISMATCH.to_string()),
            host: Some(host.to_string()),
            offset_ms: Some(offset_ms),
        }
    }
}

fn bind_addr_for(target: &SocketAddr) -> SocketAddr {
    match target {
        SocketAddr::V4(_) => SocketAddr::from(([0, 0, 0, 0], 0)),
        SocketAddr::V6(_) => SocketAddr::from(([0u16; 8], 0)),
    }
}

/// Build a client request carrying `t1` as its transmit timestamp.
fn build_request(t1: TimestampFormat) -> [u8; SNTP_PACKET_LEN] {
    let mut buf = [0u8; SNTP_PACKET_LEN];
    buf[0] = CLIENT_FIRST_BYTE;
    buf[TRANSMIT_OFFSET..TRANSMIT_OFFSET + TimestampFormat::PACKED_SIZE_BYTES]
        .copy_from_slice(&t1.to_be_bytes());
    buf
}

fn read_timestamp(buf: &[u8], offset: usize) -> TimestampFormat {
    let mut bytes = [0u8; TimestampFormat::PACKED_SIZE_BYTES];
    bytes.copy_from_slice(&buf[offset..offset + TimestampFormat::PACKED_SIZE_BYTES]);
    TimestampFormat::from_be_bytes(bytes)
}

/// Validate a server reply and extract its transmit timestamp.
fn parse_response(buf: &[u8], t1: TimestampFormat) -> io::Result<TimestampFormat> {
    if buf.len() < SNTP_PACKET_LEN {
        return Err(io::Error::new(
            io::ErrorKind::InvalidData,
            format!("NTP response too short ({} bytes)", buf.len()),
        ));
    }
    if buf[0] & 0b111 != MODE_SERVER {
        return Err(io::Error::new(
            io::ErrorKind::InvalidData,
            "unexpected response mode",
        ));
    }
    if read_timestamp(buf, ORIGIN_OFFSET) != t1 {
        return Err(io::Error::new(
            io::ErrorKind::InvalidData,
            "origin timestamp mismatch: response does not match our request",
        ));
    }
    let transmit = read_timestamp(buf, TRANSMIT_OFFSET);
    if transmit.is_zero() {
        return Err(io::Error::new(
            io::ErrorKind::InvalidData,
            "server transmit timestamp is zero",
        ));
    }
    Ok(transmit)
}

async fn query_transmit_time(host: &str) -> io::Result<unix_time::Instant> {
    let target = tokio::net::lookup_host(host).await?.next().ok_or_else(|| {
        io::Error::new(
            io::ErrorKind::InvalidInput,
            "address resolved to no socket addresses",
        )
    })?;

    let sock = UdpSocket::bind(bind_addr_for(&target)).await?;
    let t1: TimestampFormat = unix_time::Instant::now().into();
    sock.send_to(&build_request(t1), target).await?;

    let mut recv_buf = [0u8; 1024];
    let (recv_len, src_addr) = sock.recv_from(&mut recv_buf[..]).await?;
    if src_addr.ip() != target.ip() {
        return Err(io::Error::new(
            io::ErrorKind::InvalidData,
            "response from unexpected source address",
        ));
    }
    let transmit = parse_response(&recv_buf[..recv_len], t1)?;
    Ok(unix_time::timestamp_to_instant(
        transmit,
        &unix_time::Instant::now(),
    ))
}
