// Copyright 2026 U.S. Federal Government (in countries where recognized)
// SPDX-License-Identifier: Apache-2.0

//! Shared test helpers for server integration tests.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use time_server::envelope;
use time_server::health::NtpHealthCheck;
use time_server::protocol::{TimePacket, TimestampFormat};
use time_server::server::{self, AppState, HttpSettings};
use time_server::time_sync::{
    CachedKeyStore, DEFAULT_FACTORY_DEVICE_ID, FeatureRule, InMemoryKeyBackend,
    OFFICE_ONLY_OVERRIDE, ServerMetrics, StaticFeatureFlags, TimeSyncService,
};
use time_server::unix_time;
use tokio::net::UdpSocket;

pub(crate) const DEFAULT_KEY: &[u8; 16] = b"1234567891234567";
pub(crate) const DEVICE_ID: &str = "ABCDEF0123456789";
pub(crate) const DEVICE_KEY: &[u8; 16] = b"0123456789abcdef";
pub(crate) const OFFICE_IP: &str = "199.87.82.114";
pub(crate) const PROXY_RANGE: &str = "10.0.0.0/8";

/// Build a service with one provisioned device, the office override enabled for the
/// default-factory identity, and the office range `199.87.82.0/24`.
pub(crate) fn build_service(metrics: Arc<ServerMetrics>) -> TimeSyncService {
    let store = CachedKeyStore::new(
        InMemoryKeyBackend::default().with_key(DEVICE_ID, *DEVICE_KEY),
        Duration::from_secs(120),
        Duration::from_millis(200),
        DEFAULT_KEY.to_vec(),
    );
    let mut rules = HashMap::new();
    rules.insert(
        OFFICE_ONLY_OVERRIDE.to_string(),
        FeatureRule {
            devices: vec![DEFAULT_FACTORY_DEVICE_ID.to_string()],
            groups: vec![],
        },
    );
    TimeSyncService::builder(Arc::new(store))
        .flags(Arc::new(StaticFeatureFlags::new(rules)))
        .metrics(metrics)
        .office_range("199.87.82.0/24".parse().expect("valid cidr"))
        .build()
}

/// Build the application state around [`build_service`] and a health check against
/// `ntp_hosts`. Peers in [`PROXY_RANGE`] are trusted proxies.
pub(crate) fn build_state(metrics: Arc<ServerMetrics>, ntp_hosts: Vec<String>) -> AppState {
    AppState {
        service: Arc::new(build_service(metrics)),
        health: Arc::new(NtpHealthCheck::new(
            ntp_hosts,
            Duration::from_secs(60),
            Duration::from_millis(200),
        )),
        trusted_proxies: Arc::new(vec![PROXY_RANGE.parse().expect("valid cidr")]),
    }
}

/// The current time as a packed NTP timestamp.
pub(crate) fn now_ntp() -> u64 {
    TimestampFormat::from(unix_time::Instant::now()).into()
}

/// Sign a request packet with `key`.
pub(crate) fn signed_request(packet: &TimePacket, key: &[u8]) -> Vec<u8> {
    envelope::sign(&envelope::encode_packet(packet), key).expect("valid key")
}

/// Spawn the HTTP server on an ephemeral loopback port and return its address.
///
/// The server runs in a background tokio task until the runtime is dropped.
#[allow(dead_code)]
pub(crate) async fn spawn_http_server(state: AppState) -> SocketAddr {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .expect("failed to bind test server");
    let addr = listener.local_addr().expect("failed to get local addr");
    let app = server::router(state, &HttpSettings::default());
    tokio::spawn(async move {
        let _ = server::serve(listener, app, std::future::pending()).await;
    });
    addr
}

/// Spawn a fake SNTP server whose clock runs `offset_secs` ahead of ours. Every reply
/// echoes the client's transmit timestamp as its origin.
#[allow(dead_code)]
pub(crate) async fn spawn_fake_ntp(offset_secs: i64) -> SocketAddr {
    let sock = UdpSocket::bind("127.0.0.1:0")
        .await
        .expect("bind failed");
    let addr = sock.local_addr().expect("local addr");
    tokio::spawn(async move {
        let mut buf = [0u8; 1024];
        while let Ok((len, src)) = sock.recv_from(&mut buf).await {
            if len < 48 {
                continue;
            }
            let now = unix_time::Instant::now();
            let shifted = unix_time::Instant::new(now.secs() + offset_secs, 0);
            let transmit: TimestampFormat = shifted.into();
            let mut reply = [0u8; 48];
            reply[0] = 0x24;
            reply[1] = 1;
            reply[24..32].copy_from_slice(&buf[40..48]);
            reply[32..40].copy_from_slice(&transmit.to_be_bytes());
            reply[40..48].copy_from_slice(&transmit.to_be_bytes());
            let _ = sock.send_to(&reply, src).await;
        }
    });
    addr
}

/// A bound socket that never answers, with its address. Keep the socket alive for
/// the duration of the test.
#[allow(dead_code)]
pub(crate) async fn silent_udp_addr() -> (UdpSocket, SocketAddr) {
    let sock = UdpSocket::bind("127.0.0.1:0")
        .await
        .expect("bind failed");
    let addr = sock.local_addr().expect("local addr");
    (sock, addr)
}
