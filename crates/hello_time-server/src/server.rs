// Copyright 2026 U.S. Federal Government (in countries where recognized)
// SPDX-License-Identifier: Apache-2.0

//! HTTP surface of the time sync service (axum).
//!
//! | Route | Method | Description |
//! |-------|--------|-------------|
//! | `/` | POST | Time sync: signed envelope in, signed envelope out. |
//! | `/ping` | GET | Liveness probe, answers `pong`. |
//! | `/version` | GET | Crate version. |
//! | `/healthcheck` | GET | Upstream NTP comparison as JSON. |
//!
//! # Examples
//!
//! ```no_run
//! # async fn example() -> std::io::Result<()> {
//! use std::sync::Arc;
//! use std::time::Duration;
//! use time_server::health::NtpHealthCheck;
//! use time_server::server::{self, AppState, HttpSettings};
//! use time_server::time_sync::{CachedKeyStore, InMemoryKeyBackend, TimeSyncService};
//!
//! let store = CachedKeyStore::new(
//!     InMemoryKeyBackend::default(),
//!     Duration::from_secs(120),
//!     Duration::from_millis(200),
//!     b"1234567891234567".to_vec(),
//! );
//! let state = AppState {
//!     service: Arc::new(TimeSyncService::builder(Arc::new(store)).build()),
//!     health: Arc::new(NtpHealthCheck::new(vec![], Duration::from_secs(60), Duration::from_secs(2))),
//!     trusted_proxies: Arc::new(vec!["10.0.0.0/8".parse().unwrap()]),
//! };
//! let app = server::router(state, &HttpSettings::default());
//! let listener = tokio::net::TcpListener::bind("127.0.0.1:8080").await?;
//! server::serve(listener, app, std::future::pending()).await
//! # }
//! ```

use std::future::Future;
use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::Router;
use axum::body::{self, Body, Bytes};
use axum::extract::{ConnectInfo, Request, State};
use axum::http::{HeaderMap, HeaderValue, StatusCode, header};
use axum::middleware::{self, Next};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use tokio::net::TcpListener;
use tower_http::limit::RequestBodyLimitLayer;
use tower_http::timeout::TimeoutLayer;
use tracing::{info, warn};

use crate::health::NtpHealthCheck;
use crate::time_sync::{IpNet, TimeSyncRequest, TimeSyncService, in_any};
use crate::unix_time;

/// Device identifier header.
pub const SENSE_ID_HEADER: &str = "x-hello-sense-id";
/// Top board firmware version header.
pub const TOP_FW_HEADER: &str = "x-hello-top-fw-version";
/// Middle board firmware version header.
pub const MIDDLE_FW_HEADER: &str = "x-hello-middle-fw-version";

/// Media type of time requests.
pub const APPLICATION_PROTOBUF: &str = "application/x-protobuf";

/// Shared handler state.
#[derive(Clone)]
pub struct AppState {
    /// The time sync pipeline.
    pub service: Arc<TimeSyncService>,
    /// The upstream NTP check behind `/healthcheck`.
    pub health: Arc<NtpHealthCheck>,
    /// Peers whose `X-Forwarded-For` / `X-Real-IP` headers are believed.
    pub trusted_proxies: Arc<Vec<IpNet>>,
}

/// Transport limits applied to every route.
#[derive(Clone, Debug)]
pub struct HttpSettings {
    /// Maximum request body size in bytes.
    pub max_body_bytes: usize,
    /// Whole-request timeout.
    pub request_timeout: Duration,
    /// Requests slower than this are logged.
    pub slow_request_threshold: Duration,
}

impl Default for HttpSettings {
    fn default() -> Self {
        HttpSettings {
            max_body_bytes: 64 * 1024,
            request_timeout: Duration::from_secs(30),
            slow_request_threshold: Duration::from_millis(500),
        }
    }
}

/// Build the application router.
pub fn router(state: AppState, settings: &HttpSettings) -> Router {
    Router::new()
        .route("/", post(handle_time))
        .route("/ping", get(handle_ping))
        .route("/version", get(handle_version))
        .route("/healthcheck", get(handle_healthcheck))
        .with_state(state)
        .layer(middleware::from_fn_with_state(
            settings.slow_request_threshold,
            log_slow_requests,
        ))
        .layer(RequestBodyLimitLayer::new(settings.max_body_bytes))
        .layer(TimeoutLayer::with_status_code(
            StatusCode::REQUEST_TIMEOUT,
            settings.request_timeout,
        ))
}

/// Serve `app` on `listener` until `shutdown` completes.
pub async fn serve(
    listener: TcpListener,
    app: Router,
    shutdown: impl Future<Output = ()> + Send + 'static,
) -> std::io::Result<()> {
    if let Ok(addr) = listener.local_addr() {
        info!(%addr, "action=listen");
    }
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown)
    .await
}

fn plain_text(status: StatusCode, message: &'static str) -> Response {
    (
        status,
        [(header::CONTENT_TYPE, HeaderValue::from_static("text/plain"))],
        message,
    )
        .into_response()
}

fn header_str<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers.get(name).and_then(|v| v.to_str().ok())
}

/// The client address of a request that arrived from `peer`.
///
/// Forwarding headers are only read when `peer` is a trusted proxy. `X-Forwarded-For`
/// is walked from the right, skipping trusted hops, and the first other address wins.
/// Without a usable forwarded address, `X-Real-IP` and then the peer itself are used.
/// An unknown peer yields no address.
pub fn source_ip(
    headers: &HeaderMap,
    peer: Option<SocketAddr>,
    trusted_proxies: &[IpNet],
) -> Option<IpAddr> {
    let peer = peer?.ip();
    if !in_any(trusted_proxies, &peer) {
        return Some(peer);
    }

    let hops: Vec<&str> = headers
        .get_all("x-forwarded-for")
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|v| v.split(','))
        .map(str::trim)
        .filter(|hop| !hop.is_empty())
        .collect();
    for hop in hops.iter().rev() {
        match hop.parse::<IpAddr>() {
            Ok(ip) if in_any(trusted_proxies, &ip) => continue,
            Ok(ip) => return Some(ip),
            // A hop we cannot read ends the trusted chain.
            Err(_) => return Some(peer),
        }
    }

    header_str(headers, "x-real-ip")
        .and_then(|v| v.trim().parse().ok())
        .or(Some(peer))
}

fn accepts_content_type(headers: &HeaderMap) -> bool {
    match header_str(headers, header::CONTENT_TYPE.as_str()) {
        None => true,
        Some(value) => {
            let media = value.split(';').next().unwrap_or_default().trim();
            media.eq_ignore_ascii_case(APPLICATION_PROTOBUF)
                || media.eq_ignore_ascii_case("application/octet-stream")
        }
    }
}

async fn handle_time(State(state): State<AppState>, request: Request) -> Response {
    let received_at = unix_time::Instant::now();

    let (parts, body) = request.into_parts();
    if !accepts_content_type(&parts.headers) {
        return plain_text(StatusCode::UNSUPPORTED_MEDIA_TYPE, "unsupported media type");
    }
    let peer = parts
        .extensions
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| *addr);

    let bytes: Bytes = match body::to_bytes(body, usize::MAX).await {
        Ok(bytes) => bytes,
        Err(e) => {
            warn!(error = %e, "action=read-body");
            return plain_text(StatusCode::PAYLOAD_TOO_LARGE, "bad request");
        }
    };

    let headers = &parts.headers;
    let mut req = TimeSyncRequest::new(&bytes)
        .firmware(
            header_str(headers, TOP_FW_HEADER),
            header_str(headers, MIDDLE_FW_HEADER),
        )
        .received_at(received_at);
    req.device_id = header_str(headers, SENSE_ID_HEADER);
    req.source_ip = source_ip(headers, peer, &state.trusted_proxies);

    match state.service.handle(req).await {
        Ok(signed) => (
            StatusCode::OK,
            [(
                header::CONTENT_TYPE,
                HeaderValue::from_static("application/octet-stream"),
            )],
            Body::from(signed),
        )
            .into_response(),
        Err(err) => plain_text(err.status(), err.client_message()),
    }
}

async fn handle_ping() -> Response {
    plain_text(StatusCode::OK, "pong")
}

async fn handle_version() -> Response {
    plain_text(StatusCode::OK, env!("CARGO_PKG_VERSION"))
}

async fn handle_healthcheck(State(state): State<AppState>) -> Response {
    let report = state.health.check().await;
    let status = if report.healthy {
        StatusCode::OK
    } else {
        StatusCode::INTERNAL_SERVER_ERROR
    };
    (status, axum::Json(serde_json::json!({ "ntp": report }))).into_response()
}

async fn log_slow_requests(
    State(threshold): State<Duration>,
    request: Request,
    next: Next,
) -> Response {
    let method = request.method().clone();
    let uri = request.uri().clone();
    let started = Instant::now();
    let response = next.run(request).await;
    let elapsed = started.elapsed();
    if elapsed > threshold {
        warn!(
            %method,
            %uri,
            status = response.status().as_u16(),
            elapsed_ms = elapsed.as_millis() as u64,
            "action=slow-request"
        );
    }
    response
}
