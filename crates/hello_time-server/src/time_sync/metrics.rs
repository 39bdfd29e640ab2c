// Copyright 2026 U.S. Federal Government (in countries where recognized)
// SPDX-License-Identifier: Apache-2.0

//! Lock-free service metrics using atomic counters.
//!
//! All counters use relaxed ordering for maximum performance on the hot path.
//! Consumers that need a consistent snapshot should accept that individual
//! values are approximate when read concurrently.

use std::sync::Arc;
use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};
use std::time::Duration;

use serde::Serialize;
use tracing::info;

/// Monotonic counters recorded by the pipeline.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Counter {
    /// Time requests received.
    RequestsReceived,
    /// Signed responses returned.
    ResponsesSent,
    /// Requests rejected with 400.
    BadRequests,
    /// Requests rejected with 401.
    Unauthorized,
    /// Requests failed with 500.
    InternalErrors,
    /// Devices whose clock is outside the drift tolerance.
    ClockOutOfSync,
    /// Responses larger than the size warning threshold.
    OversizedResponses,
}

/// Distributions recorded by the pipeline.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Histogram {
    /// Device clock minus server receive time, in seconds.
    DriftSeconds,
    /// Signed response size, in bytes.
    ResponseBytes,
}

/// Where the pipeline sends its measurements.
pub trait MetricsSink: Send + Sync {
    /// Add one to `counter`.
    fn increment(&self, counter: Counter);
    /// Record one observation of `histogram`.
    fn record(&self, histogram: Histogram, value: i64);
}

/// Running count/sum/min/max of one distribution.
#[derive(Debug)]
pub struct AtomicHistogram {
    count: AtomicU64,
    sum: AtomicI64,
    min: AtomicI64,
    max: AtomicI64,
}

impl Default for AtomicHistogram {
    fn default() -> Self {
        AtomicHistogram {
            count: AtomicU64::new(0),
            sum: AtomicI64::new(0),
            min: AtomicI64::new(i64::MAX),
            max: AtomicI64::new(i64::MIN),
        }
    }
}

impl AtomicHistogram {
    fn record(&self, value: i64) {
        self.count.fetch_add(1, Ordering::Relaxed);
        self.sum.fetch_add(value, Ordering::Relaxed);
        self.min.fetch_min(value, Ordering::Relaxed);
        self.max.fetch_max(value, Ordering::Relaxed);
    }

    fn snapshot(&self) -> HistogramSnapshot {
        let count = self.count.load(Ordering::Relaxed);
        if count == 0 {
            return HistogramSnapshot::default();
        }
        HistogramSnapshot {
            count,
            sum: self.sum.load(Ordering::Relaxed),
            min: self.min.load(Ordering::Relaxed),
            max: self.max.load(Ordering::Relaxed),
        }
    }
}

/// Runtime service metrics, updated atomically on every request.
///
/// Create an instance with [`ServerMetrics::new()`], wrap in `Arc`, and hand it to the
/// pipeline as its [`MetricsSink`].
#[derive(Debug, Default)]
pub struct ServerMetrics {
    /// Total time requests received (valid + invalid).
    pub requests_received: AtomicU64,
    /// Total signed responses returned.
    pub responses_sent: AtomicU64,
    /// Requests rejected as bad requests.
    pub bad_requests: AtomicU64,
    /// Requests rejected as unauthorized.
    pub unauthorized: AtomicU64,
    /// Requests that failed with an internal error.
    pub internal_errors: AtomicU64,
    /// Requests from devices with an out-of-sync clock.
    pub clock_out_of_sync: AtomicU64,
    /// Responses above the size warning threshold.
    pub oversized_responses: AtomicU64,
    /// Observed drift in seconds.
    pub drift_seconds: AtomicHistogram,
    /// Response sizes in bytes.
    pub response_bytes: AtomicHistogram,
}

impl ServerMetrics {
    /// Create a new metrics instance with all counters at zero.
    pub fn new() -> Self {
        Self::default()
    }

    /// Return a point-in-time snapshot of all metrics.
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            requests_received: self.requests_received.load(Ordering::Relaxed),
            responses_sent: self.responses_sent.load(Ordering::Relaxed),
            bad_requests: self.bad_requests.load(Ordering::Relaxed),
            unauthorized: self.unauthorized.load(Ordering::Relaxed),
            internal_errors: self.internal_errors.load(Ordering::Relaxed),
            clock_out_of_sync: self.clock_out_of_sync.load(Ordering::Relaxed),
            oversized_responses: self.oversized_responses.load(Ordering::Relaxed),
            drift_seconds: self.drift_seconds.snapshot(),
            response_bytes: self.response_bytes.snapshot(),
        }
    }

    fn counter(&self, counter: Counter) -> &AtomicU64 {
        match counter {
            Counter::RequestsReceived => &self.requests_received,
            Counter::ResponsesSent => &self.responses_sent,
            Counter::BadRequests => &self.bad_requests,
            Counter::Unauthorized => &self.unauthorized,
            Counter::InternalErrors => &self.internal_errors,
            Counter::ClockOutOfSync => &self.clock_out_of_sync,
            Counter::OversizedResponses => &self.oversized_responses,
        }
    }
}

impl MetricsSink for ServerMetrics {
    #[inline]
    fn increment(&self, counter: Counter) {
        self.counter(counter).fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    fn record(&self, histogram: Histogram, value: i64) {
        match histogram {
            Histogram::DriftSeconds => self.drift_seconds.record(value),
            Histogram::ResponseBytes => self.response_bytes.record(value),
        }
    }
}

/// A point-in-time snapshot of one histogram.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Serialize)]
pub struct HistogramSnapshot {
    /// Number of observations.
    pub count: u64,
    /// Sum of observations.
    pub sum: i64,
    /// Smallest observation (0 when empty).
    pub min: i64,
    /// Largest observation (0 when empty).
    pub max: i64,
}

/// A point-in-time snapshot of service metrics (non-atomic, copyable).
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Serialize)]
pub struct MetricsSnapshot {
    /// Total time requests received.
    pub requests_received: u64,
    /// Total signed responses returned.
    pub responses_sent: u64,
    /// Requests rejected as bad requests.
    pub bad_requests: u64,
    /// Requests rejected as unauthorized.
    pub unauthorized: u64,
    /// Requests that failed with an internal error.
    pub internal_errors: u64,
    /// Requests from devices with an out-of-sync clock.
    pub clock_out_of_sync: u64,
    /// Responses above the size warning threshold.
    pub oversized_responses: u64,
    /// Observed drift in seconds.
    pub drift_seconds: HistogramSnapshot,
    /// Response sizes in bytes.
    pub response_bytes: HistogramSnapshot,
}

/// Log a metrics snapshot every `interval` until the runtime shuts down.
///
/// `prefix` namespaces the log line (e.g. `dev.time` in debug mode).
pub fn spawn_reporter(
    metrics: Arc<ServerMetrics>,
    interval: Duration,
    prefix: String,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        // The first tick completes immediately.
        ticker.tick().await;
        loop {
            ticker.tick().await;
            let snapshot = metrics.snapshot();
            match serde_json::to_string(&snapshot) {
                Ok(json) => info!(prefix = %prefix, metrics = %json, "action=report-metrics"),
                Err(e) => info!(prefix = %prefix, error = %e, "action=report-metrics"),
            }
        }
    })
}
