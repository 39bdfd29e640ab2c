// Copyright 2026 U.S. Federal Government (in countries where recognized)
// SPDX-License-Identifier: Apache-2.0

//! Per-request audit records.
//!
//! Logging an event never blocks the request: [`ChannelEventLogger`] hands the
//! record to a bounded queue and a background task writes it out. When the queue is
//! full the record is dropped.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::mpsc;
use tracing::{debug, info};

/// One audit record per time request.
#[derive(Clone, Debug, Eq, PartialEq, Serialize)]
pub struct RequestEvent {
    /// Device identity (empty when unknown).
    pub device_id: String,
    /// Source address as seen by the service.
    pub ip: Option<String>,
    /// Top board firmware version.
    pub top_fw: String,
    /// Middle board firmware version.
    pub middle_fw: String,
    /// Server receive time.
    pub received_at: DateTime<Utc>,
    /// HTTP status returned.
    pub status: u16,
    /// Reason code for failures, `ok` otherwise.
    pub outcome: &'static str,
    /// Device clock minus receive time, when the request got that far.
    pub drift_seconds: Option<i64>,
    /// Size of the signed response, on success.
    pub response_bytes: Option<usize>,
}

/// Fire-and-forget sink for audit records.
pub trait EventLogger: Send + Sync {
    /// Submit one record. Must not block.
    fn log(&self, event: RequestEvent);
}

/// An [`EventLogger`] backed by a bounded tokio channel.
#[derive(Clone, Debug)]
pub struct ChannelEventLogger {
    tx: mpsc::Sender<RequestEvent>,
    dropped: Arc<AtomicU64>,
}

impl ChannelEventLogger {
    /// Create a logger and its receiving end. The caller drains the receiver.
    pub fn channel(capacity: usize) -> (Self, mpsc::Receiver<RequestEvent>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        (
            ChannelEventLogger {
                tx,
                dropped: Arc::new(AtomicU64::new(0)),
            },
            rx,
        )
    }

    /// Create a logger whose records are written as JSON lines to the `audit` log target.
    pub fn spawn(capacity: usize) -> (Self, tokio::task::JoinHandle<()>) {
        let (logger, mut rx) = Self::channel(capacity);
        let handle = tokio::spawn(async move {
            while let Some(event) = rx.recv().await {
                match serde_json::to_string(&event) {
                    Ok(line) => info!(target: "audit", "{line}"),
                    Err(e) => debug!(error = %e, "action=audit-serialize"),
                }
            }
        });
        (logger, handle)
    }

    /// Number of records dropped because the queue was full or closed.
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}

impl EventLogger for ChannelEventLogger {
    fn log(&self, event: RequestEvent) {
        if let Err(e) = self.tx.try_send(event) {
            self.dropped.fetch_add(1, Ordering::Relaxed);
            debug!(error = %e, "action=audit-drop");
        }
    }
}
