// Copyright 2026 U.S. Federal Government (in countries where recognized)
// SPDX-License-Identifier: Apache-2.0

//! Transport-independent time sync logic, used by the HTTP surface in [`crate::server`].
//!
//! Provides device identity, key resolution with its caching store, clock drift
//! detection, the collaborator traits (flags, groups, metrics, audit events), and
//! the request pipeline that composes them.

mod drift;
mod events;
mod flags;
mod identity;
mod key_resolver;
mod key_store;
mod metrics;
mod network;
mod pipeline;

pub use self::drift::{DEFAULT_TOLERANCE_HOURS, drift_seconds, is_out_of_sync, to_datetime};
pub use self::events::{ChannelEventLogger, EventLogger, RequestEvent};
pub use self::flags::{
    FeatureFlags, FeatureRule, GroupMembership, OFFICE_ONLY_OVERRIDE, PRINT_RAW_PB,
    StaticFeatureFlags, StaticGroups,
};
pub use self::identity::{DEFAULT_FACTORY_DEVICE_ID, DeviceIdentity, FeatureContext};
pub use self::key_resolver::{KeyResolver, LookupPolicy};
pub use self::key_store::{
    CachedKeyStore, InMemoryKeyBackend, KeyBackend, KeyProvenance, KeyRecord, KeyStore,
};
pub use self::metrics::{
    Counter, Histogram, HistogramSnapshot, MetricsSink, MetricsSnapshot, ServerMetrics,
    spawn_reporter,
};
pub use self::network::{IpNet, in_any};
pub use self::pipeline::{FIRMWARE_DEFAULT, TimeSyncRequest, TimeSyncService, TimeSyncServiceBuilder};
