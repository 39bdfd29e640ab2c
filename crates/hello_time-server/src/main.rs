// Copyright 2026 U.S. Federal Government (in countries where recognized)
// SPDX-License-Identifier: Apache-2.0

// hello-time service binary.
//
// Run with:
//   RUST_LOG=info hello-time --config hello-time.toml
//
// Any setting can be overridden from the environment, e.g.
//   HELLO_TIME__LISTEN_ADDR=127.0.0.1:9000 hello-time

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use tracing::info;
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

use time_server::config::ServiceConfig;
use time_server::health::NtpHealthCheck;
use time_server::server::{self, AppState, HttpSettings};
use time_server::time_sync::{
    CachedKeyStore, ChannelEventLogger, InMemoryKeyBackend, ServerMetrics, StaticFeatureFlags,
    StaticGroups, TimeSyncService, spawn_reporter,
};

#[derive(Debug, Parser)]
#[command(name = "hello-time", version, about = "Signed time sync endpoint for sensor devices")]
struct Cli {
    /// Configuration file (TOML or YAML).
    #[arg(short, long, env = "HELLO_TIME_CONFIG")]
    config: Option<PathBuf>,

    /// Override the listen address.
    #[arg(long)]
    listen: Option<String>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let mut config =
        ServiceConfig::load(cli.config.as_deref()).context("failed to load configuration")?;
    if let Some(listen) = cli.listen {
        config.listen_addr = listen;
    }
    config.validate().context("invalid configuration")?;

    tracing_subscriber::registry()
        .with(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(config.log_level.as_str())),
        )
        .with(fmt::layer())
        .init();

    let metrics = Arc::new(ServerMetrics::new());
    if config.metrics_enabled {
        info!(prefix = %config.metrics_prefix(), "action=enable-metrics");
        spawn_reporter(
            metrics.clone(),
            config.metrics_report_interval(),
            config.metrics_prefix(),
        );
    }

    let (events, _drain) = ChannelEventLogger::spawn(config.event_buffer);

    let key_store = Arc::new(CachedKeyStore::new(
        InMemoryKeyBackend::new(config.key_table()?),
        config.key_cache_ttl(),
        config.external_call_timeout(),
        config.default_key()?,
    ));
    key_store.spawn_purger(config.key_cache_ttl().max(Duration::from_secs(1)));

    let service = TimeSyncService::builder(key_store)
        .flags(Arc::new(StaticFeatureFlags::new(config.feature_rules())))
        .groups(Arc::new(StaticGroups::new(&config.group_table())))
        .metrics(metrics)
        .events(Arc::new(events))
        .office_ranges(config.office_networks()?)
        .drift_tolerance_hours(config.drift_tolerance_hours)
        .external_call_timeout(config.external_call_timeout())
        .build();

    let health = NtpHealthCheck::new(
        config.ntp_hosts.clone(),
        Duration::from_millis(config.ntp_clock_tolerance_ms),
        Duration::from_millis(config.ntp_client_timeout_ms),
    );

    let state = AppState {
        service: Arc::new(service),
        health: Arc::new(health),
        trusted_proxies: Arc::new(config.trusted_proxy_networks()?),
    };
    let settings = HttpSettings {
        max_body_bytes: config.max_body_bytes,
        request_timeout: config.request_timeout(),
        slow_request_threshold: config.slow_request_threshold(),
    };
    let app = server::router(state, &settings);

    let listener = tokio::net::TcpListener::bind(config.socket_addr()?)
        .await
        .with_context(|| format!("failed to bind {}", config.listen_addr))?;

    server::serve(listener, app, shutdown_signal()).await?;
    info!("action=shutdown");
    Ok(())
}

async fn shutdown_signal() {
    if tokio::signal::ctrl_c().await.is_err() {
        // No signal handler available; run until killed.
        std::future::pending::<()>().await;
    }
}
