// Copyright 2026 U.S. Federal Government (in countries where recognized)
// SPDX-License-Identifier: Apache-2.0

//! Service configuration.
//!
//! [`ServiceConfig`] is read with the `config` crate from an optional file (TOML or
//! YAML, picked by extension) overlaid with `HELLO_TIME__`-prefixed environment
//! variables. Every field has a default, so an empty configuration is valid.
//!
//! ```
//! use time_server::config::ServiceConfig;
//!
//! let config = ServiceConfig::from_toml_str(
//!     r#"
//!     office_ip_ranges = ["199.87.82.0/24"]
//!
//!     [[keys]]
//!     device_id = "ABCDEF0123456789"
//!     key_hex = "00112233445566778899aabbccddeeff"
//!     "#,
//! )
//! .unwrap();
//! config.validate().unwrap();
//! assert_eq!(config.key_cache_ttl_secs, 120);
//! ```

use std::collections::HashMap;
use std::net::SocketAddr;
use std::path::Path;
use std::time::Duration;

use config::{Config, Environment, File, FileFormat};
use serde::{Deserialize, Serialize};

use crate::envelope::KEY_LEN;
use crate::error::ConfigError;
use crate::time_sync::{FeatureRule, IpNet};

/// Environment variable prefix; nested keys are separated by `__`.
pub const ENV_PREFIX: &str = "HELLO_TIME";

/// A device key provisioned through configuration.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub struct KeyEntry {
    /// Device identity.
    pub device_id: String,
    /// Key bytes as hex.
    pub key_hex: String,
}

/// A named group and its members (device ids or IP addresses).
#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub struct GroupEntry {
    /// Group name.
    pub name: String,
    /// Device ids or IP addresses in the group.
    #[serde(default)]
    pub members: Vec<String>,
}

/// A feature flag and who it is enabled for.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub struct FeatureEntry {
    /// Flag name.
    pub name: String,
    /// Device ids the flag is enabled for.
    #[serde(default)]
    pub devices: Vec<String>,
    /// Groups the flag is enabled for.
    #[serde(default)]
    pub groups: Vec<String>,
}

/// Complete service configuration.
#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct ServiceConfig {
    /// HTTP bind address.
    #[serde(default = "default_listen_addr")]
    pub listen_addr: String,

    /// Development mode: namespaces metrics under `dev`.
    #[serde(default)]
    pub debug: bool,

    /// Log filter used when `RUST_LOG` is unset.
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Periodic metrics reporting on/off.
    #[serde(default)]
    pub metrics_enabled: bool,

    /// Metrics reporting interval in seconds.
    #[serde(default = "default_metrics_report_interval_secs")]
    pub metrics_report_interval_secs: u64,

    /// Clock drift tolerance in hours.
    #[serde(default = "default_drift_tolerance_hours")]
    pub drift_tolerance_hours: i64,

    /// Key cache TTL in seconds.
    #[serde(default = "default_key_cache_ttl_secs")]
    pub key_cache_ttl_secs: u64,

    /// Fallback key for lenient lookups, as hex.
    #[serde(default = "default_key_hex")]
    pub default_key_hex: String,

    /// Office networks (CIDR) for the default-factory override.
    #[serde(default)]
    pub office_ip_ranges: Vec<String>,

    /// Reverse proxies (CIDR) whose forwarding headers are believed.
    #[serde(default)]
    pub trusted_proxies: Vec<String>,

    /// Timeout for key store and group lookups, in milliseconds.
    #[serde(default = "default_external_call_timeout_ms")]
    pub external_call_timeout_ms: u64,

    /// Requests slower than this are logged, in milliseconds.
    #[serde(default = "default_slow_request_threshold_ms")]
    pub slow_request_threshold_ms: u64,

    /// Whole-request timeout, in seconds.
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,

    /// Maximum request body size in bytes.
    #[serde(default = "default_max_body_bytes")]
    pub max_body_bytes: usize,

    /// Capacity of the audit event queue.
    #[serde(default = "default_event_buffer")]
    pub event_buffer: usize,

    /// Health check: allowed offset from upstream NTP, in milliseconds.
    #[serde(default = "default_ntp_clock_tolerance_ms")]
    pub ntp_clock_tolerance_ms: u64,

    /// Health check: per-host SNTP timeout, in milliseconds.
    #[serde(default = "default_ntp_client_timeout_ms")]
    pub ntp_client_timeout_ms: u64,

    /// Health check: upstream NTP servers, tried in order.
    #[serde(default = "default_ntp_hosts")]
    pub ntp_hosts: Vec<String>,

    /// Device keys held in memory.
    #[serde(default)]
    pub keys: Vec<KeyEntry>,

    /// Group membership table.
    #[serde(default)]
    pub groups: Vec<GroupEntry>,

    /// Feature flag rules.
    #[serde(default)]
    pub features: Vec<FeatureEntry>,
}

fn default_listen_addr() -> String {
    "0.0.0.0:8080".to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_metrics_report_interval_secs() -> u64 {
    60
}

fn default_drift_tolerance_hours() -> i64 {
    crate::time_sync::DEFAULT_TOLERANCE_HOURS
}

fn default_key_cache_ttl_secs() -> u64 {
    120
}

fn default_key_hex() -> String {
    hex::encode(b"1234567891234567")
}

fn default_external_call_timeout_ms() -> u64 {
    200
}

fn default_slow_request_threshold_ms() -> u64 {
    500
}

fn default_request_timeout_secs() -> u64 {
    30
}

fn default_max_body_bytes() -> usize {
    64 * 1024
}

fn default_event_buffer() -> usize {
    1024
}

fn default_ntp_clock_tolerance_ms() -> u64 {
    60_000
}

fn default_ntp_client_timeout_ms() -> u64 {
    2_000
}

fn default_ntp_hosts() -> Vec<String> {
    (0..4)
        .map(|n| format!("{n}.amazon.pool.ntp.org:123"))
        .collect()
}

impl Default for ServiceConfig {
    fn default() -> Self {
        ServiceConfig {
            listen_addr: default_listen_addr(),
            debug: false,
            log_level: default_log_level(),
            metrics_enabled: false,
            metrics_report_interval_secs: default_metrics_report_interval_secs(),
            drift_tolerance_hours: default_drift_tolerance_hours(),
            key_cache_ttl_secs: default_key_cache_ttl_secs(),
            default_key_hex: default_key_hex(),
            office_ip_ranges: Vec::new(),
            trusted_proxies: Vec::new(),
            external_call_timeout_ms: default_external_call_timeout_ms(),
            slow_request_threshold_ms: default_slow_request_threshold_ms(),
            request_timeout_secs: default_request_timeout_secs(),
            max_body_bytes: default_max_body_bytes(),
            event_buffer: default_event_buffer(),
            ntp_clock_tolerance_ms: default_ntp_clock_tolerance_ms(),
            ntp_client_timeout_ms: default_ntp_client_timeout_ms(),
            ntp_hosts: default_ntp_hosts(),
            keys: Vec::new(),
            groups: Vec::new(),
            features: Vec::new(),
        }
    }
}

impl ServiceConfig {
    /// Load from an optional file plus `HELLO_TIME__*` environment variables.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let mut builder = Config::builder();
        if let Some(path) = path {
            builder = builder.add_source(File::from(path));
        }
        let config = builder
            .add_source(
                Environment::with_prefix(ENV_PREFIX)
                    .separator("__")
                    .try_parsing(true)
                    .list_separator(",")
                    .with_list_parse_key("office_ip_ranges")
                    .with_list_parse_key("trusted_proxies")
                    .with_list_parse_key("ntp_hosts"),
            )
            .build()?
            .try_deserialize()?;
        Ok(config)
    }

    /// Load from TOML text only.
    pub fn from_toml_str(toml: &str) -> Result<Self, ConfigError> {
        let config = Config::builder()
            .add_source(File::from_str(toml, FileFormat::Toml))
            .build()?
            .try_deserialize()?;
        Ok(config)
    }

    /// Check every field that can be malformed.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.socket_addr()?;
        self.office_networks()?;
        self.trusted_proxy_networks()?;
        self.default_key()?;
        self.key_table()?;
        for (field, value) in [
            ("metrics_report_interval_secs", self.metrics_report_interval_secs),
            ("external_call_timeout_ms", self.external_call_timeout_ms),
            ("request_timeout_secs", self.request_timeout_secs),
            ("ntp_client_timeout_ms", self.ntp_client_timeout_ms),
        ] {
            if value == 0 {
                return Err(ConfigError::InvalidValue {
                    field,
                    detail: "must be greater than zero".to_string(),
                });
            }
        }
        if self.drift_tolerance_hours < 0 {
            return Err(ConfigError::InvalidValue {
                field: "drift_tolerance_hours",
                detail: "must not be negative".to_string(),
            });
        }
        if self.max_body_bytes == 0 {
            return Err(ConfigError::InvalidValue {
                field: "max_body_bytes",
                detail: "must be greater than zero".to_string(),
            });
        }
        Ok(())
    }

    /// The parsed bind address.
    pub fn socket_addr(&self) -> Result<SocketAddr, ConfigError> {
        self.listen_addr
            .parse()
            .map_err(|e: std::net::AddrParseError| ConfigError::InvalidValue {
                field: "listen_addr",
                detail: e.to_string(),
            })
    }

    /// The parsed office networks.
    pub fn office_networks(&self) -> Result<Vec<IpNet>, ConfigError> {
        self.office_ip_ranges.iter().map(|s| s.parse()).collect()
    }

    /// The parsed trusted proxy networks.
    pub fn trusted_proxy_networks(&self) -> Result<Vec<IpNet>, ConfigError> {
        self.trusted_proxies.iter().map(|s| s.parse()).collect()
    }

    /// The decoded fallback key.
    pub fn default_key(&self) -> Result<Vec<u8>, ConfigError> {
        decode_key("default", &self.default_key_hex)
    }

    /// Decoded device keys by device id.
    pub fn key_table(&self) -> Result<HashMap<String, Vec<u8>>, ConfigError> {
        self.keys
            .iter()
            .map(|entry| {
                decode_key(&entry.device_id, &entry.key_hex).map(|key| (entry.device_id.clone(), key))
            })
            .collect()
    }

    /// Group name → members.
    pub fn group_table(&self) -> HashMap<String, Vec<String>> {
        let mut table: HashMap<String, Vec<String>> = HashMap::new();
        for entry in &self.groups {
            table
                .entry(entry.name.clone())
                .or_default()
                .extend(entry.members.iter().cloned());
        }
        table
    }

    /// Flag name → rule.
    pub fn feature_rules(&self) -> HashMap<String, FeatureRule> {
        let mut rules: HashMap<String, FeatureRule> = HashMap::new();
        for entry in &self.features {
            let rule = rules.entry(entry.name.clone()).or_default();
            rule.devices.extend(entry.devices.iter().cloned());
            rule.groups.extend(entry.groups.iter().cloned());
        }
        rules
    }

    /// Namespace for metrics output.
    pub fn metrics_prefix(&self) -> String {
        if self.debug {
            "dev.hello-time".to_string()
        } else {
            "hello-time".to_string()
        }
    }

    /// Key cache TTL.
    pub fn key_cache_ttl(&self) -> Duration {
        Duration::from_secs(self.key_cache_ttl_secs)
    }

    /// Bound for external calls.
    pub fn external_call_timeout(&self) -> Duration {
        Duration::from_millis(self.external_call_timeout_ms)
    }

    /// Threshold for slow-request logging.
    pub fn slow_request_threshold(&self) -> Duration {
        Duration::from_millis(self.slow_request_threshold_ms)
    }

    /// Whole-request timeout.
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    /// Metrics reporting interval.
    pub fn metrics_report_interval(&self) -> Duration {
        Duration::from_secs(self.metrics_report_interval_secs)
    }
}

fn decode_key(device_id: &str, key_hex: &str) -> Result<Vec<u8>, ConfigError> {
    let key = hex::decode(key_hex.trim()).map_err(|e| ConfigError::InvalidKeyHex {
        device_id: device_id.to_string(),
        detail: e.to_string(),
    })?;
    if key.len() != KEY_LEN {
        return Err(ConfigError::InvalidKeyLength {
            device_id: device_id.to_string(),
            actual: key.len(),
        });
    }
    Ok(key)
}
